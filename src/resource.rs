use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::utils::advance;

/// Default seconds between two successful polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Default seconds before retrying a failed poll.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// An external command run around an update, bounded by a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub command: String,
    pub timeout: Duration,
}

/// A single local file kept in sync with a remote source.
///
/// Resources are owned by exactly one [`crate::Connection`] and only its worker
/// touches the scheduling fields.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Absolute install target, also the resource's identity.
    pub path: PathBuf,
    /// Remote locator: URL sub-path, SFTP/FTP file, Dropbox path or gist file.
    pub remote_path: String,

    pub interval: Duration,
    pub retry_interval: Duration,
    pub next_update_time: DateTime<Utc>,
    /// Time of the last successful install.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Newest modification time reported by the server.
    pub last_modified_time: Option<DateTime<Utc>>,

    pub user: Option<String>,
    pub group: Option<String>,
    /// Octal file mode, 0 inherits from the installed file.
    pub perms: u32,

    pub pre_update: Option<Hook>,
    pub post_update: Option<Hook>,

    // Gist overrides of the connection settings.
    pub gist_id: Option<String>,
    pub github_username: Option<String>,
    pub github_token: Option<String>,
}

impl Resource {
    /// A resource that is due immediately, with default intervals.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remote_path: String::new(),
            interval: DEFAULT_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            next_update_time: DateTime::<Utc>::default(),
            last_update_time: None,
            last_modified_time: None,
            user: None,
            group: None,
            perms: 0,
            pre_update: None,
            post_update: None,
            gist_id: None,
            github_username: None,
            github_token: None,
        }
    }

    pub fn with_remote_path(mut self, remote_path: impl Into<String>) -> Self {
        self.remote_path = remote_path.into();
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_update_time
    }

    /// Schedule the next poll after a success.
    pub fn schedule_success(&mut self, now: DateTime<Utc>) {
        self.next_update_time = advance(now, self.interval);
    }

    /// Schedule the next poll after a failure.
    pub fn schedule_retry(&mut self, now: DateTime<Utc>) {
        self.next_update_time = advance(now, self.retry_interval);
    }

    /// Record a server modification time, keeping the newest one seen.
    pub fn record_last_modified(&mut self, time: DateTime<Utc>) {
        if self.last_modified_time.map_or(true, |current| time > current) {
            self.last_modified_time = Some(time);
        }
    }

    /// Whether `time` is strictly newer than what was last accepted.
    pub fn is_newer(&self, time: DateTime<Utc>) -> bool {
        self.last_modified_time.map_or(true, |current| time > current)
    }
}
