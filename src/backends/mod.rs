pub mod dropbox;
pub mod ftp;
pub mod http;
pub mod sftp;

use std::fs::File;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::resource::Resource;

pub use dropbox::DropboxBackend;
pub use ftp::FtpBackend;
pub use http::HttpBackend;
pub use sftp::SftpBackend;

/// Everything that can go wrong while refreshing a resource at runtime.
///
/// None of these are fatal: the worker logs them and reschedules the
/// resource with its retry interval.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Connection failed to {url} ({status})")]
    Status { url: String, status: u16 },
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),
    #[error("Authentication failed for {user}@{host}")]
    Auth { user: String, host: String },
    #[error("Could not resolve {0}")]
    Resolve(String),
    #[error("Dropbox API error: {0}")]
    Dropbox(String),
    #[error("Setting file permissions failed: {0}")]
    Permissions(String),
    #[error("Moving file onto {path:?} failed: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage} command failed: {reason}")]
    Hook { stage: &'static str, reason: String },
}

/// Resolve `host:port` to the first usable socket address.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr, SyncError> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| SyncError::Resolve(format!("{host}:{port}")))
}

/// What a download strategy learned from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// The server affirmatively reported no change; the staging file is unused.
    NotModified,
    /// New content was written to the staging file.
    Modified {
        /// Server modification time to commit once the content is accepted.
        last_modified: Option<DateTime<Utc>>,
    },
}

/// A per-protocol download strategy.
pub trait DownloadBackend {
    /// Write the remote content of `resource` into `staging`.
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError>;

    /// Whether a persistent session is currently open.
    fn has_session(&self) -> bool {
        false
    }

    /// Tear down any open session.
    fn release(&mut self) {}
}

/// The closed set of supported protocols, dispatched by variant.
pub enum Backend {
    Http(HttpBackend),
    Sftp(SftpBackend),
    Ftp(FtpBackend),
    Dropbox(DropboxBackend),
}

impl DownloadBackend for Backend {
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError> {
        match self {
            Backend::Http(b) => b.fetch(resource, staging),
            Backend::Sftp(b) => b.fetch(resource, staging),
            Backend::Ftp(b) => b.fetch(resource, staging),
            Backend::Dropbox(b) => b.fetch(resource, staging),
        }
    }

    fn has_session(&self) -> bool {
        match self {
            Backend::Http(b) => b.has_session(),
            Backend::Sftp(b) => b.has_session(),
            Backend::Ftp(b) => b.has_session(),
            Backend::Dropbox(b) => b.has_session(),
        }
    }

    fn release(&mut self) {
        match self {
            Backend::Http(b) => b.release(),
            Backend::Sftp(b) => b.release(),
            Backend::Ftp(b) => b.release(),
            Backend::Dropbox(b) => b.release(),
        }
    }
}
