/// Project overview:
/// - Keeps local files in sync with remote copies served over HTTP, GitHub Gist,
///   SFTP, FTP and Dropbox
/// - One worker thread per connection polls its resources on a fixed tick
/// - Downloads are staged next to the target, compared, then renamed into place
/// - Ownership, mode and the server's modification time are applied before the rename
///
/// Key behaviors:
/// - HTTP and Gist fetches are conditional (If-Modified-Since); Dropbox skips the
///   download when the content hash matches the installed file
/// - SFTP and FTP sessions can be kept open between polls (`persistent`)
/// - Pre/post-update commands run around each install with a timeout
/// - Failures are retried after `retry_interval`; a worker never gives up
pub mod backends;
pub mod compare;
pub mod config;
pub mod connection;
pub mod hooks;
pub mod install;
pub mod permissions;
pub mod resource;
pub mod sync;
pub mod system;
pub mod utils;

pub use backends::SyncError;
pub use config::{ConfigError, Defaults};
pub use connection::{Connection, ConnectionKind};
pub use resource::{Hook, Resource};
pub use sync::{Scheduler, UpdateStatus, Worker};
pub use system::{FileStat, OsSystem, System};
