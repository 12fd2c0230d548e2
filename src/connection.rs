use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::backends::dropbox::DropboxSettings;
use crate::backends::ftp::FtpSettings;
use crate::backends::http::GistSettings;
use crate::backends::sftp::SshSettings;
use crate::backends::{
    Backend, DownloadBackend, DropboxBackend, Fetched, FtpBackend, HttpBackend, SftpBackend,
    SyncError,
};
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Http,
    Gist,
    Sftp,
    Ftp,
    Dropbox,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Http => "http",
            ConnectionKind::Gist => "gist",
            ConnectionKind::Sftp => "sftp",
            ConnectionKind::Ftp => "ftp",
            ConnectionKind::Dropbox => "dropbox",
        };
        f.write_str(name)
    }
}

/// Holds at most one live client session.
///
/// When the connection is not persistent, the session is released after every
/// use. A failed operation always releases it so the next fetch reconnects.
#[derive(Debug)]
pub struct HandleSlot<T> {
    handle: Option<T>,
    persistent: bool,
}

impl<T> HandleSlot<T> {
    pub fn new(persistent: bool) -> Self {
        Self {
            handle: None,
            persistent,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Reuse the open session, or open a new one with `open`.
    pub fn acquire<E>(&mut self, open: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => open()?,
        };
        Ok(self.handle.insert(handle))
    }

    /// Finish one operation. Returns the session if it must now be closed.
    pub fn finish(&mut self, succeeded: bool) -> Option<T> {
        if self.persistent && succeeded {
            None
        } else {
            self.handle.take()
        }
    }

    pub fn release(&mut self) -> Option<T> {
        self.handle.take()
    }
}

/// Outcome of [`Connection::download`].
#[derive(Debug)]
pub enum Download {
    NotModified,
    Modified {
        /// Fetched content; deleted on drop unless persisted.
        staging: NamedTempFile,
        last_modified: Option<DateTime<Utc>>,
    },
}

/// A named remote endpoint and the resources mirrored from it.
pub struct Connection {
    pub name: String,
    pub kind: ConnectionKind,
    pub resources: Vec<Resource>,
    backend: Backend,
    staging_dir: Option<PathBuf>,
}

impl Connection {
    pub fn new(name: impl Into<String>, kind: ConnectionKind, backend: Backend) -> Self {
        Self {
            name: name.into(),
            kind,
            resources: Vec::new(),
            backend,
            staging_dir: None,
        }
    }

    pub fn http(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, SyncError> {
        let backend = HttpBackend::new(url, timeout)?;
        Ok(Self::new(name, ConnectionKind::Http, Backend::Http(backend)))
    }

    pub fn gist(
        name: impl Into<String>,
        settings: GistSettings,
        timeout: std::time::Duration,
    ) -> Result<Self, SyncError> {
        let backend = HttpBackend::gist(settings, timeout)?;
        Ok(Self::new(name, ConnectionKind::Gist, Backend::Http(backend)))
    }

    pub fn sftp(name: impl Into<String>, settings: SshSettings) -> Self {
        Self::new(
            name,
            ConnectionKind::Sftp,
            Backend::Sftp(SftpBackend::new(settings)),
        )
    }

    pub fn ftp(name: impl Into<String>, settings: FtpSettings) -> Self {
        Self::new(
            name,
            ConnectionKind::Ftp,
            Backend::Ftp(FtpBackend::new(settings)),
        )
    }

    pub fn dropbox(name: impl Into<String>, settings: DropboxSettings) -> Result<Self, SyncError> {
        let backend = DropboxBackend::new(settings)?;
        Ok(Self::new(
            name,
            ConnectionKind::Dropbox,
            Backend::Dropbox(backend),
        ))
    }

    /// Stage downloads in `dir` instead of next to each resource.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// The configured staging directory, if downloads are not staged next to targets.
    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn has_live_handle(&self) -> bool {
        self.backend.has_session()
    }

    /// Close the persistent session, if any.
    pub fn release_handle(&mut self) {
        self.backend.release();
    }

    fn staging_dir_for(&self, resource: &Resource) -> PathBuf {
        self.staging_dir
            .clone()
            .or_else(|| resource.path.parent().map(Path::to_path_buf))
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Fetch the resource at `index` into a fresh staging file.
    ///
    /// The staging file lives in the same directory as the install target by
    /// default so the final rename never crosses filesystems. It is removed
    /// whenever the fetch fails or reports no change.
    pub fn download(&mut self, index: usize) -> Result<Download, SyncError> {
        let resource = &self.resources[index];
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", self.name))
            .tempfile_in(self.staging_dir_for(resource))?;

        match self.backend.fetch(resource, staging.as_file_mut())? {
            Fetched::NotModified => Ok(Download::NotModified),
            Fetched::Modified { last_modified } => {
                staging.as_file_mut().sync_all()?;
                Ok(Download::Modified {
                    staging,
                    last_modified,
                })
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("resources", &self.resources.len())
            .field("staging_dir", &self.staging_dir)
            .field("live_handle", &self.has_live_handle())
            .finish()
    }
}
