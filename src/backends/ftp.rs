use std::fs::File;
use std::io;
use std::time::Duration;

use log::debug;
use suppaftp::types::FileType;
use suppaftp::FtpStream;

use super::{resolve, DownloadBackend, Fetched, SyncError};
use crate::connection::HandleSlot;
use crate::resource::Resource;

pub const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub persistent: bool,
}

impl FtpSettings {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_FTP_PORT,
            username: username.into(),
            password: password.into(),
            timeout,
            persistent: false,
        }
    }
}

fn connect(settings: &FtpSettings) -> Result<FtpStream, SyncError> {
    let addr = resolve(&settings.hostname, settings.port)?;
    let mut ftp = FtpStream::connect_timeout(addr, settings.timeout)?;
    ftp.login(&settings.username, &settings.password)?;
    ftp.transfer_type(FileType::Binary)?;
    Ok(ftp)
}

fn retrieve(ftp: &mut FtpStream, remote_path: &str, staging: &mut File) -> Result<u64, SyncError> {
    let mut stream = ftp.retr_as_stream(remote_path)?;
    let bytes = io::copy(&mut stream, staging)?;
    ftp.finalize_retr_stream(stream)?;
    Ok(bytes)
}

/// FTP downloads, like SFTP without any change signal of its own.
pub struct FtpBackend {
    settings: FtpSettings,
    slot: HandleSlot<FtpStream>,
}

impl FtpBackend {
    pub fn new(settings: FtpSettings) -> Self {
        let slot = HandleSlot::new(settings.persistent);
        Self { settings, slot }
    }
}

impl DownloadBackend for FtpBackend {
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError> {
        let settings = &self.settings;
        let result = self
            .slot
            .acquire(|| connect(settings))
            .and_then(|ftp| retrieve(ftp, &resource.remote_path, staging));
        if let Some(mut ftp) = self.slot.finish(result.is_ok()) {
            if let Err(e) = ftp.quit() {
                debug!("[{}] QUIT failed: {e}", settings.hostname);
            }
        }

        let bytes = result?;
        debug!("[{}] {}: fetched {bytes} bytes", settings.hostname, resource.remote_path);
        Ok(Fetched::Modified {
            last_modified: None,
        })
    }

    fn has_session(&self) -> bool {
        self.slot.is_open()
    }

    fn release(&mut self) {
        if let Some(mut ftp) = self.slot.release() {
            let _ = ftp.quit();
        }
    }
}
