use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use ssh2::{Session, Sftp};

use super::{resolve, DownloadBackend, Fetched, SyncError};
use crate::connection::HandleSlot;
use crate::resource::Resource;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1 << 15;

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub timeout: Duration,
    /// Largest read issued against a remote file.
    pub max_packet_size: usize,
    pub persistent: bool,
}

impl SshSettings {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>, timeout: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: None,
            private_key: None,
            timeout,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            persistent: false,
        }
    }
}

/// An authenticated SSH session with its SFTP channel.
pub struct SftpHandle {
    sftp: Sftp,
    _session: Session,
}

fn try_agent(session: &Session, username: &str) -> Result<(), ssh2::Error> {
    let mut agent = session.agent()?;
    agent.connect()?;
    agent.list_identities()?;
    for identity in agent.identities()? {
        if agent.userauth(username, &identity).is_ok() {
            break;
        }
    }
    let _ = agent.disconnect();
    Ok(())
}

/// Try the SSH agent, then the password, then the private key file.
fn authenticate(session: &Session, settings: &SshSettings) -> Result<(), SyncError> {
    let user = settings.username.as_str();

    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        if let Err(e) = try_agent(session, user) {
            debug!("[{}] ssh-agent authentication unavailable: {e}", settings.hostname);
        }
    }
    if !session.authenticated() {
        if let Some(password) = &settings.password {
            if let Err(e) = session.userauth_password(user, password) {
                debug!("[{}] password authentication failed: {e}", settings.hostname);
            }
        }
    }
    if !session.authenticated() {
        if let Some(key) = &settings.private_key {
            if let Err(e) = session.userauth_pubkey_file(user, None, key, None) {
                debug!("[{}] key {key:?} rejected: {e}", settings.hostname);
            }
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(SyncError::Auth {
            user: settings.username.clone(),
            host: settings.hostname.clone(),
        })
    }
}

fn connect(settings: &SshSettings) -> Result<SftpHandle, SyncError> {
    let addr = resolve(&settings.hostname, settings.port)?;
    let tcp = TcpStream::connect_timeout(&addr, settings.timeout)?;

    let mut session = Session::new()?;
    session.set_timeout(u32::try_from(settings.timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake()?;
    authenticate(&session, settings)?;

    let sftp = session.sftp()?;
    Ok(SftpHandle {
        sftp,
        _session: session,
    })
}

fn copy_remote(
    handle: &mut SftpHandle,
    remote_path: &str,
    staging: &mut File,
    packet_size: usize,
) -> Result<u64, SyncError> {
    let mut remote = handle.sftp.open(Path::new(remote_path))?;
    let mut buf = vec![0u8; packet_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = remote.read(&mut buf)?;
        if n == 0 {
            break;
        }
        staging.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

/// SFTP downloads over an SSH session.
///
/// SFTP has no cheap change signal, so every fetch reports new content and
/// leaves the decision to the byte comparison.
pub struct SftpBackend {
    settings: SshSettings,
    slot: HandleSlot<SftpHandle>,
}

impl SftpBackend {
    pub fn new(settings: SshSettings) -> Self {
        let slot = HandleSlot::new(settings.persistent);
        Self { settings, slot }
    }
}

impl DownloadBackend for SftpBackend {
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError> {
        let settings = &self.settings;
        let result = self
            .slot
            .acquire(|| connect(settings))
            .and_then(|handle| {
                copy_remote(handle, &resource.remote_path, staging, settings.max_packet_size)
            });
        if self.slot.finish(result.is_ok()).is_some() {
            debug!("[{}] SFTP session closed", settings.hostname);
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
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_failed_connect_leaves_no_session() {
        // Grab a free port and close it again so the connect is refused.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut settings = SshSettings::new("127.0.0.1", "nobody", Duration::from_secs(2));
        settings.port = port;
        settings.persistent = true;
        let mut backend = SftpBackend::new(settings);

        let dir = tempfile::tempdir().unwrap();
        let mut staging = File::create(dir.path().join("staging")).unwrap();
        let resource = Resource::new(dir.path().join("target")).with_remote_path("file");

        assert!(backend.fetch(&resource, &mut staging).is_err());
        assert!(!backend.has_session());
    }
}
