//! Loading of the connection and resource files.
//!
//! Both files are TOML. Every top-level table of the connection file is a
//! connection, keyed by its unique name; every top-level table of the resource
//! file is a resource, keyed by its absolute install path. Tables keep their
//! file order, which is also the order workers poll resources in.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backends::dropbox::DropboxSettings;
use crate::backends::ftp::{FtpSettings, DEFAULT_FTP_PORT};
use crate::backends::http::GistSettings;
use crate::backends::sftp::{SshSettings, DEFAULT_MAX_PACKET_SIZE, DEFAULT_SSH_PORT};
use crate::backends::SyncError;
use crate::connection::{Connection, ConnectionKind};
use crate::resource::{Hook, Resource, DEFAULT_INTERVAL, DEFAULT_RETRY_INTERVAL};
use crate::utils::to_utc;

/// Configuration problems. All of them stop the process before it starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{origin}: No connections defined")]
    NoConnections { origin: String },
    #[error("{origin}: Section {section} missing {field}")]
    Missing {
        origin: String,
        section: String,
        field: &'static str,
    },
    #[error("{origin}: Section {section} invalid type {kind}")]
    InvalidType {
        origin: String,
        section: String,
        kind: String,
    },
    #[error("{origin}: Section {section} invalid connection {connection}")]
    UnknownConnection {
        origin: String,
        section: String,
        connection: String,
    },
    #[error("{origin}: Section {section} invalid perms {perms}")]
    InvalidPerms {
        origin: String,
        section: String,
        perms: String,
    },
    #[error("{origin}: Section {section}: {reason}")]
    Invalid {
        origin: String,
        section: String,
        reason: String,
    },
    #[error("{origin}: Section {section}: {source}")]
    Backend {
        origin: String,
        section: String,
        #[source]
        source: SyncError,
    },
}

/// Values used when the files leave a setting out.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub timeout: Duration,
    pub max_packet_size: usize,
    pub ssh_port: u16,
    pub ftp_port: u16,
    pub interval: Duration,
    pub retry_interval: Duration,
    pub hook_timeout: Duration,
    /// Where downloads are staged; next to each target when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            ssh_port: DEFAULT_SSH_PORT,
            ftp_port: DEFAULT_FTP_PORT,
            interval: DEFAULT_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            hook_timeout: Duration::from_secs(30),
            staging_dir: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
    timeout: Option<u64>,
    persistent: Option<bool>,
    hostname: Option<String>,
    port: Option<u16>,
    auth_username: Option<String>,
    auth_password: Option<String>,
    private_key: Option<PathBuf>,
    max_packet_size: Option<usize>,
    dropbox_token: Option<String>,
    api_url: Option<String>,
    content_url: Option<String>,
    gist_id: Option<String>,
    gist_username: Option<String>,
    github_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    connection: Option<String>,
    remote_path: Option<String>,
    interval: Option<u64>,
    retry_interval: Option<u64>,
    user: Option<String>,
    group: Option<String>,
    /// Octal text such as "0644"; bare integers are rejected.
    perms: Option<String>,
    pre_update_command: Option<String>,
    pre_update_timeout: Option<u64>,
    post_update_command: Option<String>,
    post_update_timeout: Option<u64>,
    gist_id: Option<String>,
    github_username: Option<String>,
    github_token: Option<String>,
}

fn parse_table(source: &str, origin: &str) -> Result<toml::Table, ConfigError> {
    source.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

fn decode<T: serde::de::DeserializeOwned>(value: toml::Value, origin: &str) -> Result<T, ConfigError> {
    value.try_into().map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

fn build_connection(
    name: &str,
    entry: ConnectionEntry,
    origin: &str,
    defaults: &Defaults,
) -> Result<Connection, ConfigError> {
    let missing = |field| ConfigError::Missing {
        origin: origin.to_string(),
        section: name.to_string(),
        field,
    };
    let backend = |source| ConfigError::Backend {
        origin: origin.to_string(),
        section: name.to_string(),
        source,
    };
    let timeout = secs(entry.timeout, defaults.timeout);
    let persistent = entry.persistent.unwrap_or(false);

    let kind = entry.kind.ok_or_else(|| missing("type"))?;
    let connection = match kind.as_str() {
        "http" => {
            let url = entry.url.ok_or_else(|| missing("url"))?;
            Connection::http(name, url, timeout).map_err(backend)?
        }
        "gist" => {
            let gist_id = entry.gist_id.ok_or_else(|| missing("gist_id"))?;
            let username = entry.gist_username.ok_or_else(|| missing("gist_username"))?;
            let mut settings = GistSettings::new(gist_id, username);
            if let Some(url) = entry.url {
                settings.url = url;
            }
            settings.token = entry.github_token;
            Connection::gist(name, settings, timeout).map_err(backend)?
        }
        "sftp" => {
            let hostname = entry.hostname.ok_or_else(|| missing("hostname"))?;
            let username = entry.auth_username.ok_or_else(|| missing("auth_username"))?;
            let mut settings = SshSettings::new(hostname, username, timeout);
            settings.port = entry.port.unwrap_or(defaults.ssh_port);
            settings.password = entry.auth_password;
            settings.private_key = entry.private_key;
            settings.max_packet_size = entry.max_packet_size.unwrap_or(defaults.max_packet_size);
            settings.persistent = persistent;
            Connection::sftp(name, settings)
        }
        "ftp" => {
            let hostname = entry.hostname.ok_or_else(|| missing("hostname"))?;
            let username = entry.auth_username.ok_or_else(|| missing("auth_username"))?;
            let password = entry.auth_password.ok_or_else(|| missing("auth_password"))?;
            let mut settings = FtpSettings::new(hostname, username, password, timeout);
            settings.port = entry.port.unwrap_or(defaults.ftp_port);
            settings.persistent = persistent;
            Connection::ftp(name, settings)
        }
        "dropbox" => {
            let token = entry.dropbox_token.ok_or_else(|| missing("dropbox_token"))?;
            let mut settings = DropboxSettings::new(token, timeout);
            if let Some(url) = entry.api_url {
                settings.api_url = url;
            }
            if let Some(url) = entry.content_url {
                settings.content_url = url;
            }
            Connection::dropbox(name, settings).map_err(backend)?
        }
        _ => {
            return Err(ConfigError::InvalidType {
                origin: origin.to_string(),
                section: name.to_string(),
                kind: kind.clone(),
            })
        }
    };

    Ok(match &defaults.staging_dir {
        Some(dir) => connection.with_staging_dir(dir),
        None => connection,
    })
}

/// Build the connections described by a connection file.
pub fn parse_connections(
    source: &str,
    origin: &str,
    defaults: &Defaults,
) -> Result<Vec<Connection>, ConfigError> {
    let mut connections = Vec::new();
    for (name, value) in parse_table(source, origin)? {
        if name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                origin: origin.to_string(),
                section: format!("{name:?}"),
                reason: "empty connection name".into(),
            });
        }
        let entry: ConnectionEntry = decode(value, origin)?;
        connections.push(build_connection(&name, entry, origin, defaults)?);
    }
    if connections.is_empty() {
        return Err(ConfigError::NoConnections {
            origin: origin.to_string(),
        });
    }
    Ok(connections)
}

fn parse_perms(perms: &str, origin: &str, section: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::InvalidPerms {
        origin: origin.to_string(),
        section: section.to_string(),
        perms: perms.to_string(),
    };
    let digits = perms.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(invalid()),
    }
}

fn build_resource(
    section: &str,
    entry: ResourceEntry,
    kind: ConnectionKind,
    origin: &str,
    defaults: &Defaults,
) -> Result<Resource, ConfigError> {
    let path = PathBuf::from(section);
    if !path.is_absolute() {
        return Err(ConfigError::Invalid {
            origin: origin.to_string(),
            section: section.to_string(),
            reason: "resource path must be absolute".into(),
        });
    }

    let mut resource = Resource::new(path);
    // Resume conditional fetching from what is already installed.
    if let Ok(metadata) = fs::metadata(&resource.path) {
        resource.last_modified_time = metadata.modified().ok().map(to_utc);
    }

    match entry.remote_path {
        Some(remote_path) => resource.remote_path = remote_path,
        None if kind == ConnectionKind::Http => {}
        None => {
            return Err(ConfigError::Missing {
                origin: origin.to_string(),
                section: section.to_string(),
                field: "remote_path",
            })
        }
    }

    resource.interval = secs(entry.interval, defaults.interval);
    resource.retry_interval = secs(entry.retry_interval, defaults.retry_interval);
    resource.user = entry.user;
    resource.group = entry.group;
    if let Some(perms) = entry.perms {
        resource.perms = parse_perms(&perms, origin, section)?;
    }
    resource.pre_update = entry.pre_update_command.map(|command| Hook {
        command,
        timeout: secs(entry.pre_update_timeout, defaults.hook_timeout),
    });
    resource.post_update = entry.post_update_command.map(|command| Hook {
        command,
        timeout: secs(entry.post_update_timeout, defaults.hook_timeout),
    });
    resource.gist_id = entry.gist_id;
    resource.github_username = entry.github_username;
    resource.github_token = entry.github_token;

    Ok(resource)
}

/// Attach the resources of a resource file to their connections.
pub fn parse_resources(
    source: &str,
    origin: &str,
    connections: &mut [Connection],
    defaults: &Defaults,
) -> Result<(), ConfigError> {
    for (section, value) in parse_table(source, origin)? {
        let entry: ResourceEntry = decode(value, origin)?;
        let name = entry.connection.clone().ok_or_else(|| ConfigError::Missing {
            origin: origin.to_string(),
            section: section.clone(),
            field: "connection",
        })?;
        let connection = connections
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::UnknownConnection {
                origin: origin.to_string(),
                section: section.clone(),
                connection: name.clone(),
            })?;
        let resource = build_resource(&section, entry, connection.kind, origin, defaults)?;
        connection.add_resource(resource);
    }
    Ok(())
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load both files and return the fully wired connections.
pub fn load(
    conn_file: &Path,
    res_file: &Path,
    defaults: &Defaults,
) -> Result<Vec<Connection>, ConfigError> {
    let conn_origin = conn_file.display().to_string();
    let mut connections = parse_connections(&read(conn_file)?, &conn_origin, defaults)?;
    let res_origin = res_file.display().to_string();
    parse_resources(&read(res_file)?, &res_origin, &mut connections, defaults)?;
    Ok(connections)
}
