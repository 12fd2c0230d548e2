use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::http::build_client;
use super::{DownloadBackend, Fetched, SyncError};
use crate::resource::Resource;
use crate::utils::read_full;

pub const DROPBOX_API_URL: &str = "https://api.dropboxapi.com";
pub const DROPBOX_CONTENT_URL: &str = "https://content.dropboxapi.com";

/// Block size of the Dropbox content hash.
pub const HASH_BLOCK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DropboxSettings {
    /// OAuth 2 access token.
    pub token: String,
    pub api_url: String,
    pub content_url: String,
    pub timeout: Duration,
}

impl DropboxSettings {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            token: token.into(),
            api_url: DROPBOX_API_URL.to_string(),
            content_url: DROPBOX_CONTENT_URL.to_string(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    content_hash: Option<String>,
}

/// Compute the Dropbox content hash of a local file.
///
/// The file is split into 4 MiB blocks, each block is hashed with SHA-256,
/// and the concatenated digests are hashed again.
pub fn content_hash(path: &Path) -> io::Result<String> {
    content_hash_reader(File::open(path)?)
}

pub fn content_hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut overall = Sha256::new();
    let mut block = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = read_full(&mut reader, &mut block)?;
        if n == 0 {
            break;
        }
        overall.update(Sha256::digest(&block[..n]));
        if n < block.len() {
            break;
        }
    }
    Ok(hex::encode(overall.finalize()))
}

/// JSON for the `Dropbox-API-Arg` header, with non-ASCII characters escaped.
fn api_arg(path: &str) -> String {
    let mut out = String::new();
    for c in json!({ "path": path }).to_string().chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

pub struct DropboxBackend {
    client: Client,
    settings: DropboxSettings,
}

impl DropboxBackend {
    pub fn new(settings: DropboxSettings) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(settings.timeout)?,
            settings,
        })
    }

    fn check(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(SyncError::Dropbox(format!("{status}: {}", body.trim())))
    }

    /// The `content_hash` Dropbox reports for `remote_path`.
    pub fn remote_content_hash(&self, remote_path: &str) -> Result<Option<String>, SyncError> {
        let response = self
            .client
            .post(format!("{}/2/files/get_metadata", self.settings.api_url))
            .bearer_auth(&self.settings.token)
            .json(&json!({ "path": remote_path, "include_media_info": false }))
            .send()?;
        let metadata: FileMetadata = Self::check(response)?.json()?;
        Ok(metadata.content_hash)
    }

    fn unchanged(&self, resource: &Resource) -> bool {
        let local = match content_hash(&resource.path) {
            Ok(hash) => hash,
            Err(e) => {
                debug!("{:?}: no local content hash: {e}", resource.path);
                return false;
            }
        };
        match self.remote_content_hash(&resource.remote_path) {
            Ok(Some(remote)) => remote == local,
            Ok(None) => false,
            Err(e) => {
                debug!("{}: metadata lookup failed: {e}", resource.remote_path);
                false
            }
        }
    }
}

impl DownloadBackend for DropboxBackend {
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError> {
        if self.unchanged(resource) {
            return Ok(Fetched::NotModified);
        }

        let response = self
            .client
            .post(format!("{}/2/files/download", self.settings.content_url))
            .bearer_auth(&self.settings.token)
            .header("Dropbox-API-Arg", api_arg(&resource.remote_path))
            .send()?;
        let mut response = Self::check(response)?;
        response.copy_to(staging)?;
        Ok(Fetched::Modified {
            last_modified: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_sha(data: &[u8]) -> String {
        hex::encode(Sha256::digest(Sha256::digest(data)))
    }

    #[test]
    fn test_content_hash_single_block() {
        let data = b"hello dropbox";
        assert_eq!(content_hash_reader(&data[..]).unwrap(), double_sha(data));
    }

    #[test]
    fn test_content_hash_empty() {
        assert_eq!(
            content_hash_reader(io::empty()).unwrap(),
            hex::encode(Sha256::digest(b""))
        );
    }

    #[test]
    fn test_content_hash_multiple_blocks() {
        let data: Vec<u8> = (0..HASH_BLOCK_SIZE + 10).map(|i| (i % 251) as u8).collect();
        let mut concat = Vec::new();
        concat.extend_from_slice(&Sha256::digest(&data[..HASH_BLOCK_SIZE]));
        concat.extend_from_slice(&Sha256::digest(&data[HASH_BLOCK_SIZE..]));
        assert_eq!(
            content_hash_reader(&data[..]).unwrap(),
            hex::encode(Sha256::digest(&concat))
        );
    }

    #[test]
    fn test_api_arg_escapes_non_ascii() {
        assert_eq!(api_arg("/a.txt"), r#"{"path":"/a.txt"}"#);
        assert_eq!(api_arg("/é"), r#"{"path":"/\u00e9"}"#);
    }
}
