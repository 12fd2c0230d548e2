use std::fs::File;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;

use super::{DownloadBackend, Fetched, SyncError};
use crate::resource::Resource;
use crate::utils::{format_http_date, parse_http_date};

/// Official GitHub Gist raw content host.
pub const DEFAULT_GIST_URL: &str = "https://gist.githubusercontent.com";

#[derive(Debug, Clone)]
pub struct GistSettings {
    pub url: String,
    pub gist_id: String,
    pub username: String,
    pub token: Option<String>,
}

impl GistSettings {
    pub fn new(gist_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_GIST_URL.to_string(),
            gist_id: gist_id.into(),
            username: username.into(),
            token: None,
        }
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, SyncError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ironsync/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Plain HTTP(S) downloads, and GitHub Gists served over HTTP.
///
/// Uses `If-Modified-Since` and `Last-Modified` as the change signal.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    gist: Option<GistSettings>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            gist: None,
        })
    }

    pub fn gist(settings: GistSettings, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: settings.url.clone(),
            gist: Some(settings),
        })
    }

    /// The URL a resource is fetched from.
    pub fn url_for(&self, resource: &Resource) -> String {
        let base = self.base_url.trim_end_matches('/');
        let remote = resource.remote_path.trim_start_matches('/');
        match &self.gist {
            Some(gist) => {
                let username = resource.github_username.as_ref().unwrap_or(&gist.username);
                let gist_id = resource.gist_id.as_ref().unwrap_or(&gist.gist_id);
                format!("{base}/{username}/{gist_id}/raw/{remote}")
            }
            None if remote.is_empty() => base.to_string(),
            None => format!("{base}/{remote}"),
        }
    }

    fn token_for<'a>(&'a self, resource: &'a Resource) -> Option<&'a str> {
        let gist = self.gist.as_ref()?;
        resource
            .github_token
            .as_deref()
            .or(gist.token.as_deref())
    }
}

impl DownloadBackend for HttpBackend {
    fn fetch(&mut self, resource: &Resource, staging: &mut File) -> Result<Fetched, SyncError> {
        let url = self.url_for(resource);
        let mut request = self.client.get(&url);
        if let Some(token) = self.token_for(resource) {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }
        if let Some(since) = resource.last_modified_time {
            request = request.header(IF_MODIFIED_SINCE, format_http_date(since));
        }

        let mut response = request.send()?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(SyncError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        if let Some(time) = last_modified {
            if !resource.is_newer(time) {
                debug!("{url}: Last-Modified {time} is not newer, skipping body");
                return Ok(Fetched::NotModified);
            }
        }

        let bytes = response.copy_to(staging)?;
        debug!("{url}: fetched {bytes} bytes");
        Ok(Fetched::Modified { last_modified })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_http() {
        let backend = HttpBackend::new("https://example.com/files/", Duration::from_secs(5)).unwrap();
        let bare = Resource::new("/tmp/a");
        assert_eq!(backend.url_for(&bare), "https://example.com/files");

        let sub = Resource::new("/tmp/a").with_remote_path("/motd.txt");
        assert_eq!(backend.url_for(&sub), "https://example.com/files/motd.txt");
    }

    #[test]
    fn test_url_for_gist_with_overrides() {
        let mut settings = GistSettings::new("abc123", "octocat");
        settings.token = Some("conn-token".into());
        let backend = HttpBackend::gist(settings, Duration::from_secs(5)).unwrap();

        let r = Resource::new("/tmp/a").with_remote_path("hosts");
        assert_eq!(
            backend.url_for(&r),
            "https://gist.githubusercontent.com/octocat/abc123/raw/hosts"
        );
        assert_eq!(backend.token_for(&r), Some("conn-token"));

        let mut r = r;
        r.gist_id = Some("def456".into());
        r.github_username = Some("hubot".into());
        r.github_token = Some("res-token".into());
        assert_eq!(
            backend.url_for(&r),
            "https://gist.githubusercontent.com/hubot/def456/raw/hosts"
        );
        assert_eq!(backend.token_for(&r), Some("res-token"));
    }

    #[test]
    fn test_plain_http_never_sends_token() {
        let backend = HttpBackend::new("https://example.com", Duration::from_secs(5)).unwrap();
        let mut r = Resource::new("/tmp/a");
        r.github_token = Some("secret".into());
        assert_eq!(backend.token_for(&r), None);
    }
}
