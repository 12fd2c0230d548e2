//! Fake HTTP and Dropbox server on axum.
//!
//! `FakeServer::spawn()` serves on a random local port from a background
//! thread, so the blocking client under test can talk to it directly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, IF_MODIFIED_SINCE, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub body: Vec<u8>,
    pub last_modified: Option<String>,
}

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub if_modified_since: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    files: Mutex<HashMap<String, FakeFile>>,
    requests: Mutex<Vec<Seen>>,
}

impl FakeState {
    /// Serve `body` at `path`, optionally with a `Last-Modified` header.
    pub fn put(&self, path: &str, body: &[u8], last_modified: Option<&str>) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            FakeFile {
                body: body.to_vec(),
                last_modified: last_modified.map(str::to_string),
            },
        );
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests made for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn record(&self, path: &str, headers: &HeaderMap) {
        let header = |name: axum::http::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().unwrap().push(Seen {
            path: path.to_string(),
            if_modified_since: header(IF_MODIFIED_SINCE),
            authorization: header(AUTHORIZATION),
        });
    }

    fn get(&self, path: &str) -> Option<FakeFile> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

pub struct FakeServer;

impl FakeServer {
    /// Start the server and return its base URL and shared state.
    pub fn spawn() -> (String, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/2/files/get_metadata", post(dropbox_metadata))
            .route("/2/files/download", post(dropbox_download))
            .fallback(serve_file)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let base_url = format!("http://{}", listener.local_addr().expect("local_addr"));

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                axum::serve(listener, app).await.expect("serve");
            });
        });

        (base_url, state)
    }
}

async fn serve_file(State(state): State<Arc<FakeState>>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().to_string();
    state.record(&path, &headers);

    let Some(file) = state.get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let since = headers.get(IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok());
    if let (Some(since), Some(lm)) = (since, file.last_modified.as_deref()) {
        if since == lm {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }
    match file.last_modified {
        Some(lm) => ([(LAST_MODIFIED, lm)], file.body).into_response(),
        None => file.body.into_response(),
    }
}

#[derive(Deserialize)]
struct PathArg {
    path: String,
}

async fn dropbox_metadata(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(arg): Json<PathArg>,
) -> Response {
    state.record("/2/files/get_metadata", &headers);
    match state.get(&arg.path) {
        Some(file) => {
            let hash = ironsync::backends::dropbox::content_hash_reader(&file.body[..])
                .expect("hash");
            Json(json!({ ".tag": "file", "path_display": arg.path, "content_hash": hash }))
                .into_response()
        }
        None => (StatusCode::CONFLICT, "path/not_found/").into_response(),
    }
}

async fn dropbox_download(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    state.record("/2/files/download", &headers);
    let arg = headers
        .get("Dropbox-API-Arg")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str::<PathArg>(v).ok());
    match arg.and_then(|arg| state.get(&arg.path)) {
        Some(file) => Bytes::from(file.body).into_response(),
        None => (StatusCode::CONFLICT, "path/not_found/").into_response(),
    }
}
