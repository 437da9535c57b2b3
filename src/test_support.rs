//! Local HTTP fixture serving an archive manifest and archive body.

use std::{
    io::{Cursor, Write},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::parser::{EPISODES_FILE_NAME, RELATIONS_FILE_NAME};

pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn dataset_zip(relations: &str, episodes: &str) -> Vec<u8> {
    zip_bytes(&[
        (RELATIONS_FILE_NAME, relations),
        (EPISODES_FILE_NAME, episodes),
    ])
}

struct FixtureState {
    base_url: String,
    archive: Mutex<Vec<u8>>,
    declared_size: Mutex<Option<u64>>,
    truncate_next: AtomicUsize,
    stall: AtomicBool,
    archive_requests: AtomicUsize,
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<FixtureState>,
    handle: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start(archive: Vec<u8>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(FixtureState {
            base_url: format!("http://{addr}"),
            archive: Mutex::new(archive),
            declared_size: Mutex::new(None),
            truncate_next: AtomicUsize::new(0),
            stall: AtomicBool::new(false),
            archive_requests: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/latest.json", get(manifest))
            .route("/relations.zip", get(archive_body))
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn manifest_url(&self) -> String {
        self.url("/latest.json")
    }

    pub fn set_archive(&self, archive: Vec<u8>) {
        *self.state.archive.lock().unwrap() = archive;
    }

    /// Overrides the size the manifest declares; `None` declares the real size.
    pub fn set_declared_size(&self, size: Option<u64>) {
        *self.state.declared_size.lock().unwrap() = size;
    }

    /// Serves the next `count` archive downloads with their last ten bytes cut.
    pub fn truncate_next(&self, count: usize) {
        self.state.truncate_next.store(count, Ordering::SeqCst);
    }

    pub fn set_stall(&self, stall: bool) {
        self.state.stall.store(stall, Ordering::SeqCst);
    }

    pub fn archive_requests(&self) -> usize {
        self.state.archive_requests.load(Ordering::SeqCst)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn manifest(State(state): State<Arc<FixtureState>>) -> impl IntoResponse {
    let real_size = state.archive.lock().unwrap().len() as u64;
    let size = state.declared_size.lock().unwrap().unwrap_or(real_size);
    Json(json!({
        "browser_download_url": format!("{}/relations.zip", state.base_url),
        "size": size,
        "name": "dump.zip"
    }))
}

async fn archive_body(State(state): State<Arc<FixtureState>>) -> impl IntoResponse {
    state.archive_requests.fetch_add(1, Ordering::SeqCst);
    if state.stall.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    let mut body = state.archive.lock().unwrap().clone();
    let truncate = state
        .truncate_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if truncate {
        body.truncate(body.len().saturating_sub(10));
    }
    (StatusCode::OK, body)
}
