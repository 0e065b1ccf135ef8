//! Shared helpers for integration tests

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vise_common::{EngineConfig, EventQueue};
use vise_server::config::ServerConfig;
use vise_server::engine::{SearchEngine, StageBackend};
use vise_server::http::{server, ServerContext};
use vise_server::resources::ResourceCache;

/// Backend that "computes" every stage by touching the artifact file.
pub struct TouchBackend;

impl TouchBackend {
    fn touch(config: &EngineConfig, keys: &[&str]) -> vise_server::Result<()> {
        for key in keys {
            std::fs::write(config.path(key), b"artifact")?;
        }
        Ok(())
    }
}

impl StageBackend for TouchBackend {
    fn compute_descriptors(&self, config: &EngineConfig, _: &Path) -> vise_server::Result<()> {
        Self::touch(config, &["descFn"])
    }
    fn compute_assignments(&self, config: &EngineConfig, _: &Path) -> vise_server::Result<()> {
        Self::touch(config, &["assignFn"])
    }
    fn compute_hamming(&self, config: &EngineConfig, _: &Path) -> vise_server::Result<()> {
        Self::touch(config, &["hammFn"])
    }
    fn build_index(&self, config: &EngineConfig, _: &Path) -> vise_server::Result<()> {
        Self::touch(config, &["dsetFn", "fidxFn", "iidxFn"])
    }
    fn init_query(&self, _: &EngineConfig, _: &Path) -> vise_server::Result<()> {
        Ok(())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub ctx: Arc<ServerContext>,
    pub data_dir: PathBuf,
    _tmp: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spin up a server on an ephemeral port, backed by temp directories and
/// the repository's real UI assets.
pub async fn start_server(backend: Arc<dyn StageBackend>) -> TestServer {
    let tmp = tempfile::tempdir().expect("tempdir");
    let data_dir = tmp.path().join("data");
    let resource_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .join("resources");

    let config = ServerConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        threads: 2,
        data_dir: data_dir.clone(),
        resource_dir,
        tool_dir: tmp.path().join("tools"),
    };

    let queue = Arc::new(EventQueue::new());
    let engine = Arc::new(SearchEngine::new(
        config.engine_dir(),
        config.tool_dir.clone(),
        queue.clone(),
        backend,
    ));
    let resources = Arc::new(ResourceCache::new(config.resource_dir.clone()));
    let ctx = Arc::new(ServerContext {
        config,
        engine,
        queue,
        resources,
    });

    let listener = server::bind("127.0.0.1", 0).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let serve_ctx = ctx.clone();
    let task = tokio::spawn(async move {
        let _ = server::serve(listener, serve_ctx).await;
    });

    TestServer {
        addr,
        ctx,
        data_dir,
        _tmp: tmp,
        task,
    }
}

/// Send raw bytes split into `chunk_size`d writes (with small pauses so the
/// server really sees separate reads) and return the full response text.
pub async fn raw_request(addr: SocketAddr, bytes: &[u8], chunk_size: usize) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    for chunk in bytes.chunks(chunk_size) {
        stream.write_all(chunk).await.expect("write");
        stream.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read to eof");
    String::from_utf8_lossy(&response).into_owned()
}

/// Convenience: one unfragmented request.
pub async fn request(addr: SocketAddr, bytes: &[u8]) -> String {
    raw_request(addr, bytes, bytes.len()).await
}

/// Body part of a response (after the blank line).
pub fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

/// Format a POST with the right content length.
pub fn post(uri: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {uri} HTTP/1.0\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}
