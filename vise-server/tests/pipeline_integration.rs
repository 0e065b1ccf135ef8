//! End-to-end training flow driven through the HTTP surface

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{body_of, post, request, start_server, TouchBackend};
use vise_server::engine::Stage;

/// Drive an engine from creation to the Query stage the way the browser
/// does: create, configure, proceed, then watch the state snapshot move.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_training_flow_reaches_query() {
    let server = start_server(Arc::new(TouchBackend)).await;

    // A small image collection (copy mode, so content is never decoded).
    let photos = server.data_dir.join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    std::fs::write(photos.join("a.jpg"), b"one").unwrap();
    std::fs::write(photos.join("b.png"), b"two").unwrap();

    let response = request(server.addr, &post("/", "create_search_engine e2e")).await;
    let reply: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(reply["result"], "OK");

    let config_body = format!(
        "imagePath={}\ntransformed_img_width=original",
        photos.display()
    );
    let response = request(server.addr, &post("/Setting", &config_body)).await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert_eq!(server.ctx.engine.current_stage(), Stage::Info);

    // Clustering is delegated to an external script this test host does not
    // have; its artifact existing up front makes the stage a no-op.
    std::fs::write(server.ctx.engine.config_param("clstFn"), b"artifact").unwrap();

    let response = request(server.addr, &post("/Info", "proceed")).await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));

    // Poll the state snapshot until training lands on Query.
    let mut reached_query = false;
    for _ in 0..300 {
        let response = request(server.addr, b"GET /_state HTTP/1.0\r\n\r\n").await;
        let snapshot: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
        if snapshot["current_state_id"] == Stage::Query.id() {
            reached_query = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reached_query, "training did not reach the Query stage");

    // Preprocess left the transformed copies and the image list behind.
    let engine_dir = server.data_dir.join("search_engines").join("e2e");
    assert!(engine_dir.join("img").join("a.jpg").exists());
    assert!(engine_dir.join("img").join("b.png").exists());
    let imlist = std::fs::read_to_string(
        engine_dir.join("training_data").join("imlist.txt"),
    )
    .unwrap();
    assert_eq!(imlist.lines().count(), 2);

    // Every stage artifact the backend produces is in place.
    for key in ["descFn", "assignFn", "hammFn", "dsetFn", "fidxFn", "iidxFn"] {
        let path = server.ctx.engine.config_param(key);
        assert!(
            std::path::Path::new(&path).exists(),
            "missing artifact {key} at {path}"
        );
    }

    // The worker narrated its progress through the event queue.
    let mut saw_state_update = false;
    let mut saw_preprocess_log = false;
    while let Some(event) = server
        .ctx
        .queue
        .pop_timeout(Duration::from_millis(50))
        .await
    {
        let line = event.to_line();
        if line == "SearchEngine command _state update_now" {
            saw_state_update = true;
        }
        if line.starts_with("Preprocess log") {
            saw_preprocess_log = true;
        }
    }
    assert!(saw_state_update);
    assert!(saw_preprocess_log);
}

/// Restarting the process and loading the engine resumes from artifacts.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_resumes_from_disk_state() {
    let server = start_server(Arc::new(TouchBackend)).await;

    let photos = server.data_dir.join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    std::fs::write(photos.join("a.jpg"), b"one").unwrap();

    request(server.addr, &post("/", "create_search_engine resume")).await;
    let config_body = format!(
        "imagePath={}\ntransformed_img_width=original",
        photos.display()
    );
    request(server.addr, &post("/Setting", &config_body)).await;

    // Simulate completed preprocessing and descriptor stages on disk.
    let engine_dir = server.data_dir.join("search_engines").join("resume");
    std::fs::write(
        engine_dir.join("training_data").join("imlist.txt"),
        "a.jpg\n",
    )
    .unwrap();
    std::fs::write(server.ctx.engine.config_param("descFn"), b"artifact").unwrap();

    // "Restart": load the engine fresh over HTTP.
    let response = request(server.addr, &post("/", "load_search_engine resume")).await;
    let reply: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(reply["result"], "OK");
    assert_eq!(server.ctx.engine.current_stage(), Stage::Cluster);
}

/// Stop requests only take effect between stages: a stage in flight always
/// runs to completion first.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_training_is_cooperative() {
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Touch-backend whose descriptor stage blocks until the gate opens.
    struct GateBackend {
        gate: Arc<AtomicBool>,
        in_descriptor: Arc<AtomicBool>,
    }

    impl vise_server::engine::StageBackend for GateBackend {
        fn compute_descriptors(
            &self,
            config: &vise_common::EngineConfig,
            _: &std::path::Path,
        ) -> vise_server::Result<()> {
            self.in_descriptor.store(true, Ordering::SeqCst);
            while !self.gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::fs::write(config.path("descFn"), b"artifact")?;
            Ok(())
        }
        fn compute_assignments(
            &self,
            config: &vise_common::EngineConfig,
            _: &std::path::Path,
        ) -> vise_server::Result<()> {
            std::fs::write(config.path("assignFn"), b"artifact")?;
            Ok(())
        }
        fn compute_hamming(
            &self,
            config: &vise_common::EngineConfig,
            _: &std::path::Path,
        ) -> vise_server::Result<()> {
            std::fs::write(config.path("hammFn"), b"artifact")?;
            Ok(())
        }
        fn build_index(
            &self,
            config: &vise_common::EngineConfig,
            _: &std::path::Path,
        ) -> vise_server::Result<()> {
            for key in ["dsetFn", "fidxFn", "iidxFn"] {
                std::fs::write(config.path(key), b"artifact")?;
            }
            Ok(())
        }
        fn init_query(
            &self,
            _: &vise_common::EngineConfig,
            _: &std::path::Path,
        ) -> vise_server::Result<()> {
            Ok(())
        }
    }

    let gate = Arc::new(AtomicBool::new(false));
    let in_descriptor = Arc::new(AtomicBool::new(false));
    let backend = Arc::new(GateBackend {
        gate: gate.clone(),
        in_descriptor: in_descriptor.clone(),
    });
    let server = start_server(backend).await;

    let photos = server.data_dir.join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    std::fs::write(photos.join("a.jpg"), b"one").unwrap();

    request(server.addr, &post("/", "create_search_engine stopme")).await;
    let config_body = format!(
        "imagePath={}\ntransformed_img_width=original",
        photos.display()
    );
    request(server.addr, &post("/Setting", &config_body)).await;
    request(server.addr, &post("/Info", "proceed")).await;

    // Wait until the worker is provably mid-stage, then request a stop.
    for _ in 0..500 {
        if in_descriptor.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(in_descriptor.load(Ordering::SeqCst));
    server.ctx.engine.stop_training();

    // The in-flight stage is never preempted; only opening the gate lets
    // it finish, after which the worker stops at the boundary.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.ctx.engine.current_stage(), Stage::Descriptor);
    gate.store(true, Ordering::SeqCst);

    let mut saw_stop_log = false;
    for _ in 0..100 {
        if let Some(event) = server.ctx.queue.pop_timeout(Duration::from_millis(50)).await {
            if event.to_line().contains("Stopped training process on user request") {
                saw_stop_log = true;
                break;
            }
        }
    }
    assert!(saw_stop_log, "worker did not acknowledge the stop request");

    // The descriptor stage completed its work before the stop took effect.
    assert!(std::path::Path::new(&server.ctx.engine.config_param("descFn")).exists());
    assert_eq!(server.ctx.engine.current_stage(), Stage::Cluster);
}
