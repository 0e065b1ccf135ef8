//! HTTP framing and routing over real sockets

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{body_of, post, raw_request, request, start_server, TouchBackend};
use vise_common::{Event, EventKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_search_engine_over_the_wire() {
    let server = start_server(Arc::new(TouchBackend)).await;

    let response = request(server.addr, &post("/", "create_search_engine demo")).await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(response.contains("Content-Type: application/json\r\n"));
    assert!(response.contains("Connection: close\r\n"));

    let reply: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(reply["result"], "OK");
    assert_eq!(reply["http_post_data"], "create_search_engine demo");

    let engine_dir = server.data_dir.join("search_engines").join("demo");
    assert!(engine_dir.join("img").is_dir());
    assert!(engine_dir.join("training_data").is_dir());
    assert!(engine_dir.join("tmp").is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fragmented_request_equals_unfragmented() {
    let server = start_server(Arc::new(TouchBackend)).await;
    let raw = post("/", "create_search_engine frag");

    // Byte-at-a-time: header terminator and body both arrive in pieces.
    let response = raw_request(server.addr, &raw, 1).await;
    let reply: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(reply["result"], "OK");
    assert_eq!(reply["http_post_data"], "create_search_engine frag");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsupported_method_is_400() {
    let server = start_server(Arc::new(TouchBackend)).await;
    let response = request(server.addr, b"PUT /x HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    assert_eq!(body_of(&response), "Malformed request");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_json_over_the_wire() {
    let server = start_server(Arc::new(TouchBackend)).await;
    request(server.addr, &post("/", "create_search_engine demo")).await;

    let response = request(server.addr, b"GET /_state HTTP/1.0\r\n\r\n").await;
    let snapshot: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(snapshot["search_engine_name"], "demo");
    assert_eq!(snapshot["state_name_list"][1], "Setting");
    assert_eq!(snapshot["current_state_id"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_long_poll_delivers_pushed_event() {
    let server = start_server(Arc::new(TouchBackend)).await;

    // Push after the poll is already waiting.
    let queue = server.ctx.queue.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(Event::new("Cluster", EventKind::Progress, "3/10"));
    });

    let response = request(server.addr, b"GET /_message HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert_eq!(body_of(&response), "Cluster progress 3/10");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_long_poll_timeout_returns_empty_body() {
    let server = start_server(Arc::new(TouchBackend)).await;
    let response = request(server.addr, b"GET /_message HTTP/1.0\r\n\r\n").await;
    assert!(response.contains("Content-Length: 0\r\n"));
    assert_eq!(body_of(&response), "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_engine_image_is_404() {
    let server = start_server(Arc::new(TouchBackend)).await;
    request(server.addr, &post("/", "create_search_engine demo")).await;

    let response = request(server.addr, b"GET /_static/demo/missing.jpg HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_main_page_and_assets_are_served() {
    let server = start_server(Arc::new(TouchBackend)).await;

    let page = request(server.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert!(page.contains("Content-Type: text/html\r\n"));
    assert!(body_of(&page).contains("vise.js"));

    let css = request(server.addr, b"GET /vise.css HTTP/1.0\r\n\r\n").await;
    assert!(css.contains("Content-Type: text/css\r\n"));

    let js = request(server.addr, b"GET /vise.js HTTP/1.0\r\n\r\n").await;
    assert!(js.contains("Content-Type: application/javascript\r\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_home_page_lists_engines() {
    let server = start_server(Arc::new(TouchBackend)).await;
    request(server.addr, &post("/", "create_search_engine alpha")).await;
    request(server.addr, &post("/", "create_search_engine beta")).await;

    let response = request(server.addr, b"GET /_vise_home.html HTTP/1.0\r\n\r\n").await;
    let body = body_of(&response);
    assert!(body.contains("alpha"));
    assert!(body.contains("beta"));
    assert!(!body.contains("__SEARCH_ENGINE_LIST__"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stage_panel_routes() {
    let server = start_server(Arc::new(TouchBackend)).await;

    let setting = request(server.addr, b"GET /Setting HTTP/1.0\r\n\r\n").await;
    assert!(setting.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(body_of(&setting).contains("imagePath"));

    let unknown = request(server.addr, b"GET /NoSuchStage HTTP/1.0\r\n\r\n").await;
    assert!(unknown.starts_with("HTTP/1.0 404 Not Found\r\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_search_engine() {
    let server = start_server(Arc::new(TouchBackend)).await;
    request(server.addr, &post("/", "create_search_engine doomed")).await;
    assert!(server.data_dir.join("search_engines").join("doomed").is_dir());

    let response = request(server.addr, &post("/", "delete_search_engine doomed")).await;
    let reply: serde_json::Value = serde_json::from_str(body_of(&response)).unwrap();
    assert_eq!(reply["result"], "OK");
    assert!(!server.data_dir.join("search_engines").join("doomed").exists());
}
