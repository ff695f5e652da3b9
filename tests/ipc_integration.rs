//! IPC integration tests — codec → router → manager → response round-trip,
//! exercised over a real TCP connection against an empty, preload-free
//! manager (no sandbox-runtime binary required).

use kernelhost_core::driver::{KernelMode, KernelTypeKey, Language};
use kernelhost_core::events::EventBus;
use kernelhost_core::ipc::codec::{write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use kernelhost_core::ipc::IpcServer;
use kernelhost_core::kernel::{AllowedTypes, KernelManager};
use kernelhost_core::types::{Config, IpcConfig};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Spin up an `IpcServer` on a random port over an empty manager (no pool
/// preloading, no allowed kernel types) — enough to exercise the transport
/// and dispatch paths without spawning a sandbox-runtime subprocess.
async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let mut kernel_defaults = Config::default().kernel;
    kernel_defaults.pool.enabled = false;
    kernel_defaults.pool.preload_keys = Vec::new();

    let allowed = AllowedTypes::new([KernelTypeKey {
        mode: KernelMode::Sandboxed,
        language: Language::Python,
    }]);
    let (manager, tick_rx) = KernelManager::new(allowed, kernel_defaults, EventBus::new(), 64);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let handle = tokio::spawn(async move {
        let server = IpcServer::new(manager, tick_rx, addr, IpcConfig::default());
        let _ = server.serve().await;
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (addr, handle)
}

/// Send a request frame, receive and decode the response frame.
async fn round_trip(
    stream: &mut TcpStream,
    service: &str,
    method: &str,
    body: serde_json::Value,
) -> (u8, serde_json::Value) {
    let request = serde_json::json!({
        "id": "test-1",
        "service": service,
        "method": method,
        "body": body,
    });

    let payload = rmp_serde::to_vec_named(&request).unwrap();
    write_frame(stream, MSG_REQUEST, &payload).await.unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    let mut frame_data = vec![0u8; frame_len];
    stream.read_exact(&mut frame_data).await.unwrap();

    let msg_type = frame_data[0];
    let response: serde_json::Value = rmp_serde::from_slice(&frame_data[1..]).unwrap();
    (msg_type, response)
}

#[tokio::test]
async fn unknown_service_returns_policy_error() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, "nonexistent", "foo", serde_json::json!({})).await;

    assert_eq!(msg_type, MSG_ERROR);
    assert_eq!(response.get("ok").unwrap().as_bool().unwrap(), false);
    let error = response.get("error").unwrap();
    assert_eq!(error.get("code").unwrap().as_str().unwrap(), "POLICY_ERROR");
}

#[tokio::test]
async fn unknown_method_returns_policy_error() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, "kernel", "doesNotExist", serde_json::json!({})).await;

    assert_eq!(msg_type, MSG_ERROR);
    let error = response.get("error").unwrap();
    assert_eq!(error.get("code").unwrap().as_str().unwrap(), "POLICY_ERROR");
}

#[tokio::test]
async fn list_on_an_empty_manager_returns_an_empty_array() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(&mut stream, "kernel", "list", serde_json::json!({})).await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response.get("ok").unwrap().as_bool().unwrap(), true);
    assert!(response.get("body").unwrap().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn pool_stats_on_an_empty_manager_returns_an_empty_object() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) =
        round_trip(&mut stream, "kernel", "poolStats", serde_json::json!({})).await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert!(response.get("body").unwrap().as_object().unwrap().is_empty());
}

#[tokio::test]
async fn create_rejects_a_disallowed_kernel_type() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        "kernel",
        "create",
        serde_json::json!({
            "id": "k1",
            "mode": "in_process",
            "language": "javascript",
        }),
    )
    .await;

    assert_eq!(msg_type, MSG_ERROR);
    let error = response.get("error").unwrap();
    assert_eq!(error.get("code").unwrap().as_str().unwrap(), "POLICY_ERROR");
}

#[tokio::test]
async fn destroy_on_unknown_id_is_idempotent() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        "kernel",
        "destroy",
        serde_json::json!({ "id": "never-created" }),
    )
    .await;

    assert_eq!(msg_type, MSG_RESPONSE);
    assert_eq!(response.get("ok").unwrap().as_bool().unwrap(), true);
}

#[tokio::test]
async fn info_on_unknown_id_returns_not_found() {
    let (addr, _handle) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (msg_type, response) = round_trip(
        &mut stream,
        "kernel",
        "info",
        serde_json::json!({ "id": "never-created" }),
    )
    .await;

    assert_eq!(msg_type, MSG_ERROR);
    let error = response.get("error").unwrap();
    assert_eq!(error.get("code").unwrap().as_str().unwrap(), "NOT_FOUND");
}
