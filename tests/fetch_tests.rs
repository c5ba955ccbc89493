//! Fetcher tests against a local single-shot HTTP fixture
//!
//! A bare TcpListener is enough to script exact status lines and bodies,
//! which keeps the redirect and failure paths deterministic.

use std::net::SocketAddr;

use dynomark_language_server::engine::{EngineError, fetch_from};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serves each canned response to one connection, in order, then exits.
fn spawn_server(listener: TcpListener, responses: Vec<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Drain the request head before answering.
            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            loop {
                let n = stream.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    })
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

fn redirect_response(location: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
    .into_bytes()
}

fn not_found_response() -> Vec<u8> {
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
}

#[tokio::test]
async fn test_redirect_then_success_writes_body() {
    let body = b"fake engine bytes".to_vec();
    let (final_listener, final_addr) = bind().await;
    let final_server = spawn_server(final_listener, vec![ok_response(&body)]);

    let (first_listener, first_addr) = bind().await;
    let first_server = spawn_server(
        first_listener,
        vec![redirect_response(&format!("http://{}/engine", final_addr))],
    );

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("dynomark-linux");
    fetch_from(&format!("http://{}/latest", first_addr), &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), body, "Full redirected body expected");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0, "Downloaded engine must be executable");
    }

    first_server.await.unwrap();
    final_server.await.unwrap();
}

#[tokio::test]
async fn test_relative_redirect_resolves_against_request_url() {
    let body = b"engine".to_vec();
    let (listener, addr) = bind().await;
    let server = spawn_server(
        listener,
        vec![redirect_response("/release/engine"), ok_response(&body)],
    );

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("dynomark-linux");
    fetch_from(&format!("http://{}/latest", addr), &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), body);
    server.await.unwrap();
}

#[tokio::test]
async fn test_not_found_fails_and_leaves_no_file() {
    let (listener, addr) = bind().await;
    let server = spawn_server(listener, vec![not_found_response()]);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("dynomark-linux");
    let error = fetch_from(&format!("http://{}/latest", addr), &target)
        .await
        .unwrap_err();

    match error {
        EngineError::Download(message) => assert!(message.contains("404")),
        other => panic!("Expected Download error, got {}", other),
    }
    assert!(!target.exists(), "A failed fetch must leave no file behind");
    server.await.unwrap();
}

#[tokio::test]
async fn test_redirect_without_location_fails() {
    let (listener, addr) = bind().await;
    let server = spawn_server(
        listener,
        vec![b"HTTP/1.1 302 Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()],
    );

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("dynomark-linux");
    let error = fetch_from(&format!("http://{}/latest", addr), &target)
        .await
        .unwrap_err();

    assert!(matches!(error, EngineError::Download(_)));
    assert!(!target.exists());
    server.await.unwrap();
}
