//! Requests over a real socket through `Server::serve`.

use galette_core::{Api, Server};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn connect(addr: SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start on {addr}");
}

async fn exchange(addr: SocketAddr, raw: &str) -> String {
    let mut stream = connect(addr).await;
    stream.write_all(raw.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut reply = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut reply)).await;
    String::from_utf8_lossy(&reply).into_owned()
}

#[tokio::test]
async fn test_truncated_body_never_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut api = Api::new();
    let seen = calls.clone();
    api.post("/notes", move |ep| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"a": ep.param("a")}))
    });

    let addr = free_addr();
    let server = Server::new(api.build().unwrap()).bind(addr);
    let handle = tokio::spawn(async move { server.serve().await });

    let complete = exchange(
        addr,
        "POST /notes HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: 9\r\nConnection: close\r\n\r\n{\"a\": 1}\n",
    )
    .await;
    assert!(complete.starts_with("HTTP/1.1 201"), "{complete}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let truncated = exchange(
        addr,
        "POST /notes HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: 40\r\n\r\n{\"a\"",
    )
    .await;
    if !truncated.is_empty() {
        assert!(truncated.starts_with("HTTP/1.1 400"), "{truncated}");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    handle.abort();
}
