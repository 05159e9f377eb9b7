//! Loopback servers standing in for the browser debug endpoint and the language model service.

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Answers one HTTP request with `status` and a JSON `body`. The handle resolves to the raw
/// request (head and body).
pub async fn serve_http_once(status: &'static str, body: String) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buffer = [0u8; 4096];
        loop {
            let read = stream.read(&mut buffer).await.unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&buffer[..read]);
            if request_complete(&request) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    });
    (addr, handle)
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(head_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..head_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    request.len() >= head_end + 4 + content_length
}

pub enum SocketReply {
    /// Sends every frame after the request arrives.
    Frames(Vec<String>),
    /// Closes the socket after the request arrives.
    Close,
    /// Keeps the socket open without answering.
    Silent,
}

/// Accepts one WebSocket client. The handle resolves to the first text frame it sent.
pub async fn serve_socket_once(reply: SocketReply) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        let request = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                _ => return String::new(),
            }
        };

        match reply {
            SocketReply::Frames(frames) => {
                for frame in frames {
                    let _ = socket.send(Message::Text(frame)).await;
                }
                // Let the client close first.
                while let Some(Ok(_)) = socket.next().await {}
            }
            SocketReply::Close => {
                let _ = socket.close(None).await;
            }
            SocketReply::Silent => {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
        request
    });
    (addr, handle)
}

/// Accepts one connection and never answers it.
pub async fn serve_silent() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    (addr, handle)
}
