//! JSON-RPC 2.0 over HTTP/1.1 on raw tokio sockets
//!
//! One POST per message, `Connection: close`, CORS enabled. The server
//! hands decoded requests to an [`RpcEndpoint`]; a `None` outcome means
//! the message failed authentication and the connection is closed without
//! any reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::error::{NodeError, Result};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::types::Contact;

/// Largest accepted HTTP body, bounding shard payloads.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
/// Largest accepted header block.
const MAX_HEADER_BYTES: usize = 16 * 1024;

const CORS_HEADERS: &str = concat!(
    "Access-Control-Allow-Origin: *\r\n",
    "Access-Control-Allow-Methods: POST, OPTIONS\r\n",
    "Access-Control-Allow-Headers: Content-Type\r\n",
);

/// Handler the server dispatches decoded requests to.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Process one request. `None` drops the connection silently, which is
    /// how authentication failures avoid becoming a signature oracle.
    async fn handle(&self, request: RpcRequest, peer: SocketAddr) -> Option<RpcResponse>;
}

/// Outbound half: one HTTP POST per RPC.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send a request to a peer and decode its response.
    pub async fn send(&self, target: &Contact, request: &RpcRequest) -> Result<RpcResponse> {
        tokio::time::timeout(self.timeout, self.exchange(target, request))
            .await
            .map_err(|_| NodeError::Transport(format!("request to {} timed out", target.endpoint())))?
    }

    async fn exchange(&self, target: &Contact, request: &RpcRequest) -> Result<RpcResponse> {
        let body = serde_json::to_vec(request)?;
        let mut stream = TcpStream::connect(target.endpoint())
            .await
            .map_err(|e| NodeError::Transport(format!("connecting {}: {}", target.endpoint(), e)))?;

        let head = format!(
            "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            target.endpoint(),
            body.len(),
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&body).await?;
        stream.flush().await?;

        let (status, _headers, body) = read_http(&mut stream, ParseMode::Response).await?;
        if status != 200 {
            return Err(NodeError::Transport(format!(
                "peer {} answered HTTP {}",
                target.endpoint(),
                status
            )));
        }
        let response: RpcResponse = serde_json::from_slice(&body)?;
        if response.id != request.id {
            return Err(NodeError::BadResponse("response id mismatch".into()));
        }
        Ok(response)
    }
}

/// Running RPC listener.
pub struct RpcServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `addr` and serve requests until shutdown.
    pub async fn serve(addr: SocketAddr, endpoint: Arc<dyn RpcEndpoint>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Transport(format!("binding {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                                continue;
                            }
                        };
                        let endpoint = endpoint.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, endpoint).await {
                                debug!(peer = %peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
                // Reap finished connection tasks without blocking accepts.
                while connections.try_join_next().is_some() {}
            }
            // Drain in-flight connections before reporting shutdown complete.
            while connections.join_next().await.is_some() {}
        });

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.accept_task.await;
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    endpoint: Arc<dyn RpcEndpoint>,
) -> Result<()> {
    let (method, body) = match read_http(&mut stream, ParseMode::Request).await {
        Ok((_, headers, body)) => (headers.get("x-method").cloned().unwrap_or_default(), body),
        Err(e) => {
            write_http(&mut stream, 400, b"").await.ok();
            return Err(e);
        }
    };

    if method == "OPTIONS" {
        return write_http(&mut stream, 204, b"").await;
    }
    if method != "POST" {
        return write_http(&mut stream, 405, b"").await;
    }

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(peer = %peer, error = %e, "undecodable request body");
            return write_http(&mut stream, 400, b"").await;
        }
    };

    match endpoint.handle(request, peer).await {
        Some(response) => {
            let body = serde_json::to_vec(&response)?;
            write_http(&mut stream, 200, &body).await
        }
        // Authentication failure: close without answering.
        None => Ok(()),
    }
}

enum ParseMode {
    Request,
    Response,
}

/// Read one HTTP message. For requests the verb is surfaced through the
/// synthetic `x-method` header; for responses the status code is returned.
async fn read_http(
    stream: &mut TcpStream,
    mode: ParseMode,
) -> Result<(u16, HashMap<String, String>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(NodeError::Transport("oversized http headers".into()));
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NodeError::Transport("connection closed mid-headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let start_line = lines
        .next()
        .ok_or_else(|| NodeError::Transport("empty http head".into()))?;

    let mut headers = HashMap::new();
    let status = match mode {
        ParseMode::Request => {
            let verb = start_line.split_whitespace().next().unwrap_or_default();
            headers.insert("x-method".into(), verb.to_string());
            0
        }
        ParseMode::Response => start_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| NodeError::Transport("malformed status line".into()))?,
    };
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(NodeError::Transport("oversized http body".into()));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 16384];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NodeError::Transport("connection closed mid-body".into()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    Ok((status, headers, body))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_http(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, reason, CORS_HEADERS, body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}
