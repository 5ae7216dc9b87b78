//! 集成测试辅助：本地 WebSocket 推送服务与 HTTP 记录服务

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// HTTP 记录服务
// ============================================================================

/// 收到的 webhook 请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 记录所有请求并返回固定状态码
pub struct HttpRecorder {
    pub addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<RecordedRequest>,
}

impl HttpRecorder {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(request) = serve_one(socket, status).await {
                        let _ = tx.send(request);
                    }
                });
            }
        });

        Self { addr, rx }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 等待下一个请求
    pub async fn next(&mut self) -> RecordedRequest {
        timeout(TIMEOUT, self.rx.recv())
            .await
            .expect("Timed out waiting for webhook request")
            .expect("Recorder closed")
    }

    /// 在给定时间内确认没有请求
    pub async fn expect_none(&mut self, wait: Duration) {
        if let Ok(Some(request)) = timeout(wait, self.rx.recv()).await {
            panic!("Unexpected webhook request: {:?}", request);
        }
    }
}

async fn serve_one(mut socket: TcpStream, status: u16) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = (header_end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..end]).to_string();

    let response = format!(
        "HTTP/1.1 {} Test\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
        status
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

// ============================================================================
// WebSocket 推送服务
// ============================================================================

/// 测试服务端下发指令
pub enum ServerCmd {
    /// 下发一帧文本
    Send(String),
    /// 走完 close 握手后关闭当前连接
    Close,
    /// 不发 close 帧，直接关闭 TCP 写端，随后记录客户端发来的原始字节
    Drop,
}

/// 推送服务，依次接受连接
pub struct StreamServer {
    pub addr: SocketAddr,
    cmd_tx: mpsc::UnboundedSender<ServerCmd>,
    received_rx: mpsc::UnboundedReceiver<Message>,
    uri_rx: mpsc::UnboundedReceiver<String>,
    raw_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl StreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// 在已绑定的 listener 上提供服务
    pub fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServerCmd>();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (uri_tx, uri_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let _ = uri_tx.send(req.uri().to_string());
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
                    continue;
                };

                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            Some(ServerCmd::Send(text)) => {
                                if ws.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCmd::Close) => {
                                let _ = ws.close(None).await;
                                // 继续读取直到对端回应 close
                                while let Some(Ok(_)) = ws.next().await {}
                                break;
                            }
                            Some(ServerCmd::Drop) => {
                                let tcp = ws.get_mut();
                                let _ = tcp.shutdown().await;
                                let mut raw = Vec::new();
                                let _ = timeout(TIMEOUT, tcp.read_to_end(&mut raw)).await;
                                let _ = raw_tx.send(raw);
                                break;
                            }
                            None => {
                                let _ = ws.close(None).await;
                                return;
                            }
                        },
                        msg = ws.next() => match msg {
                            Some(Ok(msg)) => {
                                let _ = received_tx.send(msg);
                            }
                            _ => break,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            cmd_tx,
            received_rx,
            uri_rx,
            raw_rx,
        }
    }

    pub fn host(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn send(&self, text: &str) {
        self.cmd_tx.send(ServerCmd::Send(text.to_string())).unwrap();
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(ServerCmd::Close);
    }

    /// 直接断开 TCP，不走 close 握手
    pub fn drop_connection(&self) {
        let _ = self.cmd_tx.send(ServerCmd::Drop);
    }

    /// 断开后客户端在释放连接前发来的原始字节
    pub async fn raw_after_drop(&mut self) -> Vec<u8> {
        timeout(TIMEOUT, self.raw_rx.recv())
            .await
            .expect("Timed out waiting for client to release connection")
            .expect("Server closed")
    }

    /// 握手请求的 URI
    pub async fn request_uri(&mut self) -> String {
        timeout(TIMEOUT, self.uri_rx.recv())
            .await
            .expect("Timed out waiting for handshake")
            .expect("Server closed")
    }

    /// 等待客户端发来的下一帧
    pub async fn next_received(&mut self) -> Option<Message> {
        timeout(TIMEOUT, self.received_rx.recv())
            .await
            .expect("Timed out waiting for client frame")
    }

    /// 等待客户端 close 帧（跳过心跳）
    pub async fn wait_close(&mut self) -> Message {
        loop {
            match self.next_received().await {
                Some(msg @ Message::Close(_)) => return msg,
                Some(_) => continue,
                None => panic!("Connection ended without close frame"),
            }
        }
    }
}
