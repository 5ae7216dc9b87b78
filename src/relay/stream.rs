//! Stream 消费者 - 维护到推送服务的长连接
//!
//! 状态机：`Idle → Connecting → Connected → Closing → Idle`
//!
//! 连接建立后拆分为两半：
//! - 读任务持有读半部，解码每一帧并依次分发到所有 webhook
//! - 协调循环持有写半部，负责心跳和 close 帧，并在 stop / interrupt /
//!   心跳失败 / 读任务退出 四个事件中等待最先发生的一个

use super::dispatcher::{SendResult, WebhookDispatcher};
use super::message::{decode_frame, Frame};
use crate::config::{Config, StreamOptions, WebhookTarget};
use crate::error::{RelayError, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 消费者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Connecting,
    Connected,
    Closing,
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// disable() 主动停止
    Stopped,
    /// 外部中断
    Interrupted,
    /// 心跳发送失败
    HeartbeatFailed(String),
    /// 读任务退出（对端关闭或读错误）
    ReaderClosed(String),
}

impl SessionEnd {
    /// 是否由外部请求结束（需要走 close 握手）
    pub fn is_requested(&self) -> bool {
        matches!(self, SessionEnd::Stopped | SessionEnd::Interrupted)
    }
}

/// 显式传入会话的中断信号，替代进程级信号订阅
///
/// 克隆共享同一信号；触发后保持触发状态。
#[derive(Debug, Clone)]
pub struct InterruptToken {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 触发中断
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// 清除触发状态，供下一次会话复用
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待中断触发（已触发则立即返回）
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次连接会话：连接句柄 + 终止信号
pub struct StreamSession {
    socket: WsStream,
    stop: oneshot::Receiver<()>,
    interrupt: InterruptToken,
}

impl StreamSession {
    pub fn new(socket: WsStream, stop: oneshot::Receiver<()>, interrupt: InterruptToken) -> Self {
        Self {
            socket,
            stop,
            interrupt,
        }
    }
}

/// 单次连接探测，与主会话无关
pub async fn test_connection(url: &str) -> Result<()> {
    let (mut socket, _response) = connect_async(url).await.map_err(|e| {
        warn!(error = %e, "Test dial error");
        RelayError::from(e)
    })?;
    if let Err(e) = socket.close(None).await {
        debug!(error = %e, "Close after test dial failed");
    }
    Ok(())
}

/// 心跳内容：当前时间戳
fn heartbeat_payload() -> String {
    chrono::Local::now().to_string()
}

/// 处理一帧：解码并分发，返回分发结果（帧被丢弃时返回 None）
pub async fn handle_frame(
    raw: &str,
    webhooks: &[WebhookTarget],
    dispatcher: &WebhookDispatcher,
) -> Option<Vec<(String, SendResult)>> {
    match decode_frame(raw) {
        Ok(Frame::Message(message, extras)) => {
            debug!(title = %message.title, app_id = extras.app_id, "Message received");
            Some(dispatcher.dispatch_all(&message, &extras, webhooks).await)
        }
        Ok(Frame::Unsupported) => {
            warn!("Unsupported message format, frame dropped");
            None
        }
        Err(e) => {
            warn!(error = %e, "Malformed frame dropped");
            None
        }
    }
}

/// 读任务：直到连接关闭或读错误才退出
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    config: Arc<Config>,
    dispatcher: WebhookDispatcher,
) -> String {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Stream read error");
                return format!("read error: {}", e);
            }
        };

        match frame {
            WsMessage::Text(text) => {
                handle_frame(text.as_str(), &config.web_hooks, &dispatcher).await;
            }
            WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    handle_frame(text, &config.web_hooks, &dispatcher).await;
                }
                Err(_) => warn!(len = bytes.len(), "Non UTF-8 binary frame dropped"),
            },
            WsMessage::Close(frame) => {
                info!(frame = ?frame, "Close frame received");
            }
            _ => {}
        }
    }

    "connection closed".to_string()
}

/// Stream 消费者
#[derive(Clone)]
pub struct StreamConsumer {
    config: Arc<Config>,
    dispatcher: WebhookDispatcher,
    options: StreamOptions,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl StreamConsumer {
    pub fn new(config: Arc<Config>, dispatcher: WebhookDispatcher, options: StreamOptions) -> Self {
        let (state, _rx) = watch::channel(ConsumerState::Idle);
        Self {
            config,
            dispatcher,
            options,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Consumer state changed");
        }
    }

    /// 建立连接，失败后等待一次重试间隔再试一次
    pub async fn connect(&self) -> Result<WsStream> {
        self.config.validate()?;
        self.set_state(ConsumerState::Connecting);

        let url = self.config.stream_url();
        let host = self.config.host_server.as_str();

        let first = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!(host = %host, "Connected to stream");
                self.set_state(ConsumerState::Connected);
                return Ok(socket);
            }
            Err(e) => e,
        };

        warn!(
            host = %host,
            error = %first,
            retry_in_ms = self.options.reconnect_delay.as_millis() as u64,
            "Dial error, retrying once"
        );
        tokio::time::sleep(self.options.reconnect_delay).await;

        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!(host = %host, "Connected to stream after retry");
                self.set_state(ConsumerState::Connected);
                Ok(socket)
            }
            Err(e) => {
                self.set_state(ConsumerState::Idle);
                Err(RelayError::connection(format!("dial {} failed: {}", host, e)))
            }
        }
    }

    /// 运行会话直到结束，返回时连接已释放、状态回到 Idle
    pub async fn run(&self, session: StreamSession) -> SessionEnd {
        let StreamSession {
            socket,
            mut stop,
            interrupt,
        } = session;
        self.set_state(ConsumerState::Connected);

        let (mut sink, stream) = socket.split();
        let mut reader = tokio::spawn(read_loop(
            stream,
            self.config.clone(),
            self.dispatcher.clone(),
        ));
        let mut reader_done = false;

        let period = self.options.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("Relay stopped");
                    break SessionEnd::Stopped;
                }
                _ = interrupt.triggered() => {
                    info!("Relay interrupted");
                    break SessionEnd::Interrupted;
                }
                _ = ticker.tick() => {
                    if let Err(e) = sink.send(WsMessage::Text(heartbeat_payload().into())).await {
                        warn!(error = %e, "Heartbeat write failed");
                        break SessionEnd::HeartbeatFailed(e.to_string());
                    }
                }
                exit = &mut reader => {
                    reader_done = true;
                    let reason = exit.unwrap_or_else(|e| format!("reader task failed: {}", e));
                    info!(reason = %reason, "Stream reader exited");
                    break SessionEnd::ReaderClosed(reason);
                }
            }
        };

        self.set_state(ConsumerState::Closing);
        if end.is_requested() {
            self.close_gracefully(&mut sink, &mut reader, reader_done).await;
        } else if !reader_done {
            reader.abort();
        }
        drop(sink);

        self.set_state(ConsumerState::Idle);
        end
    }

    /// 发送 close 帧，等待读任务观察到关闭；超时则中止读任务
    async fn close_gracefully(
        &self,
        sink: &mut SplitSink<WsStream, WsMessage>,
        reader: &mut JoinHandle<String>,
        reader_done: bool,
    ) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let close = sink.send(WsMessage::Close(Some(frame)));
        match tokio::time::timeout(self.options.close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Write close failed"),
            Err(_) => warn!("Write close timed out"),
        }

        if reader_done {
            return;
        }
        match tokio::time::timeout(self.options.close_timeout, &mut *reader).await {
            Ok(_) => debug!("Reader exited after close"),
            Err(_) => {
                warn!("Reader did not exit after close, aborting");
                reader.abort();
            }
        }
    }
}
