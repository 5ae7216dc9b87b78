//! 生命周期适配层 - 宿主调用的 enable / disable / test_connection
//!
//! enable() 同步完成配置校验与握手，失败直接返回错误；成功后后台会话由
//! [`JoinHandle`] 管理，disable() 发出停止信号并等待会话结束。
//!
//! 前置条件：每次 enable() 最多对应一次 disable()。

use super::dispatcher::{WebhookDispatcher, DEFAULT_REQUEST_TIMEOUT};
use super::stream::{self, ConsumerState, InterruptToken, SessionEnd, StreamConsumer, StreamSession};
use crate::config::{Config, StreamOptions};
use crate::error::{RelayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 运行中的会话
struct SessionHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<SessionEnd>,
}

/// 转发器插件实例
pub struct RelayPlugin {
    config: Arc<Config>,
    consumer: StreamConsumer,
    interrupt: InterruptToken,
    session: Option<SessionHandle>,
}

impl RelayPlugin {
    /// 使用默认时序参数创建实例
    pub fn new(config: Config) -> Result<Self> {
        Self::with_options(config, StreamOptions::default(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// 指定会话时序和出站请求超时
    pub fn with_options(
        config: Config,
        options: StreamOptions,
        request_timeout: Duration,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let dispatcher = WebhookDispatcher::new(request_timeout)?;
        let consumer = StreamConsumer::new(config.clone(), dispatcher, options);

        Ok(Self {
            config,
            consumer,
            interrupt: InterruptToken::new(),
            session: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 中断信号，克隆后可交给信号处理器
    pub fn interrupt_token(&self) -> InterruptToken {
        self.interrupt.clone()
    }

    pub fn state(&self) -> ConsumerState {
        self.consumer.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.consumer.subscribe_state()
    }

    /// 后台会话是否仍在运行
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// 启用：校验配置、建立连接、启动后台会话
    pub async fn enable(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(RelayError::config("relay is already enabled"));
        }
        self.config.validate()?;

        info!(
            host = %self.config.host_server,
            webhooks = self.config.web_hooks.len(),
            "Relay enabling"
        );
        // 上一轮的中断只作用于上一轮会话
        self.interrupt.reset();
        let socket = self.consumer.connect().await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let session = StreamSession::new(socket, stop_rx, self.interrupt.clone());
        let consumer = self.consumer.clone();
        let task = tokio::spawn(async move { consumer.run(session).await });

        self.session = Some(SessionHandle {
            stop: stop_tx,
            task,
        });
        info!("Relay enabled");
        Ok(())
    }

    /// 停用：发送停止信号并等待会话清理完成
    pub async fn disable(&mut self) -> Result<SessionEnd> {
        let session = self
            .session
            .take()
            .ok_or_else(|| RelayError::config("relay is not enabled"))?;

        // 会话可能已自行结束，此时接收端已释放
        let _ = session.stop.send(());
        let end = Self::join(session.task).await?;
        info!(end = ?end, "Relay disabled");
        Ok(end)
    }

    /// 等待会话自行结束（中断、心跳失败或对端关闭）
    pub async fn wait(&mut self) -> Result<SessionEnd> {
        let SessionHandle { stop, task } = self
            .session
            .take()
            .ok_or_else(|| RelayError::config("relay is not enabled"))?;

        let end = Self::join(task).await;
        drop(stop);
        end
    }

    async fn join(task: JoinHandle<SessionEnd>) -> Result<SessionEnd> {
        task.await.map_err(|e| {
            warn!(error = %e, "Session task failed");
            RelayError::connection(format!("session task failed: {}", e))
        })
    }

    /// 独立的连接探测
    pub async fn test_connection(&self, url: &str) -> Result<()> {
        stream::test_connection(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enable_requires_token() {
        let mut plugin = RelayPlugin::new(Config::default()).unwrap();
        let err = plugin.enable().await.unwrap_err();

        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(!plugin.is_running());
        assert_eq!(plugin.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_disable_without_enable() {
        let mut plugin = RelayPlugin::new(Config::default()).unwrap();
        assert!(plugin.disable().await.is_err());
    }
}
