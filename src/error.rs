//! 错误类型
//!
//! 四类错误对应转发链路的四个阶段：配置、连接、解码、分发。

use thiserror::Error;

/// 转发器错误
#[derive(Debug, Error)]
pub enum RelayError {
    /// 配置缺失或非法，enable() 直接失败，不启动后台任务
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 握手失败或会话中传输层失败
    #[error("connection error: {0}")]
    Connection(String),

    /// 入站帧无法解码
    #[error("decode error: {0}")]
    Decode(String),

    /// webhook 配置非法或出站请求失败
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
