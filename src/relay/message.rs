//! 入站消息结构与帧解码
//!
//! 同一帧解码两次：一次得到 [`Message`]，一次得到 [`MessageExtras`]。
//! 前者失败则丢弃该帧，后者失败则使用零值。

use crate::error::{RelayError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// 推送消息
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub title: String,
    /// 正文（JSON 字段名为 `message`）
    #[serde(rename = "message", default)]
    pub body: String,
    #[serde(default)]
    pub extras: Option<Map<String, Value>>,
}

impl Message {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            extras: None,
        }
    }

    /// 设置 extras.tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.extras
            .get_or_insert_with(Map::new)
            .insert("tag".to_string(), Value::String(tag.into()));
        self
    }

    /// 读取 extras 中的字符串字段，非字符串值视为缺失
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.as_ref()?.get(key)?.as_str()
    }

    /// extras.tag
    pub fn tag(&self) -> Option<&str> {
        self.extra_str("tag")
    }
}

/// 消息的数值元信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct MessageExtras {
    #[serde(default)]
    pub id: i64,
    /// 同时出现 `appid` 与 `appId` 时按重复字段处理，整体解码失败，取零值
    #[serde(rename = "appid", alias = "appId", default)]
    pub app_id: i64,
}

impl MessageExtras {
    pub fn new(id: i64, app_id: i64) -> Self {
        Self { id, app_id }
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// JSON 消息帧
    Message(Message, MessageExtras),
    /// 非 `{` 开头的帧
    Unsupported,
}

/// 解码一帧文本
///
/// 只有以 `{` 开头的帧才尝试解码；`Message` 解码失败返回 `Decode` 错误。
pub fn decode_frame(raw: &str) -> Result<Frame> {
    if !raw.starts_with('{') {
        return Ok(Frame::Unsupported);
    }

    let message: Message =
        serde_json::from_str(raw).map_err(|e| RelayError::Decode(e.to_string()))?;

    let extras = match serde_json::from_str::<MessageExtras>(raw) {
        Ok(extras) => extras,
        Err(e) => {
            tracing::debug!(error = %e, "Extras decode failed, using zero values");
            MessageExtras::default()
        }
    };

    Ok(Frame::Message(message, extras))
}
