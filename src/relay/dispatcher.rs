//! Webhook 分发器 - 渲染模板并发起一次 HTTP 调用
//!
//! 分发从不返回错误，结果统一为 [`SendResult`]。单个 webhook 的失败只记录日志，
//! 不影响其他 webhook。

use super::message::{Message, MessageExtras};
use super::rules;
use crate::config::{default_headers, WebhookTarget, DEFAULT_BODY_TEMPLATE, DEFAULT_METHOD};
use crate::error::{RelayError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认出站请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 分发失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// webhook 配置非法（URL 为空、方法或请求头非法）
    InvalidConfig(String),
    /// 网络层错误（连接被拒、超时等）
    Transport(String),
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchFailure::InvalidConfig(reason) => write!(f, "invalid-config: {}", reason),
            DispatchFailure::Transport(reason) => write!(f, "transport-error: {}", reason),
        }
    }
}

impl From<DispatchFailure> for RelayError {
    fn from(failure: DispatchFailure) -> Self {
        RelayError::Dispatch(failure.to_string())
    }
}

/// 发送结果
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    /// 请求已发出并收到响应（不论状态码）
    Sent { status: u16 },
    /// 跳过（规则不匹配）
    Skipped(String),
    /// 发送失败
    Failed(DispatchFailure),
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent { .. })
    }
}

/// 补全默认值后的 webhook
#[derive(Debug, Clone)]
pub struct EffectiveTarget {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body_template: String,
}

impl EffectiveTarget {
    /// 由配置生成完整的目标，不修改原配置
    pub fn resolve(target: &WebhookTarget) -> std::result::Result<Self, DispatchFailure> {
        let raw_url = target.url.trim();
        if raw_url.is_empty() {
            return Err(DispatchFailure::InvalidConfig("webhook url is empty".to_string()));
        }
        let url = Url::parse(raw_url)
            .map_err(|e| DispatchFailure::InvalidConfig(format!("invalid url {}: {}", raw_url, e)))?;

        let method_name = target
            .method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_METHOD)
            .to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| DispatchFailure::InvalidConfig(format!("invalid method: {}", method_name)))?;

        let header_source = target.header.clone().unwrap_or_else(default_headers);
        let mut headers = HeaderMap::new();
        for (key, value) in &header_source {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| DispatchFailure::InvalidConfig(format!("invalid header name: {}", key)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| DispatchFailure::InvalidConfig(format!("invalid header value for {}", key)))?;
            headers.append(name, value);
        }

        let body_template = match target.body.as_deref() {
            Some(body) if !body.is_empty() => body.to_string(),
            _ => DEFAULT_BODY_TEMPLATE.to_string(),
        };

        Ok(Self {
            url,
            method,
            headers,
            body_template,
        })
    }
}

/// 将值中的 CR/LF 转为两字符转义序列
fn escape_line_breaks(value: &str) -> String {
    value.replace('\r', "\\r").replace('\n', "\\n")
}

/// 渲染请求体：`$title` / `$message` 单次扫描替换
///
/// 只转义被替换进来的值，模板自身的内容原样保留。
pub fn render_body(template: &str, message: &Message) -> String {
    let title = escape_line_breaks(&message.title);
    let body = escape_line_breaks(&message.body);

    let mut out = String::with_capacity(template.len() + title.len() + body.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("$title") {
            out.push_str(&title);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("$message") {
            out.push_str(&body);
            rest = after;
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Webhook 分发器
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: Client,
}

impl WebhookDispatcher {
    /// 创建分发器，`timeout` 作用于每个出站请求
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Dispatch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// 匹配并发送到单个 webhook
    pub async fn send(
        &self,
        message: &Message,
        extras: &MessageExtras,
        target: &WebhookTarget,
    ) -> SendResult {
        if !rules::matches(message, extras, target) {
            debug!(webhook = %target.url, "Message does not match, skip");
            return SendResult::Skipped("no-match".to_string());
        }

        let effective = match EffectiveTarget::resolve(target) {
            Ok(effective) => effective,
            Err(failure) => return SendResult::Failed(failure),
        };

        let body = render_body(&effective.body_template, message);
        debug!(webhook = %effective.url, method = %effective.method, body = %body, "Sending webhook");

        let response = self
            .client
            .request(effective.method.clone(), effective.url.clone())
            .headers(effective.headers.clone())
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return SendResult::Failed(DispatchFailure::Transport(e.to_string())),
        };

        let status = response.status();
        match response.text().await {
            Ok(text) => debug!(webhook = %effective.url, response = %text, "Webhook response"),
            Err(e) => warn!(webhook = %effective.url, error = %e, "Failed to read webhook response"),
        }
        if status.is_success() {
            info!(webhook = %effective.url, status = status.as_u16(), "Webhook delivered");
        } else {
            warn!(webhook = %effective.url, status = status.as_u16(), "Webhook returned non-success status");
        }

        SendResult::Sent {
            status: status.as_u16(),
        }
    }

    /// 按顺序发送到所有 webhook，单个失败不影响其余
    pub async fn dispatch_all(
        &self,
        message: &Message,
        extras: &MessageExtras,
        targets: &[WebhookTarget],
    ) -> Vec<(String, SendResult)> {
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let result = self.send(message, extras, target).await;
            if let SendResult::Failed(failure) = &result {
                warn!(webhook = %target.url, error = %failure, "Webhook dispatch failed");
            }
            results.push((target.url.clone(), result));
        }

        results
    }
}
