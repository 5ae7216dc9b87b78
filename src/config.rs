//! 配置模块 - 上游 stream 地址、客户端 token 和 webhook 列表
//!
//! 配置文件为 JSON，字段名与插件配置保持一致：
//!
//! ```json
//! {
//!   "client_token": "CrMo3UaAQG1H37G",
//!   "host_server": "ws://localhost",
//!   "debug": false,
//!   "web_hooks": [
//!     {
//!       "url": "http://192.168.1.2:10201/api/sendTextMsg",
//!       "method": "POST",
//!       "body": "{\"msg\":\"$title\\n$message\"}",
//!       "tags": ["ops"],
//!       "rules": [{ "type": "appid", "mode": "OR", "texts": ["3", "4"] }]
//!     }
//!   ]
//! }
//! ```

use crate::error::{RelayError, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认 HTTP 方法
pub const DEFAULT_METHOD: &str = "POST";

/// 默认请求体模板，`\n` 为模板自身的转义序列
pub const DEFAULT_BODY_TEMPLATE: &str = r#"{"msg":"$title\n$message"}"#;

/// 默认请求头
pub fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

/// 规则比较对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// 按应用 ID 精确匹配
    #[default]
    AppId,
    /// 标题包含
    Title,
    /// 正文包含
    Message,
    /// extras.tag 精确匹配
    Tag,
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "appid" => Ok(Self::AppId),
            "title" => Ok(Self::Title),
            "message" => Ok(Self::Message),
            "tag" => Ok(Self::Tag),
            other => Err(format!("unknown rule type: {}，可选: appid, title, message, tag", other)),
        }
    }
}

impl<'de> Deserialize<'de> for RuleType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// 同一规则内多个 text 的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleMode {
    #[default]
    And,
    Or,
}

impl std::str::FromStr for RuleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "and" | "&&" => Ok(Self::And),
            "or" | "||" => Ok(Self::Or),
            other => Err(format!("unknown rule mode: {}，可选: AND, OR", other)),
        }
    }
}

impl<'de> Deserialize<'de> for RuleMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// 单条匹配规则
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    #[serde(default)]
    pub mode: RuleMode,
    #[serde(default)]
    pub texts: Vec<String>,
}

impl Rule {
    pub fn new(rule_type: RuleType, mode: RuleMode, texts: &[&str]) -> Self {
        Self {
            rule_type,
            mode,
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Webhook 目标
///
/// `method`/`body`/`header` 缺省时由 [`crate::relay::dispatcher::EffectiveTarget`]
/// 在分发时补全，配置本身保持只读。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookTarget {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 请求体模板，支持 `$title` / `$message` 占位符
    ///
    /// 只有替换进来的标题和正文会把换行转义为 `\n`；模板中的真实换行原样发送，
    /// 单行 JSON 模板应写成两字符的 `\n`（JSON 配置中为 `\\n`）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<BTreeMap<String, String>>,
    /// 标签模式使用的标签列表（rules 为空时生效）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

impl WebhookTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// 转发器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub host_server: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub web_hooks: Vec<WebhookTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_token: String::new(),
            host_server: "ws://localhost".to_string(),
            debug: false,
            web_hooks: Vec::new(),
        }
    }
}

impl Config {
    /// 默认配置文件路径: ~/.config/notify-relay/config.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notify-relay")
            .join("config.json")
    }

    /// 从文件加载配置（不做校验）
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RelayError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| RelayError::config(format!("invalid config: {}", e)))
    }

    /// 写入配置文件，自动创建父目录
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RelayError::config(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RelayError::config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| RelayError::config(format!("cannot write {}: {}", path.display(), e)))
    }

    /// 校验必填字段
    pub fn validate(&self) -> Result<()> {
        if self.host_server.trim().is_empty() {
            return Err(RelayError::config("host_server is required"));
        }
        if self.client_token.trim().is_empty() {
            return Err(RelayError::config("client_token is required"));
        }
        let host = self.host_server.to_ascii_lowercase();
        if !host.starts_with("ws://") && !host.starts_with("wss://") {
            return Err(RelayError::config(format!(
                "host_server must start with ws:// or wss://, got {}",
                self.host_server
            )));
        }
        Ok(())
    }

    /// stream 连接地址: {host_server}/stream?token={client_token}
    pub fn stream_url(&self) -> String {
        format!(
            "{}/stream?token={}",
            self.host_server.trim_end_matches('/'),
            self.client_token
        )
    }

    /// 示例配置（`init` 命令写出）
    pub fn sample() -> Self {
        Self {
            client_token: "CrMo3UaAQG1H37G".to_string(),
            host_server: "ws://localhost".to_string(),
            debug: false,
            web_hooks: vec![
                WebhookTarget::new("http://192.168.1.2:10201/api/sendTextMsg")
                    .with_method("POST")
                    .with_body(r#"{"wxid":"xxxxxxxx","msg":"$title\n$message"}"#)
                    .with_tags(&["wechat"]),
                WebhookTarget::new("https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=xxxxxx")
                    .with_method("POST")
                    .with_body(r#"{"msgtype":"text","text":{"content":"$title\n$message"}}"#)
                    .with_rule(Rule::new(RuleType::AppId, RuleMode::Or, &["1", "2"])),
            ],
        }
    }
}

/// 会话时序参数
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 首次连接失败后的重试等待
    pub reconnect_delay: Duration,
    /// 发送 close 帧后等待读任务退出的上限
    pub close_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(1),
            close_timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "client_token": "abc",
            "host_server": "ws://gotify.local/",
            "debug": true,
            "web_hooks": [
                {
                    "url": "http://hook.local/a",
                    "tags": ["ops"],
                    "rules": [
                        {"type": "title", "mode": "||", "texts": ["err", "warn"]},
                        {"texts": ["42"]}
                    ]
                }
            ]
        }"#;
        let config = Config::from_json(json).unwrap();
        assert!(config.debug);
        assert_eq!(config.web_hooks.len(), 1);

        let hook = &config.web_hooks[0];
        assert_eq!(hook.method, None);
        assert_eq!(hook.rules[0].rule_type, RuleType::Title);
        assert_eq!(hook.rules[0].mode, RuleMode::Or);
        // 缺省 type/mode
        assert_eq!(hook.rules[1].rule_type, RuleType::AppId);
        assert_eq!(hook.rules[1].mode, RuleMode::And);

        assert_eq!(config.stream_url(), "ws://gotify.local/stream?token=abc");
    }

    #[test]
    fn test_unknown_rule_type_rejected() {
        let json = r#"{"web_hooks":[{"url":"x","rules":[{"type":"priority","texts":["1"]}]}]}"#;
        let err = Config::from_json(json).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn test_mode_aliases() {
        assert_eq!("AND".parse::<RuleMode>().unwrap(), RuleMode::And);
        assert_eq!("&&".parse::<RuleMode>().unwrap(), RuleMode::And);
        assert_eq!("or".parse::<RuleMode>().unwrap(), RuleMode::Or);
        assert!("xor".parse::<RuleMode>().is_err());
    }

    #[test]
    fn test_validate_required_fields() {
        let mut config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_token"));

        config.client_token = "t".to_string();
        assert!(config.validate().is_ok());

        config.host_server = "http://localhost".to_string();
        assert!(config.validate().is_err());

        config.host_server = "  ".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("host_server"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config::sample();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
