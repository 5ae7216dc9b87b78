//! 规则匹配 - 决定一条消息是否路由到某个 webhook
//!
//! - rules 为空：标签模式，extras.tag 与 tags 中任一项忽略大小写相等即匹配
//! - rules 非空：规则模式，所有规则都匹配才算匹配
//!
//! 匹配是纯函数，任何输入都返回 bool。

use super::message::{Message, MessageExtras};
use crate::config::{Rule, RuleMode, RuleType, WebhookTarget};
use tracing::debug;

/// 比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare {
    /// 忽略大小写相等
    Eq,
    /// 子串包含
    Contains,
}

impl Compare {
    fn apply(self, subject: &str, text: &str) -> bool {
        match self {
            Compare::Eq => eq_ignore_case(subject, text),
            Compare::Contains => subject.contains(text),
        }
    }
}

/// Unicode 感知的忽略大小写比较
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// 判断消息是否匹配 webhook
pub fn matches(message: &Message, extras: &MessageExtras, target: &WebhookTarget) -> bool {
    if target.rules.is_empty() {
        matches_tags(message, &target.tags)
    } else {
        target
            .rules
            .iter()
            .all(|rule| rule_matches(message, extras, rule))
    }
}

/// 标签模式
fn matches_tags(message: &Message, tags: &[String]) -> bool {
    let msg_tag = match message.tag() {
        Some(tag) if !tag.is_empty() => tag,
        _ => {
            debug!("Message has no tag, tag mode never matches");
            return false;
        }
    };

    let matched = tags.iter().any(|tag| eq_ignore_case(msg_tag, tag));
    debug!(tag = msg_tag, matched, "Tag mode evaluated");
    matched
}

/// 单条规则
pub fn rule_matches(message: &Message, extras: &MessageExtras, rule: &Rule) -> bool {
    if rule.texts.is_empty() {
        debug!(rule_type = ?rule.rule_type, "Rule has no texts, fail closed");
        return false;
    }

    let app_id;
    let (subject, compare) = match rule.rule_type {
        RuleType::AppId => {
            app_id = extras.app_id.to_string();
            (app_id.as_str(), Compare::Eq)
        }
        RuleType::Title => (message.title.as_str(), Compare::Contains),
        RuleType::Message => (message.body.as_str(), Compare::Contains),
        RuleType::Tag => (message.tag().unwrap_or(""), Compare::Eq),
    };

    let matched = match rule.mode {
        RuleMode::And => rule.texts.iter().all(|text| compare.apply(subject, text)),
        RuleMode::Or => rule.texts.iter().any(|text| compare.apply(subject, text)),
    };

    debug!(
        rule_type = ?rule.rule_type,
        mode = ?rule.mode,
        subject,
        matched,
        "Rule evaluated"
    );
    matched
}
