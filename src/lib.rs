//! Notify Relay - 订阅推送 stream，按规则转发到 HTTP webhook

pub mod config;
pub mod error;
pub mod relay;

pub use config::{Config, Rule, RuleMode, RuleType, StreamOptions, WebhookTarget};
pub use error::{RelayError, Result};
pub use relay::{
    ConsumerState, DispatchFailure, EffectiveTarget, InterruptToken, Message, MessageExtras,
    RelayPlugin, SendResult, SessionEnd, WebhookDispatcher,
};
