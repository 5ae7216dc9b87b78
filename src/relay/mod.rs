//! 转发核心 - 规则匹配、webhook 分发与 stream 消费
//!
//! 数据流：
//! ```text
//! RelayPlugin::enable → StreamConsumer 建立连接 → 收到帧 → 解码
//!     → 对每个 webhook：rules::matches → WebhookDispatcher::send
//! ```

pub mod dispatcher;
pub mod message;
pub mod plugin;
pub mod rules;
pub mod stream;

pub use dispatcher::{render_body, DispatchFailure, EffectiveTarget, SendResult, WebhookDispatcher};
pub use message::{decode_frame, Frame, Message, MessageExtras};
pub use plugin::RelayPlugin;
pub use rules::{matches, rule_matches};
pub use stream::{ConsumerState, InterruptToken, SessionEnd, StreamConsumer, StreamSession};
