//! 传输会话模块
//!
//! 持有一条到消息后端的 WebSocket 长连接，负责重连退避、心跳，
//! 并把收到的帧解码为带标签的事件分发给订阅者

pub mod backoff;
pub mod events;
pub mod listener;
pub mod session;

pub use backoff::BackoffConfig;
pub use events::{ConversationDeleted, EventKind, PushEvent, TransportEvent};
pub use listener::{ConnectionListener, EmptyConnectionListener};
pub use session::{ConnectionState, EventHandler, Subscription, TransportConfig, TransportSession};
