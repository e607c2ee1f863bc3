//! 在线状态模块
//!
//! 独立于会话内容，按对端 ID 维护在线 / 最近在线时间

pub mod listener;
pub mod models;
pub mod tracker;

pub use listener::{EmptyPresenceListener, PresenceListener};
pub use models::{PresenceRecord, PresenceUpdate};
pub use tracker::PresenceTracker;
