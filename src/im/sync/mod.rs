//! 同步模块
//!
//! 快照装载、推送事件应用与重连补偿的状态机

pub mod models;
pub mod service;

pub use models::{ConversationRow, SyncConfig, SyncState, SyncStatus};
pub use service::{SyncController, SyncListeners};
