//! 会话模块
//!
//! 会话摘要的存储、协调策略与服务端接口

pub mod api;
pub mod listener;
pub mod models;
pub mod policy;
pub mod store;
pub mod types;

// 重新导出主要类型和函数
pub use api::{ConversationApi, InboxBackend};
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::{
    ConversationSummary, ConversationType, ConversationUpdate, LastMessage, MergeReport,
    MessageKind, Participant, UpsertOutcome,
};
pub use policy::Tab;
pub use store::ConversationStore;
pub use types::AllConversationsResp;
