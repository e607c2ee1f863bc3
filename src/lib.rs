pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    client::{ClientConfig, InboxClient},
    conversation::{ConversationSummary, ConversationType, Tab},
    login_async,
    presence::PresenceRecord,
    sync::{ConversationRow, SyncState, SyncStatus},
    Credentials, SyncError,
};
