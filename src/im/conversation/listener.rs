//! 会话监听器回调接口

use crate::im::conversation::models::ConversationSummary;
use async_trait::async_trait;

/// 会话监听器回调接口
///
/// `resync` 为 true 表示重连后的快照合并，false 表示首次装载。
#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 同步服务器开始
    async fn on_sync_server_start(&self, resync: bool);

    /// 同步服务器完成
    async fn on_sync_server_finish(&self, resync: bool);

    /// 同步服务器失败（连续失败达到阈值时通知一次，之后继续重试）
    async fn on_sync_server_failed(&self, resync: bool);

    /// 新会话
    async fn on_new_conversation(&self, conversation_list: Vec<ConversationSummary>);

    /// 会话变更
    async fn on_conversation_changed(&self, conversation_list: Vec<ConversationSummary>);

    /// 会话被服务器删除
    async fn on_conversation_deleted(&self, conversation_ids: Vec<String>);

    /// 总未读消息数变更
    async fn on_total_unread_message_count_changed(&self, total_unread_count: u64);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_sync_server_start(&self, _resync: bool) {}
    async fn on_sync_server_finish(&self, _resync: bool) {}
    async fn on_sync_server_failed(&self, _resync: bool) {}
    async fn on_new_conversation(&self, _conversation_list: Vec<ConversationSummary>) {}
    async fn on_conversation_changed(&self, _conversation_list: Vec<ConversationSummary>) {}
    async fn on_conversation_deleted(&self, _conversation_ids: Vec<String>) {}
    async fn on_total_unread_message_count_changed(&self, _total_unread_count: u64) {}
}
