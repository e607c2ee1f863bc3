//! 会话 API DTO（请求和响应结构体）

use crate::im::conversation::models::ConversationSummary;
use serde::{Deserialize, Serialize};

/// 全量会话响应（快照）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllConversationsResp {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

/// 标记会话已读请求
#[derive(Debug, Clone, Serialize)]
pub struct MarkAsReadReq<'a> {
    #[serde(rename = "userID")]
    pub user_id: &'a str,
    #[serde(rename = "conversationID")]
    pub conversation_id: &'a str,
}

/// 设置会话置顶请求
#[derive(Debug, Clone, Serialize)]
pub struct SetPinnedReq<'a> {
    #[serde(rename = "userID")]
    pub user_id: &'a str,
    #[serde(rename = "conversationID")]
    pub conversation_id: &'a str,
    #[serde(rename = "isPinned")]
    pub is_pinned: bool,
}
