//! 会话本地模型定义

use serde::{Deserialize, Serialize};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationType {
    /// 单聊
    Direct,
    /// 群聊
    Group,
}

/// 最新消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    Location,
    System,
    /// 未识别的类型统一归为 Other，避免整条会话解码失败
    #[serde(other)]
    Other,
}

/// 会话对端 / 群组的冗余描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// 显示名称
    pub name: String,
    /// 头像引用
    #[serde(default)]
    pub avatar_ref: Option<String>,
    /// 服务器给出的在线提示（非权威，以 PresenceTracker 为准）
    #[serde(default)]
    pub online_hint: bool,
    /// 群成员数（仅群聊）
    #[serde(default)]
    pub member_count: Option<u32>,
    /// 对端用户 ID（单聊时用于查询在线状态）
    #[serde(default, rename = "peerID")]
    pub peer_id: Option<String>,
}

/// 会话最新消息摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub kind: MessageKind,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(default)]
    pub is_read: bool,
}

/// 收件箱中的一行会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// 会话 ID，快照与推送事件之间保持稳定
    pub id: String,
    #[serde(rename = "type")]
    pub conversation_type: ConversationType,
    pub participant: Participant,
    /// 从未有过消息的会话（例如新建的群）没有 lastMessage
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_pinned: bool,
    /// 会话创建时间，仅用于无消息会话之间的排序
    #[serde(default)]
    pub created_at: i64,
}

impl ConversationSummary {
    /// 最新消息时间戳（无消息时为 None）
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_message.as_ref().map(|m| m.timestamp)
    }

    /// 对端用户 ID（仅单聊）
    pub fn peer_id(&self) -> Option<&str> {
        match self.conversation_type {
            ConversationType::Direct => self.participant.peer_id.as_deref(),
            ConversationType::Group => None,
        }
    }
}

/// 推送的会话更新
///
/// `pin_changed` 为 true 时才允许覆盖本地的置顶状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpdate {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    #[serde(default)]
    pub pin_changed: bool,
}

impl From<ConversationSummary> for ConversationUpdate {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            summary,
            pin_changed: false,
        }
    }
}

/// upsert 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// 重复投递，存储状态无变化
    Unchanged,
}

/// 快照合并统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: Vec<ConversationSummary>,
    pub changed: Vec<ConversationSummary>,
    pub removed: Vec<String>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}
