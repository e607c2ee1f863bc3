//! 在线状态模型

use serde::{Deserialize, Serialize};

/// 某个对端的在线状态
///
/// 没有记录等价于 `{online: false, last_seen_at: None}`，表示“未知”，而不是“离线”。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    #[serde(rename = "peerID")]
    pub peer_id: String,
    pub online: bool,
    pub last_seen_at: Option<i64>,
}

impl PresenceRecord {
    /// 未知状态
    pub fn unknown(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            online: false,
            last_seen_at: None,
        }
    }
}

/// 推送的在线状态事件 `presenceUpdate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    #[serde(rename = "peerID")]
    pub peer_id: String,
    pub online: bool,
    /// 事件时间（毫秒），服务器可能不带
    #[serde(default)]
    pub at: Option<i64>,
}
