//! 同步控制器模型定义

use crate::im::conversation::models::ConversationSummary;
use crate::im::conversation::policy::Tab;
use crate::im::conversation::store::ConversationStore;
use crate::im::presence::models::PresenceRecord;
use crate::im::presence::tracker::PresenceTracker;
use crate::im::transport::{BackoffConfig, ConnectionState};
use serde::Serialize;
use std::time::Duration;

/// 同步状态机：Idle → Hydrating → Live → Resyncing → Live → ... → Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    #[default]
    Idle,
    /// 首次拉取快照中，推送事件暂存
    Hydrating,
    Live,
    /// 重连后重新拉取快照并合并
    Resyncing,
    Stopped,
}

/// 同步控制器配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 单次快照请求超时，超时视为可重试失败
    pub fetch_timeout: Duration,
    /// 快照失败重试退避
    pub backoff: BackoffConfig,
    /// 连续失败多少次后标记数据过期
    pub banner_after_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            banner_after_attempts: 3,
        }
    }
}

/// 对外暴露的同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// 快照多次拉取失败，当前展示的是缓存数据
    pub stale: bool,
    pub connection: ConnectionState,
    /// 连接多次失败，离线提示
    pub offline: bool,
}

/// 渲染层使用的一行：会话 + 对端在线状态（仅单聊）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    #[serde(flatten)]
    pub conversation: ConversationSummary,
    pub presence: Option<PresenceRecord>,
}

/// 同步控制器持有的全部可变状态，只在同一把写锁下修改
#[derive(Debug, Default)]
pub(crate) struct InboxState {
    pub store: ConversationStore,
    pub presence: PresenceTracker,
    pub tab: Tab,
    pub query: String,
    pub sync_state: SyncState,
    pub stale: bool,
}

impl InboxState {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            store: ConversationStore::new(self_id),
            ..Self::default()
        }
    }
}
