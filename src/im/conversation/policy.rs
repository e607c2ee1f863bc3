//! 会话协调策略
//!
//! 纯函数集合：合并推送更新、重连快照合并、排序、标签页过滤、未读聚合。
//! 不持有任何状态，由 ConversationStore 与 SyncController 调用。

use crate::im::conversation::models::{ConversationSummary, ConversationType, ConversationUpdate};
use std::cmp::Ordering;

/// 收件箱标签页
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tab {
    #[default]
    All,
    Unread,
    Groups,
    /// 其他任意标签页都按单聊过滤
    Direct,
}

impl Tab {
    /// 由 UI 传入的标签页 ID 解析
    pub fn from_id(tab_id: &str) -> Self {
        match tab_id.trim().to_ascii_lowercase().as_str() {
            "all" => Tab::All,
            "unread" => Tab::Unread,
            "groups" => Tab::Groups,
            _ => Tab::Direct,
        }
    }

    /// 标签页过滤谓词
    pub fn matches(&self, conv: &ConversationSummary) -> bool {
        match self {
            Tab::All => true,
            Tab::Unread => conv.unread_count > 0,
            Tab::Groups => conv.conversation_type == ConversationType::Group,
            Tab::Direct => conv.conversation_type == ConversationType::Direct,
        }
    }
}

/// 文本搜索谓词：对 participant.name 做大小写不敏感的子串匹配，空查询匹配全部
pub fn matches_search(conv: &ConversationSummary, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    conv.participant
        .name
        .to_lowercase()
        .contains(&query.to_lowercase())
}

/// 展示排序：置顶优先 → 有消息的按时间降序 → 无消息的按创建时间降序 → id 升序
pub fn compare_for_display(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    b.is_pinned
        .cmp(&a.is_pinned)
        .then_with(|| match (a.last_timestamp(), b.last_timestamp()) {
            (Some(ta), Some(tb)) => tb.cmp(&ta),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.created_at.cmp(&a.created_at),
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// 原地排序
pub fn sort_conversations(list: &mut [ConversationSummary]) {
    list.sort_by(compare_for_display);
}

/// 过滤 + 排序后的可见会话列表
pub fn visible_conversations<'a, I>(rows: I, tab: Tab, query: &str) -> Vec<ConversationSummary>
where
    I: IntoIterator<Item = &'a ConversationSummary>,
{
    let mut list: Vec<ConversationSummary> = rows
        .into_iter()
        .filter(|c| tab.matches(c) && matches_search(c, query))
        .cloned()
        .collect();
    sort_conversations(&mut list);
    list
}

/// 总未读数：始终基于未过滤的全量会话
pub fn total_unread<'a, I>(rows: I) -> u64
where
    I: IntoIterator<Item = &'a ConversationSummary>,
{
    rows.into_iter().map(|c| u64::from(c.unread_count)).sum()
}

/// 合并一条推送更新
///
/// 除 `is_pinned` 外所有字段以更新为准；`is_pinned` 仅在 `pin_changed` 时覆盖。
/// 自己发送的最新消息不会让未读数增加。
pub fn merge_update(
    existing: Option<&ConversationSummary>,
    update: &ConversationUpdate,
    self_id: &str,
) -> ConversationSummary {
    let mut merged = update.summary.clone();

    if let Some(existing) = existing {
        if !update.pin_changed {
            merged.is_pinned = existing.is_pinned;
        }
    }

    let sent_by_self = merged
        .last_message
        .as_ref()
        .is_some_and(|m| m.sender_id == self_id);
    if sent_by_self {
        let previous = existing.map(|c| c.unread_count).unwrap_or(0);
        merged.unread_count = merged.unread_count.min(previous);
    }

    merged
}

/// 重连后的快照合并
///
/// 有时间戳的字段（lastMessage）取较新者；无时间戳的字段以服务器为准。
pub fn merge_resync(local: &ConversationSummary, server: ConversationSummary) -> ConversationSummary {
    let mut merged = server;
    let local_is_newer = match (local.last_timestamp(), merged.last_timestamp()) {
        (Some(lt), Some(st)) => lt > st,
        (Some(_), None) => true,
        _ => false,
    };
    if local_is_newer {
        merged.last_message = local.last_message.clone();
    }
    merged
}
