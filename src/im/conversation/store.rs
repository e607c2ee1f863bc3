//! 会话内存存储
//!
//! 会话摘要的唯一权威数据源。本身不做同步，调用方（SyncController）
//! 负责把所有写操作串行化到同一把写锁之下。

use crate::im::conversation::models::{
    ConversationSummary, ConversationUpdate, MergeReport, UpsertOutcome,
};
use crate::im::conversation::policy;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// 会话存储
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    /// 当前登录用户 ID
    self_id: String,
    rows: HashMap<String, ConversationSummary>,
    /// 重连快照窗口：Some 表示正在 Resyncing
    window: Option<ResyncWindow>,
}

/// 窗口内的本地改动，快照合并时不能被旧快照覆盖
#[derive(Debug, Clone, Default)]
struct ResyncWindow {
    /// 被推送或本地命令改动过的会话
    touched: HashSet<String>,
    /// 被服务器删除事件删掉的会话
    deleted: HashSet<String>,
}

impl ConversationStore {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            rows: HashMap::new(),
            window: None,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// 用快照整体替换存储
    pub fn hydrate(&mut self, snapshot: Vec<ConversationSummary>) {
        let mut rows = HashMap::with_capacity(snapshot.len());
        for conv in snapshot {
            if rows.contains_key(&conv.id) {
                warn!("[ConvStore] 快照中存在重复会话，后者覆盖前者: {}", conv.id);
            }
            rows.insert(conv.id.clone(), conv);
        }
        info!("[ConvStore] 📥 快照装载完成，会话数: {}", rows.len());
        self.rows = rows;
        self.window = None;
    }

    /// 插入或合并一条更新
    pub fn upsert(&mut self, update: ConversationUpdate) -> (UpsertOutcome, ConversationSummary) {
        let id = update.summary.id.clone();
        let existing = self.rows.get(&id);
        let merged = policy::merge_update(existing, &update, &self.self_id);

        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(current) if *current == merged => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        };
        debug!("[ConvStore] upsert {} -> {:?}", id, outcome);

        if outcome != UpsertOutcome::Unchanged {
            self.touch(&id);
            if let Some(window) = self.window.as_mut() {
                window.deleted.remove(&id);
            }
            self.rows.insert(id, merged.clone());
        }
        (outcome, merged)
    }

    /// 删除会话（仅由服务器下发的删除事件触发）
    ///
    /// 窗口内的删除会被记住，之后合并的快照即使仍包含该会话也不会恢复它。
    pub fn remove(&mut self, id: &str) -> Option<ConversationSummary> {
        if let Some(window) = self.window.as_mut() {
            window.deleted.insert(id.to_string());
        }
        let removed = self.rows.remove(id);
        if removed.is_some() {
            self.touch(id);
            debug!("[ConvStore] 删除会话: {}", id);
        }
        removed
    }

    /// 本地标记已读：只清零未读数，不动置顶和最新消息内容
    pub fn mark_read(&mut self, id: &str) -> Option<ConversationSummary> {
        let conv = self.rows.get_mut(id)?;
        conv.unread_count = 0;
        if let Some(msg) = conv.last_message.as_mut() {
            msg.is_read = true;
        }
        let snapshot = conv.clone();
        self.touch(id);
        Some(snapshot)
    }

    /// 本地设置置顶
    pub fn set_pinned(&mut self, id: &str, pinned: bool) -> Option<ConversationSummary> {
        let conv = self.rows.get_mut(id)?;
        conv.is_pinned = pinned;
        let snapshot = conv.clone();
        self.touch(id);
        Some(snapshot)
    }

    /// 打开重连快照窗口
    pub fn begin_resync_window(&mut self) {
        self.window = Some(ResyncWindow::default());
    }

    /// 重连后合并快照并关闭窗口
    ///
    /// 快照中存在的会话按 `policy::merge_resync` 合并；快照中缺失且窗口内
    /// 未被改动过的会话视为断线期间被服务器删除；窗口内已被删除的会话
    /// 不会因快照而恢复。
    pub fn merge_snapshot(&mut self, snapshot: Vec<ConversationSummary>) -> MergeReport {
        let ResyncWindow { touched, deleted } = self.window.take().unwrap_or_default();
        let mut report = MergeReport::default();
        let mut seen: HashSet<String> = HashSet::with_capacity(snapshot.len());

        for server in snapshot {
            if deleted.contains(&server.id) {
                debug!("[ConvStore] 快照中的会话已在窗口内被删除，跳过: {}", server.id);
                continue;
            }
            seen.insert(server.id.clone());
            match self.rows.get(&server.id) {
                Some(local) => {
                    let merged = policy::merge_resync(local, server);
                    if *local != merged {
                        report.changed.push(merged.clone());
                        self.rows.insert(merged.id.clone(), merged);
                    }
                }
                None => {
                    report.inserted.push(server.clone());
                    self.rows.insert(server.id.clone(), server);
                }
            }
        }

        let stale: Vec<String> = self
            .rows
            .keys()
            .filter(|id| !seen.contains(*id) && !touched.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.rows.remove(&id);
            report.removed.push(id);
        }

        info!(
            "[ConvStore] 🔄 重连快照合并完成 - 新增: {}, 更新: {}, 删除: {}, 窗口内保留: {}",
            report.inserted.len(),
            report.changed.len(),
            report.removed.len(),
            touched.iter().filter(|id| !seen.contains(*id)).count()
        );
        report
    }

    pub fn is_resyncing(&self) -> bool {
        self.window.is_some()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSummary> {
        self.rows.get(id)
    }

    /// 当前所有会话的只读副本（无序）
    pub fn all(&self) -> Vec<ConversationSummary> {
        self.rows.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_unread(&self) -> u64 {
        policy::total_unread(self.rows.values())
    }

    fn touch(&mut self, id: &str) {
        if let Some(window) = self.window.as_mut() {
            window.touched.insert(id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::models::{ConversationType, LastMessage, MessageKind, Participant};
    use crate::im::conversation::policy::{visible_conversations, Tab};

    fn conv(id: &str, unread: u32, pinned: bool, ts: i64) -> ConversationSummary {
        ConversationSummary {
            id: id.to_string(),
            conversation_type: ConversationType::Direct,
            participant: Participant {
                name: format!("User {}", id),
                avatar_ref: None,
                online_hint: false,
                member_count: None,
                peer_id: Some(format!("peer-{}", id)),
            },
            last_message: Some(LastMessage {
                text: format!("msg at {}", ts),
                kind: MessageKind::Text,
                timestamp: ts,
                sender_id: format!("peer-{}", id),
                is_read: false,
            }),
            unread_count: unread,
            is_pinned: pinned,
            created_at: 0,
        }
    }

    fn hydrated() -> ConversationStore {
        let mut store = ConversationStore::new("me");
        store.hydrate(vec![conv("1", 2, false, 100), conv("2", 0, true, 50)]);
        store
    }

    fn visible_ids(store: &ConversationStore) -> Vec<String> {
        visible_conversations(store.iter(), Tab::All, "")
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    #[test]
    fn hydrate_then_pinned_first() {
        let store = hydrated();
        assert_eq!(visible_ids(&store), vec!["2", "1"]);
        assert_eq!(store.total_unread(), 2);
    }

    #[test]
    fn self_sent_update_moves_row_and_clears_unread() {
        let mut store = hydrated();
        let mut update = conv("1", 0, false, 150);
        if let Some(m) = update.last_message.as_mut() {
            m.sender_id = "me".to_string();
        }
        let (outcome, _) = store.upsert(update.into());
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(visible_ids(&store), vec!["2", "1"]);
        assert_eq!(store.total_unread(), 0);

        store.upsert(conv("3", 0, false, 120).into());
        assert_eq!(visible_ids(&store), vec!["2", "1", "3"]);
    }

    #[test]
    fn repeated_upsert_is_idempotent() {
        let mut store = hydrated();
        let update: ConversationUpdate = conv("1", 5, false, 200).into();
        let (first, _) = store.upsert(update.clone());
        let after_once = store.all();
        let (second, _) = store.upsert(update.clone());
        let (third, _) = store.upsert(update);
        assert_eq!(first, UpsertOutcome::Updated);
        assert_eq!(second, UpsertOutcome::Unchanged);
        assert_eq!(third, UpsertOutcome::Unchanged);
        let mut a = after_once;
        let mut b = store.all();
        a.sort_by(|x, y| x.id.cmp(&y.id));
        b.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_id_is_inserted() {
        let mut store = hydrated();
        let (outcome, _) = store.upsert(conv("9", 1, false, 10).into());
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn message_update_does_not_unpin() {
        let mut store = hydrated();
        store.upsert(conv("2", 1, false, 60).into());
        assert!(store.get("2").map(|c| c.is_pinned).unwrap_or(false));
    }

    #[test]
    fn mark_read_only_clears_unread() {
        let mut store = hydrated();
        store.set_pinned("1", true);
        let before = store.get("1").cloned().unwrap();
        let after = store.mark_read("1").unwrap();
        assert_eq!(after.unread_count, 0);
        assert!(after.is_pinned);
        assert_eq!(
            after.last_message.as_ref().map(|m| m.text.clone()),
            before.last_message.as_ref().map(|m| m.text.clone())
        );
        assert!(store.mark_read("missing").is_none());
    }

    #[test]
    fn resync_does_not_regress_newer_local_message() {
        let mut store = hydrated();
        store.begin_resync_window();
        store.upsert(conv("1", 3, false, 300).into());

        let report = store.merge_snapshot(vec![conv("1", 1, false, 100), conv("2", 0, true, 50)]);
        let row = store.get("1").unwrap();
        assert_eq!(row.last_timestamp(), Some(300));
        assert_eq!(row.unread_count, 1);
        assert!(report.removed.is_empty());
        assert!(!store.is_resyncing());
    }

    #[test]
    fn resync_removes_untouched_rows_missing_from_snapshot() {
        let mut store = hydrated();
        store.upsert(conv("3", 0, false, 10).into());
        store.begin_resync_window();
        store.upsert(conv("4", 1, false, 400).into());

        let report = store.merge_snapshot(vec![conv("2", 0, true, 50), conv("5", 2, false, 70)]);
        assert_eq!(report.inserted.len(), 1);
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec!["1".to_string(), "3".to_string()]);
        assert!(store.get("4").is_some());
        assert!(store.get("5").is_some());
        assert_eq!(store.total_unread(), 3);
    }

    #[test]
    fn delete_during_resync_is_not_undone_by_snapshot() {
        let mut store = hydrated();
        store.begin_resync_window();
        store.remove("1");
        store.remove("never-seen");

        let report = store.merge_snapshot(vec![
            conv("1", 2, false, 100),
            conv("2", 0, true, 50),
            conv("never-seen", 1, false, 10),
        ]);
        assert!(store.get("1").is_none());
        assert!(store.get("never-seen").is_none());
        assert!(report.inserted.is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_unread(), 0);
    }

    #[test]
    fn push_after_delete_in_window_recreates_row() {
        let mut store = hydrated();
        store.begin_resync_window();
        store.remove("1");
        store.upsert(conv("1", 1, false, 500).into());

        store.merge_snapshot(vec![conv("1", 2, false, 100), conv("2", 0, true, 50)]);
        assert_eq!(store.get("1").and_then(|c| c.last_timestamp()), Some(500));
    }

    #[test]
    fn remove_deletes_row() {
        let mut store = hydrated();
        assert!(store.remove("1").is_some());
        assert!(store.remove("1").is_none());
        assert_eq!(store.total_unread(), 0);
    }
}
