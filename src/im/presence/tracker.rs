use crate::im::presence::models::{PresenceRecord, PresenceUpdate};
use crate::im::serialization::now_millis;
use std::collections::HashMap;
use tracing::debug;

/// 在线状态跟踪器
///
/// 按事件到达顺序后写覆盖，不做基于时间戳的重排。记录只由在线状态事件创建。
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    records: HashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一条在线状态事件，返回更新后的记录
    ///
    /// 事件不带时间时以到达时间作为最近在线时间。
    pub fn apply_presence_event(
        &mut self,
        peer_id: &str,
        online: bool,
        at: Option<i64>,
    ) -> PresenceRecord {
        let record = PresenceRecord {
            peer_id: peer_id.to_string(),
            online,
            last_seen_at: Some(at.unwrap_or_else(now_millis)),
        };
        debug!(
            "[Presence] {} -> online={}, at={:?}",
            peer_id, online, at
        );
        self.records.insert(peer_id.to_string(), record.clone());
        record
    }

    pub fn apply(&mut self, update: &PresenceUpdate) -> PresenceRecord {
        self.apply_presence_event(&update.peer_id, update.online, update.at)
    }

    /// 查询在线状态，无记录时返回未知状态
    pub fn get(&self, peer_id: &str) -> PresenceRecord {
        self.records
            .get(peer_id)
            .cloned()
            .unwrap_or_else(|| PresenceRecord::unknown(peer_id))
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.records.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_peer_is_unknown() {
        let tracker = PresenceTracker::new();
        let record = tracker.get("ghost");
        assert!(!record.online);
        assert_eq!(record.last_seen_at, None);
        assert!(!tracker.contains("ghost"));
    }

    #[test]
    fn first_event_creates_record_and_later_arrival_wins() {
        let mut tracker = PresenceTracker::new();
        tracker.apply_presence_event("alice", true, Some(200));
        assert!(tracker.get("alice").online);

        // 逻辑上更旧的事件后到达，依然覆盖
        tracker.apply_presence_event("alice", false, Some(100));
        let record = tracker.get("alice");
        assert!(!record.online);
        assert_eq!(record.last_seen_at, Some(100));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn missing_timestamp_is_stamped_on_arrival() {
        let mut tracker = PresenceTracker::new();
        let before = now_millis();
        let record = tracker.apply(&PresenceUpdate {
            peer_id: "bob".to_string(),
            online: true,
            at: None,
        });
        assert!(record.last_seen_at.is_some_and(|t| t >= before));
        assert_eq!(tracker.get("bob"), record);
    }
}
