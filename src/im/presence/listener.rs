//! 在线状态监听器回调接口

use crate::im::presence::models::PresenceRecord;
use async_trait::async_trait;

#[async_trait]
pub trait PresenceListener: Send + Sync {
    /// 某个对端在线状态变更
    async fn on_presence_changed(&self, record: PresenceRecord);
}

/// 空实现（默认监听器）
pub struct EmptyPresenceListener;

#[async_trait]
impl PresenceListener for EmptyPresenceListener {
    async fn on_presence_changed(&self, _record: PresenceRecord) {}
}
