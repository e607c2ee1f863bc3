//! 连接状态监听器回调接口

use crate::im::transport::session::ConnectionState;
use async_trait::async_trait;

#[async_trait]
pub trait ConnectionListener: Send + Sync {
    /// 连接状态变更
    async fn on_connection_status_changed(&self, state: ConnectionState);

    /// 连续重连失败超过上限，UI 应展示离线提示；之后仍会继续重试
    async fn on_offline(&self);
}

/// 空实现（默认监听器）
pub struct EmptyConnectionListener;

#[async_trait]
impl ConnectionListener for EmptyConnectionListener {
    async fn on_connection_status_changed(&self, _state: ConnectionState) {}
    async fn on_offline(&self) {}
}
