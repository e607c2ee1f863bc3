//! 收件箱客户端
//!
//! 组装传输会话、会话 API 与同步控制器，对 UI 层暴露命令与只读视图。

use crate::im::auth::Credentials;
use crate::im::conversation::api::{ConversationApi, InboxBackend};
use crate::im::conversation::listener::ConversationListener;
use crate::im::conversation::models::ConversationSummary;
use crate::im::conversation::policy::Tab;
use crate::im::error::{Result, SyncError};
use crate::im::presence::listener::PresenceListener;
use crate::im::presence::models::PresenceRecord;
use crate::im::sync::{ConversationRow, SyncConfig, SyncController, SyncStatus};
use crate::im::transport::{BackoffConfig, ConnectionListener, TransportConfig, TransportSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 认证 token
    pub token: String,
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
    /// HTTP API 基础地址（快照与出站命令）
    pub api_base_url: String,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 单次建连超时
    pub connect_timeout: Duration,
    /// 单次快照请求超时
    pub fetch_timeout: Duration,
    /// 断线重连退避
    pub reconnect_backoff: BackoffConfig,
    /// 快照失败重试退避
    pub snapshot_backoff: BackoffConfig,
    /// 连续连接失败多少次后提示离线
    pub offline_after_failures: u32,
    /// 快照连续失败多少次后提示数据过期
    pub banner_after_attempts: u32,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String) -> Self {
        let sync = SyncConfig::default();
        Self {
            user_id,
            token,
            ws_url: "ws://localhost:10001".to_string(),
            compression: "gzip".to_string(),
            api_base_url: "http://localhost:10002".to_string(),
            heartbeat_interval: Duration::from_secs(25),
            connect_timeout: Duration::from_secs(10),
            fetch_timeout: sync.fetch_timeout,
            reconnect_backoff: BackoffConfig::default(),
            snapshot_backoff: sync.backoff,
            offline_after_failures: 5,
            banner_after_attempts: sync.banner_after_attempts,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            user_id: self.user_id.clone(),
            token: self.token.clone(),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ws_url: self.ws_url.clone(),
            compression: self.compression.clone(),
            heartbeat_interval: self.heartbeat_interval,
            connect_timeout: self.connect_timeout,
            backoff: self.reconnect_backoff,
            offline_after_failures: self.offline_after_failures,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            fetch_timeout: self.fetch_timeout,
            backoff: self.snapshot_backoff,
            banner_after_attempts: self.banner_after_attempts,
        }
    }

    /// 创建带 token 请求头的 HTTP 客户端
    fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::HeaderName::from_static("token"),
            reqwest::header::HeaderValue::from_str(&self.token)
                .map_err(|e| SyncError::InvalidConfig(format!("无效的 token: {}", e)))?,
        );
        reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(self.fetch_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("创建 HTTP 客户端失败: {}", e)))
    }
}

/// 收件箱客户端
pub struct InboxClient {
    config: ClientConfig,
    controller: SyncController,
}

impl InboxClient {
    /// 使用 HTTP 会话 API 创建客户端
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = ConversationApi::new(
            config.http_client()?,
            config.api_base_url.clone(),
            config.user_id.clone(),
        );
        Ok(Self::with_backend(config, Arc::new(api)))
    }

    /// 使用自定义服务端接口创建客户端
    pub fn with_backend(config: ClientConfig, backend: Arc<dyn InboxBackend>) -> Self {
        let transport = Arc::new(TransportSession::new(config.transport_config()));
        let controller = SyncController::new(config.sync_config(), transport, backend);
        Self { config, controller }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    /// 注册会话监听器
    pub fn set_conversation_listener(&self, listener: Arc<dyn ConversationListener>) {
        self.controller.set_conversation_listener(listener);
    }

    /// 注册在线状态监听器
    pub fn set_presence_listener(&self, listener: Arc<dyn PresenceListener>) {
        self.controller.set_presence_listener(listener);
    }

    /// 注册连接状态监听器
    pub fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.controller.set_connection_listener(listener);
    }

    /// 连接到服务器并开始同步，立即返回
    pub async fn connect(&self) -> Result<()> {
        info!(
            "[Client] 🔗 启动收件箱同步 (user={}, ws={}, api={})",
            self.config.user_id, self.config.ws_url, self.config.api_base_url
        );
        self.controller.start(&self.config.credentials()).await
    }

    /// 断开连接并停止同步
    pub async fn disconnect(&self) {
        self.controller.stop().await;
    }

    pub async fn mark_conversation_read(&self, conversation_id: &str) -> bool {
        self.controller.mark_conversation_read(conversation_id).await
    }

    pub async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> bool {
        self.controller.set_pinned(conversation_id, pinned).await
    }

    pub async fn set_active_tab(&self, tab_id: &str) -> Tab {
        self.controller.set_active_tab(tab_id).await
    }

    pub async fn set_search_query(&self, text: &str) {
        self.controller.set_search_query(text).await
    }

    /// 当前可见的会话列表（已过滤、已排序）
    pub async fn get_conversation_list(&self) -> Vec<ConversationSummary> {
        self.controller.visible_conversations().await
    }

    /// 分页获取会话列表
    pub async fn get_conversation_list_split(
        &self,
        offset: usize,
        count: usize,
    ) -> Vec<ConversationRow> {
        self.controller.conversation_list_split(offset, count).await
    }

    pub async fn get_conversation_rows(&self) -> Vec<ConversationRow> {
        self.controller.conversation_rows().await
    }

    pub async fn get_total_unread_count(&self) -> u64 {
        self.controller.total_unread().await
    }

    pub async fn get_presence(&self, peer_id: &str) -> PresenceRecord {
        self.controller.presence_for(peer_id).await
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.controller.sync_status().await
    }
}
