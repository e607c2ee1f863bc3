//! 传输会话实现
//!
//! 一个 `TransportSession` 实例对应一条长连接。`connect` 立即返回，连接、
//! 退避重连和心跳都在内部任务中完成，状态变化通过 `current_state()` 与
//! 生命周期事件对外暴露。

use crate::im::auth::Credentials;
use crate::im::error::{Result, SyncError};
use crate::im::serialization::new_operation_id;
use crate::im::transport::backoff::BackoffConfig;
use crate::im::transport::events::{decode_frame, EventKind, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 连接状态机：Disconnected → Connecting → Connected → Reconnecting → Connected → ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// 传输层配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 单次建连超时
    pub connect_timeout: Duration,
    /// 重连退避
    pub backoff: BackoffConfig,
    /// 连续失败多少次后发出离线提示
    pub offline_after_failures: u32,
}

impl TransportConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            compression: "gzip".to_string(),
            heartbeat_interval: Duration::from_secs(25),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            offline_after_failures: 5,
        }
    }
}

/// 事件处理器
///
/// 在读循环中同步调用，实现方应尽快返回（通常只是把事件转发到通道）。
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &TransportEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&TransportEvent) + Send + Sync,
{
    fn handle(&self, event: &TransportEvent) {
        self(event)
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<u64, (EventKind, Arc<dyn EventHandler>)>,
}

/// 订阅句柄，`unsubscribe` 或 drop 时释放对应的处理器
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) {
        // 释放逻辑在 Drop 中
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// 会话内部共享状态（供连接任务使用）
struct Shared {
    registry: Arc<Mutex<Registry>>,
    state_tx: watch::Sender<ConnectionState>,
    offline: AtomicBool,
    /// 连接代数，每次 connect / disconnect 递增；旧任务的迟到结果被丢弃
    epoch: AtomicU64,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("[Transport] 状态变更: {:?} -> {:?}", *current, state);
                *current = state;
                true
            }
        });
    }

    fn dispatch(&self, event: &TransportEvent) {
        let kind = event.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| h.clone())
            .collect();
        if handlers.is_empty() {
            debug!("[Transport] 事件 {} 无订阅者，忽略", kind.name());
        }
        for handler in handlers {
            handler.handle(event);
        }
    }
}

/// 传输会话
pub struct TransportSession {
    config: TransportConfig,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    pub fn new(config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                registry: Arc::new(Mutex::new(Registry::default())),
                state_tx,
                offline: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// 构建 WebSocket 连接 URL
    fn build_url(&self, credentials: &Credentials) -> String {
        let compression_param = if self.config.compression.is_empty() {
            String::new()
        } else {
            format!("&compression={}", self.config.compression)
        };
        format!(
            "{}/?token={}&sendID={}&operationID={}{}",
            self.config.ws_url.trim_end_matches('/'),
            credentials.token,
            credentials.user_id,
            new_operation_id(),
            compression_param
        )
    }

    /// 开始连接，立即返回；连接失败会在内部按退避策略重试
    ///
    /// 已有连接任务时先终止旧任务。必须在 Tokio 运行时中调用。
    pub fn connect(&self, credentials: &Credentials) -> Result<()> {
        if self.config.ws_url.is_empty() {
            return Err(SyncError::InvalidConfig("ws_url 为空".to_string()));
        }
        if self.config.heartbeat_interval.is_zero() {
            return Err(SyncError::InvalidConfig("heartbeat_interval 不能为 0".to_string()));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Transport(format!("没有可用的 Tokio 运行时: {}", e)))?;

        let url = self.build_url(credentials);
        info!(
            "[Transport] 🔗 连接到消息服务器 (user={}, url={})",
            credentials.user_id, self.config.ws_url
        );

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let link = Link {
            shared: self.shared.clone(),
            epoch,
        };
        let config = self.config.clone();
        let new_task = handle.spawn(async move {
            run_connection_loop(link, config, url).await;
        });

        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.replace(new_task) {
            old.abort();
        }
        Ok(())
    }

    /// 断开连接：终止连接任务（包括进行中的退避等待），状态回到 Disconnected
    pub fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            info!("[Transport] 👋 主动断开连接");
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared.dispatch(&TransportEvent::Disconnected {
                reason: "主动断开".to_string(),
            });
        }
        self.shared.offline.store(false, Ordering::SeqCst);
    }

    /// 订阅某类事件
    pub fn on_event<H>(&self, kind: EventKind, handler: H) -> Subscription
    where
        H: EventHandler + 'static,
    {
        let mut registry = self
            .shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, (kind, Arc::new(handler)));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.shared.registry),
        }
    }

    /// 当前订阅数
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// 监听状态变化
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// 是否处于离线提示状态
    pub fn is_offline(&self) -> bool {
        self.shared.offline.load(Ordering::SeqCst)
    }

    /// 直接向订阅者注入事件（不经过网络）
    #[cfg(test)]
    pub(crate) fn inject(&self, event: TransportEvent) {
        if let TransportEvent::Connected | TransportEvent::Reconnected = event {
            self.shared.set_state(ConnectionState::Connected);
        }
        self.shared.dispatch(&event);
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// 连接任务持有的句柄：只有代数仍然有效时才允许改状态、发事件
struct Link {
    shared: Arc<Shared>,
    epoch: u64,
}

impl Link {
    fn set_state(&self, state: ConnectionState) {
        if self.shared.is_current(self.epoch) {
            self.shared.set_state(state);
        }
    }

    fn dispatch(&self, event: &TransportEvent) {
        if self.shared.is_current(self.epoch) {
            self.shared.dispatch(event);
        }
    }

    fn set_offline(&self, offline: bool) {
        if self.shared.is_current(self.epoch) {
            self.shared.offline.store(offline, Ordering::SeqCst);
        }
    }
}

/// 连接主循环：建连 → 读循环 → 断线 → 退避 → 重连
async fn run_connection_loop(link: Link, config: TransportConfig, url: String) {
    let mut failures: u32 = 0;
    let mut established = false;

    loop {
        link.set_state(if established {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        match timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, response))) => {
                info!(
                    "[Transport] ✅ WebSocket 连接成功, 状态: {}",
                    response.status()
                );
                failures = 0;
                link.set_offline(false);
                link.set_state(ConnectionState::Connected);
                let event = if established {
                    TransportEvent::Reconnected
                } else {
                    TransportEvent::Connected
                };
                link.dispatch(&event);
                established = true;

                let reason = read_loop(&link, ws_stream, config.heartbeat_interval).await;
                warn!("[Transport] 连接断开: {}", reason);
                link.set_state(ConnectionState::Reconnecting);
                link.dispatch(&TransportEvent::Disconnected { reason });
            }
            Ok(Err(e)) => {
                failures += 1;
                warn!("[Transport] ❌ 连接失败（第 {} 次）: {}", failures, e);
            }
            Err(_) => {
                failures += 1;
                warn!(
                    "[Transport] ❌ 连接超时（第 {} 次），超时: {:?}",
                    failures, config.connect_timeout
                );
            }
        }

        if failures > 0 && failures == config.offline_after_failures {
            error!(
                "[Transport] ⚠️ 连续 {} 次连接失败，进入离线提示状态，继续重试",
                failures
            );
            link.set_offline(true);
            link.dispatch(&TransportEvent::Offline);
        }

        let delay = config.backoff.delay_for(failures.saturating_sub(1));
        debug!("[Transport] {:?} 后重连", delay);
        sleep(delay).await;
    }
}

/// 读循环 + 心跳，返回断开原因
async fn read_loop(link: &Link, ws_stream: WsStream, heartbeat: Duration) -> String {
    let (mut write, mut read) = ws_stream.split();
    let mut ticker = interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 第一次 tick 立即完成，跳过
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Close(frame))) => {
                    return format!("服务器关闭连接: {:?}", frame);
                }
                Some(Ok(msg)) => match decode_frame(msg) {
                    Ok(Some(event)) => {
                        debug!("[Transport] 📥 收到事件: {}", event.kind().name());
                        link.dispatch(&TransportEvent::Push(event));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("[Transport] 丢弃无法解析的事件: {}", e);
                    }
                },
                Some(Err(e)) => return format!("WebSocket 错误: {}", e),
                None => return "连接已关闭".to_string(),
            },
            _ = ticker.tick() => {
                if let Err(e) = write.send(WsMessage::Ping(vec![])).await {
                    return format!("心跳发送失败: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::transport::events::PushEvent;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn test_config(port: u16) -> TransportConfig {
        let mut config = TransportConfig::new(format!("ws://127.0.0.1:{}", port));
        config.backoff = BackoffConfig::new(Duration::from_millis(20), Duration::from_millis(100));
        config.connect_timeout = Duration::from_secs(2);
        config.offline_after_failures = 3;
        config
    }

    fn credentials() -> Credentials {
        Credentials {
            user_id: "me".to_string(),
            token: "t0ken".to_string(),
        }
    }

    fn collect(
        session: &TransportSession,
        kinds: &[EventKind],
    ) -> (Vec<Subscription>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subs = kinds
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                session.on_event(*kind, move |ev: &TransportEvent| {
                    let _ = tx.send(ev.clone());
                })
            })
            .collect();
        (subs, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    const DELETE_FRAME: &str = r#"{"event":"conversationDeleted","data":{"id":"c9"}}"#;

    #[tokio::test]
    async fn delivers_push_events_and_drops_malformed_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text("{broken".to_string())).await.unwrap();
            ws.send(WsMessage::Text(r#"{"event":"mystery","data":1}"#.to_string()))
                .await
                .unwrap();
            ws.send(WsMessage::Text(DELETE_FRAME.to_string())).await.unwrap();
            // 保持连接直到客户端断开
            while let Some(Ok(_)) = ws.next().await {}
        });

        let session = TransportSession::new(test_config(port));
        let mut kinds = EventKind::PUSH.to_vec();
        kinds.push(EventKind::Connected);
        let (_subs, mut rx) = collect(&session, &kinds);
        session.connect(&credentials()).unwrap();

        assert_eq!(next(&mut rx).await, TransportEvent::Connected);
        assert_eq!(session.current_state(), ConnectionState::Connected);
        match next(&mut rx).await {
            TransportEvent::Push(PushEvent::ConversationDeleted(d)) => assert_eq!(d.id, "c9"),
            other => panic!("unexpected event: {:?}", other),
        }

        session.disconnect();
        assert_eq!(session.current_state(), ConnectionState::Disconnected);
        server.abort();
    }

    #[tokio::test]
    async fn reconnect_after_drop_emits_reconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // 第一条连接建立后立即关闭
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
            drop(ws);
            // 第二条连接保持
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let session = TransportSession::new(test_config(port));
        let (_subs, mut rx) = collect(&session, &EventKind::LIFECYCLE);
        session.connect(&credentials()).unwrap();

        assert_eq!(next(&mut rx).await, TransportEvent::Connected);
        assert!(matches!(next(&mut rx).await, TransportEvent::Disconnected { .. }));
        assert_eq!(next(&mut rx).await, TransportEvent::Reconnected);

        session.disconnect();
        server.abort();
    }

    #[tokio::test]
    async fn repeated_failures_raise_offline_once() {
        // 绑定后立即释放端口，使连接被拒绝
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let session = TransportSession::new(test_config(port));
        let (_subs, mut rx) = collect(&session, &EventKind::LIFECYCLE);
        session.connect(&credentials()).unwrap();

        assert_eq!(next(&mut rx).await, TransportEvent::Offline);
        assert!(session.is_offline());
        assert_ne!(session.current_state(), ConnectionState::Connected);

        session.disconnect();
        assert!(!session.is_offline());
    }

    #[tokio::test]
    async fn unsubscribe_releases_handler() {
        let session = TransportSession::new(test_config(1));
        let (subs, mut rx) = collect(&session, &[EventKind::Connected]);
        assert_eq!(session.subscriber_count(), 1);
        for sub in subs {
            sub.unsubscribe();
        }
        assert_eq!(session.subscriber_count(), 0);
        session.inject(TransportEvent::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connect_without_runtime_fails_cleanly() {
        let session = TransportSession::new(test_config(1));
        assert!(matches!(
            session.connect(&credentials()),
            Err(SyncError::Transport(_))
        ));
        let empty = TransportSession::new(TransportConfig::new(""));
        assert!(matches!(
            empty.connect(&credentials()),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn zero_heartbeat_is_rejected_before_spawning() {
        let mut config = test_config(1);
        config.heartbeat_interval = Duration::ZERO;
        let session = TransportSession::new(config);
        assert!(matches!(
            session.connect(&credentials()),
            Err(SyncError::InvalidConfig(_))
        ));
        assert_eq!(session.current_state(), ConnectionState::Disconnected);
    }
}
