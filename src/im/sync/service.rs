//! 同步控制器
//!
//! 串联传输会话、会话存储与在线状态：启动时拉取快照，推送事件经协调策略
//! 写入存储，重连后重新拉取快照并合并。所有写操作都经过 `InboxState` 的写锁，
//! 监听器回调在释放锁之后进行。

use crate::im::auth::Credentials;
use crate::im::conversation::api::InboxBackend;
use crate::im::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::im::conversation::models::{ConversationSummary, UpsertOutcome};
use crate::im::conversation::policy::{self, Tab};
use crate::im::error::{Result, SyncError};
use crate::im::presence::listener::{EmptyPresenceListener, PresenceListener};
use crate::im::presence::models::PresenceRecord;
use crate::im::sync::models::{ConversationRow, InboxState, SyncConfig, SyncState, SyncStatus};
use crate::im::transport::{
    ConnectionListener, ConnectionState, EmptyConnectionListener, EventKind, PushEvent,
    Subscription, TransportEvent, TransportSession,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// 监听器集合
#[derive(Clone)]
pub struct SyncListeners {
    pub conversation: Arc<dyn ConversationListener>,
    pub presence: Arc<dyn PresenceListener>,
    pub connection: Arc<dyn ConnectionListener>,
}

impl Default for SyncListeners {
    fn default() -> Self {
        Self {
            conversation: Arc::new(EmptyConversationListener),
            presence: Arc::new(EmptyPresenceListener),
            connection: Arc::new(EmptyConnectionListener),
        }
    }
}

/// 汇入控制循环的消息
enum SyncMessage {
    Transport(TransportEvent),
    SnapshotLoaded {
        generation: u64,
        conversations: Vec<ConversationSummary>,
    },
    SnapshotFailed {
        generation: u64,
        attempt: u32,
        error: SyncError,
    },
}

type FetchSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

struct Running {
    task: JoinHandle<()>,
    fetch: FetchSlot,
    subscriptions: Vec<Subscription>,
}

/// 一次写锁内产生的变化，释放锁后统一通知监听器
#[derive(Debug, Default)]
struct Changes {
    inserted: Vec<ConversationSummary>,
    changed: Vec<ConversationSummary>,
    removed: Vec<String>,
    presence: Vec<PresenceRecord>,
    unread_before: u64,
    unread_after: u64,
}

impl Changes {
    fn starting_at(unread_before: u64) -> Self {
        Self {
            unread_before,
            unread_after: unread_before,
            ..Self::default()
        }
    }

    async fn dispatch(self, listeners: &SyncListeners) {
        let conv = &listeners.conversation;
        if !self.inserted.is_empty() {
            conv.on_new_conversation(self.inserted).await;
        }
        if !self.changed.is_empty() {
            conv.on_conversation_changed(self.changed).await;
        }
        if !self.removed.is_empty() {
            conv.on_conversation_deleted(self.removed).await;
        }
        for record in self.presence {
            listeners.presence.on_presence_changed(record).await;
        }
        if self.unread_after != self.unread_before {
            conv.on_total_unread_message_count_changed(self.unread_after)
                .await;
        }
    }
}

/// 把一条推送事件应用到状态上
fn apply_push(state: &mut InboxState, event: PushEvent, changes: &mut Changes) {
    match event {
        PushEvent::ConversationUpdate(update) => {
            let (outcome, merged) = state.store.upsert(update);
            match outcome {
                UpsertOutcome::Inserted => changes.inserted.push(merged),
                UpsertOutcome::Updated => changes.changed.push(merged),
                UpsertOutcome::Unchanged => {
                    debug!("[Sync] 重复投递的会话更新，忽略: {}", merged.id)
                }
            }
        }
        PushEvent::ConversationDeleted(deleted) => {
            if state.store.remove(&deleted.id).is_some() {
                changes.removed.push(deleted.id);
            }
        }
        PushEvent::PresenceUpdate(update) => {
            changes.presence.push(state.presence.apply(&update));
        }
    }
}

/// 会话同步控制器
pub struct SyncController {
    config: SyncConfig,
    transport: Arc<TransportSession>,
    backend: Arc<dyn InboxBackend>,
    state: Arc<RwLock<InboxState>>,
    listeners: Mutex<SyncListeners>,
    running: Mutex<Option<Running>>,
}

impl SyncController {
    pub fn new(
        config: SyncConfig,
        transport: Arc<TransportSession>,
        backend: Arc<dyn InboxBackend>,
    ) -> Self {
        Self {
            config,
            transport,
            backend,
            state: Arc::new(RwLock::new(InboxState::default())),
            listeners: Mutex::new(SyncListeners::default()),
            running: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    /// 设置会话监听器（在 start 之前调用才对控制循环生效）
    pub fn set_conversation_listener(&self, listener: Arc<dyn ConversationListener>) {
        self.lock_listeners().conversation = listener;
    }

    pub fn set_presence_listener(&self, listener: Arc<dyn PresenceListener>) {
        self.lock_listeners().presence = listener;
    }

    pub fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.lock_listeners().connection = listener;
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, SyncListeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> SyncListeners {
        self.lock_listeners().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 启动同步：Idle → Hydrating
    ///
    /// 订阅传输事件、发起快照拉取并连接传输会话，立即返回。
    pub async fn start(&self, credentials: &Credentials) -> Result<()> {
        if self.is_running() {
            warn!("[Sync] 同步已在运行，忽略重复启动");
            return Ok(());
        }

        info!("[Sync] 🚀 启动同步，用户: {}", credentials.user_id);
        {
            let mut state = self.state.write().await;
            *state = InboxState::new(credentials.user_id.as_str());
            state.sync_state = SyncState::Hydrating;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions: Vec<Subscription> = EventKind::PUSH
            .iter()
            .chain(EventKind::LIFECYCLE.iter())
            .map(|kind| {
                let tx = tx.clone();
                self.transport.on_event(*kind, move |event: &TransportEvent| {
                    let _ = tx.send(SyncMessage::Transport(event.clone()));
                })
            })
            .collect();

        let fetch: FetchSlot = Arc::default();
        let runner = Runner {
            config: self.config.clone(),
            backend: self.backend.clone(),
            state: self.state.clone(),
            listeners: self.listeners(),
            tx,
            fetch: fetch.clone(),
            generation: 0,
            buffered: Vec::new(),
        };
        let task = tokio::spawn(runner.run(rx, self.transport.watch_state()));

        if let Err(e) = self.transport.connect(credentials) {
            error!("[Sync] ❌ 传输会话启动失败: {}", e);
            drop(subscriptions);
            task.abort();
            let _ = task.await;
            abort_fetch(&fetch);
            self.state.write().await.sync_state = SyncState::Idle;
            return Err(e);
        }

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            task,
            fetch,
            subscriptions,
        });
        Ok(())
    }

    /// 停止同步：释放全部订阅，取消进行中的快照请求，断开传输会话
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            for subscription in running.subscriptions {
                subscription.unsubscribe();
            }
            running.task.abort();
            let _ = running.task.await;
            abort_fetch(&running.fetch);
            self.transport.disconnect();
            info!("[Sync] 🛑 同步已停止");
        }
        self.state.write().await.sync_state = SyncState::Stopped;
    }

    /// 标记会话已读：本地清零未读数，并异步通知服务器
    ///
    /// 会话不存在时返回 false。
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> bool {
        let changes = {
            let mut state = self.state.write().await;
            let before = state.store.get(conversation_id).cloned();
            let mut changes = Changes::starting_at(state.store.total_unread());
            match state.store.mark_read(conversation_id) {
                Some(after) => {
                    if before.as_ref() != Some(&after) {
                        changes.changed.push(after);
                    }
                }
                None => {
                    warn!("[Sync] 标记已读的会话不存在: {}", conversation_id);
                    return false;
                }
            }
            changes.unread_after = state.store.total_unread();
            changes
        };
        changes.dispatch(&self.listeners()).await;

        let backend = self.backend.clone();
        let id = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.mark_conversation_read(&id).await {
                warn!("[Sync] 标记已读请求失败 {}: {}", id, e);
            }
        });
        true
    }

    /// 设置置顶：本地更新排序，并异步通知服务器
    pub async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> bool {
        let changes = {
            let mut state = self.state.write().await;
            let unread = state.store.total_unread();
            let mut changes = Changes::starting_at(unread);
            let was_pinned = state.store.get(conversation_id).map(|c| c.is_pinned);
            match state.store.set_pinned(conversation_id, pinned) {
                Some(after) => {
                    if was_pinned != Some(pinned) {
                        changes.changed.push(after);
                    }
                }
                None => {
                    warn!("[Sync] 设置置顶的会话不存在: {}", conversation_id);
                    return false;
                }
            }
            changes
        };
        changes.dispatch(&self.listeners()).await;

        let backend = self.backend.clone();
        let id = conversation_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.set_pinned(&id, pinned).await {
                warn!("[Sync] 置顶请求失败 {}: {}", id, e);
            }
        });
        true
    }

    /// 切换标签页，未知 ID 按单聊处理
    pub async fn set_active_tab(&self, tab_id: &str) -> Tab {
        let tab = Tab::from_id(tab_id);
        self.state.write().await.tab = tab;
        debug!("[Sync] 切换标签页: {} -> {:?}", tab_id, tab);
        tab
    }

    pub async fn set_search_query(&self, text: &str) {
        self.state.write().await.query = text.to_string();
    }

    pub async fn active_tab(&self) -> Tab {
        self.state.read().await.tab
    }

    /// 当前标签页与搜索条件下的可见会话（已排序）
    pub async fn visible_conversations(&self) -> Vec<ConversationSummary> {
        let state = self.state.read().await;
        policy::visible_conversations(state.store.iter(), state.tab, &state.query)
    }

    /// 总未读数，与标签页和搜索条件无关
    pub async fn total_unread(&self) -> u64 {
        self.state.read().await.store.total_unread()
    }

    pub async fn presence_for(&self, peer_id: &str) -> PresenceRecord {
        self.state.read().await.presence.get(peer_id)
    }

    /// 附带对端在线状态的可见会话
    pub async fn conversation_rows(&self) -> Vec<ConversationRow> {
        let state = self.state.read().await;
        policy::visible_conversations(state.store.iter(), state.tab, &state.query)
            .into_iter()
            .map(|conversation| {
                let presence = conversation.peer_id().map(|peer| state.presence.get(peer));
                ConversationRow {
                    conversation,
                    presence,
                }
            })
            .collect()
    }

    /// 分页读取可见会话
    pub async fn conversation_list_split(&self, offset: usize, count: usize) -> Vec<ConversationRow> {
        self.conversation_rows()
            .await
            .into_iter()
            .skip(offset)
            .take(count)
            .collect()
    }

    pub async fn sync_status(&self) -> SyncStatus {
        let state = self.state.read().await;
        SyncStatus {
            state: state.sync_state,
            stale: state.stale,
            connection: self.transport.current_state(),
            offline: self.transport.is_offline(),
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.task.abort();
            abort_fetch(&running.fetch);
        }
    }
}

fn abort_fetch(slot: &FetchSlot) {
    if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
        task.abort();
    }
}

/// 控制循环，独占推送事件的应用顺序
struct Runner {
    config: SyncConfig,
    backend: Arc<dyn InboxBackend>,
    state: Arc<RwLock<InboxState>>,
    listeners: SyncListeners,
    tx: mpsc::UnboundedSender<SyncMessage>,
    fetch: FetchSlot,
    /// 快照请求代数，旧请求的迟到结果被丢弃
    generation: u64,
    /// Hydrating 期间暂存的会话事件，按到达顺序在装载后应用
    buffered: Vec<PushEvent>,
}

impl Runner {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SyncMessage>,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        self.listeners.conversation.on_sync_server_start(false).await;
        self.begin_fetch();

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                changed = connection.changed() => {
                    if changed.is_err() {
                        debug!("[Sync] 传输会话已释放，退出控制循环");
                        break;
                    }
                    let status = *connection.borrow_and_update();
                    self.listeners
                        .connection
                        .on_connection_status_changed(status)
                        .await;
                }
            }
        }
    }

    async fn handle(&mut self, msg: SyncMessage) {
        match msg {
            SyncMessage::Transport(event) => self.on_transport_event(event).await,
            SyncMessage::SnapshotLoaded {
                generation,
                conversations,
            } => {
                if generation == self.generation {
                    self.on_snapshot(conversations).await;
                } else {
                    debug!("[Sync] 丢弃过期快照（代数 {}）", generation);
                }
            }
            SyncMessage::SnapshotFailed {
                generation,
                attempt,
                error,
            } => {
                if generation == self.generation {
                    self.on_snapshot_failed(attempt, error).await;
                }
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Push(event) => self.on_push(event).await,
            TransportEvent::Connected => {
                info!("[Sync] 🔗 传输会话已连接");
                self.on_link_up().await;
            }
            TransportEvent::Reconnected => self.on_link_up().await,
            TransportEvent::Disconnected { reason } => {
                info!("[Sync] 传输会话断开: {}", reason)
            }
            TransportEvent::Offline => {
                warn!("[Sync] 📴 连接多次失败，进入离线提示");
                self.listeners.connection.on_offline().await;
            }
        }
    }

    async fn on_push(&mut self, event: PushEvent) {
        let changes = {
            let mut state = self.state.write().await;
            let current = state.sync_state;
            match current {
                SyncState::Live | SyncState::Resyncing => {}
                SyncState::Hydrating if !matches!(event, PushEvent::PresenceUpdate(_)) => {
                    debug!("[Sync] 快照装载中，暂存事件: {}", event.kind().name());
                    self.buffered.push(event);
                    return;
                }
                SyncState::Hydrating => {}
                other => {
                    debug!("[Sync] 状态 {:?} 下忽略推送事件", other);
                    return;
                }
            }
            let mut changes = Changes::starting_at(state.store.total_unread());
            apply_push(&mut state, event, &mut changes);
            changes.unread_after = state.store.total_unread();
            changes
        };
        changes.dispatch(&self.listeners).await;
    }

    /// 连接建立或重连：Live → Resyncing，重新拉取快照
    ///
    /// 连接建立之前拉到的快照可能漏掉期间的推送，因此 Hydrating / Resyncing
    /// 中也会以新代数重新拉取。
    async fn on_link_up(&mut self) {
        let resync = {
            let mut state = self.state.write().await;
            let current = state.sync_state;
            match current {
                SyncState::Live => {
                    state.sync_state = SyncState::Resyncing;
                    state.store.begin_resync_window();
                    true
                }
                SyncState::Hydrating | SyncState::Resyncing => false,
                other => {
                    debug!("[Sync] 状态 {:?} 下忽略连接事件", other);
                    return;
                }
            }
        };

        info!("[Sync] 🔄 连接建立，重新拉取快照");
        if resync {
            self.listeners.conversation.on_sync_server_start(true).await;
        }
        self.begin_fetch();
    }

    async fn on_snapshot(&mut self, conversations: Vec<ConversationSummary>) {
        let (resync, changes) = {
            let mut state = self.state.write().await;
            let mut changes = Changes::starting_at(state.store.total_unread());
            let current = state.sync_state;
            let resync = match current {
                SyncState::Hydrating => {
                    state.store.hydrate(conversations);
                    let mut all = state.store.all();
                    policy::sort_conversations(&mut all);
                    changes.inserted = all;
                    let buffered = std::mem::take(&mut self.buffered);
                    if !buffered.is_empty() {
                        info!("[Sync] 应用暂存事件: {} 条", buffered.len());
                    }
                    for event in buffered {
                        apply_push(&mut state, event, &mut changes);
                    }
                    false
                }
                SyncState::Resyncing => {
                    let report = state.store.merge_snapshot(conversations);
                    changes.inserted = report.inserted;
                    changes.changed = report.changed;
                    changes.removed = report.removed;
                    true
                }
                other => {
                    debug!("[Sync] 状态 {:?} 下收到快照，忽略", other);
                    return;
                }
            };
            state.sync_state = SyncState::Live;
            state.stale = false;
            changes.unread_after = state.store.total_unread();
            (resync, changes)
        };

        info!(
            "[Sync] ✅ 快照{}完成，进入 Live",
            if resync { "合并" } else { "装载" }
        );
        changes.dispatch(&self.listeners).await;
        self.listeners
            .conversation
            .on_sync_server_finish(resync)
            .await;
    }

    async fn on_snapshot_failed(&mut self, attempt: u32, error: SyncError) {
        let (resync, raise) = {
            let mut state = self.state.write().await;
            let resync = state.sync_state == SyncState::Resyncing;
            let exhausted =
                attempt >= self.config.banner_after_attempts || !error.is_retryable();
            let raise = exhausted && !state.stale;
            if raise {
                state.stale = true;
            }
            (resync, raise)
        };

        if raise {
            error!(
                "[Sync] ⚠️ 快照连续 {} 次拉取失败，继续展示缓存数据: {}",
                attempt, error
            );
            self.listeners
                .conversation
                .on_sync_server_failed(resync)
                .await;
        }
    }

    /// 发起新一轮快照拉取，终止上一轮
    fn begin_fetch(&mut self) {
        self.generation += 1;
        let task = tokio::spawn(fetch_with_retry(
            self.backend.clone(),
            self.config.clone(),
            self.generation,
            self.tx.clone(),
        ));
        let old = self
            .fetch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(old) = old {
            old.abort();
        }
    }
}

/// 带超时和退避的快照拉取，成功或遇到不可重试错误后退出
async fn fetch_with_retry(
    backend: Arc<dyn InboxBackend>,
    config: SyncConfig,
    generation: u64,
    tx: mpsc::UnboundedSender<SyncMessage>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        debug!("[Sync] 📡 拉取快照（代数 {}，第 {} 次）", generation, attempt);
        let result = match timeout(config.fetch_timeout, backend.fetch_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "快照请求超过 {:?}",
                config.fetch_timeout
            ))),
        };

        match result {
            Ok(conversations) => {
                let _ = tx.send(SyncMessage::SnapshotLoaded {
                    generation,
                    conversations,
                });
                return;
            }
            Err(error) => {
                let retryable = error.is_retryable();
                let delay = config.backoff.delay_for(attempt - 1);
                warn!(
                    "[Sync] ❌ 快照拉取失败（第 {} 次），{:?} 后重试: {}",
                    attempt, delay, error
                );
                let sent = tx.send(SyncMessage::SnapshotFailed {
                    generation,
                    attempt,
                    error,
                });
                if sent.is_err() || !retryable {
                    return;
                }
                sleep(delay).await;
            }
        }
    }
}
