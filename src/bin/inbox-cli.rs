//! 收件箱 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示收件箱同步
//! 启动时通过命令行参数登录（或直接传入 token），打印会话列表和所有监听器回调

use anyhow::{Context, Result};
use clap::Parser;
use inbox_sync_core_rust::im::client::{ClientConfig, InboxClient};
use inbox_sync_core_rust::im::conversation::{ConversationListener, ConversationSummary};
use inbox_sync_core_rust::im::presence::{PresenceListener, PresenceRecord};
use inbox_sync_core_rust::im::transport::{ConnectionListener, ConnectionState};
use inbox_sync_core_rust::login_async;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 收件箱 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "inbox-cli")]
#[command(about = "收件箱 CLI 客户端 - 用于测试和展示会话同步", long_about = None)]
struct Args {
    /// 登录账号（未提供 --token 时必填）
    #[arg(short, long)]
    account: Option<String>,

    /// 登录密码
    #[arg(short, long, default_value = "")]
    password: String,

    /// 直接使用已有 token，跳过登录
    #[arg(long, requires = "user_id")]
    token: Option<String>,

    /// 与 --token 一起使用的用户 ID
    #[arg(long)]
    user_id: Option<String>,

    /// 账号服务地址
    #[arg(long, default_value = "http://localhost:10008")]
    account_url: String,

    /// HTTP API 地址
    #[arg(long, default_value = "http://localhost:10002")]
    api_url: String,

    /// WebSocket 地址
    #[arg(long, default_value = "ws://localhost:10001")]
    ws_url: String,

    /// 初始标签页（all / unread / groups / 其他）
    #[arg(long, default_value = "all")]
    tab: String,

    /// 按名称搜索
    #[arg(long, default_value = "")]
    search: String,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,inbox_sync_core_rust=debug）
    #[arg(long, default_value = "info,inbox_sync_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

fn describe(conv: &ConversationSummary) -> String {
    let preview: String = conv
        .last_message
        .as_ref()
        .map(|m| m.text.chars().take(30).collect())
        .unwrap_or_default();
    format!(
        "{}{} | 未读: {} | 最新: {}",
        if conv.is_pinned { "📌 " } else { "" },
        conv.participant.name,
        conv.unread_count,
        preview
    )
}

struct CliListener;

#[async_trait::async_trait]
impl ConversationListener for CliListener {
    async fn on_sync_server_start(&self, resync: bool) {
        info!("[CLI/Conversation] 🔄 同步开始: resync={}", resync);
    }

    async fn on_sync_server_finish(&self, resync: bool) {
        info!("[CLI/Conversation] ✅ 同步完成: resync={}", resync);
    }

    async fn on_sync_server_failed(&self, resync: bool) {
        error!(
            "[CLI/Conversation] ❌ 同步失败，展示缓存数据: resync={}",
            resync
        );
    }

    async fn on_new_conversation(&self, conversation_list: Vec<ConversationSummary>) {
        for conv in &conversation_list {
            info!("[CLI/Conversation] 🆕 新会话: {}", describe(conv));
        }
    }

    async fn on_conversation_changed(&self, conversation_list: Vec<ConversationSummary>) {
        for conv in &conversation_list {
            info!("[CLI/Conversation] 🔄 会话变更: {}", describe(conv));
        }
    }

    async fn on_conversation_deleted(&self, conversation_ids: Vec<String>) {
        info!("[CLI/Conversation] 🗑️ 会话删除: {:?}", conversation_ids);
    }

    async fn on_total_unread_message_count_changed(&self, total_unread_count: u64) {
        info!("[CLI/Conversation] 📬 总未读数: {}", total_unread_count);
    }
}

#[async_trait::async_trait]
impl PresenceListener for CliListener {
    async fn on_presence_changed(&self, record: PresenceRecord) {
        info!(
            "[CLI/Presence] 👤 {} {}",
            record.peer_id,
            if record.online { "在线" } else { "离线" }
        );
    }
}

#[async_trait::async_trait]
impl ConnectionListener for CliListener {
    async fn on_connection_status_changed(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => info!("[CLI/Connection] 🔗 已连接"),
            other => warn!("[CLI/Connection] 🔗 连接状态: {:?}", other),
        }
    }

    async fn on_offline(&self) {
        error!("[CLI/Connection] 📴 网络不可用，持续重试中");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 收件箱 CLI 客户端（测试模式）");
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let (user_id, token) = match (args.token.clone(), args.user_id.clone()) {
        (Some(token), Some(user_id)) => {
            info!("[CLI] 🔑 使用已有 token，用户ID: {}", user_id);
            (user_id, token)
        }
        _ => {
            let account = args
                .account
                .clone()
                .context("未提供 --token 时必须提供 --account")?;
            let credentials = login_async(&args.account_url, account, args.password.clone())
                .await
                .context("登录失败")?;
            info!("[CLI] ✅ 登录成功！用户ID: {}", credentials.user_id);
            (credentials.user_id, credentials.token)
        }
    };

    let mut config = ClientConfig::new(user_id, token);
    config.ws_url = args.ws_url.clone();
    config.api_base_url = args.api_url.clone();
    let client = InboxClient::new(config).context("创建客户端失败")?;

    let listener = Arc::new(CliListener);
    client.set_conversation_listener(listener.clone());
    client.set_presence_listener(listener.clone());
    client.set_connection_listener(listener);

    client.set_active_tab(&args.tab).await;
    client.set_search_query(&args.search).await;

    info!("[CLI] 🔗 正在连接服务器...");
    client.connect().await.context("连接失败")?;

    // 等待首次快照装载
    for _ in 0..50 {
        if client.sync_status().await.state != inbox_sync_core_rust::SyncState::Hydrating {
            break;
        }
        sleep(Duration::from_millis(200)).await;
    }

    let conversations = client.get_conversation_list().await;
    info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
    for conv in conversations.iter().take(10) {
        info!("[CLI]   - {}", describe(conv));
    }
    info!("[CLI] 📬 总未读数: {}", client.get_total_unread_count().await);
    info!("[CLI] 📊 同步状态: {:?}", client.sync_status().await);

    info!("[CLI] 📥 开始监听推送...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await.context("监听 Ctrl+C 失败")?;
    }

    client.disconnect().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
