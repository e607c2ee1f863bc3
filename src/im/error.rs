//! 同步引擎错误类型
//!
//! 所有错误都不是致命的：传输与快照错误进入重试，解码错误仅记录日志后丢弃。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("传输错误: {0}")]
    Transport(String),

    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("HTTP 错误: {0}")]
    Http(String),

    #[error("服务器错误 {code}: {message}")]
    Server { code: i32, message: String },

    #[error("事件解码失败: {0}")]
    Decode(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout(e.to_string())
        } else {
            SyncError::Http(e.to_string())
        }
    }
}

impl SyncError {
    /// 是否可以通过重试恢复（配置错误除外，其余一律视为可重试）
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::InvalidConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
