pub mod auth;
pub mod client;
pub mod conversation;
pub mod error;
pub mod presence;
pub mod serialization;
pub mod sync;
pub mod transport;
pub mod types;

// 重新导出认证相关函数
pub use auth::{login_async, Credentials};
pub use error::{Result, SyncError};
