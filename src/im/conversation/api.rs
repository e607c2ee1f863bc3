//! 会话 HTTP API 客户端
//!
//! 负责快照拉取和两个出站命令（标记已读、置顶）

use crate::im::conversation::models::ConversationSummary;
use crate::im::conversation::types::{AllConversationsResp, MarkAsReadReq, SetPinnedReq};
use crate::im::error::Result;
use crate::im::serialization::new_operation_id;
use crate::im::types::handle_http_response;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use tracing::{debug, info};

/// 同步控制器依赖的服务端接口
///
/// 生产环境由 `ConversationApi` 实现，测试中替换为内存实现。
#[async_trait]
pub trait InboxBackend: Send + Sync {
    /// 拉取当前用户的全量会话快照
    async fn fetch_snapshot(&self) -> Result<Vec<ConversationSummary>>;

    /// 通知服务器会话已读
    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()>;

    /// 通知服务器置顶状态变更
    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()>;
}

/// 会话相关的 HTTP API 客户端
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl ConversationApi {
    /// 创建新的会话 API 客户端
    ///
    /// `client` 应该已经在外部配置好 token 请求头
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }

    /// 从服务器获取所有会话
    pub async fn get_all_conversations(&self) -> Result<AllConversationsResp> {
        let operation_id = new_operation_id();
        let url = format!("{}/conversation/get_all_conversations", self.api_base_url);

        info!("[ConvAPI] 📡 请求全量会话快照");
        debug!("[ConvAPI]   请求URL: {}", url);
        debug!(
            "[ConvAPI]   用户ID: {}, 操作ID: {}",
            self.user_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&serde_json::json!({
                "ownerUserID": self.user_id
            }))
            .send()
            .await?;

        let resp = handle_http_response::<AllConversationsResp>(response, "全量会话快照")
            .await?
            .into_data("全量会话快照")?;

        info!(
            "[ConvAPI] ✅ 全量会话快照响应，会话数: {}",
            resp.conversations.len()
        );
        debug!(
            "[ConvAPI]   会话详情: {:?}",
            resp.conversations.iter().map(|c| &c.id).collect::<Vec<_>>()
        );

        Ok(resp)
    }

    async fn post_command<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        operation_name: &str,
    ) -> Result<()> {
        let operation_id = new_operation_id();
        let url = format!("{}{}", self.api_base_url, path);
        debug!(
            "[ConvAPI] 📤 {} URL: {}, 操作ID: {}",
            operation_name, url, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(body)
            .send()
            .await?;

        // 命令类接口不关心 data 内容
        handle_http_response::<IgnoredAny>(response, operation_name).await?;
        info!("[ConvAPI] ✅ {}成功", operation_name);
        Ok(())
    }
}

#[async_trait]
impl InboxBackend for ConversationApi {
    async fn fetch_snapshot(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.get_all_conversations().await?.conversations)
    }

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        let req = MarkAsReadReq {
            user_id: &self.user_id,
            conversation_id,
        };
        self.post_command("/conversation/mark_as_read", &req, "标记已读")
            .await
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<()> {
        let req = SetPinnedReq {
            user_id: &self.user_id,
            conversation_id,
            is_pinned: pinned,
        };
        self.post_command("/conversation/set_pinned", &req, "设置置顶")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_payload_decodes_into_summaries() {
        let body = r#"{
            "conversations": [
                {"id": "c1", "type": "direct",
                 "participant": {"name": "Ann", "peerID": "u1", "onlineHint": true},
                 "lastMessage": {"text": "yo", "kind": "text", "timestamp": 10, "senderID": "u1"},
                 "unreadCount": 1},
                {"id": "g1", "type": "group",
                 "participant": {"name": "Crew", "memberCount": 5},
                 "createdAt": 99}
            ]
        }"#;
        let resp: AllConversationsResp = serde_json::from_str(body).unwrap();
        assert_eq!(resp.conversations.len(), 2);
        assert_eq!(resp.conversations[0].peer_id(), Some("u1"));
        assert!(resp.conversations[1].last_message.is_none());
        assert_eq!(resp.conversations[1].created_at, 99);
        assert!(!resp.conversations[1].is_pinned);
    }

    #[test]
    fn command_bodies_use_wire_names() {
        let req = SetPinnedReq {
            user_id: "me",
            conversation_id: "c1",
            is_pinned: true,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"userID": "me", "conversationID": "c1", "isPinned": true})
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = ConversationApi::new(
            reqwest::Client::new(),
            "http://localhost:10002/".to_string(),
            "me".to_string(),
        );
        assert_eq!(api.api_base_url, "http://localhost:10002");
    }
}
