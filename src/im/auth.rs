use crate::im::serialization::new_operation_id;
use crate::im::types::handle_http_response;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 已认证用户凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub account: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    #[serde(rename = "imToken")]
    pub im_token: String,
    #[serde(rename = "userID")]
    pub user_id: String,
}

/// 账号登录，换取连接消息服务器所需的 token
pub async fn login_async(account_url: &str, account: String, password: String) -> Result<Credentials> {
    let client = reqwest::Client::new();
    let operation_id = new_operation_id();
    let url = format!("{}/account/login", account_url.trim_end_matches('/'));

    info!("🔐 正在登录...");
    debug!("   URL: {}", url);
    debug!("   账号: {}", account);
    debug!("   OperationID: {}", operation_id);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&LoginRequest { account, password })
        .send()
        .await
        .context("登录请求失败")?;

    let data = handle_http_response::<LoginData>(response, "登录")
        .await?
        .into_data("登录")?;

    info!("✅ 登录成功，用户ID: {}", data.user_id);
    Ok(Credentials {
        user_id: data.user_id,
        token: data.im_token,
    })
}
