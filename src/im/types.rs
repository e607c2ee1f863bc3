use crate::im::error::{Result, SyncError};
use serde::Deserialize;

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg", default)]
    pub err_msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 取出 data，缺失时视为解码错误
    pub fn into_data(self, operation_name: &str) -> Result<T> {
        self.data
            .ok_or_else(|| SyncError::Decode(format!("{}响应中缺少 data 字段", operation_name)))
    }
}

/// 解析 `{errCode, errMsg, data}` 响应体，errCode 非 0 时返回 `SyncError::Server`
pub fn parse_api_response<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<ApiResponse<T>> {
    let api_resp: ApiResponse<T> = serde_json::from_slice(body)?;
    if api_resp.err_code != 0 {
        return Err(SyncError::Server {
            code: api_resp.err_code,
            message: api_resp.err_msg,
        });
    }
    Ok(api_resp)
}

/// 通用 HTTP 响应处理函数：检查状态码、反序列化、检查 errCode
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<ApiResponse<T>> {
    use tracing::{debug, error};

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(SyncError::Http(format!("HTTP 错误 {}: {}", status, body_str)));
    }

    parse_api_response::<T>(&body_bytes).inspect_err(|e| {
        error!("[HTTP] {}失败: {}", operation_name, e);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Payload {
        value: i32,
    }

    #[test]
    fn parses_success_envelope() {
        let body = br#"{"errCode":0,"errMsg":"","data":{"value":7}}"#;
        let resp = parse_api_response::<Payload>(body).unwrap();
        assert_eq!(resp.into_data("测试").unwrap().value, 7);
    }

    #[test]
    fn null_data_is_decode_error() {
        let body = br#"{"errCode":0,"data":null}"#;
        let resp = parse_api_response::<Payload>(body).unwrap();
        assert!(matches!(resp.into_data("测试"), Err(SyncError::Decode(_))));
    }

    #[test]
    fn non_zero_err_code_is_server_error() {
        let body = br#"{"errCode":1004,"errMsg":"token expired","data":null}"#;
        match parse_api_response::<Payload>(body) {
            Err(SyncError::Server { code, message }) => {
                assert_eq!(code, 1004);
                assert_eq!(message, "token expired");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.err_code)),
        }
    }

    #[test]
    fn garbage_body_is_decode_error() {
        assert!(matches!(
            parse_api_response::<Payload>(b"<html>"),
            Err(SyncError::Decode(_))
        ));
    }
}
