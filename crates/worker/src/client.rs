use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use relay_api::protocol::{
    CompleteRequest, CompleteResponse, ErrorBody, LeasedIntentView, NextRequest, NextResponse,
};
use relay_api::signing::{self, SIGNATURE_HEADER};
use relay_config::WorkerConfig;
use relay_domain::IntentKind;
use relay_errors::{RelayError, RelayResult};

/// 一次成功的租用：租约键加意图内容
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedIntent {
    pub lease_key: String,
    pub intent: LeasedIntentView,
}

/// Worker看到的Operator API
#[async_trait]
pub trait OpsApi: Send + Sync {
    async fn next(&self, kind: Option<IntentKind>) -> RelayResult<Option<LeasedIntent>>;
    async fn complete(&self, request: &CompleteRequest) -> RelayResult<CompleteResponse>;
}

/// 基于reqwest的Operator API客户端
pub struct OpsClient {
    base_url: String,
    api_token: String,
    hmac_secret: Option<String>,
    http_client: reqwest::Client,
}

impl OpsClient {
    pub fn new(config: &WorkerConfig) -> RelayResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| RelayError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            hmac_secret: config.hmac_secret.clone(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 配置了密钥时对原始请求体签名
    fn signature_for(&self, body: &[u8]) -> RelayResult<Option<String>> {
        self.hmac_secret
            .as_deref()
            .map(|secret| signing::sign_hex(secret, body))
            .transpose()
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> RelayResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let raw = serde_json::to_vec(body)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header(CONTENT_TYPE, "application/json");
        if let Some(signature) = self.signature_for(&raw)? {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(raw)
            .send()
            .await
            .map_err(|e| RelayError::Network(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| RelayError::Serialization(format!("解析 {url} 响应失败: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Operator API返回错误: HTTP {} - {}", status, body);
        Err(error_from_response(status.as_u16(), &body))
    }
}

#[async_trait]
impl OpsApi for OpsClient {
    async fn next(&self, kind: Option<IntentKind>) -> RelayResult<Option<LeasedIntent>> {
        let request = NextRequest {
            kind: kind.map(|k| k.as_str().to_string()),
        };
        let response: NextResponse = self.post_json("/ops/next", &request).await?;

        match (response.key, response.intent) {
            (Some(lease_key), Some(intent)) => Ok(Some(LeasedIntent { lease_key, intent })),
            (None, None) => Ok(None),
            _ => Err(RelayError::Serialization(
                "next响应中key与intent不一致".to_string(),
            )),
        }
    }

    async fn complete(&self, request: &CompleteRequest) -> RelayResult<CompleteResponse> {
        debug!("提交租约结果: {}", request.key);
        self.post_json("/ops/complete", request).await
    }
}

/// 按HTTP状态码还原错误类型，5xx视为可重试
fn error_from_response(status: u16, body: &str) -> RelayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        400 | 413 | 422 => RelayError::validation(message),
        401 | 403 => RelayError::auth(message),
        404 => RelayError::not_found(message),
        503 => RelayError::store(message),
        500..=599 => RelayError::Network(format!("HTTP {status}: {message}")),
        _ => RelayError::internal(format!("HTTP {status}: {message}")),
    }
}
