use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use relay_config::AuthConfig;

use crate::error::ApiError;
use crate::routes::AppState;
use crate::signing::{self, SIGNATURE_HEADER};

pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    InvalidSignature,
    MalformedHeader,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing bearer token"),
            AuthError::InvalidToken => write!(f, "Invalid bearer token"),
            AuthError::InvalidSignature => write!(f, "Invalid request signature"),
            AuthError::MalformedHeader => write!(f, "Malformed authorization header"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

fn extract_bearer(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?;
    let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
    value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .ok_or(AuthError::MalformedHeader)
}

/// 常量时间比较Bearer凭证
pub fn check_bearer(token: &str, config: &AuthConfig) -> Result<(), AuthError> {
    if bool::from(token.as_bytes().ct_eq(config.bearer_token.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

/// Bearer认证，配置了HMAC密钥且请求携带签名头时同时校验请求体签名
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    match authenticate(&state, req).await {
        Ok(req) => next.run(req).await,
        Err(err) => {
            warn!("Authentication failed: {}", err);
            metrics::counter!("relay_api_auth_failures_total").increment(1);
            err.into_response()
        }
    }
}

async fn authenticate(state: &AppState, req: Request) -> Result<Request, ApiError> {
    let config = &state.auth;
    if !config.enabled {
        return Ok(req);
    }

    check_bearer(extract_bearer(&req)?, config)?;

    let signature = match req.headers().get(SIGNATURE_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?
            .to_string(),
        None => return Ok(req),
    };
    let Some(secret) = config.hmac_secret.as_deref() else {
        debug!("未配置HMAC密钥，忽略签名头");
        return Ok(req);
    };

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| ApiError::BadRequest(format!("读取请求体失败: {e}")))?;

    if !signing::verify(secret, &bytes, &signature) {
        return Err(AuthError::InvalidSignature.into());
    }
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            enabled: true,
            bearer_token: "operator-token-0123456789".to_string(),
            hmac_secret: None,
        }
    }

    #[test]
    fn test_check_bearer() {
        let config = config();
        assert!(check_bearer("operator-token-0123456789", &config).is_ok());
        assert_eq!(
            check_bearer("operator-token-012345678", &config),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(check_bearer("", &config), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_extract_bearer() {
        let req = Request::builder()
            .header(AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&req), Ok("abc"));

        let req = Request::builder()
            .header(AUTHORIZATION, "Basic abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&req), Err(AuthError::MalformedHeader));

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer(&req), Err(AuthError::MissingToken));
    }
}
