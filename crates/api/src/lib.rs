//! # Relay Operator API
//!
//! Worker通过这组HTTP接口租用和完成意图。
//!
//! ## API 端点
//!
//! - `POST /ops/next` - 租用最旧的待处理意图（可按 `kind` 过滤）
//! - `POST /ops/complete` - 提交执行结果，结束租约
//! - `GET /status` - 指标快照与队列统计
//! - `GET /health` - 存活检查（无需认证）
//!
//! ## 认证
//!
//! `Authorization: Bearer <token>`，常量时间比较。配置了 `hmac_secret` 时，
//! 携带 `X-Signature` 头的请求还会校验原始请求体的 HMAC-SHA256（hex或base64）；
//! 不带签名头的请求仅凭Bearer即可通过。
//!
//! ## 错误响应
//!
//! ```json
//! {"ok": false, "error": "not_found", "message": "..."}
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod signing;

use axum::{extract::DefaultBodyLimit, Router};
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
use relay_config::ApiConfig;
use routes::create_routes;

pub use handlers::metrics::metrics_routes;
pub use routes::AppState;

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let max_body_bytes = state.max_body_bytes;
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(DefaultBodyLimit::max(max_body_bytes)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer(&api_config.cors_origins))
    } else {
        router
    }
}
