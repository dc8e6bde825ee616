use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use relay_config::{ApiConfig, AuthConfig, QueueConfig};
use relay_core::IntentQueue;
use relay_domain::{KeySpace, KvStore};

use crate::auth::auth_middleware;
use crate::handlers::{
    health::health_check,
    ops::{complete_intent, next_intent},
    status::get_status,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub queue: IntentQueue,
    pub store: Arc<dyn KvStore>,
    pub keys: KeySpace,
    pub auth: Arc<AuthConfig>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        queue_config: QueueConfig,
        api_config: &ApiConfig,
    ) -> Self {
        Self {
            queue: IntentQueue::new(store.clone(), keys.clone(), queue_config),
            store,
            keys,
            auth: Arc::new(api_config.auth.clone()),
            max_body_bytes: api_config.max_request_size_kb.saturating_mul(1024),
        }
    }
}

/// 创建API路由，`/health` 之外的路由都需要认证
pub fn create_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/ops/next", post(next_intent))
        .route("/ops/complete", post(complete_intent))
        .route("/status", get(get_status))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .with_state(state)
}
