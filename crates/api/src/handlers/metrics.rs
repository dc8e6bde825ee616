use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Prometheus 文本格式导出
pub fn metrics_routes(path: &str, handle: PrometheusHandle) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(handle)
}
