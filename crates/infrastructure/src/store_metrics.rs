use std::time::Instant;

/// 存储操作指标
pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_operation(backend: &'static str, op: &'static str, started: Instant) {
        metrics::counter!("relay_store_operations_total", "backend" => backend, "op" => op)
            .increment(1);
        metrics::histogram!("relay_store_operation_seconds", "backend" => backend, "op" => op)
            .record(started.elapsed().as_secs_f64());
    }

    pub fn record_error(backend: &'static str, op: &'static str) {
        metrics::counter!("relay_store_errors_total", "backend" => backend, "op" => op)
            .increment(1);
    }
}
