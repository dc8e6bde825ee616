//! 调度器：定时评估运行参数并入队意图的生产者

pub mod buyback;
pub mod creator_stream;
pub mod cron_utils;
pub mod metrics_producer;
pub mod producer;
pub mod runner;
pub mod scheduler;

pub use buyback::BuybackProducer;
pub use creator_stream::CreatorStreamProducer;
pub use cron_utils::CronScheduler;
pub use metrics_producer::{latest_snapshot, MetricsProducer, MetricsSource, QueueMetricsSource};
pub use producer::IntentProducer;
pub use runner::{JobErrorMarker, ProducerRunner, RunStatus};
pub use scheduler::ProducerScheduler;
