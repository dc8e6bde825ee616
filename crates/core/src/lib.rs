pub mod idempotency;
pub mod lock;
pub mod queue;
pub mod runtime_config;

pub use idempotency::IdempotencyGuard;
pub use lock::DistributedLock;
pub use queue::IntentQueue;
pub use runtime_config::{config_keys, RuntimeConfig};

pub use relay_errors::{RelayError, RelayResult};
