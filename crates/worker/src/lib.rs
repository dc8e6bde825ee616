pub mod client;
pub mod handlers;
pub mod service;

pub use client::{LeasedIntent, OpsApi, OpsClient};
pub use handlers::{HandlerRegistry, IntentHandler, LoggingHandler, PingHandler};
pub use service::{PollOutcome, WorkerService};
