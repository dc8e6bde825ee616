pub mod api_observability;
pub mod app_config;
pub mod dispatcher_worker;
pub mod store_queue;

pub use api_observability::*;
pub use app_config::*;
pub use dispatcher_worker::*;
pub use store_queue::*;
