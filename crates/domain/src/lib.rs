pub mod entities;
pub mod keys;
pub mod ports;
pub mod value_objects;

pub use entities::*;
pub use keys::KeySpace;
pub use ports::*;
pub use relay_errors::{RelayError, RelayResult};
pub use value_objects::*;
