//! PostgreSQL-backed stores.

mod cloud;
mod local;
mod pool;

pub use cloud::*;
pub use local::*;
pub use pool::*;
