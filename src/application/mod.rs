//! Application services layer.

pub mod codec;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod store;
