pub mod buffer_pool;
mod fabric;

pub use buffer_pool::{BufferPool, PooledBuf};
pub use fabric::{FabricBuilder, LocalFabric};
