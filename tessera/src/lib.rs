//! Tessera: group communication for ranks sharing one address space.
//!
//! Ranks exchange tagged byte messages over a [`LocalFabric`]. A
//! [`ProcessGroup`] is one rank's view of a communicator; its collectives are
//! served by whichever [`CollModule`] is installed on it, and groups can be
//! split by color or by shared location.

pub mod coll;
pub mod collective;
pub mod config;
pub mod device;
pub mod error;
pub mod group;
pub mod reduce;
pub mod request;
pub mod transport;
pub mod types;

pub use coll::{BasicModule, CollModule, ModuleCatalog, ModuleKind, TunedModule};
pub use collective::{CollectiveTag, TagBlock};
pub use config::TesseraConfig;
pub use device::{CpuAdapter, DeviceAdapter};
pub use error::{Result, TesseraError};
pub use group::ProcessGroup;
pub use request::{Request, RequestGroup};
pub use transport::{BufferPool, FabricBuilder, LocalFabric, PooledBuf};
pub use types::{DataType, Rank, ReduceOp, SendBuf, UserOp, UserOpFn};
