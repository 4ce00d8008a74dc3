use crate::error::Result;

/// Moves payload bytes between caller buffers and the fabric.
///
/// Collectives address buffers as raw `u64` pointers and never dereference
/// them directly; every read and write goes through the group's adapter.
pub trait DeviceAdapter: Send + Sync {
    /// Copy `bytes` bytes out of the caller buffer at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `bytes` bytes.
    unsafe fn load(&self, ptr: u64, bytes: usize) -> Result<Vec<u8>>;

    /// Write `data` into the caller buffer at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `data.len()` bytes.
    unsafe fn store(&self, data: &[u8], ptr: u64) -> Result<()>;
}
