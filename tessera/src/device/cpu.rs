use crate::device::adapter::DeviceAdapter;
use crate::error::{Result, TesseraError};

/// Host memory adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAdapter;

impl CpuAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn check_ptr(ptr: u64, bytes: usize) -> Result<()> {
    if ptr == 0 {
        return Err(TesseraError::NullBuffer { bytes });
    }
    Ok(())
}

impl DeviceAdapter for CpuAdapter {
    unsafe fn load(&self, ptr: u64, bytes: usize) -> Result<Vec<u8>> {
        if bytes == 0 {
            return Ok(Vec::new());
        }
        check_ptr(ptr, bytes)?;
        let src = unsafe { std::slice::from_raw_parts(ptr as *const u8, bytes) };
        Ok(src.to_vec())
    }

    unsafe fn store(&self, data: &[u8], ptr: u64) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_ptr(ptr, data.len())?;
        // `data` is always a fabric-owned buffer, never the caller's.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len()) };
        Ok(())
    }
}
