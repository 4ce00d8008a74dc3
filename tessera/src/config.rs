//! Runtime-configurable tuning parameters for tessera.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `TESSERA_`) or by constructing a custom `TesseraConfig`.

use std::time::Duration;

/// Tuning parameters for collective operations and the local fabric.
#[derive(Debug, Clone)]
pub struct TesseraConfig {
    /// Timeout for individual send/recv operations within collectives.
    pub collective_timeout: Duration,

    /// Number of payload buffers kept warm by the fabric's buffer pool.
    pub pool_capacity: usize,

    /// Payloads larger than this are not returned to the pool.
    pub pool_max_buffer_bytes: usize,

    /// Groups smaller than this broadcast flat instead of along a tree.
    pub tree_broadcast_threshold: u32,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            pool_capacity: 256,
            pool_max_buffer_bytes: 4 * 1024 * 1024, // 4 MiB
            tree_broadcast_threshold: 4,
        }
    }
}

impl TesseraConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `TESSERA_COLLECTIVE_TIMEOUT_SECS`
    /// - `TESSERA_POOL_CAPACITY`
    /// - `TESSERA_POOL_MAX_BUFFER_BYTES`
    /// - `TESSERA_TREE_BROADCAST_THRESHOLD`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("TESSERA_COLLECTIVE_TIMEOUT_SECS") {
            if let Ok(s) = v.parse::<u64>() {
                cfg.collective_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(v) = std::env::var("TESSERA_POOL_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.pool_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_POOL_MAX_BUFFER_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.pool_max_buffer_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("TESSERA_TREE_BROADCAST_THRESHOLD") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.tree_broadcast_threshold = n;
            }
        }

        cfg
    }

    /// Builder-style override of the per-operation timeout.
    pub fn with_collective_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout = timeout;
        self
    }
}
