//! Tuning parameters for the hierarchical module.
//!
//! Override via environment variables (prefixed `HAN_`) or by constructing a
//! custom `HanConfig`.

use tessera::ModuleKind;

/// How a hierarchical allreduce moves its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllreduceAlgorithm {
    /// Four-stage pipeline stepped by the caller, one window step at a time.
    Pipelined,
    /// Same stages, each started from the completion callback of the previous one.
    Callback,
    /// Local reduce, allreduce among local roots, local broadcast; no segmentation.
    Simple,
}

impl std::str::FromStr for AllreduceAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pipelined" | "pipeline" => Ok(AllreduceAlgorithm::Pipelined),
            "callback" | "async" => Ok(AllreduceAlgorithm::Callback),
            "simple" => Ok(AllreduceAlgorithm::Simple),
            other => Err(format!("unknown allreduce algorithm {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HanConfig {
    /// Target segment size in bytes for the pipelined allreduce.
    pub allreduce_segment_bytes: usize,

    pub allreduce_algorithm: AllreduceAlgorithm,

    /// Serve allreduce from a deterministic flat module instead of the
    /// pipeline.
    pub reproducible: bool,

    /// Module installed on node-local subgroups.
    pub intra_module: ModuleKind,

    /// Module installed on internode subgroups.
    pub inter_module: ModuleKind,
}

impl Default for HanConfig {
    fn default() -> Self {
        Self {
            allreduce_segment_bytes: 65536,
            allreduce_algorithm: AllreduceAlgorithm::Pipelined,
            reproducible: false,
            intra_module: ModuleKind::Tuned,
            inter_module: ModuleKind::Tuned,
        }
    }
}

impl HanConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `HAN_ALLREDUCE_SEGSIZE`
    /// - `HAN_ALLREDUCE_ALGORITHM` (`pipelined`, `callback`, `simple`)
    /// - `HAN_REPRODUCIBLE` (`0`/`1`)
    /// - `HAN_INTRA_MODULE`, `HAN_INTER_MODULE` (`basic`, `tuned`)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HAN_ALLREDUCE_SEGSIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.allreduce_segment_bytes = n;
        }
        if let Ok(v) = std::env::var("HAN_ALLREDUCE_ALGORITHM")
            && let Ok(a) = v.parse()
        {
            cfg.allreduce_algorithm = a;
        }
        if let Ok(v) = std::env::var("HAN_REPRODUCIBLE") {
            match v.as_str() {
                "1" | "true" => cfg.reproducible = true,
                "0" | "false" => cfg.reproducible = false,
                _ => {}
            }
        }
        if let Some(kind) = flat_module_from_env("HAN_INTRA_MODULE") {
            cfg.intra_module = kind;
        }
        if let Some(kind) = flat_module_from_env("HAN_INTER_MODULE") {
            cfg.inter_module = kind;
        }

        cfg
    }

    pub fn with_segment_bytes(mut self, bytes: usize) -> Self {
        self.allreduce_segment_bytes = bytes;
        self
    }

    pub fn with_algorithm(mut self, algorithm: AllreduceAlgorithm) -> Self {
        self.allreduce_algorithm = algorithm;
        self
    }

    pub fn with_reproducible(mut self, reproducible: bool) -> Self {
        self.reproducible = reproducible;
        self
    }
}

// Subgroups must never get the hierarchical module back.
fn flat_module_from_env(var: &str) -> Option<ModuleKind> {
    let kind = std::env::var(var).ok()?.parse::<ModuleKind>().ok()?;
    (kind != ModuleKind::Han).then_some(kind)
}
