//! Hierarchical collectives for tessera process groups.
//!
//! [`HanModule`] splits a group into node-local and internode subgroups and
//! runs each collective as a composition of cheaper collectives on them.
//! Allreduce is cut into segments that flow through a four-stage pipeline
//! (local reduce, cross reduce, cross broadcast, local broadcast), either
//! stepped by the caller or driven from completion callbacks.

pub mod collective;
pub mod completion;
pub mod config;
pub mod error;
pub mod module;
pub mod pipeline;
pub mod topology;

pub use completion::{Completion, CompletionState};
pub use config::{AllreduceAlgorithm, HanConfig};
pub use error::{HanError, Result};
pub use module::{HanModule, HanStats};
pub use pipeline::{PIPELINE_DEPTH, PipelineTask, SegmentPlan, SegmentRange, Stage};
pub use topology::{RootRanks, TopologyCache, TopologyResolver};
