mod allgather;
mod allreduce;
mod broadcast;
mod helpers;
mod reduce;

pub(crate) use allgather::ring_allgather;
pub(crate) use allreduce::{linear_allreduce, ring_allreduce};
pub(crate) use broadcast::{flat_broadcast, tree_broadcast};
pub(crate) use reduce::{linear_reduce, tree_reduce};

pub use helpers::{CollectiveTag, TagBlock, collective_tag};
