//! The measured memory workload: a NUMA-placed buffer of 8-byte elements
//! chained into a single cycle, walked once by pointer chasing.

mod affinity;
mod memory;
mod numa;

use std::fmt;

pub use affinity::{pin_core, PageLock};
pub use memory::{MemoryWorkload, ELEMENT_SIZE};
pub use numa::{check_placement, cpus_of_node, node_of_address, node_of_cpu, parse_cpu_list};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Sequential,
    Random,
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPattern::Sequential => f.write_str("sequential"),
            AccessPattern::Random => f.write_str("random"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("workload must hold at least one 8-byte element, got {0} bytes")]
    InvalidSize(usize),
    #[error("failed to allocate {size} bytes: {source}")]
    Alloc {
        size: usize,
        source: std::io::Error,
    },
    #[error("failed to check where memory is with move_pages: {0}")]
    PlacementQuery(#[source] std::io::Error),
    #[error("memory on the wrong node: expected {expected} vs current = {actual}")]
    PlacementMismatch { expected: u32, actual: u32 },
    #[error("sched_setaffinity failed for core {cpu}: {source}")]
    PinCore {
        cpu: usize,
        source: std::io::Error,
    },
    #[error("failed to lock pages in memory: {0}")]
    LockPages(#[source] std::io::Error),
    #[error("workload traversed before being filled")]
    NotFilled,
}
