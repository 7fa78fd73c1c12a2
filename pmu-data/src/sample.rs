use serde::{Deserialize, Serialize};

use crate::{
    classify::{classify_locality, classify_snoop, describe_level, describe_tlb},
    DataSource, Locality, Snoop,
};

/// One precise memory-access sample as laid out by the kernel for
/// `PERF_SAMPLE_IP | PERF_SAMPLE_ADDR | PERF_SAMPLE_WEIGHT | PERF_SAMPLE_DATA_SRC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub ip: u64,
    pub addr: u64,
    /// Access latency in core cycles
    pub weight: u64,
    pub data_source: DataSource,
}

impl SampleRecord {
    pub fn locality(&self) -> Locality {
        classify_locality(self.data_source)
    }

    pub fn snoop(&self) -> Snoop {
        classify_snoop(self.data_source)
    }

    pub fn level_description(&self) -> String {
        describe_level(self.data_source)
    }

    pub fn tlb_description(&self) -> String {
        describe_tlb(self.data_source)
    }
}
