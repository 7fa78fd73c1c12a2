//! Data model for precise memory-access samples: the kernel's data-source
//! bit-field and the classifications derived from it.

mod classify;
mod data_source;
mod region;
mod sample;

pub use classify::{
    LocalityClass, Locality, Snoop, classify_locality, classify_snoop, describe_level,
    describe_tlb,
};
pub use data_source::{DataSource, lvl, snoop, tlb};
pub use region::{RegionMembership, classify_region};
pub use sample::SampleRecord;
