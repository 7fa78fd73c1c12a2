//! Hardware event sessions for precise memory-access sampling.
//!
//! An [`EventSpec`] describes one counter. On Linux a [`Session`] opens a
//! list of them through `perf_event_open`, drives them through the
//! [`DescriptorState`] machine around a measured window, reads the counts
//! and decodes the sampling ring buffer into [`pmu_data::SampleRecord`]s.

mod decode;
mod driver;
mod event;
mod state;

pub use decode::{decode_records, decode_ring, DecodedSamples, RecordCursor, RecordHeader};
#[cfg(target_os = "linux")]
pub use driver::{pmu_type_by_name, CounterValue, EventDescriptor, SamplingBuffer, Session};
pub use event::{
    EventKind, EventSpec, PreciseSampling, SampleSource, Target, DEFAULT_SAMPLING_EVENT,
};
pub use state::{DescriptorState, Operation};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("perf_event_open failed for {event}: {source}")]
    Open {
        event: String,
        source: std::io::Error,
    },
    #[error("{op} failed for {event}: {source}")]
    Control {
        event: String,
        op: Operation,
        source: std::io::Error,
    },
    #[error("couldn't mmap sampling buffer of {event}: {source}")]
    Map {
        event: String,
        source: std::io::Error,
    },
    #[error("invalid event {event}: {reason}")]
    InvalidSpec { event: String, reason: &'static str },
    #[error("cannot {op} {event} while it is {state}")]
    InvalidState {
        event: String,
        op: Operation,
        state: DescriptorState,
    },
    #[error(
        "more samples than space in the ring buffer (head at {head} bytes, capacity {capacity} bytes)"
    )]
    CaptureOverflow { head: u64, capacity: u64 },
    #[error("malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: &'static str },
}
