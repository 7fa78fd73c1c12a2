#[cfg(target_os = "linux")]
mod perf;

#[cfg(target_os = "linux")]
pub use perf::{pmu_type_by_name, CounterValue, EventDescriptor, SamplingBuffer, Session};
