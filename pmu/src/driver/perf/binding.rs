use std::os::fd::{FromRawFd, OwnedFd};

use perf_event_open_sys::bindings::{perf_event_attr, PERF_FLAG_FD_CLOEXEC};
use perf_event_open_sys as sys;

use crate::{Error, EventKind, EventSpec, SampleSource};

/// Every sampling record carries exactly these fields, in this order. The
/// decoder relies on it.
const SAMPLE_FIELDS: u64 = sys::bindings::PERF_SAMPLE_IP as u64
    | sys::bindings::PERF_SAMPLE_ADDR as u64
    | sys::bindings::PERF_SAMPLE_WEIGHT as u64
    | sys::bindings::PERF_SAMPLE_DATA_SRC as u64;

pub(super) fn open_event(spec: &EventSpec) -> Result<OwnedFd, Error> {
    spec.validate().map_err(|reason| Error::InvalidSpec {
        event: spec.name.clone(),
        reason,
    })?;

    let mut attr = native_attr(spec);

    let fd = unsafe {
        sys::perf_event_open(
            &mut attr as *mut perf_event_attr,
            spec.target.pid,
            spec.target.cpu,
            -1,
            PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
        )
    };

    if fd < 0 {
        return Err(Error::Open {
            event: spec.name.clone(),
            source: std::io::Error::last_os_error(),
        });
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn native_attr(spec: &EventSpec) -> perf_event_attr {
    let mut attr = perf_event_attr::default();

    attr.size = std::mem::size_of::<perf_event_attr>() as u32;
    attr.set_disabled(1);
    attr.set_exclude_kernel(spec.exclude_kernel as u64);
    attr.set_exclude_hv(spec.exclude_hv as u64);
    attr.read_format = 0;

    match &spec.kind {
        EventKind::PageFaults => {
            attr.type_ = sys::bindings::PERF_TYPE_SOFTWARE;
            attr.config = sys::bindings::PERF_COUNT_SW_PAGE_FAULTS as u64;
        }
        EventKind::Raw {
            pmu_type,
            config,
            config1,
        } => {
            attr.type_ = pmu_type.unwrap_or(sys::bindings::PERF_TYPE_RAW);
            attr.config = *config;
            attr.__bindgen_anon_3.config1 = *config1;
        }
        EventKind::Precise(sampling) => {
            match sampling.source {
                SampleSource::LoadLatency => {
                    attr.type_ = sys::bindings::PERF_TYPE_RAW;
                    attr.config = sampling.config;
                    // load latency threshold lives in the ldlat field of config1
                    attr.__bindgen_anon_3.config1 = sampling.latency_threshold;
                    attr.set_precise_ip(2);
                }
                SampleSource::PageFaults => {
                    attr.type_ = sys::bindings::PERF_TYPE_SOFTWARE;
                    attr.config = sys::bindings::PERF_COUNT_SW_PAGE_FAULTS as u64;
                }
            }
            attr.__bindgen_anon_1.sample_period = sampling.period;
            attr.__bindgen_anon_2.wakeup_events = sampling.wakeup_events;
            attr.sample_type = SAMPLE_FIELDS;
            attr.set_pinned(1);
        }
    }

    attr
}

/// Looks up the dynamic type id of a PMU such as `uncore` from sysfs.
pub fn pmu_type_by_name(name: &str) -> std::io::Result<u32> {
    let path = format!("/sys/bus/event_source/devices/{name}/type");
    let contents = std::fs::read_to_string(&path)?;

    contents.trim().parse().map_err(|err| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected contents of {path}: {err}"),
        )
    })
}
