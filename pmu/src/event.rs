/// `MEM_INST_RETIRED.LATENCY_ABOVE_THRESHOLD`
pub const DEFAULT_SAMPLING_EVENT: u64 = 0x100b;

/// Which task and CPU a counter observes, in `perf_event_open` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub pid: i32,
    pub cpu: i32,
}

impl Target {
    /// The calling thread on whatever CPU it runs.
    pub const fn this_thread() -> Self {
        Target { pid: 0, cpu: -1 }
    }

    /// The calling thread, only while it runs on `cpu`.
    pub const fn this_thread_on(cpu: usize) -> Self {
        Target {
            pid: 0,
            cpu: cpu as i32,
        }
    }

    /// Every task on `cpu`. Uncore counters must be opened this way.
    pub const fn cpu_wide(cpu: usize) -> Self {
        Target {
            pid: -1,
            cpu: cpu as i32,
        }
    }
}

/// Event that drives the sampling counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSource {
    /// Raw load-latency event in `config`, filtered by `latency_threshold`
    LoadLatency,
    /// Software page faults. Records keep the same layout but carry no
    /// latency or data source.
    PageFaults,
}

/// Parameters of the precise (PEBS) load-latency sampling counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreciseSampling {
    pub source: SampleSource,
    /// Raw event selector and umask
    pub config: u64,
    /// Minimum load latency in cycles for an access to be counted
    pub latency_threshold: u64,
    /// One sample every `period` qualifying events
    pub period: u64,
    pub wakeup_events: u32,
    /// Ring buffer data pages, a power of two
    pub data_pages: usize,
}

impl PreciseSampling {
    pub fn new(period: u64) -> Self {
        PreciseSampling {
            source: SampleSource::LoadLatency,
            config: DEFAULT_SAMPLING_EVENT,
            latency_threshold: 3,
            period,
            wakeup_events: 1,
            data_pages: 8,
        }
    }

    /// One sample every `period` page faults of the calling thread.
    pub fn page_faults(period: u64) -> Self {
        PreciseSampling {
            source: SampleSource::PageFaults,
            ..PreciseSampling::new(period)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Software page-fault counter
    PageFaults,
    /// Raw hardware counter. `pmu_type` selects a non-core PMU such as the
    /// uncore; `None` means `PERF_TYPE_RAW`.
    Raw {
        pmu_type: Option<u32>,
        config: u64,
        config1: u64,
    },
    Precise(PreciseSampling),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    pub kind: EventKind,
    pub target: Target,
    pub exclude_kernel: bool,
    pub exclude_hv: bool,
}

impl EventSpec {
    pub fn page_faults(target: Target) -> Self {
        EventSpec {
            name: "page_faults".to_owned(),
            kind: EventKind::PageFaults,
            target,
            exclude_kernel: true,
            exclude_hv: false,
        }
    }

    pub fn raw(name: &str, config: u64, config1: u64, target: Target) -> Self {
        EventSpec {
            name: name.to_owned(),
            kind: EventKind::Raw {
                pmu_type: None,
                config,
                config1,
            },
            target,
            exclude_kernel: true,
            exclude_hv: true,
        }
    }

    /// Uncore PMUs count for the whole socket and refuse exclusion flags.
    pub fn uncore(name: &str, pmu_type: u32, config: u64, cpu: usize) -> Self {
        EventSpec {
            name: name.to_owned(),
            kind: EventKind::Raw {
                pmu_type: Some(pmu_type),
                config,
                config1: 0,
            },
            target: Target::cpu_wide(cpu),
            exclude_kernel: false,
            exclude_hv: false,
        }
    }

    pub fn precise(name: &str, sampling: PreciseSampling) -> Self {
        EventSpec {
            name: name.to_owned(),
            kind: EventKind::Precise(sampling),
            target: Target::this_thread(),
            exclude_kernel: true,
            exclude_hv: true,
        }
    }

    pub fn is_sampling(&self) -> bool {
        matches!(self.kind, EventKind::Precise(_))
    }

    /// Rejects parameters the kernel would either refuse or silently
    /// misinterpret.
    pub fn validate(&self) -> Result<(), &'static str> {
        match &self.kind {
            EventKind::Precise(sampling) => {
                if sampling.period == 0 {
                    return Err("sampling period must be non-zero");
                }
                if sampling.data_pages == 0 || !sampling.data_pages.is_power_of_two() {
                    return Err("ring buffer data pages must be a power of two");
                }
                if sampling.wakeup_events == 0 {
                    return Err("wakeup cadence must be non-zero");
                }
                Ok(())
            }
            EventKind::PageFaults | EventKind::Raw { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precise_defaults() {
        let spec = EventSpec::precise("loads_above_threshold", PreciseSampling::new(1000));

        assert!(spec.is_sampling());
        assert_eq!(spec.target, Target::this_thread());
        assert!(spec.exclude_kernel && spec.exclude_hv);
        assert_eq!(spec.validate(), Ok(()));

        match spec.kind {
            EventKind::Precise(sampling) => {
                assert_eq!(sampling.config, 0x100b);
                assert_eq!(sampling.latency_threshold, 3);
                assert_eq!(sampling.data_pages, 8);
                assert_eq!(sampling.source, SampleSource::LoadLatency);
            }
            _ => panic!("expected precise sampling"),
        }

        let faults = PreciseSampling::page_faults(1);
        assert_eq!(faults.source, SampleSource::PageFaults);
        assert_eq!(faults.period, 1);
    }

    #[test]
    fn invalid_sampling_parameters() {
        let mut sampling = PreciseSampling::new(0);
        assert!(EventSpec::precise("s", sampling).validate().is_err());

        sampling.period = 100;
        sampling.data_pages = 6;
        assert!(EventSpec::precise("s", sampling).validate().is_err());

        sampling.data_pages = 0;
        assert!(EventSpec::precise("s", sampling).validate().is_err());

        sampling.data_pages = 16;
        assert!(EventSpec::precise("s", sampling).validate().is_ok());
    }

    #[test]
    fn targets() {
        assert_eq!(Target::this_thread_on(2), Target { pid: 0, cpu: 2 });
        assert_eq!(Target::cpu_wide(4), Target { pid: -1, cpu: 4 });

        let uncore = EventSpec::uncore("uncore_reads", 6, 0x072c, 0);
        assert_eq!(uncore.target.pid, -1);
        assert!(!uncore.exclude_kernel);
        assert!(!uncore.is_sampling());
    }
}
