use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, ValueEnum};
use pmu::{PreciseSampling, DEFAULT_SAMPLING_EVENT};
use serde::{Deserialize, Serialize};
use workload::{AccessPattern, ELEMENT_SIZE};

/// Sizes on the command line are in units of 10^6 bytes.
pub const MEGABYTE: u64 = 1_000_000;
pub const CACHE_LINE: u64 = 64;

const DEFAULT_CPU: usize = 2;
const DEFAULT_NODE: u32 = 0;
const DEFAULT_RING_PAGES: usize = 8;
const DEFAULT_LATENCY_THRESHOLD: u64 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Every element points at its neighbour
    Seq,
    /// Elements are chained in a random order
    Rand,
}

impl From<Mode> for AccessPattern {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Seq => AccessPattern::Sequential,
            Mode::Rand => AccessPattern::Random,
        }
    }
}

/// Extra counters that can be read alongside the sampling counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionalCounter {
    Loads,
    Instructions,
    MemUncoreLocalDramRemoteCache,
    OffcoreRemoteCache,
    OffcoreLocalDram,
    OffcoreRemoteDram,
    UncoreReads,
}

impl OptionalCounter {
    pub fn name(&self) -> &'static str {
        match self {
            OptionalCounter::Loads => "loads",
            OptionalCounter::Instructions => "instructions",
            OptionalCounter::MemUncoreLocalDramRemoteCache => "mem-uncore-local-dram-remote-cache",
            OptionalCounter::OffcoreRemoteCache => "offcore-remote-cache",
            OptionalCounter::OffcoreLocalDram => "offcore-local-dram",
            OptionalCounter::OffcoreRemoteDram => "offcore-remote-dram",
            OptionalCounter::UncoreReads => "uncore-reads",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OptionalCounter::Loads => "loads count (core event: MEM_INST_RETIRED.LOADS)",
            OptionalCounter::Instructions => "instructions count (core event: INST_RETIRED.ANY)",
            OptionalCounter::MemUncoreLocalDramRemoteCache => {
                "local ram & remote cache count (core event: MEM_UNCORE_RETIRED:L_DRAM_REM_CACHE)"
            }
            OptionalCounter::OffcoreRemoteCache => {
                "remote cache count (core event: OFF_CORE_RESPONSE_0:REMOTE_CACHE_FWD)"
            }
            OptionalCounter::OffcoreLocalDram => {
                "local memory count (core event: OFF_CORE_RESPONSE_1:LOCAL_DRAM)"
            }
            OptionalCounter::OffcoreRemoteDram => {
                "remote memory count (core event: OFF_CORE_RESPONSE_1:REMOTE_DRAM)"
            }
            OptionalCounter::UncoreReads => {
                "64 bytes cache line reads from RAM count (uncore event: QMC_NORMAL_READS.ANY)"
            }
        }
    }

    /// Raw `(config, config1)` pair for the event.
    pub fn raw_event(&self) -> (u64, u64) {
        match self {
            OptionalCounter::Loads => (0x010b, 0),
            OptionalCounter::Instructions => (0x00c0, 0),
            OptionalCounter::MemUncoreLocalDramRemoteCache => (0x53080f, 0),
            OptionalCounter::OffcoreRemoteCache => (0x5301b7, 0x1011),
            OptionalCounter::OffcoreLocalDram => (0x5301bb, 0x4033),
            OptionalCounter::OffcoreRemoteDram => (0x5301bb, 0x2033),
            OptionalCounter::UncoreReads => (0x072c, 0),
        }
    }

    /// Count a clean run should produce, where one is known.
    pub fn expected(&self, config: &RunConfig) -> Option<u64> {
        match self {
            OptionalCounter::Loads => Some(config.elements() as u64),
            // each cache line is only pulled from RAM once when walking in order
            OptionalCounter::UncoreReads if config.pattern == AccessPattern::Sequential => {
                Some(config.size as u64 / CACHE_LINE)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Run options. Anything left unset falls back to the `--config` file and
/// then to the built-in default.
#[derive(Args, Debug, Default)]
pub struct RunOptions {
    /// Logical core the walk runs on [default: 2]
    #[arg(long)]
    pub cpu: Option<usize>,
    /// NUMA node the buffer is placed on [default: 0]
    #[arg(long)]
    pub node: Option<u32>,
    /// Data pages in the sampling ring buffer, a power of two [default: 8]
    #[arg(long)]
    pub ring_pages: Option<usize>,
    /// Minimum load latency in cycles for a load to be sampled [default: 3]
    #[arg(long)]
    pub latency_threshold: Option<u64>,
    /// Raw selector of the sampling event, decimal or 0x-prefixed [default: 0x100b]
    #[arg(long, value_parser = parse_number)]
    pub sampling_event: Option<u64>,
    /// Extra counter to read, may be repeated
    #[arg(long = "counter", value_enum)]
    pub counters: Vec<OptionalCounter>,
    /// List every sample, heaviest first
    #[arg(long)]
    pub print_samples: bool,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    /// Don't lock the process's pages in memory
    #[arg(long)]
    pub no_lock: bool,
    /// Core frequency used to convert latencies to nanoseconds
    #[arg(long)]
    pub cpu_ghz: Option<f64>,
    /// JSON file with defaults for the options above
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of a `--config` file. Keys mirror the long options.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub cpu: Option<usize>,
    pub node: Option<u32>,
    pub ring_pages: Option<usize>,
    pub latency_threshold: Option<u64>,
    pub sampling_event: Option<u64>,
    pub counters: Option<Vec<OptionalCounter>>,
    pub print_samples: Option<bool>,
    pub format: Option<OutputFormat>,
    pub lock_pages: Option<bool>,
    pub cpu_ghz: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Fully resolved and validated run parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Buffer size in bytes
    pub size: usize,
    pub pattern: AccessPattern,
    pub period: u64,
    pub cpu: usize,
    pub node: u32,
    pub ring_pages: usize,
    pub latency_threshold: u64,
    pub sampling_event: u64,
    pub counters: Vec<OptionalCounter>,
    pub print_samples: bool,
    pub format: OutputFormat,
    pub lock_pages: bool,
    pub cpu_ghz: Option<f64>,
}

impl RunConfig {
    pub fn resolve(
        size_mb: u64,
        mode: Mode,
        period: u64,
        options: &RunOptions,
    ) -> anyhow::Result<Self> {
        let file = match &options.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Self::merge(size_mb, mode, period, options, file)
    }

    pub fn merge(
        size_mb: u64,
        mode: Mode,
        period: u64,
        options: &RunOptions,
        file: FileConfig,
    ) -> anyhow::Result<Self> {
        let Some(size) = size_mb
            .checked_mul(MEGABYTE)
            .and_then(|size| usize::try_from(size).ok())
        else {
            bail!("{size_mb} MB does not fit in the address space");
        };

        let requested = if options.counters.is_empty() {
            file.counters.unwrap_or_default()
        } else {
            options.counters.clone()
        };
        let mut counters = Vec::with_capacity(requested.len());
        for counter in requested {
            if !counters.contains(&counter) {
                counters.push(counter);
            }
        }

        let config = RunConfig {
            size,
            pattern: mode.into(),
            period,
            cpu: options.cpu.or(file.cpu).unwrap_or(DEFAULT_CPU),
            node: options.node.or(file.node).unwrap_or(DEFAULT_NODE),
            ring_pages: options
                .ring_pages
                .or(file.ring_pages)
                .unwrap_or(DEFAULT_RING_PAGES),
            latency_threshold: options
                .latency_threshold
                .or(file.latency_threshold)
                .unwrap_or(DEFAULT_LATENCY_THRESHOLD),
            sampling_event: options
                .sampling_event
                .or(file.sampling_event)
                .unwrap_or(DEFAULT_SAMPLING_EVENT),
            counters,
            print_samples: options.print_samples || file.print_samples.unwrap_or(false),
            format: options.format.or(file.format).unwrap_or_default(),
            lock_pages: !options.no_lock && file.lock_pages.unwrap_or(true),
            cpu_ghz: options.cpu_ghz.or(file.cpu_ghz),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.period == 0 {
            bail!("sampling period must be greater than zero");
        }
        if self.elements() == 0 {
            bail!("size must be greater than zero");
        }
        if !self.ring_pages.is_power_of_two() {
            bail!(
                "ring buffer pages must be a power of two, got {}",
                self.ring_pages
            );
        }
        if let Some(ghz) = self.cpu_ghz {
            if !(ghz.is_finite() && ghz > 0.0) {
                bail!("cpu frequency must be a positive number of GHz, got {ghz}");
            }
        }

        Ok(())
    }

    pub fn elements(&self) -> usize {
        self.size / ELEMENT_SIZE
    }

    /// Samples a perfect capture would hold: one per `period` loads.
    pub fn expected_samples(&self) -> u64 {
        self.elements() as u64 / self.period
    }

    pub fn sampling(&self) -> PreciseSampling {
        PreciseSampling {
            config: self.sampling_event,
            latency_threshold: self.latency_threshold,
            data_pages: self.ring_pages,
            ..PreciseSampling::new(self.period)
        }
    }
}

fn parse_number(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|err| format!("invalid number {value:?}: {err}"))
}
