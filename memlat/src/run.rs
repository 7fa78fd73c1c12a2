use std::time::Instant;

use anyhow::{bail, Context};
use pmu::{CounterValue, EventKind, EventSpec, Session, Target};
use workload::{MemoryWorkload, PageLock};

use crate::aggregate::{aggregate, sort_by_weight};
use crate::config::{OptionalCounter, RunConfig};
use crate::report::{CounterLine, Report, SampleLine, SampleSummary};

const SAMPLING_COUNTER: &str = "sampling";
const UNCORE_PMU: &str = "uncore";

/// A counter to open together with what the report says about it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCounter {
    pub spec: EventSpec,
    pub description: String,
    pub expected: Option<u64>,
}

/// Builds the counter list for a run. The sampling counter comes last so it
/// is enabled last and disabled first.
pub fn plan_counters(config: &RunConfig) -> anyhow::Result<Vec<PlannedCounter>> {
    let mut planned = vec![PlannedCounter {
        spec: EventSpec::page_faults(Target::this_thread_on(config.cpu)),
        description: "Page faults count (software event)".to_owned(),
        expected: None,
    }];

    for counter in &config.counters {
        let (event, config1) = counter.raw_event();
        let spec = match counter {
            OptionalCounter::UncoreReads => {
                let (pmu_type, cpu) = uncore_target(config.node)?;
                EventSpec::uncore(counter.name(), pmu_type, event, cpu)
            }
            _ => EventSpec::raw(
                counter.name(),
                event,
                config1,
                Target::this_thread_on(config.cpu),
            ),
        };

        planned.push(PlannedCounter {
            spec,
            description: counter.description().to_owned(),
            expected: counter.expected(config),
        });
    }

    planned.push(PlannedCounter {
        spec: EventSpec::precise(SAMPLING_COUNTER, config.sampling()),
        description: "loads above the latency threshold (sampling event)".to_owned(),
        expected: None,
    });

    Ok(planned)
}

/// Uncore counters are socket wide and have to be opened on a CPU of the
/// socket that owns the memory.
fn uncore_target(node: u32) -> anyhow::Result<(u32, usize)> {
    let pmu_type = pmu::pmu_type_by_name(UNCORE_PMU)
        .with_context(|| format!("failed to find the {UNCORE_PMU} PMU"))?;
    let cpus = workload::cpus_of_node(node)
        .with_context(|| format!("failed to list the CPUs of node {node}"))?;

    match cpus.first() {
        Some(&cpu) => Ok((pmu_type, cpu)),
        None => bail!("node {node} has no CPUs to open the uncore counter on"),
    }
}

pub fn run(config: &RunConfig) -> anyhow::Result<Report> {
    workload::pin_core(config.cpu)?;
    log::info!("Running test on core {}", config.cpu);

    let mut memory = MemoryWorkload::allocate(config.size, config.node)?;
    memory.fill(config.pattern);
    memory.verify_placement()?;

    let _lock = if config.lock_pages {
        Some(PageLock::acquire()?)
    } else {
        None
    };

    let core_node = match workload::node_of_cpu(config.cpu) {
        Ok(node) => Some(node),
        Err(err) => {
            log::warn!("failed to find the node of core {}: {err}", config.cpu);
            None
        }
    };
    log::info!(
        "Running test with memory on node {} ({})",
        config.node,
        match core_node {
            Some(node) if node == config.node => "local",
            Some(_) => "remote",
            None => "unknown",
        }
    );

    let planned = plan_counters(config)?;
    let specs: Vec<EventSpec> = planned.iter().map(|p| p.spec.clone()).collect();
    let mut session = Session::open(&specs)?;
    log::info!("opened {} counters", specs.len());

    let started = Instant::now();
    session.start()?;
    let last = memory.traverse();
    session.stop()?;
    let elapsed = started.elapsed();
    std::hint::black_box(last?);

    let values = session.counters()?;
    let decoded = session.samples()?.unwrap_or_default();
    session.close();

    log::debug!(
        "decoded {} samples, {} lost, {} other records",
        decoded.samples.len(),
        decoded.lost,
        decoded.skipped
    );

    let mut samples = decoded.samples;
    sort_by_weight(&mut samples);

    let (start, end) = (memory.start_address(), memory.end_address());
    let listing = if config.print_samples {
        samples
            .iter()
            .map(|sample| SampleLine::new(sample, start, end))
            .collect()
    } else {
        vec![]
    };

    Ok(Report {
        core: config.cpu,
        memory_node: config.node,
        core_node,
        pattern: config.pattern.to_string(),
        size: config.size,
        elements: config.elements(),
        period: config.period,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        cpu_ghz: config.cpu_ghz,
        counters: counter_lines(&planned, values),
        samples: SampleSummary {
            captured: samples.len(),
            expected: config.expected_samples(),
            lost: decoded.lost,
            skipped: decoded.skipped,
        },
        aggregate: aggregate(&samples, start, end),
        listing,
    })
}

fn counter_lines(planned: &[PlannedCounter], values: Vec<CounterValue>) -> Vec<CounterLine> {
    planned
        .iter()
        .zip(values)
        .filter(|(_, value)| !matches!(value.kind, EventKind::Precise(_)))
        .map(|(planned, value)| CounterLine {
            name: value.name,
            description: planned.description.clone(),
            value: value.value,
            expected: planned.expected,
        })
        .collect()
}
