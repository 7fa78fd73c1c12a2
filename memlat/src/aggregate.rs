use pmu_data::{classify_region, Locality, LocalityClass, SampleRecord};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub class: LocalityClass,
    pub count: usize,
    /// Share of classified samples, `None` when nothing was classified
    pub percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionCounts {
    pub quarter: usize,
    pub third: usize,
    pub half: usize,
    pub full: usize,
}

/// Mean sample weight in core cycles. `None` marks an empty class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Latencies {
    pub overall: Option<f64>,
    pub local_memory: Option<f64>,
    pub remote_memory: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unclassified {
    pub sample: SampleRecord,
    pub matches: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Samples that fell into exactly one locality class. Every figure below
    /// is computed over these only.
    pub classified: usize,
    pub classes: Vec<ClassCount>,
    pub regions: RegionCounts,
    pub latency: Latencies,
    pub unclassified: Vec<Unclassified>,
}

/// Heaviest samples first.
pub fn sort_by_weight(samples: &mut [SampleRecord]) {
    samples.sort_unstable_by(|a, b| b.weight.cmp(&a.weight));
}

/// Summarises `samples` taken while walking the buffer `[start, end]`.
pub fn aggregate(samples: &[SampleRecord], start: u64, end: u64) -> Aggregate {
    let mut counts = [0usize; LocalityClass::ALL.len()];
    let mut weights = [0u128; LocalityClass::ALL.len()];
    let mut regions = RegionCounts::default();
    let mut unclassified = vec![];

    for sample in samples {
        let class = match sample.locality() {
            Locality::Classified(class) => class,
            Locality::Unclassifiable { matches } => {
                log::debug!(
                    "sample at ip {:#x} addr {:#x} matched {matches} locality classes (data source {:#x})",
                    sample.ip,
                    sample.addr,
                    sample.data_source.raw()
                );
                unclassified.push(Unclassified {
                    sample: *sample,
                    matches,
                });
                continue;
            }
        };

        let slot = class_index(class);
        counts[slot] += 1;
        weights[slot] += sample.weight as u128;

        let membership = classify_region(sample.addr, start, end);
        regions.quarter += membership.quarter as usize;
        regions.third += membership.third as usize;
        regions.half += membership.half as usize;
        regions.full += membership.full as usize;
    }

    if !unclassified.is_empty() {
        log::warn!(
            "{} of {} samples did not match exactly one locality class and were left out",
            unclassified.len(),
            samples.len()
        );
    }

    let classified: usize = counts.iter().sum();
    let classes = LocalityClass::ALL
        .iter()
        .map(|&class| ClassCount {
            class,
            count: counts[class_index(class)],
            percent: ratio(counts[class_index(class)] as f64 * 100.0, classified),
        })
        .collect();

    let mean = |class: LocalityClass| {
        let slot = class_index(class);
        ratio(weights[slot] as f64, counts[slot])
    };

    Aggregate {
        classified,
        classes,
        regions,
        latency: Latencies {
            overall: ratio(weights.iter().sum::<u128>() as f64, classified),
            local_memory: mean(LocalityClass::LocalMemory),
            remote_memory: mean(LocalityClass::RemoteMemory),
        },
        unclassified,
    }
}

impl Aggregate {
    pub fn count(&self, class: LocalityClass) -> usize {
        self.classes[class_index(class)].count
    }

    /// Share of classified samples that hit `count`, `None` without any.
    pub fn share(&self, count: usize) -> Option<f64> {
        ratio(count as f64 * 100.0, self.classified)
    }
}

fn class_index(class: LocalityClass) -> usize {
    match class {
        LocalityClass::RemoteCache => 0,
        LocalityClass::LocalCache => 1,
        LocalityClass::LocalMemory => 2,
        LocalityClass::RemoteMemory => 3,
    }
}

fn ratio(total: f64, count: usize) -> Option<f64> {
    (count != 0).then(|| total / count as f64)
}

#[cfg(test)]
mod tests {
    use pmu_data::{lvl, snoop, tlb, DataSource};

    use super::*;

    const START: u64 = 0x10_0000;
    const END: u64 = START + 4000;

    fn sample(addr: u64, weight: u64, mem_lvl: u64) -> SampleRecord {
        SampleRecord {
            ip: 0x401000,
            addr,
            weight,
            data_source: DataSource::from_fields(mem_lvl, snoop::NONE, tlb::L1 | tlb::HIT),
        }
    }

    #[test]
    fn heaviest_samples_come_first() {
        let mut samples: Vec<_> = [7, 300, 12, 12, 0, 95, 4000, 31]
            .into_iter()
            .map(|weight| sample(START, weight, lvl::HIT | lvl::L1))
            .collect();

        sort_by_weight(&mut samples);
        assert!(samples.windows(2).all(|pair| pair[0].weight >= pair[1].weight));
        assert_eq!(samples[0].weight, 4000);
    }

    #[test]
    fn classes_regions_and_latencies() {
        let samples = [
            sample(START, 10, lvl::HIT | lvl::L1),
            sample(START + 1500, 20, lvl::HIT | lvl::L2),
            sample(START + 2500, 200, lvl::HIT | lvl::LOC_RAM),
            sample(END, 300, lvl::MISS | lvl::L3),
            sample(END + 8, 600, lvl::HIT | lvl::REM_RAM1),
        ];

        let aggregate = aggregate(&samples, START, END);

        assert_eq!(aggregate.classified, 5);
        assert_eq!(aggregate.count(LocalityClass::LocalCache), 2);
        assert_eq!(aggregate.count(LocalityClass::LocalMemory), 2);
        assert_eq!(aggregate.count(LocalityClass::RemoteMemory), 1);
        assert_eq!(aggregate.count(LocalityClass::RemoteCache), 0);
        assert_eq!(aggregate.classes[1].percent, Some(40.0));
        assert_eq!(aggregate.classes[0].percent, Some(0.0));

        assert_eq!(
            aggregate.regions,
            RegionCounts {
                quarter: 1,
                third: 1,
                half: 2,
                full: 4,
            }
        );

        assert_eq!(aggregate.latency.overall, Some(226.0));
        assert_eq!(aggregate.latency.local_memory, Some(250.0));
        assert_eq!(aggregate.latency.remote_memory, Some(600.0));
        assert!(aggregate.unclassified.is_empty());
    }

    #[test]
    fn empty_classes_have_no_latency() {
        let samples = [sample(START, 40, lvl::HIT | lvl::L1)];
        let aggregate = aggregate(&samples, START, END);

        assert_eq!(aggregate.latency.overall, Some(40.0));
        assert_eq!(aggregate.latency.local_memory, None);
        assert_eq!(aggregate.latency.remote_memory, None);

        let nothing = super::aggregate(&[], START, END);
        assert_eq!(nothing.latency, Latencies::default());
        assert!(nothing.classes.iter().all(|class| class.percent.is_none()));
        assert_eq!(nothing.share(0), None);
    }

    #[test]
    fn inconsistent_samples_are_left_out() {
        let samples = [
            sample(START, 10, lvl::HIT | lvl::L1),
            // two hit categories at once
            sample(START, 1000, lvl::HIT | lvl::L1 | lvl::REM_RAM1),
            // no category at all
            sample(START, 1000, lvl::NA),
        ];

        let aggregate = aggregate(&samples, START, END);

        assert_eq!(aggregate.classified, 1);
        assert_eq!(aggregate.regions.full, 1);
        assert_eq!(aggregate.latency.overall, Some(10.0));
        assert_eq!(
            aggregate
                .unclassified
                .iter()
                .map(|u| u.matches)
                .collect::<Vec<_>>(),
            vec![2, 0]
        );
    }
}
