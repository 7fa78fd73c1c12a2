use serde::Serialize;

/// Nested prefixes of the workload's address range a sample falls into.
///
/// The buckets are inclusion tests, not a partition: an address in the first
/// quarter is also counted in the first third, the first half and the full
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RegionMembership {
    pub quarter: bool,
    pub third: bool,
    pub half: bool,
    pub full: bool,
}

/// Classifies `address` against `[start, end]`. All bounds are inclusive and
/// every prefix is anchored at `start`.
pub fn classify_region(address: u64, start: u64, end: u64) -> RegionMembership {
    let span = end.saturating_sub(start);
    let within = |limit: u64| address >= start && address <= limit;

    RegionMembership {
        quarter: within(start + span / 4),
        third: within(start + span / 3),
        half: within(start + span / 2),
        full: within(end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 0x7f00_0000_0000;
    const END: u64 = START + 16_000_000;

    #[test]
    fn prefixes_are_nested() {
        let step = (END - START) / 997;
        let mut address = START - 3 * step;

        while address <= END + 3 * step {
            let m = classify_region(address, START, END);
            assert!(!m.quarter || m.third, "{address:#x}");
            assert!(!m.third || m.half, "{address:#x}");
            assert!(!m.half || m.full, "{address:#x}");
            address += step;
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let span = END - START;

        assert_eq!(
            classify_region(START, START, END),
            RegionMembership {
                quarter: true,
                third: true,
                half: true,
                full: true
            }
        );
        assert!(classify_region(START + span / 4, START, END).quarter);
        assert!(!classify_region(START + span / 4 + 1, START, END).quarter);
        assert!(classify_region(START + span / 4 + 1, START, END).third);
        assert!(classify_region(END, START, END).full);
        assert!(!classify_region(END, START, END).half);
    }

    #[test]
    fn outside_addresses_match_nothing() {
        assert_eq!(classify_region(START - 1, START, END), RegionMembership::default());
        assert_eq!(classify_region(END + 1, START, END), RegionMembership::default());
        assert_eq!(classify_region(0, START, END), RegionMembership::default());
    }
}
