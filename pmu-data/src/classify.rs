use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_source::{lvl, snoop, tlb, DataSource};

/// Where in the memory hierarchy a sampled access was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalityClass {
    RemoteCache,
    LocalCache,
    LocalMemory,
    RemoteMemory,
}

/// Outcome of locality classification. A sample that matches no class, or
/// more than one, is `Unclassifiable` and carries the number of matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Classified(LocalityClass),
    Unclassifiable { matches: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snoop {
    NotApplicable,
    None,
    Hit,
    Miss,
    HitModified,
    Unknown,
}

impl LocalityClass {
    pub const ALL: [LocalityClass; 4] = [
        LocalityClass::RemoteCache,
        LocalityClass::LocalCache,
        LocalityClass::LocalMemory,
        LocalityClass::RemoteMemory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LocalityClass::RemoteCache => "remote cache",
            LocalityClass::LocalCache => "local cache",
            LocalityClass::LocalMemory => "local memory",
            LocalityClass::RemoteMemory => "remote memory",
        }
    }

    /// Tests this class's predicate alone, without checking the others.
    pub fn serves(&self, ds: DataSource) -> bool {
        match self {
            LocalityClass::RemoteCache => {
                ds.has_lvl(lvl::HIT) && ds.has_lvl(lvl::REM_CCE1 | lvl::REM_CCE2)
            }
            LocalityClass::LocalCache => {
                ds.has_lvl(lvl::HIT) && ds.has_lvl(lvl::L1 | lvl::LFB | lvl::L2 | lvl::L3)
            }
            LocalityClass::LocalMemory => {
                if ds.has_lvl(lvl::MISS) {
                    ds.has_lvl(lvl::L3)
                } else {
                    ds.has_lvl(lvl::HIT) && ds.has_lvl(lvl::LOC_RAM | lvl::UNC)
                }
            }
            LocalityClass::RemoteMemory => {
                ds.has_lvl(lvl::HIT) && ds.has_lvl(lvl::REM_RAM1 | lvl::REM_RAM2)
            }
        }
    }
}

impl fmt::Display for LocalityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn classify_locality(ds: DataSource) -> Locality {
    let mut matches = 0u8;
    let mut matched = None;

    for class in LocalityClass::ALL {
        if class.serves(ds) {
            matches += 1;
            matched = Some(class);
        }
    }

    match matched {
        Some(class) if matches == 1 => Locality::Classified(class),
        _ => Locality::Unclassifiable { matches },
    }
}

/// Returns the first set snoop flag, checked in the order NA, none, hit,
/// miss, hit-modified.
pub fn classify_snoop(ds: DataSource) -> Snoop {
    if ds.has_snoop(snoop::NA) {
        Snoop::NotApplicable
    } else if ds.has_snoop(snoop::NONE) {
        Snoop::None
    } else if ds.has_snoop(snoop::HIT) {
        Snoop::Hit
    } else if ds.has_snoop(snoop::MISS) {
        Snoop::Miss
    } else if ds.has_snoop(snoop::HITM) {
        Snoop::HitModified
    } else {
        Snoop::Unknown
    }
}

impl Snoop {
    pub fn name(&self) -> &'static str {
        match self {
            Snoop::NotApplicable => "NA",
            Snoop::None => "none",
            Snoop::Hit => "hit",
            Snoop::Miss => "miss",
            Snoop::HitModified => "hit modified",
            Snoop::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Snoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const LEVEL_NAMES: [(u64, &str); 11] = [
    (lvl::L1, "L1"),
    (lvl::LFB, "LFB"),
    (lvl::L2, "L2"),
    (lvl::L3, "L3"),
    (lvl::LOC_RAM, "Local RAM"),
    (lvl::REM_RAM1, "Remote RAM 1 hop"),
    (lvl::REM_RAM2, "Remote RAM 2 hops"),
    (lvl::REM_CCE1, "Remote Cache 1 hop"),
    (lvl::REM_CCE2, "Remote Cache 2 hops"),
    (lvl::IO, "I/O Memory"),
    (lvl::UNC, "Uncached Memory"),
];

/// Human readable memory level, e.g. `"L3 Hit"` or `"Remote RAM 1 hop Hit"`.
pub fn describe_level(ds: DataSource) -> String {
    let mut res = String::with_capacity(32);

    if ds.has_lvl(lvl::NA) {
        res.push_str("NA");
    }

    if let Some((_, name)) = LEVEL_NAMES.iter().find(|(flag, _)| ds.has_lvl(*flag)) {
        res.push_str(name);
    }

    if ds.has_lvl(lvl::HIT) {
        res.push_str(" Hit");
    } else if ds.has_lvl(lvl::MISS) {
        res.push_str(" Miss");
    }

    res
}

/// Human readable data TLB outcome, e.g. `"STLB Miss hardware walker"`.
pub fn describe_tlb(ds: DataSource) -> String {
    let mut res = String::with_capacity(32);

    if ds.has_tlb(tlb::NA) {
        res.push_str("NA");
    }

    if ds.has_tlb(tlb::L1) {
        res.push_str("DTLB");
    } else if ds.has_tlb(tlb::L2) {
        res.push_str("STLB");
    }

    if ds.has_tlb(tlb::HIT) {
        res.push_str(" Hit");
    } else if ds.has_tlb(tlb::MISS) {
        res.push_str(" Miss");
    }

    if ds.has_tlb(tlb::WK) {
        res.push_str(" hardware walker");
    } else if ds.has_tlb(tlb::OS) {
        res.push_str(" OS fault handler");
    }

    res
}
