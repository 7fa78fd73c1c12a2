use serde::{Deserialize, Serialize, de};

const LVL_SHIFT: u32 = 5;
const LVL_MASK: u64 = 0x3fff;
const SNOOP_SHIFT: u32 = 19;
const SNOOP_MASK: u64 = 0x1f;
const TLB_SHIFT: u32 = 26;
const TLB_MASK: u64 = 0x7f;

/// Memory hierarchy level flags (`mem_lvl`).
pub mod lvl {
    pub const NA: u64 = 0x01;
    pub const HIT: u64 = 0x02;
    pub const MISS: u64 = 0x04;
    pub const L1: u64 = 0x08;
    /// Line fill buffer
    pub const LFB: u64 = 0x10;
    pub const L2: u64 = 0x20;
    pub const L3: u64 = 0x40;
    pub const LOC_RAM: u64 = 0x80;
    pub const REM_RAM1: u64 = 0x100;
    pub const REM_RAM2: u64 = 0x200;
    pub const REM_CCE1: u64 = 0x400;
    pub const REM_CCE2: u64 = 0x800;
    pub const IO: u64 = 0x1000;
    pub const UNC: u64 = 0x2000;
}

/// Snoop result flags (`mem_snoop`).
pub mod snoop {
    pub const NA: u64 = 0x01;
    pub const NONE: u64 = 0x02;
    pub const HIT: u64 = 0x04;
    pub const MISS: u64 = 0x08;
    pub const HITM: u64 = 0x10;
}

/// Data TLB flags (`mem_dtlb`).
pub mod tlb {
    pub const NA: u64 = 0x01;
    pub const HIT: u64 = 0x02;
    pub const MISS: u64 = 0x04;
    pub const L1: u64 = 0x08;
    pub const L2: u64 = 0x10;
    /// Hardware page walker
    pub const WK: u64 = 0x20;
    /// OS fault handler
    pub const OS: u64 = 0x40;
}

/// The kernel's `perf_mem_data_src` bit-field attached to every sample
/// captured with `PERF_SAMPLE_DATA_SRC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataSource(u64);

impl DataSource {
    pub const fn from_raw(raw: u64) -> Self {
        DataSource(raw)
    }

    /// Packs level, snoop and TLB flags into their positions within the
    /// bit-field. Flags wider than their field are truncated.
    pub const fn from_fields(mem_lvl: u64, mem_snoop: u64, mem_dtlb: u64) -> Self {
        DataSource(
            ((mem_lvl & LVL_MASK) << LVL_SHIFT)
                | ((mem_snoop & SNOOP_MASK) << SNOOP_SHIFT)
                | ((mem_dtlb & TLB_MASK) << TLB_SHIFT),
        )
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn mem_lvl(&self) -> u64 {
        (self.0 >> LVL_SHIFT) & LVL_MASK
    }

    pub const fn mem_snoop(&self) -> u64 {
        (self.0 >> SNOOP_SHIFT) & SNOOP_MASK
    }

    pub const fn mem_dtlb(&self) -> u64 {
        (self.0 >> TLB_SHIFT) & TLB_MASK
    }

    pub const fn has_lvl(&self, flag: u64) -> bool {
        self.mem_lvl() & flag != 0
    }

    pub const fn has_snoop(&self, flag: u64) -> bool {
        self.mem_snoop() & flag != 0
    }

    pub const fn has_tlb(&self, flag: u64) -> bool {
        self.mem_dtlb() & flag != 0
    }
}

impl Serialize for DataSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("0x{:X}", self.0))
    }
}

impl<'a> Deserialize<'a> for DataSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = DataSource;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string containing a hexadecimal number starting with '0x'")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let Some(hex_only) = v.strip_prefix("0x") else {
                    return Err(E::custom("does not start with '0x'"));
                };

                u64::from_str_radix(hex_only, 16)
                    .map(DataSource)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_land_in_kernel_positions() {
        let ds = DataSource::from_fields(lvl::HIT | lvl::L1, snoop::NONE, tlb::L1 | tlb::HIT);

        // PERF_MEM_LVL_HIT | PERF_MEM_LVL_L1 at shift 5, SNOOP_NONE at 19,
        // TLB_L1 | TLB_HIT at 26
        assert_eq!(ds.raw(), (0x0a << 5) | (0x02 << 19) | (0x0a << 26));
        assert_eq!(ds.mem_lvl(), lvl::HIT | lvl::L1);
        assert_eq!(ds.mem_snoop(), snoop::NONE);
        assert_eq!(ds.mem_dtlb(), tlb::L1 | tlb::HIT);
    }

    #[test]
    fn op_and_lock_bits_are_ignored() {
        // mem_op occupies the low five bits, mem_lock sits at 24
        let ds = DataSource::from_raw(0x1f | (0x3 << 24));
        assert_eq!(ds.mem_lvl(), 0);
        assert_eq!(ds.mem_snoop(), 0);
        assert_eq!(ds.mem_dtlb(), 0);
    }

    #[test]
    fn hex_serialization() {
        let ds = DataSource::from_raw(0x6a100142);
        let json = serde_json::to_string(&ds).unwrap();
        assert_eq!(json, "\"0x6A100142\"");

        let back: DataSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ds);

        assert!(serde_json::from_str::<DataSource>("\"6A\"").is_err());
    }
}
