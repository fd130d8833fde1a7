//! Size units (1 kb = 1024 bytes)

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Power-of-two size unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Bytes,
    B,
    Kb,
    Mb,
    #[default]
    Gb,
    Tb,
    Pb,
    Eb,
    Zb,
    Yb,
}

impl SizeUnit {
    /// Bytes per unit
    pub fn multiplier(self) -> u128 {
        let exp = match self {
            SizeUnit::Bytes | SizeUnit::B => 0,
            SizeUnit::Kb => 1,
            SizeUnit::Mb => 2,
            SizeUnit::Gb => 3,
            SizeUnit::Tb => 4,
            SizeUnit::Pb => 5,
            SizeUnit::Eb => 6,
            SizeUnit::Zb => 7,
            SizeUnit::Yb => 8,
        };
        1024u128.pow(exp)
    }
}

/// Convert `size` in `unit` to bytes, saturating at `u64::MAX`
pub fn size_to_bytes(size: u64, unit: SizeUnit) -> u64 {
    let bytes = u128::from(size) * unit.multiplier();
    u64::try_from(bytes).unwrap_or(u64::MAX)
}

pub const ONE_GIB: u64 = 1024 * 1024 * 1024;
pub const ONE_TIB: u64 = ONE_GIB * 1024;
