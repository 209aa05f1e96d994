use serde::{Deserialize, Serialize};

use slabmarket_core::ValueObject;

/// Fixed-point square-feet-per-square-meter ratio, scaled by 10^4.
const SQFT_PER_SQM_E4: u128 = 107_639;

/// Area unit a batch is priced in.
///
/// Used only for price conversion between markets; quantities on the batch
/// are slab counts and never pass through a unit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    SquareMeter,
    SquareFoot,
}

impl AreaUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            AreaUnit::SquareMeter => "m²",
            AreaUnit::SquareFoot => "ft²",
        }
    }

    /// Convert a per-unit price (smallest currency unit) into `target`.
    ///
    /// Integer fixed-point math; rounds toward zero.
    pub fn convert_price(&self, unit_price: u64, target: AreaUnit) -> u64 {
        match (self, target) {
            (AreaUnit::SquareMeter, AreaUnit::SquareFoot) => {
                ((unit_price as u128 * 10_000) / SQFT_PER_SQM_E4) as u64
            }
            (AreaUnit::SquareFoot, AreaUnit::SquareMeter) => {
                ((unit_price as u128 * SQFT_PER_SQM_E4) / 10_000) as u64
            }
            _ => unit_price,
        }
    }
}

impl ValueObject for AreaUnit {}

impl core::fmt::Display for AreaUnit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.symbol())
    }
}
