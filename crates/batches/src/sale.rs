use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use slabmarket_core::{DomainError, DomainResult, Entity, UserId, ValueObject};

use crate::reservation::ReservationId;

/// Sale identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub Uuid);

impl SaleId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SaleId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SaleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Commercial terms of a sale confirmation.
///
/// Money stays in the smallest currency unit; the commission rate is integer
/// basis points so no float ever enters a money path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTerms {
    pub gross_value: u64,
    pub commission_rate_bps: u32,
}

impl SaleTerms {
    pub fn validate(&self) -> DomainResult<()> {
        if self.gross_value == 0 {
            return Err(DomainError::validation("gross_value must be positive"));
        }
        if self.commission_rate_bps > 10_000 {
            return Err(DomainError::validation(
                "commission_rate_bps cannot exceed 10000 (100%)",
            ));
        }
        Ok(())
    }

    /// `gross * rate`, rounded toward zero.
    pub fn commission_value(&self) -> u64 {
        ((self.gross_value as u128 * self.commission_rate_bps as u128) / 10_000) as u64
    }

    pub fn net_value(&self) -> u64 {
        self.gross_value - self.commission_value()
    }
}

impl ValueObject for SaleTerms {}

/// The permanent record of converted reservation quantity.
///
/// Created exactly once per confirmed reservation, in the same append that
/// marks the reservation confirmed and removes its quantity from the batch's
/// total. Deleting a sale is an accounting correction and does not restore
/// batch quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub reservation_id: ReservationId,
    pub confirmed_by: UserId,
    pub quantity: i64,
    pub gross_value: u64,
    pub commission_rate_bps: u32,
    pub commission_value: u64,
    pub net_value: u64,
    pub confirmed_at: DateTime<Utc>,
}

impl Entity for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
