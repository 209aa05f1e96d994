use serde::{Deserialize, Serialize};

/// Actor roles recognized by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Industry administrator: full control within its own industry.
    AdminIndustry,
    /// Seller employed by the industry; manages stock and closes sales.
    InternalSeller,
    /// External broker working from shared listings.
    Broker,
}

impl core::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ActorRole::AdminIndustry => "admin_industry",
            ActorRole::InternalSeller => "internal_seller",
            ActorRole::Broker => "broker",
        };
        f.write_str(name)
    }
}

/// Capabilities checked at the command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create, archive, restore and reprice batches.
    ManageBatches,
    /// Place and cancel reservations.
    Reserve,
    /// Convert reservations into sales (and undo sales).
    ConfirmSales,
    /// Administrative availability adjustments.
    AdjustStock,
    /// Share batches with brokers and revoke shares.
    ShareBatches,
    /// Maintain broker-specific negotiated prices.
    NegotiatePrices,
    /// Read availability and the shared catalog.
    ViewCatalog,
}

/// Static role → capability table.
pub fn capabilities(role: ActorRole) -> &'static [Capability] {
    use Capability::*;

    match role {
        ActorRole::AdminIndustry => &[
            ManageBatches,
            Reserve,
            ConfirmSales,
            AdjustStock,
            ShareBatches,
            NegotiatePrices,
            ViewCatalog,
        ],
        ActorRole::InternalSeller => &[ManageBatches, Reserve, ConfirmSales, ViewCatalog],
        ActorRole::Broker => &[Reserve, NegotiatePrices, ViewCatalog],
    }
}
