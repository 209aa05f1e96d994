use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slabmarket_batches::BatchId;
use slabmarket_core::{Aggregate, AggregateRoot, DomainError, IndustryId, UserId};
use slabmarket_events::Event;

/// One broker's view of a shared batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub broker_id: UserId,
    pub shared_by: UserId,
    /// Broker-specific unit price. `None` means the batch's list price
    /// applies until a price is negotiated.
    pub negotiated_price: Option<u64>,
    pub shared_at: DateTime<Utc>,
}

/// Aggregate root: the share table of a single batch.
///
/// Keyed by the same id as the batch itself but stored under its own stream,
/// so updating a negotiated price never bumps the batch's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchShares {
    id: BatchId,
    industry_id: Option<IndustryId>,
    shares: HashMap<UserId, Share>,
    version: u64,
}

impl BatchShares {
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            industry_id: None,
            shares: HashMap::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn industry_id(&self) -> Option<IndustryId> {
        self.industry_id
    }

    pub fn share(&self, broker_id: &UserId) -> Option<&Share> {
        self.shares.get(broker_id)
    }

    pub fn shares(&self) -> impl Iterator<Item = &Share> {
        self.shares.values()
    }

    pub fn is_shared_with(&self, broker_id: &UserId) -> bool {
        self.shares.contains_key(broker_id)
    }

    /// Price the broker pays per unit, falling back to the supplied list
    /// price when nothing has been negotiated.
    pub fn effective_price(&self, broker_id: &UserId, list_price: u64) -> Option<u64> {
        self.shares
            .get(broker_id)
            .map(|s| s.negotiated_price.unwrap_or(list_price))
    }

    fn ensure_industry(&self, industry_id: IndustryId) -> Result<(), DomainError> {
        match self.industry_id {
            Some(existing) if existing != industry_id => {
                Err(DomainError::invalid_transition("industry mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn ensure_batch_id(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if self.id != batch_id {
            return Err(DomainError::invalid_transition("batch_id mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for BatchShares {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ShareBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBatch {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub shared_by: UserId,
    pub negotiated_price: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateNegotiatedPrice. Only the broker holding the share may
/// change its own price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNegotiatedPrice {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub acting_user: UserId,
    pub negotiated_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevokeShare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeShare {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharesCommand {
    Share(ShareBatch),
    UpdateNegotiatedPrice(UpdateNegotiatedPrice),
    Revoke(RevokeShare),
}

/// Event: BatchShared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShared {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub shared_by: UserId,
    pub negotiated_price: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NegotiatedPriceUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedPriceUpdated {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub negotiated_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShareRevoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRevoked {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub broker_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharesEvent {
    Shared(BatchShared),
    PriceUpdated(NegotiatedPriceUpdated),
    Revoked(ShareRevoked),
}

impl Event for SharesEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SharesEvent::Shared(_) => "sharing.batch.shared",
            SharesEvent::PriceUpdated(_) => "sharing.batch.price_updated",
            SharesEvent::Revoked(_) => "sharing.batch.revoked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SharesEvent::Shared(e) => e.occurred_at,
            SharesEvent::PriceUpdated(e) => e.occurred_at,
            SharesEvent::Revoked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for BatchShares {
    type Command = SharesCommand;
    type Event = SharesEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SharesEvent::Shared(e) => {
                self.id = e.batch_id;
                self.industry_id = Some(e.industry_id);
                self.shares.insert(
                    e.broker_id,
                    Share {
                        broker_id: e.broker_id,
                        shared_by: e.shared_by,
                        negotiated_price: e.negotiated_price,
                        shared_at: e.occurred_at,
                    },
                );
            }
            SharesEvent::PriceUpdated(e) => {
                if let Some(share) = self.shares.get_mut(&e.broker_id) {
                    share.negotiated_price = Some(e.negotiated_price);
                }
            }
            SharesEvent::Revoked(e) => {
                self.shares.remove(&e.broker_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SharesCommand::Share(cmd) => {
                self.ensure_industry(cmd.industry_id)?;
                self.ensure_batch_id(cmd.batch_id)?;
                if self.shares.contains_key(&cmd.broker_id) {
                    return Err(DomainError::conflict("batch already shared with broker"));
                }
                if cmd.negotiated_price == Some(0) {
                    return Err(DomainError::validation(
                        "negotiated_price must be positive",
                    ));
                }

                Ok(vec![SharesEvent::Shared(BatchShared {
                    industry_id: cmd.industry_id,
                    batch_id: cmd.batch_id,
                    broker_id: cmd.broker_id,
                    shared_by: cmd.shared_by,
                    negotiated_price: cmd.negotiated_price,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SharesCommand::UpdateNegotiatedPrice(cmd) => {
                self.ensure_industry(cmd.industry_id)?;
                self.ensure_batch_id(cmd.batch_id)?;
                if !self.shares.contains_key(&cmd.broker_id) {
                    return Err(DomainError::not_found());
                }
                // A broker may only renegotiate its own share.
                if cmd.acting_user != cmd.broker_id {
                    return Err(DomainError::Unauthorized);
                }
                if cmd.negotiated_price == 0 {
                    return Err(DomainError::validation(
                        "negotiated_price must be positive",
                    ));
                }

                Ok(vec![SharesEvent::PriceUpdated(NegotiatedPriceUpdated {
                    industry_id: cmd.industry_id,
                    batch_id: cmd.batch_id,
                    broker_id: cmd.broker_id,
                    negotiated_price: cmd.negotiated_price,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SharesCommand::Revoke(cmd) => {
                self.ensure_industry(cmd.industry_id)?;
                self.ensure_batch_id(cmd.batch_id)?;
                if !self.shares.contains_key(&cmd.broker_id) {
                    return Err(DomainError::not_found());
                }

                Ok(vec![SharesEvent::Revoked(ShareRevoked {
                    industry_id: cmd.industry_id,
                    batch_id: cmd.batch_id,
                    broker_id: cmd.broker_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabmarket_core::AggregateId;

    fn drive(shares: &mut BatchShares, cmd: SharesCommand) -> Result<Vec<SharesEvent>, DomainError> {
        let events = shares.handle(&cmd)?;
        for e in &events {
            shares.apply(e);
        }
        Ok(events)
    }

    fn share_cmd(
        industry_id: IndustryId,
        batch_id: BatchId,
        broker_id: UserId,
        price: Option<u64>,
    ) -> SharesCommand {
        SharesCommand::Share(ShareBatch {
            industry_id,
            batch_id,
            broker_id,
            shared_by: UserId::new(),
            negotiated_price: price,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn share_and_lookup() {
        let ind = IndustryId::new();
        let batch_id = BatchId::new(AggregateId::new());
        let broker = UserId::new();
        let mut shares = BatchShares::empty(batch_id);

        drive(&mut shares, share_cmd(ind, batch_id, broker, None)).unwrap();

        assert!(shares.is_shared_with(&broker));
        assert_eq!(shares.effective_price(&broker, 25_000), Some(25_000));
        assert_eq!(shares.effective_price(&UserId::new(), 25_000), None);
        assert_eq!(shares.version(), 1);
    }

    #[test]
    fn duplicate_share_conflicts() {
        let ind = IndustryId::new();
        let batch_id = BatchId::new(AggregateId::new());
        let broker = UserId::new();
        let mut shares = BatchShares::empty(batch_id);

        drive(&mut shares, share_cmd(ind, batch_id, broker, None)).unwrap();
        let err = drive(&mut shares, share_cmd(ind, batch_id, broker, Some(1))).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn negotiated_price_overrides_list_price() {
        let ind = IndustryId::new();
        let batch_id = BatchId::new(AggregateId::new());
        let broker = UserId::new();
        let mut shares = BatchShares::empty(batch_id);
        drive(&mut shares, share_cmd(ind, batch_id, broker, None)).unwrap();

        drive(
            &mut shares,
            SharesCommand::UpdateNegotiatedPrice(UpdateNegotiatedPrice {
                industry_id: ind,
                batch_id,
                broker_id: broker,
                acting_user: broker,
                negotiated_price: 22_000,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(shares.effective_price(&broker, 25_000), Some(22_000));
    }

    #[test]
    fn only_the_owning_broker_may_renegotiate() {
        let ind = IndustryId::new();
        let batch_id = BatchId::new(AggregateId::new());
        let broker = UserId::new();
        let mut shares = BatchShares::empty(batch_id);
        drive(&mut shares, share_cmd(ind, batch_id, broker, Some(20_000))).unwrap();

        let err = drive(
            &mut shares,
            SharesCommand::UpdateNegotiatedPrice(UpdateNegotiatedPrice {
                industry_id: ind,
                batch_id,
                broker_id: broker,
                acting_user: UserId::new(),
                negotiated_price: 1,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();

        assert!(matches!(err, DomainError::Unauthorized));
        assert_eq!(shares.effective_price(&broker, 25_000), Some(20_000));
    }

    #[test]
    fn revoke_removes_the_share() {
        let ind = IndustryId::new();
        let batch_id = BatchId::new(AggregateId::new());
        let broker = UserId::new();
        let mut shares = BatchShares::empty(batch_id);
        drive(&mut shares, share_cmd(ind, batch_id, broker, None)).unwrap();

        drive(
            &mut shares,
            SharesCommand::Revoke(RevokeShare {
                industry_id: ind,
                batch_id,
                broker_id: broker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert!(!shares.is_shared_with(&broker));

        let err = drive(
            &mut shares,
            SharesCommand::Revoke(RevokeShare {
                industry_id: ind,
                batch_id,
                broker_id: broker,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }
}
