use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slabmarket_core::{Aggregate, AggregateId, AggregateRoot, DomainError, IndustryId, UserId};
use slabmarket_events::Event;

use crate::reservation::{Reservation, ReservationId, ReservationStatus};
use crate::sale::{Sale, SaleId, SaleTerms};
use crate::unit::AreaUnit;

/// Batch identifier (industry-scoped via `industry_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub AggregateId);

impl BatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product identifier (catalog reference; the catalog itself is an external
/// collaborator).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Batch status lifecycle.
///
/// `Available` ⇄ `Reserved` is driven automatically by `available_quantity`
/// crossing zero; `Sold` by `total_quantity` reaching zero through confirmed
/// sales. `Archived` is a reversible soft delete, independent of quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Available,
    Reserved,
    Sold,
    Archived,
}

/// Status a batch's quantities imply, ignoring archival.
fn quantity_derived_status(total: i64, available: i64) -> BatchStatus {
    if total == 0 {
        BatchStatus::Sold
    } else if available == 0 {
        BatchStatus::Reserved
    } else {
        BatchStatus::Available
    }
}

/// Aggregate root: Batch.
///
/// Owns its reservations and sales, so the batch stream is the single
/// serialization point for every quantity change: two concurrent reserves
/// race on the same stream version and one of them re-reads before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    industry_id: Option<IndustryId>,
    product_id: Option<ProductId>,
    total_quantity: i64,
    available_quantity: i64,
    status: BatchStatus,
    unit_price: u64,
    unit: AreaUnit,
    reservations: HashMap<ReservationId, Reservation>,
    sales: HashMap<SaleId, Sale>,
    version: u64,
    created: bool,
}

impl Batch {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            industry_id: None,
            product_id: None,
            total_quantity: 0,
            available_quantity: 0,
            status: BatchStatus::Available,
            unit_price: 0,
            unit: AreaUnit::SquareMeter,
            reservations: HashMap::new(),
            sales: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn industry_id(&self) -> Option<IndustryId> {
        self.industry_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn total_quantity(&self) -> i64 {
        self.total_quantity
    }

    pub fn available_quantity(&self) -> i64 {
        self.available_quantity
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn unit(&self) -> AreaUnit {
        self.unit
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn sale(&self, id: &SaleId) -> Option<&Sale> {
        self.sales.get(id)
    }

    pub fn sales(&self) -> impl Iterator<Item = &Sale> {
        self.sales.values()
    }

    pub fn has_active_reservations(&self) -> bool {
        self.reservations.values().any(Reservation::is_active)
    }

    /// Sum of quantity currently held by active reservations.
    pub fn active_held_quantity(&self) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.quantity)
            .sum()
    }

    /// True iff the batch can cover `quantity` units right now.
    pub fn can_cover(&self, quantity: i64) -> bool {
        self.status == BatchStatus::Available && self.available_quantity >= quantity
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatch {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub unit_price: u64,
    pub unit: AreaUnit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reserve. `expires_at` is computed by the engine from its
/// reservation TTL policy so the command stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub owner_id: UserId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelReservation (explicit cancel; terminal status Cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireReservation (sweeper release; terminal status Expired).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReservation {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmSale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSale {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub sale_id: SaleId,
    pub confirmed_by: UserId,
    pub terms: SaleTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustAvailability (administrative escape hatch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustAvailability {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    /// Optional forced status; when absent and the delta is non-zero the
    /// status is re-derived from the resulting quantities.
    pub target_status: Option<BatchStatus>,
    /// Optimistic precondition: reject unless the batch currently has this
    /// status.
    pub from_status: Option<BatchStatus>,
    pub quantity_delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveBatch (soft delete; blocked while reservations are active).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveBatch {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreBatch {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteSale ("undo" accounting correction; quantity stays gone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSale {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub sale_id: SaleId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePricing (metadata edit; never touches quantities).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePricing {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub unit_price: u64,
    pub unit: AreaUnit,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    Create(CreateBatch),
    Reserve(Reserve),
    CancelReservation(CancelReservation),
    ExpireReservation(ExpireReservation),
    ConfirmSale(ConfirmSale),
    AdjustAvailability(AdjustAvailability),
    Archive(ArchiveBatch),
    Restore(RestoreBatch),
    DeleteSale(DeleteSale),
    UpdatePricing(UpdatePricing),
}

/// Event: BatchCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub unit_price: u64,
    pub unit: AreaUnit,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityReserved {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub owner_id: UserId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased. Shared shape for cancel and expiry, which
/// use the identical release arithmetic and differ only in terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub reservation_id: ReservationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfirmed {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub sale_id: SaleId,
    pub reservation_id: ReservationId,
    pub confirmed_by: UserId,
    pub quantity: i64,
    pub gross_value: u64,
    pub commission_rate_bps: u32,
    pub commission_value: u64,
    pub net_value: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDeleted {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub sale_id: SaleId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AvailabilityAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityAdjusted {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub quantity_delta: i64,
    pub status_after: BatchStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchArchived {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchRestored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRestored {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PricingUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingUpdated {
    pub industry_id: IndustryId,
    pub batch_id: BatchId,
    pub unit_price: u64,
    pub unit: AreaUnit,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    Created(BatchCreated),
    Reserved(QuantityReserved),
    ReservationCancelled(ReservationReleased),
    ReservationExpired(ReservationReleased),
    SaleConfirmed(SaleConfirmed),
    SaleDeleted(SaleDeleted),
    AvailabilityAdjusted(AvailabilityAdjusted),
    Archived(BatchArchived),
    Restored(BatchRestored),
    PricingUpdated(PricingUpdated),
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Created(_) => "batches.batch.created",
            BatchEvent::Reserved(_) => "batches.batch.reserved",
            BatchEvent::ReservationCancelled(_) => "batches.batch.reservation_cancelled",
            BatchEvent::ReservationExpired(_) => "batches.batch.reservation_expired",
            BatchEvent::SaleConfirmed(_) => "batches.batch.sale_confirmed",
            BatchEvent::SaleDeleted(_) => "batches.batch.sale_deleted",
            BatchEvent::AvailabilityAdjusted(_) => "batches.batch.availability_adjusted",
            BatchEvent::Archived(_) => "batches.batch.archived",
            BatchEvent::Restored(_) => "batches.batch.restored",
            BatchEvent::PricingUpdated(_) => "batches.batch.pricing_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::Created(e) => e.occurred_at,
            BatchEvent::Reserved(e) => e.occurred_at,
            BatchEvent::ReservationCancelled(e) => e.occurred_at,
            BatchEvent::ReservationExpired(e) => e.occurred_at,
            BatchEvent::SaleConfirmed(e) => e.occurred_at,
            BatchEvent::SaleDeleted(e) => e.occurred_at,
            BatchEvent::AvailabilityAdjusted(e) => e.occurred_at,
            BatchEvent::Archived(e) => e.occurred_at,
            BatchEvent::Restored(e) => e.occurred_at,
            BatchEvent::PricingUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Batch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::Created(e) => {
                self.id = e.batch_id;
                self.industry_id = Some(e.industry_id);
                self.product_id = Some(e.product_id);
                self.total_quantity = e.total_quantity;
                self.available_quantity = e.total_quantity;
                self.status = BatchStatus::Available;
                self.unit_price = e.unit_price;
                self.unit = e.unit;
                self.reservations.clear();
                self.sales.clear();
                self.created = true;
            }
            BatchEvent::Reserved(e) => {
                self.available_quantity -= e.quantity;
                self.reservations.insert(
                    e.reservation_id,
                    Reservation {
                        id: e.reservation_id,
                        owner_id: e.owner_id,
                        quantity: e.quantity,
                        status: ReservationStatus::Active,
                        created_at: e.occurred_at,
                        expires_at: e.expires_at,
                    },
                );
                if self.available_quantity == 0 {
                    self.status = BatchStatus::Reserved;
                }
            }
            BatchEvent::ReservationCancelled(e) => {
                self.release(e.reservation_id, e.quantity, ReservationStatus::Cancelled);
            }
            BatchEvent::ReservationExpired(e) => {
                self.release(e.reservation_id, e.quantity, ReservationStatus::Expired);
            }
            BatchEvent::SaleConfirmed(e) => {
                if let Some(res) = self.reservations.get_mut(&e.reservation_id) {
                    res.status = ReservationStatus::Confirmed;
                }
                // The units permanently leave inventory; available_quantity
                // already excluded them while the reservation was active.
                self.total_quantity -= e.quantity;
                self.sales.insert(
                    e.sale_id,
                    Sale {
                        id: e.sale_id,
                        reservation_id: e.reservation_id,
                        confirmed_by: e.confirmed_by,
                        quantity: e.quantity,
                        gross_value: e.gross_value,
                        commission_rate_bps: e.commission_rate_bps,
                        commission_value: e.commission_value,
                        net_value: e.net_value,
                        confirmed_at: e.occurred_at,
                    },
                );
                if self.total_quantity == 0 {
                    self.status = BatchStatus::Sold;
                }
            }
            BatchEvent::SaleDeleted(e) => {
                // Accounting correction only: total_quantity stays reduced.
                self.sales.remove(&e.sale_id);
            }
            BatchEvent::AvailabilityAdjusted(e) => {
                self.available_quantity += e.quantity_delta;
                self.status = e.status_after;
            }
            BatchEvent::Archived(_) => {
                self.status = BatchStatus::Archived;
            }
            BatchEvent::Restored(_) => {
                self.status =
                    quantity_derived_status(self.total_quantity, self.available_quantity);
            }
            BatchEvent::PricingUpdated(e) => {
                self.unit_price = e.unit_price;
                self.unit = e.unit;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::Create(cmd) => self.handle_create(cmd),
            BatchCommand::Reserve(cmd) => self.handle_reserve(cmd),
            BatchCommand::CancelReservation(cmd) => self.handle_cancel(cmd),
            BatchCommand::ExpireReservation(cmd) => self.handle_expire(cmd),
            BatchCommand::ConfirmSale(cmd) => self.handle_confirm_sale(cmd),
            BatchCommand::AdjustAvailability(cmd) => self.handle_adjust(cmd),
            BatchCommand::Archive(cmd) => self.handle_archive(cmd),
            BatchCommand::Restore(cmd) => self.handle_restore(cmd),
            BatchCommand::DeleteSale(cmd) => self.handle_delete_sale(cmd),
            BatchCommand::UpdatePricing(cmd) => self.handle_update_pricing(cmd),
        }
    }
}

impl Batch {
    fn release(&mut self, id: ReservationId, quantity: i64, terminal: ReservationStatus) {
        if let Some(res) = self.reservations.get_mut(&id) {
            res.status = terminal;
        }
        self.available_quantity += quantity;
        if self.status == BatchStatus::Reserved && self.available_quantity > 0 {
            self.status = BatchStatus::Available;
        }
    }

    fn ensure_industry(&self, industry_id: IndustryId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.industry_id != Some(industry_id) {
            return Err(DomainError::invalid_transition("industry mismatch"));
        }
        Ok(())
    }

    fn ensure_batch_id(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if self.id != batch_id {
            return Err(DomainError::invalid_transition("batch_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, industry_id: IndustryId, batch_id: BatchId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_industry(industry_id)?;
        self.ensure_batch_id(batch_id)
    }

    /// Common guard for cancel/expire/confirm: the reservation must exist and
    /// still be active.
    fn active_reservation(&self, id: ReservationId) -> Result<&Reservation, DomainError> {
        let res = self.reservations.get(&id).ok_or(DomainError::NotFound)?;
        if res.status.is_terminal() {
            return Err(DomainError::already_resolved(format!(
                "reservation {id} is already {:?}",
                res.status
            )));
        }
        Ok(res)
    }

    fn handle_create(&self, cmd: &CreateBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("batch already exists"));
        }
        if cmd.total_quantity <= 0 {
            return Err(DomainError::validation("total_quantity must be positive"));
        }
        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        Ok(vec![BatchEvent::Created(BatchCreated {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            product_id: cmd.product_id,
            total_quantity: cmd.total_quantity,
            unit_price: cmd.unit_price,
            unit: cmd.unit,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &Reserve) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.reservations.contains_key(&cmd.reservation_id) {
            return Err(DomainError::conflict("reservation_id already used"));
        }
        if self.status == BatchStatus::Archived {
            return Err(DomainError::invalid_transition("batch is archived"));
        }
        if self.status != BatchStatus::Available || self.available_quantity < cmd.quantity {
            return Err(DomainError::out_of_stock(format!(
                "requested {} but only {} available (status {:?})",
                cmd.quantity, self.available_quantity, self.status
            )));
        }

        Ok(vec![BatchEvent::Reserved(QuantityReserved {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            reservation_id: cmd.reservation_id,
            owner_id: cmd.owner_id,
            quantity: cmd.quantity,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelReservation) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;
        let res = self.active_reservation(cmd.reservation_id)?;

        Ok(vec![BatchEvent::ReservationCancelled(ReservationReleased {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            reservation_id: cmd.reservation_id,
            quantity: res.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireReservation) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;
        let res = self.active_reservation(cmd.reservation_id)?;

        if !res.is_overdue(cmd.occurred_at) {
            return Err(DomainError::invalid_transition(
                "reservation has not passed its expiry",
            ));
        }

        Ok(vec![BatchEvent::ReservationExpired(ReservationReleased {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            reservation_id: cmd.reservation_id,
            quantity: res.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_sale(&self, cmd: &ConfirmSale) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;
        let res = self.active_reservation(cmd.reservation_id)?;

        // Lazy expiry: an overdue reservation is unconfirmable even before
        // the sweeper has made its expiry durable.
        if res.is_overdue(cmd.occurred_at) {
            return Err(DomainError::invalid_transition(
                "reservation has expired and awaits sweep",
            ));
        }
        if self.sales.contains_key(&cmd.sale_id) {
            return Err(DomainError::conflict("sale_id already used"));
        }
        cmd.terms.validate()?;

        Ok(vec![BatchEvent::SaleConfirmed(SaleConfirmed {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            sale_id: cmd.sale_id,
            reservation_id: cmd.reservation_id,
            confirmed_by: cmd.confirmed_by,
            quantity: res.quantity,
            gross_value: cmd.terms.gross_value,
            commission_rate_bps: cmd.terms.commission_rate_bps,
            commission_value: cmd.terms.commission_value(),
            net_value: cmd.terms.net_value(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustAvailability) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if let Some(from) = cmd.from_status {
            if from != self.status {
                return Err(DomainError::invalid_transition(format!(
                    "status precondition failed: expected {:?}, found {:?}",
                    from, self.status
                )));
            }
        }

        let new_available = self
            .available_quantity
            .checked_add(cmd.quantity_delta)
            .ok_or_else(|| DomainError::validation("quantity_delta is out of range"))?;
        if new_available < 0 || new_available > self.total_quantity {
            return Err(DomainError::invalid_transition(format!(
                "adjustment would leave available_quantity at {} (total {})",
                new_available, self.total_quantity
            )));
        }

        let status_after = cmd.target_status.unwrap_or_else(|| {
            if cmd.quantity_delta != 0 && self.status != BatchStatus::Archived {
                quantity_derived_status(self.total_quantity, new_available)
            } else {
                self.status
            }
        });

        Ok(vec![BatchEvent::AvailabilityAdjusted(AvailabilityAdjusted {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            quantity_delta: cmd.quantity_delta,
            status_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveBatch) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if self.status == BatchStatus::Archived {
            return Err(DomainError::already_resolved("batch is already archived"));
        }
        if self.has_active_reservations() {
            return Err(DomainError::invalid_transition(
                "batch has active reservations",
            ));
        }

        Ok(vec![BatchEvent::Archived(BatchArchived {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreBatch) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if self.status != BatchStatus::Archived {
            return Err(DomainError::invalid_transition("batch is not archived"));
        }

        Ok(vec![BatchEvent::Restored(BatchRestored {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete_sale(&self, cmd: &DeleteSale) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if !self.sales.contains_key(&cmd.sale_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![BatchEvent::SaleDeleted(SaleDeleted {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            sale_id: cmd.sale_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_pricing(&self, cmd: &UpdatePricing) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_exists(cmd.industry_id, cmd.batch_id)?;

        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        Ok(vec![BatchEvent::PricingUpdated(PricingUpdated {
            industry_id: cmd.industry_id,
            batch_id: cmd.batch_id,
            unit_price: cmd.unit_price,
            unit: cmd.unit,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn industry() -> IndustryId {
        IndustryId::new()
    }

    fn batch_id() -> BatchId {
        BatchId::new(AggregateId::new())
    }

    fn product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    /// Drive a command through handle + apply, returning the emitted events.
    fn drive(batch: &mut Batch, cmd: BatchCommand) -> Result<Vec<BatchEvent>, DomainError> {
        let events = batch.handle(&cmd)?;
        for e in &events {
            batch.apply(e);
        }
        Ok(events)
    }

    fn created_batch(industry_id: IndustryId, total: i64) -> Batch {
        let id = batch_id();
        let mut batch = Batch::empty(id);
        drive(
            &mut batch,
            BatchCommand::Create(CreateBatch {
                industry_id,
                batch_id: id,
                product_id: product_id(),
                total_quantity: total,
                unit_price: 25_000,
                unit: AreaUnit::SquareMeter,
                occurred_at: now(),
            }),
        )
        .unwrap();
        batch
    }

    fn reserve_cmd(batch: &Batch, owner: UserId, quantity: i64) -> (ReservationId, BatchCommand) {
        let reservation_id = ReservationId::new();
        let cmd = BatchCommand::Reserve(Reserve {
            industry_id: batch.industry_id().unwrap(),
            batch_id: batch.id_typed(),
            reservation_id,
            owner_id: owner,
            quantity,
            expires_at: now() + Duration::hours(24),
            occurred_at: now(),
        });
        (reservation_id, cmd)
    }

    fn terms() -> SaleTerms {
        SaleTerms {
            gross_value: 100_000,
            commission_rate_bps: 500,
        }
    }

    #[test]
    fn create_initializes_full_availability() {
        let batch = created_batch(industry(), 10);
        assert_eq!(batch.total_quantity(), 10);
        assert_eq!(batch.available_quantity(), 10);
        assert_eq!(batch.status(), BatchStatus::Available);
        assert_eq!(batch.version(), 1);
    }

    #[test]
    fn create_twice_conflicts() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let err = drive(
            &mut batch,
            BatchCommand::Create(CreateBatch {
                industry_id: ind,
                batch_id: bid,
                product_id: product_id(),
                total_quantity: 5,
                unit_price: 1,
                unit: AreaUnit::SquareFoot,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn reserve_decrements_and_flips_to_reserved_at_zero() {
        let mut batch = created_batch(industry(), 10);
        let (_, cmd) = reserve_cmd(&batch, UserId::new(), 4);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.available_quantity(), 6);
        assert_eq!(batch.status(), BatchStatus::Available);

        let (_, cmd) = reserve_cmd(&batch, UserId::new(), 6);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.available_quantity(), 0);
        assert_eq!(batch.status(), BatchStatus::Reserved);
    }

    #[test]
    fn reserve_beyond_availability_is_out_of_stock() {
        let mut batch = created_batch(industry(), 3);
        let (_, cmd) = reserve_cmd(&batch, UserId::new(), 4);
        let err = drive(&mut batch, cmd).unwrap_err();
        assert!(matches!(err, DomainError::OutOfStock(_)));
        // Failed reserve leaves no partial state.
        assert_eq!(batch.available_quantity(), 3);
        assert_eq!(batch.reservations().count(), 0);
    }

    #[test]
    fn reserve_on_archived_batch_is_invalid_transition() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        drive(
            &mut batch,
            BatchCommand::Archive(ArchiveBatch {
                industry_id: ind,
                batch_id: bid,
                occurred_at: now(),
            }),
        )
        .unwrap();

        let (_, cmd) = reserve_cmd(&batch, UserId::new(), 1);
        let err = drive(&mut batch, cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn cancel_releases_quantity_and_flips_back_to_available() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 5);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.status(), BatchStatus::Reserved);

        drive(
            &mut batch,
            BatchCommand::CancelReservation(CancelReservation {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert_eq!(batch.available_quantity(), 5);
        assert_eq!(batch.status(), BatchStatus::Available);
        assert_eq!(
            batch.reservation(&res_id).unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[test]
    fn cancel_twice_is_already_resolved_with_no_extra_release() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 2);
        drive(&mut batch, cmd).unwrap();

        let cancel = BatchCommand::CancelReservation(CancelReservation {
            industry_id: ind,
            batch_id: batch.id_typed(),
            reservation_id: res_id,
            occurred_at: now(),
        });
        drive(&mut batch, cancel.clone()).unwrap();
        assert_eq!(batch.available_quantity(), 5);

        let err = drive(&mut batch, cancel).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyResolved(_)));
        assert_eq!(batch.available_quantity(), 5);
    }

    #[test]
    fn cancel_unknown_reservation_is_not_found() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let err = drive(
            &mut batch,
            BatchCommand::CancelReservation(CancelReservation {
                industry_id: ind,
                batch_id: bid,
                reservation_id: ReservationId::new(),
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn confirm_creates_sale_and_permanently_removes_quantity() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let seller = UserId::new();
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 4);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.available_quantity(), 6);

        let sale_id = SaleId::new();
        drive(
            &mut batch,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                sale_id,
                confirmed_by: seller,
                terms: terms(),
                occurred_at: now(),
            }),
        )
        .unwrap();

        // Units are gone from total; available is untouched by confirm.
        assert_eq!(batch.total_quantity(), 6);
        assert_eq!(batch.available_quantity(), 6);
        assert_eq!(batch.status(), BatchStatus::Available);

        let sale = batch.sale(&sale_id).unwrap();
        assert_eq!(sale.quantity, 4);
        assert_eq!(sale.gross_value, 100_000);
        assert_eq!(sale.commission_value, 5_000);
        assert_eq!(sale.net_value, 95_000);
        assert_eq!(
            batch.reservation(&res_id).unwrap().status,
            ReservationStatus::Confirmed
        );
    }

    #[test]
    fn confirming_the_last_units_marks_batch_sold() {
        let ind = industry();
        let mut batch = created_batch(ind, 3);
        let bid = batch.id_typed();
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 3);
        drive(&mut batch, cmd).unwrap();

        drive(
            &mut batch,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                sale_id: SaleId::new(),
                confirmed_by: UserId::new(),
                terms: terms(),
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert_eq!(batch.total_quantity(), 0);
        assert_eq!(batch.status(), BatchStatus::Sold);
    }

    #[test]
    fn confirm_twice_is_already_resolved() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 2);
        drive(&mut batch, cmd).unwrap();

        let bid = batch.id_typed();
        let confirm = |sale_id| {
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                sale_id,
                confirmed_by: UserId::new(),
                terms: terms(),
                occurred_at: now(),
            })
        };

        drive(&mut batch, confirm(SaleId::new())).unwrap();
        let total_after_first = batch.total_quantity();

        let err = drive(&mut batch, confirm(SaleId::new())).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyResolved(_)));
        assert_eq!(batch.total_quantity(), total_after_first);
    }

    #[test]
    fn overdue_reservation_is_unconfirmable_before_the_sweep() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let reservation_id = ReservationId::new();
        let reserved_at = now();
        drive(
            &mut batch,
            BatchCommand::Reserve(Reserve {
                industry_id: ind,
                batch_id: bid,
                reservation_id,
                owner_id: UserId::new(),
                quantity: 2,
                expires_at: reserved_at + Duration::hours(24),
                occurred_at: reserved_at,
            }),
        )
        .unwrap();

        let err = drive(
            &mut batch,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id,
                sale_id: SaleId::new(),
                confirmed_by: UserId::new(),
                terms: terms(),
                occurred_at: reserved_at + Duration::hours(25),
            }),
        )
        .unwrap_err();

        assert!(matches!(err, DomainError::InvalidTransition(_)));
        // Still active in durable state; the sweeper owns the release.
        assert!(batch.reservation(&reservation_id).unwrap().is_active());
        assert_eq!(batch.available_quantity(), 3);
    }

    #[test]
    fn expire_before_deadline_is_rejected() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let reserved_at = now();
        let reservation_id = ReservationId::new();
        drive(
            &mut batch,
            BatchCommand::Reserve(Reserve {
                industry_id: ind,
                batch_id: bid,
                reservation_id,
                owner_id: UserId::new(),
                quantity: 2,
                expires_at: reserved_at + Duration::hours(24),
                occurred_at: reserved_at,
            }),
        )
        .unwrap();

        let err = drive(
            &mut batch,
            BatchCommand::ExpireReservation(ExpireReservation {
                industry_id: ind,
                batch_id: bid,
                reservation_id,
                occurred_at: reserved_at + Duration::hours(1),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn expire_after_deadline_releases_exactly_once() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let reserved_at = now();
        let reservation_id = ReservationId::new();
        drive(
            &mut batch,
            BatchCommand::Reserve(Reserve {
                industry_id: ind,
                batch_id: bid,
                reservation_id,
                owner_id: UserId::new(),
                quantity: 5,
                expires_at: reserved_at + Duration::hours(24),
                occurred_at: reserved_at,
            }),
        )
        .unwrap();
        assert_eq!(batch.status(), BatchStatus::Reserved);

        let expire = BatchCommand::ExpireReservation(ExpireReservation {
            industry_id: ind,
            batch_id: bid,
            reservation_id,
            occurred_at: reserved_at + Duration::hours(25),
        });
        drive(&mut batch, expire.clone()).unwrap();
        assert_eq!(batch.available_quantity(), 5);
        assert_eq!(batch.status(), BatchStatus::Available);
        assert_eq!(
            batch.reservation(&reservation_id).unwrap().status,
            ReservationStatus::Expired
        );

        let err = drive(&mut batch, expire).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyResolved(_)));
        assert_eq!(batch.available_quantity(), 5);
    }

    #[test]
    fn adjust_enforces_quantity_bounds() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let adjust = |delta, from| {
            BatchCommand::AdjustAvailability(AdjustAvailability {
                industry_id: ind,
                batch_id: bid,
                target_status: None,
                from_status: from,
                quantity_delta: delta,
                occurred_at: now(),
            })
        };

        let err = drive(&mut batch, adjust(1, None)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        drive(&mut batch, adjust(-10, None)).unwrap();
        assert_eq!(batch.available_quantity(), 0);
        assert_eq!(batch.status(), BatchStatus::Reserved);

        let err = drive(&mut batch, adjust(-1, None)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn adjust_with_out_of_range_delta_is_rejected() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let err = drive(
            &mut batch,
            BatchCommand::AdjustAvailability(AdjustAvailability {
                industry_id: ind,
                batch_id: bid,
                target_status: None,
                from_status: None,
                quantity_delta: i64::MAX,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(batch.available_quantity(), 10);
    }

    #[test]
    fn adjust_rejects_stale_status_precondition() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let err = drive(
            &mut batch,
            BatchCommand::AdjustAvailability(AdjustAvailability {
                industry_id: ind,
                batch_id: bid,
                target_status: None,
                from_status: Some(BatchStatus::Reserved),
                quantity_delta: -1,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn archive_is_blocked_while_reservations_are_active() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 1);
        drive(&mut batch, cmd).unwrap();

        let archive = BatchCommand::Archive(ArchiveBatch {
            industry_id: ind,
            batch_id: bid,
            occurred_at: now(),
        });
        let err = drive(&mut batch, archive.clone()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));

        drive(
            &mut batch,
            BatchCommand::CancelReservation(CancelReservation {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
        drive(&mut batch, archive).unwrap();
        assert_eq!(batch.status(), BatchStatus::Archived);
    }

    #[test]
    fn restore_returns_to_quantity_derived_status() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        drive(
            &mut batch,
            BatchCommand::Archive(ArchiveBatch {
                industry_id: ind,
                batch_id: bid,
                occurred_at: now(),
            }),
        )
        .unwrap();

        drive(
            &mut batch,
            BatchCommand::Restore(RestoreBatch {
                industry_id: ind,
                batch_id: bid,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(batch.status(), BatchStatus::Available);
    }

    #[test]
    fn delete_sale_does_not_restore_quantity() {
        let ind = industry();
        let mut batch = created_batch(ind, 5);
        let bid = batch.id_typed();
        let (res_id, cmd) = reserve_cmd(&batch, UserId::new(), 2);
        drive(&mut batch, cmd).unwrap();

        let sale_id = SaleId::new();
        drive(
            &mut batch,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id: res_id,
                sale_id,
                confirmed_by: UserId::new(),
                terms: terms(),
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(batch.total_quantity(), 3);

        drive(
            &mut batch,
            BatchCommand::DeleteSale(DeleteSale {
                industry_id: ind,
                batch_id: bid,
                sale_id,
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert!(batch.sale(&sale_id).is_none());
        // Undo is an accounting correction: the units stay gone.
        assert_eq!(batch.total_quantity(), 3);
        assert_eq!(batch.available_quantity(), 3);
    }

    #[test]
    fn update_pricing_edits_terms_without_touching_quantities() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        drive(
            &mut batch,
            BatchCommand::UpdatePricing(UpdatePricing {
                industry_id: ind,
                batch_id: bid,
                unit_price: 42_000,
                unit: AreaUnit::SquareFoot,
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert_eq!(batch.unit_price(), 42_000);
        assert_eq!(batch.unit(), AreaUnit::SquareFoot);
        assert_eq!(batch.total_quantity(), 10);
        assert_eq!(batch.available_quantity(), 10);
    }

    #[test]
    fn update_pricing_rejects_a_zero_unit_price() {
        let ind = industry();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();
        let err = drive(
            &mut batch,
            BatchCommand::UpdatePricing(UpdatePricing {
                industry_id: ind,
                batch_id: bid,
                unit_price: 0,
                unit: AreaUnit::SquareMeter,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(batch.unit_price(), 25_000);
    }

    #[test]
    fn full_reservation_lifecycle_scenario() {
        let ind = industry();
        let user_a = UserId::new();
        let user_b = UserId::new();
        let mut batch = created_batch(ind, 10);
        let bid = batch.id_typed();

        // userA holds the whole batch.
        let (r1, cmd) = reserve_cmd(&batch, user_a, 10);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.available_quantity(), 0);
        assert_eq!(batch.status(), BatchStatus::Reserved);

        // userB is squeezed out.
        let (_, cmd) = reserve_cmd(&batch, user_b, 1);
        assert!(matches!(
            drive(&mut batch, cmd),
            Err(DomainError::OutOfStock(_))
        ));

        // userA walks away.
        drive(
            &mut batch,
            BatchCommand::CancelReservation(CancelReservation {
                industry_id: ind,
                batch_id: bid,
                reservation_id: r1,
                occurred_at: now(),
            }),
        )
        .unwrap();
        assert_eq!(batch.available_quantity(), 10);
        assert_eq!(batch.status(), BatchStatus::Available);

        // userB takes four and converts them.
        let (r2, cmd) = reserve_cmd(&batch, user_b, 4);
        drive(&mut batch, cmd).unwrap();
        assert_eq!(batch.available_quantity(), 6);

        drive(
            &mut batch,
            BatchCommand::ConfirmSale(ConfirmSale {
                industry_id: ind,
                batch_id: bid,
                reservation_id: r2,
                sale_id: SaleId::new(),
                confirmed_by: user_b,
                terms: terms(),
                occurred_at: now(),
            }),
        )
        .unwrap();

        assert_eq!(batch.total_quantity(), 6);
        assert_eq!(batch.available_quantity(), 6);
        assert_eq!(
            batch.reservation(&r2).unwrap().status,
            ReservationStatus::Confirmed
        );
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let ind = industry();
        let batch = created_batch(ind, 10);
        let (_, cmd) = reserve_cmd(&batch, UserId::new(), 3);

        let events1 = batch.handle(&cmd).unwrap();
        let events2 = batch.handle(&cmd).unwrap();

        assert_eq!(events1, events2);
        assert_eq!(batch.available_quantity(), 10);
        assert_eq!(batch.version(), 1);
    }
}

#[cfg(test)]
mod conservation_props {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Reserve { quantity: i64 },
        Cancel { pick: usize },
        Confirm { pick: usize },
        Expire { pick: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..6).prop_map(|quantity| Op::Reserve { quantity }),
            (0usize..8).prop_map(|pick| Op::Cancel { pick }),
            (0usize..8).prop_map(|pick| Op::Confirm { pick }),
            (0usize..8).prop_map(|pick| Op::Expire { pick }),
        ]
    }

    proptest! {
        /// Conservation: available + Σ(active holds) == total after every
        /// committed event, and no interleaving can oversell the batch.
        #[test]
        fn availability_is_conserved(ops in proptest::collection::vec(op_strategy(), 1..40)) {
            let industry_id = IndustryId::new();
            let id = BatchId::new(AggregateId::new());
            let start = Utc::now();
            let ttl = Duration::hours(24);

            let mut batch = Batch::empty(id);
            let events = batch
                .handle(&BatchCommand::Create(CreateBatch {
                    industry_id,
                    batch_id: id,
                    product_id: ProductId::new(AggregateId::new()),
                    total_quantity: 10,
                    unit_price: 1_000,
                    unit: AreaUnit::SquareMeter,
                    occurred_at: start,
                }))
                .unwrap();
            for e in &events {
                batch.apply(e);
            }

            let mut issued: Vec<ReservationId> = Vec::new();

            for op in ops {
                let cmd = match op {
                    Op::Reserve { quantity } => {
                        let reservation_id = ReservationId::new();
                        issued.push(reservation_id);
                        BatchCommand::Reserve(Reserve {
                            industry_id,
                            batch_id: id,
                            reservation_id,
                            owner_id: UserId::new(),
                            quantity,
                            expires_at: start + ttl,
                            occurred_at: start,
                        })
                    }
                    Op::Cancel { pick } if !issued.is_empty() => {
                        BatchCommand::CancelReservation(CancelReservation {
                            industry_id,
                            batch_id: id,
                            reservation_id: issued[pick % issued.len()],
                            occurred_at: start,
                        })
                    }
                    Op::Confirm { pick } if !issued.is_empty() => {
                        BatchCommand::ConfirmSale(ConfirmSale {
                            industry_id,
                            batch_id: id,
                            reservation_id: issued[pick % issued.len()],
                            sale_id: SaleId::new(),
                            confirmed_by: UserId::new(),
                            terms: SaleTerms { gross_value: 10_000, commission_rate_bps: 500 },
                            occurred_at: start,
                        })
                    }
                    Op::Expire { pick } if !issued.is_empty() => {
                        BatchCommand::ExpireReservation(ExpireReservation {
                            industry_id,
                            batch_id: id,
                            reservation_id: issued[pick % issued.len()],
                            occurred_at: start + ttl + Duration::hours(1),
                        })
                    }
                    _ => continue,
                };

                // Rejected commands must leave no partial state; accepted
                // ones must uphold the conservation invariant.
                if let Ok(events) = batch.handle(&cmd) {
                    for e in &events {
                        batch.apply(e);
                    }
                }

                prop_assert!(batch.available_quantity() >= 0);
                prop_assert!(batch.available_quantity() <= batch.total_quantity());
                prop_assert_eq!(
                    batch.available_quantity() + batch.active_held_quantity(),
                    batch.total_quantity()
                );
            }
        }
    }
}
