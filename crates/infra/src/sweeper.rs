//! Expiration sweeper.
//!
//! Overdue reservations are already unusable (confirm rejects them), but
//! their quantity stays held until someone makes the release durable. The
//! sweeper is that someone: it scans the reservation ledger for overdue
//! holds and drives an expire command through the engine for each one.
//!
//! Expiry is idempotent. A reservation cancelled or confirmed between the
//! scan and the sweep resolves to `AlreadyResolved`, which the sweeper
//! treats as already handled.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use slabmarket_batches::ReservationId;
use slabmarket_core::DomainError;
use slabmarket_events::{EventBus, EventEnvelope};

use crate::engine::{AvailabilityEngine, EngineError};
use crate::event_store::EventStore;
use crate::projections::{ReservationLedgerProjection, ReservationRow};
use crate::read_model::IndustryStore;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to scan for overdue reservations.
    pub interval: Duration,
    /// Name for logging and the thread.
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            name: "expiration-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepStats {
    pub sweeps_run: u64,
    pub reservations_expired: u64,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweepStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Background expiration sweeper over the reservation ledger.
pub struct ExpirationSweeper<S, B, L>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: IndustryStore<ReservationId, ReservationRow>,
{
    engine: Arc<AvailabilityEngine<S, B>>,
    ledger: Arc<ReservationLedgerProjection<L>>,
}

impl<S, B, L> ExpirationSweeper<S, B, L>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
    L: IndustryStore<ReservationId, ReservationRow> + 'static,
{
    pub fn new(
        engine: Arc<AvailabilityEngine<S, B>>,
        ledger: Arc<ReservationLedgerProjection<L>>,
    ) -> Self {
        Self { engine, ledger }
    }

    /// Run one sweep at `now`. Returns the number of reservations whose
    /// expiry was made durable by this pass.
    pub fn run_once(&self, now: DateTime<Utc>) -> usize {
        let overdue = self.ledger.list_overdue(now);
        let mut expired = 0usize;

        for (industry_id, row) in overdue {
            match self
                .engine
                .expire(industry_id, row.batch_id, row.reservation_id, now)
            {
                Ok(()) => {
                    debug!(
                        reservation_id = %row.reservation_id,
                        batch_id = %row.batch_id,
                        quantity = row.quantity,
                        "reservation expired"
                    );
                    expired += 1;
                }
                // Resolved by a racing cancel/confirm, or the ledger lagged
                // the stream. Nothing left to do.
                Err(EngineError::Domain(DomainError::AlreadyResolved(_)))
                | Err(EngineError::Domain(DomainError::NotFound)) => {}
                Err(e) => {
                    warn!(
                        reservation_id = %row.reservation_id,
                        batch_id = %row.batch_id,
                        error = %e,
                        "failed to expire reservation, will retry next sweep"
                    );
                }
            }
        }

        expired
    }

    /// Spawn the sweeper in a background thread.
    pub fn spawn(self, config: SweeperConfig) -> SweeperHandle
    where
        S: Send + Sync,
        B: Send + Sync,
        L: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let stats_clone = stats.clone();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                sweeper_loop(self, config, shutdown_rx, stats_clone);
            })
            .expect("failed to spawn sweeper thread");

        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

fn sweeper_loop<S, B, L>(
    sweeper: ExpirationSweeper<S, B, L>,
    config: SweeperConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SweepStats>>,
) where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
    L: IndustryStore<ReservationId, ReservationRow> + 'static,
{
    info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "sweeper started");

    loop {
        // Wait out the interval, waking immediately on shutdown.
        match shutdown_rx.recv_timeout(config.interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let expired = sweeper.run_once(Utc::now());

        if let Ok(mut s) = stats.lock() {
            s.sweeps_run += 1;
            s.reservations_expired += expired as u64;
        }

        if expired > 0 {
            info!(sweeper = %config.name, expired, "sweep released overdue reservations");
        }
    }

    info!(sweeper = %config.name, "sweeper stopped");
}
