//! Accrual Scheduler
//!
//! Fires on a fixed interval and credits every online, non-AFK, wallet-bound
//! participant with `coins_per_second * whole seconds elapsed`, then writes
//! the ledger through the persistence gateway.
//!
//! Tick bodies run on the blocking pool. A single-flight flag guards them:
//! a firing that arrives while the previous worker is still busy is dropped,
//! never queued and never run alongside it.
//!
//! The last-tick timestamp only advances once the credit pass has finished.
//! A tick aborted earlier (resync under contention, unreadable ledger) leaves
//! it behind, so the next successful tick credits the whole missed interval.
//! Persistence is not part of that condition: a deferred save keeps the
//! credits in memory and the next save carries them.

use crate::error::AccrualError;
use crate::roster::{AfkMonitor, Roster};
use parking_lot::{Mutex, RwLock};
use pte_core::{
    credit_amount, format_amount, Address, Amount, EarningStatus, Ledger, LedgerStore,
    ParticipantId, WalletRegistry, DEFAULT_COINS_PER_SECOND,
};
use pte_storage::PersistenceGateway;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Accrual scheduler configuration
#[derive(Clone, Debug)]
pub struct AccrualConfig {
    /// Interval between ticks (ms)
    pub tick_interval_ms: u64,
    /// Units credited per whole elapsed second
    pub coins_per_second: Amount,
    /// Log per-participant detail at info level
    pub extended_log: bool,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            coins_per_second: DEFAULT_COINS_PER_SECOND,
            extended_log: false,
        }
    }
}

/// Counters for accrual activity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccrualStats {
    /// Ticks that ran the credit pass
    pub ticks_completed: u64,
    /// Ticks with nobody eligible
    pub ticks_idle: u64,
    /// Firings dropped because a tick was in flight
    pub ticks_skipped_busy: u64,
    /// Ticks aborted by an error
    pub ticks_failed: u64,
    /// Successful ledger writes
    pub saves: u64,
    /// Ledger writes postponed to a later tick
    pub saves_deferred: u64,
    /// Ledger reloads triggered by the resync marker
    pub resyncs: u64,
    /// TickState after the most recent tick
    pub last_tick: Option<i64>,
}

/// What happened to the ledger write at the end of a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    /// Lock marker held by someone else
    DeferredLocked,
    /// External writer raised the resync marker; its edit wins
    DeferredResync,
    Failed(String),
}

/// Summary of a tick that ran the credit pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickReport {
    pub now: i64,
    pub seconds_elapsed: u64,
    /// Amount credited to each earning participant
    pub credit_amount: Amount,
    pub credited: usize,
    pub not_earning: usize,
    pub reloaded: bool,
    pub persisted: PersistOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Dropped by the single-flight guard
    SkippedBusy,
    /// Nobody eligible, TickState moved to `now`, no I/O
    Idle,
    Completed(TickReport),
    /// Aborted before TickState advanced
    Failed(String),
}

/// Events emitted by the scheduler
#[derive(Clone, Debug)]
pub enum AccrualEvent {
    TickCompleted(TickReport),
    TickSkipped,
    TickFailed { error: String },
}

/// Single-flight token, clears the busy flag on drop
struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl FlightGuard {
    fn try_acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy: busy.clone() })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// The accrual engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct AccrualScheduler {
    config: AccrualConfig,
    gateway: PersistenceGateway,
    ledger: Arc<Mutex<LedgerStore>>,
    wallets: Arc<RwLock<WalletRegistry>>,
    roster: Arc<dyn Roster>,
    afk: Arc<dyn AfkMonitor>,
    statuses: Arc<RwLock<HashMap<ParticipantId, EarningStatus>>>,
    /// TickState: unix seconds of the last completed credit pass
    last_tick: Arc<Mutex<i64>>,
    busy: Arc<AtomicBool>,
    stats: Arc<RwLock<AccrualStats>>,
    event_tx: broadcast::Sender<AccrualEvent>,
}

impl AccrualScheduler {
    pub fn new(
        config: AccrualConfig,
        gateway: PersistenceGateway,
        ledger: Arc<Mutex<LedgerStore>>,
        wallets: Arc<RwLock<WalletRegistry>>,
        roster: Arc<dyn Roster>,
        afk: Arc<dyn AfkMonitor>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            config,
            gateway,
            ledger,
            wallets,
            roster,
            afk,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            last_tick: Arc::new(Mutex::new(chrono::Utc::now().timestamp())),
            busy: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(AccrualStats::default())),
            event_tx,
        }
    }

    pub fn config(&self) -> &AccrualConfig {
        &self.config
    }

    /// Get event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<AccrualEvent> {
        self.event_tx.subscribe()
    }

    pub fn stats(&self) -> AccrualStats {
        self.stats.read().clone()
    }

    /// Status recorded for a participant on the last tick they were seen
    pub fn earning_status(&self, participant: &ParticipantId) -> Option<EarningStatus> {
        self.statuses.read().get(participant).copied()
    }

    /// Current TickState
    pub fn tick_state(&self) -> i64 {
        *self.last_tick.lock()
    }

    /// Reset TickState, done once when the scheduler starts
    pub fn start_clock(&self, now: i64) {
        *self.last_tick.lock() = now;
    }

    /// Whether a tick is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run the timer loop until `shutdown_rx` fires or closes.
    ///
    /// Waits for an in-flight tick to finish before returning.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            "Starting accrual (interval: {}ms, rate: {} PTE/s)",
            self.config.tick_interval_ms,
            format_amount(self.config.coins_per_second)
        );

        self.start_clock(chrono::Utc::now().timestamp());

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        interval.tick().await;

        let mut in_flight: Option<JoinHandle<TickOutcome>> = None;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Accrual scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Some(handle) = self.dispatch() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                error!("Accrual worker failed: {}", e);
            }
        }
    }

    /// Hand one tick to the blocking pool, unless one is already in flight
    pub fn dispatch(&self) -> Option<JoinHandle<TickOutcome>> {
        let Some(guard) = FlightGuard::try_acquire(&self.busy) else {
            self.skip_busy();
            return None;
        };

        let scheduler = self.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            scheduler.tick_in_flight(chrono::Utc::now().timestamp())
        }))
    }

    /// Run one tick synchronously at `now` (unix seconds)
    pub fn tick_at(&self, now: i64) -> TickOutcome {
        let Some(_guard) = FlightGuard::try_acquire(&self.busy) else {
            return self.skip_busy();
        };
        self.tick_in_flight(now)
    }

    fn skip_busy(&self) -> TickOutcome {
        self.stats.write().ticks_skipped_busy += 1;
        debug!("Previous accrual tick still running, dropping this one");
        let _ = self.event_tx.send(AccrualEvent::TickSkipped);
        TickOutcome::SkippedBusy
    }

    fn tick_in_flight(&self, now: i64) -> TickOutcome {
        match self.run_tick(now) {
            Ok(outcome) => {
                if let TickOutcome::Completed(report) = &outcome {
                    let _ = self.event_tx.send(AccrualEvent::TickCompleted(report.clone()));
                }
                outcome
            }
            Err(e) => {
                warn!("Accrual tick aborted, the interval carries over: {}", e);
                self.stats.write().ticks_failed += 1;
                let _ = self.event_tx.send(AccrualEvent::TickFailed {
                    error: e.to_string(),
                });
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    fn run_tick(&self, now: i64) -> Result<TickOutcome, AccrualError> {
        let online = self.roster.online();
        let exempt = self.afk.exempt();

        let mut eligible: Vec<(ParticipantId, Address)> = Vec::new();
        let mut idle: Vec<ParticipantId> = Vec::new();
        {
            let wallets = self.wallets.read();
            for participant in online {
                let Some(address) = wallets.get_address(&participant) else {
                    self.detail(format_args!("{} does not have a wallet set up", participant));
                    continue;
                };
                if exempt.contains(&participant) {
                    self.detail(format_args!("Ignoring {} because they are AFK", participant));
                    idle.push(participant);
                    continue;
                }
                eligible.push((participant, address.clone()));
            }
        }
        self.record_status(&idle, EarningStatus::NotEarning);

        if eligible.is_empty() {
            *self.last_tick.lock() = now;
            let mut stats = self.stats.write();
            stats.ticks_idle += 1;
            stats.last_tick = Some(now);
            self.detail(format_args!("No earning participants online"));
            return Ok(TickOutcome::Idle);
        }

        let last = *self.last_tick.lock();
        let seconds_elapsed = u64::try_from(now.saturating_sub(last)).unwrap_or(0);
        let amount = credit_amount(self.config.coins_per_second, seconds_elapsed)?;

        let reloaded = self.gateway.service_resync()?;
        let was_reloaded = reloaded.is_some();

        let mut earning = Vec::with_capacity(eligible.len());
        let snapshot = {
            let mut ledger = self.ledger.lock();
            if let Some(snapshot) = reloaded {
                ledger.replace_all(snapshot);
            }
            for (participant, address) in eligible {
                match ledger.credit(&address, amount) {
                    Ok(balance) => {
                        self.detail(format_args!(
                            "{} received {} PTE, {} holds {} PTE",
                            participant,
                            format_amount(amount),
                            address,
                            format_amount(balance)
                        ));
                        earning.push(participant);
                    }
                    Err(e) => error!("Cannot credit {}: {}", participant, e),
                }
            }
            ledger.snapshot()
        };
        self.record_status(&earning, EarningStatus::Earning);

        *self.last_tick.lock() = now;

        let persisted = self.persist(&snapshot);

        {
            let mut stats = self.stats.write();
            stats.ticks_completed += 1;
            stats.last_tick = Some(now);
            if was_reloaded {
                stats.resyncs += 1;
            }
            match &persisted {
                PersistOutcome::Saved => stats.saves += 1,
                PersistOutcome::DeferredLocked | PersistOutcome::DeferredResync => {
                    stats.saves_deferred += 1
                }
                PersistOutcome::Failed(_) => {}
            }
        }

        Ok(TickOutcome::Completed(TickReport {
            now,
            seconds_elapsed,
            credit_amount: amount,
            credited: earning.len(),
            not_earning: idle.len(),
            reloaded: was_reloaded,
            persisted,
        }))
    }

    fn persist(&self, snapshot: &Ledger) -> PersistOutcome {
        let path = &self.gateway.paths().ledger;

        if self.gateway.resync_pending() {
            warn!(
                "Cannot write the ledger to {}: a resync was requested",
                path.display()
            );
            return PersistOutcome::DeferredResync;
        }

        match self.gateway.save_ledger(snapshot) {
            Ok(()) => PersistOutcome::Saved,
            Err(e) if e.is_contention() => {
                warn!("Cannot write the ledger to {}: the file is busy", path.display());
                PersistOutcome::DeferredLocked
            }
            Err(e) => {
                error!("Cannot write the ledger: {}", e);
                PersistOutcome::Failed(e.to_string())
            }
        }
    }

    fn record_status(&self, participants: &[ParticipantId], status: EarningStatus) {
        if participants.is_empty() {
            return;
        }
        let mut statuses = self.statuses.write();
        for participant in participants {
            statuses.insert(participant.clone(), status);
        }
    }

    fn detail(&self, args: fmt::Arguments<'_>) {
        if self.config.extended_log {
            info!("{}", args);
        } else {
            debug!("{}", args);
        }
    }
}
