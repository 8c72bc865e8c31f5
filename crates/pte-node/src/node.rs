//! PlayToEarn accrual node
//!
//! Owns the ledger, the wallet registry and the accrual scheduler. Startup
//! loads both files; a held lock marker or an unreadable file stops it before
//! any timer exists. Shutdown stops the background tasks and performs a
//! final flush.

use crate::accrual::{AccrualConfig, AccrualEvent, AccrualScheduler};
use crate::commands::{BalanceReport, CommandError};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::roster::{AfkMonitor, Roster};

use parking_lot::{Mutex, RwLock};
use pte_core::{
    format_amount, Address, EarningStatus, LedgerStore, ParticipantId, WalletBindings,
    WalletRegistry,
};
use pte_storage::{PersistenceGateway, StorageError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Node state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Files loaded, background tasks not started
    Starting,
    /// Scheduler and binding writer running
    Running,
    /// Shutting down
    Stopping,
    /// Final flush done
    Stopped,
}

/// PlayToEarn accrual node
pub struct PteNode {
    config: NodeConfig,
    state: Arc<RwLock<NodeState>>,
    gateway: PersistenceGateway,
    ledger: Arc<Mutex<LedgerStore>>,
    wallets: Arc<RwLock<WalletRegistry>>,
    afk: Arc<dyn AfkMonitor>,
    scheduler: AccrualScheduler,
    /// Latest binding snapshot, picked up by the write-back task
    bindings_tx: watch::Sender<WalletBindings>,
    bindings_rx: Mutex<Option<watch::Receiver<WalletBindings>>>,
}

impl PteNode {
    /// Validate the configuration and load the ledger and wallet bindings
    pub fn start(
        config: NodeConfig,
        roster: Arc<dyn Roster>,
        afk: Arc<dyn AfkMonitor>,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        let gateway = PersistenceGateway::new(config.storage_paths());
        gateway.ensure_dirs()?;

        let ledger = match gateway.load_ledger_locked() {
            Ok(Some(snapshot)) => {
                info!(
                    "Loaded {} ledger entries from {}",
                    snapshot.len(),
                    gateway.paths().ledger.display()
                );
                LedgerStore::from_snapshot(snapshot)
            }
            Ok(None) => {
                warn!(
                    "Ledger {} not found, starting empty",
                    gateway.paths().ledger.display()
                );
                LedgerStore::new()
            }
            Err(e) => return Err(fatal("Cannot load the ledger", e)),
        };

        let wallets = match gateway.load_bindings() {
            Ok(Some(bindings)) => {
                info!(
                    "Loaded {} wallet bindings from {}",
                    bindings.len(),
                    gateway.paths().wallets.display()
                );
                WalletRegistry::from_snapshot(bindings)
            }
            Ok(None) => {
                warn!(
                    "Wallet bindings {} not found, starting empty",
                    gateway.paths().wallets.display()
                );
                WalletRegistry::new()
            }
            Err(e) => return Err(fatal("Cannot load the wallet bindings", e)),
        };

        let ledger = Arc::new(Mutex::new(ledger));
        let (bindings_tx, bindings_rx) = watch::channel(wallets.snapshot());
        let wallets = Arc::new(RwLock::new(wallets));

        let scheduler = AccrualScheduler::new(
            AccrualConfig {
                tick_interval_ms: config.accrual.millis_per_tick,
                coins_per_second: config.accrual.coins_per_second,
                extended_log: config.logging.extended,
            },
            gateway.clone(),
            ledger.clone(),
            wallets.clone(),
            roster,
            afk.clone(),
        );

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(NodeState::Starting)),
            gateway,
            ledger,
            wallets,
            afk,
            scheduler,
            bindings_tx,
            bindings_rx: Mutex::new(Some(bindings_rx)),
        })
    }

    /// Get current state
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &AccrualScheduler {
        &self.scheduler
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Bind `participant` to an address.
    ///
    /// The registry changes synchronously; the file write happens on the
    /// write-back task, or at the final flush if the node is not running.
    pub fn bind(
        &self,
        participant: &ParticipantId,
        address: Option<&str>,
    ) -> Result<Address, CommandError> {
        let (address, snapshot) = {
            let mut wallets = self.wallets.write();
            let address = wallets.set_address(participant, address)?;
            (address, wallets.snapshot())
        };
        self.bindings_tx.send_replace(snapshot);
        info!("{} set wallet {}", participant, address);
        Ok(address)
    }

    /// Look up the balance of the address `participant` is bound to
    pub fn balance(&self, participant: &ParticipantId) -> Result<BalanceReport, CommandError> {
        let address = self
            .wallets
            .read()
            .get_address(participant)
            .cloned()
            .ok_or(CommandError::NoWalletBound)?;
        let balance = self
            .ledger
            .lock()
            .get(&address)
            .ok_or(CommandError::NoBalanceRecorded)?;

        let status = self.scheduler.earning_status(participant).unwrap_or_else(|| {
            if self.afk.is_exempt(participant) {
                EarningStatus::NotEarning
            } else {
                EarningStatus::Earning
            }
        });

        Ok(BalanceReport {
            address,
            balance,
            status,
        })
    }

    /// Run the background tasks until `shutdown` completes, then flush.
    ///
    /// Meant to be called once; a second call starts no binding writer.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        *self.state.write() = NodeState::Running;

        let mut event_handle = None;
        let accrual = if self.config.accrual.earn_by_playing {
            event_handle = Some(tokio::spawn(log_accrual_events(self.scheduler.subscribe())));
            let (tx, rx) = mpsc::channel(1);
            let handle = tokio::spawn(self.scheduler.clone().run(rx));
            Some((tx, handle))
        } else {
            info!("Earning by playing is disabled, the accrual scheduler stays off");
            None
        };

        let receiver = self.bindings_rx.lock().take();
        let writer = receiver.map(|rx| {
            let (tx, shutdown_rx) = mpsc::channel(1);
            let handle = tokio::spawn(write_bindings(self.gateway.clone(), rx, shutdown_rx));
            (tx, handle)
        });

        info!(
            "PTE node running (ledger: {}, bindings: {})",
            self.gateway.paths().ledger.display(),
            self.gateway.paths().wallets.display()
        );

        shutdown.await;

        *self.state.write() = NodeState::Stopping;
        info!("Shutting down...");

        stop_task("Accrual scheduler", accrual).await;
        stop_task("Wallet binding writer", writer).await;
        if let Some(handle) = event_handle {
            handle.abort();
        }

        let flushed = self.flush();
        *self.state.write() = NodeState::Stopped;
        info!("Node stopped");
        flushed
    }

    /// Write the in-memory ledger and bindings.
    ///
    /// The ledger write is skipped while the lock marker is held or a resync
    /// is pending, since the file on disk is newer in both cases.
    pub fn flush(&self) -> Result<(), NodeError> {
        let (ledger, total) = {
            let store = self.ledger.lock();
            (store.snapshot(), store.total())
        };
        if self.gateway.resync_pending() {
            warn!("Resync requested, leaving the ledger file to the external writer");
        } else {
            match self.gateway.save_ledger(&ledger) {
                Ok(()) => info!(
                    "Saved {} ledger entries, {} PTE in total",
                    ledger.len(),
                    total.map_or_else(|| "overflowing".to_string(), format_amount)
                ),
                Err(e) if e.is_contention() => warn!("Final ledger write skipped: {}", e),
                Err(e) => return Err(e.into()),
            }
        }

        let bindings = self.wallets.read().snapshot();
        self.gateway.save_bindings(&bindings)?;
        debug!("Saved {} wallet bindings", bindings.len());
        Ok(())
    }
}

fn fatal(context: &str, err: StorageError) -> NodeError {
    error!("{}: {}", context, err);
    NodeError::FatalStartup(format!("{}: {}", context, err))
}

async fn stop_task(name: &str, task: Option<(mpsc::Sender<()>, JoinHandle<()>)>) {
    let Some((tx, handle)) = task else {
        return;
    };
    let _ = tx.send(()).await;
    if let Err(e) = handle.await {
        error!("{} failed: {}", name, e);
    }
}

async fn log_accrual_events(mut event_rx: broadcast::Receiver<AccrualEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(AccrualEvent::TickCompleted(report)) => debug!(
                "Tick at {}: {} earning, {} not earning, {} PTE each over {}s ({:?})",
                report.now,
                report.credited,
                report.not_earning,
                format_amount(report.credit_amount),
                report.seconds_elapsed,
                report.persisted
            ),
            Ok(AccrualEvent::TickSkipped) => {}
            Ok(AccrualEvent::TickFailed { error }) => {
                debug!("Tick failed, retrying next interval: {}", error)
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Accrual event handler lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Persist binding snapshots as they change. Bursts coalesce into one write.
async fn write_bindings(
    gateway: PersistenceGateway,
    mut bindings_rx: watch::Receiver<WalletBindings>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            changed = bindings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = bindings_rx.borrow_and_update().clone();
                let gateway = gateway.clone();
                match tokio::task::spawn_blocking(move || gateway.save_bindings(&snapshot)).await {
                    Ok(Ok(())) => debug!("Wallet bindings written"),
                    Ok(Err(e)) => error!("Cannot write wallet bindings: {}", e),
                    Err(e) => error!("Wallet binding write failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{AfkSet, OnlineRoster};
    use pte_core::ONE_PTE;
    use pte_storage::LockGuard;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const ADDR: &str = "0x00000000000000000000000000000000000000aa";

    fn config(dir: &TempDir) -> NodeConfig {
        let mut config = NodeConfig::with_data_dir(dir.path());
        config.accrual.coins_per_second = ONE_PTE;
        config
    }

    fn start(config: NodeConfig) -> (PteNode, Arc<OnlineRoster>, Arc<AfkSet>) {
        let roster = Arc::new(OnlineRoster::new());
        let afk = Arc::new(AfkSet::new());
        let node = PteNode::start(config, roster.clone(), afk.clone()).unwrap();
        (node, roster, afk)
    }

    #[test]
    fn test_start_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        let (node, _, _) = start(config(&dir));
        assert_eq!(node.state(), NodeState::Starting);
        assert!(dir.path().join("Wallets").is_dir());
    }

    #[test]
    fn test_start_refused_while_locked() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = config.storage_paths();
        fs::create_dir_all(paths.lock_marker.parent().unwrap()).unwrap();
        let _held = LockGuard::acquire(&paths.lock_marker).unwrap();

        let result = PteNode::start(config, Arc::new(OnlineRoster::new()), Arc::new(AfkSet::new()));
        assert!(matches!(result, Err(NodeError::FatalStartup(_))));
    }

    #[test]
    fn test_start_refused_on_corrupt_bindings() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = config.storage_paths();
        fs::create_dir_all(paths.wallets.parent().unwrap()).unwrap();
        fs::write(&paths.wallets, "[1, 2").unwrap();

        let result = PteNode::start(config, Arc::new(OnlineRoster::new()), Arc::new(AfkSet::new()));
        assert!(matches!(result, Err(NodeError::FatalStartup(_))));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.accrual.millis_per_tick = 0;

        let result = PteNode::start(config, Arc::new(OnlineRoster::new()), Arc::new(AfkSet::new()));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_bind_errors_leave_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let (node, _, _) = start(config(&dir));
        let alice = ParticipantId::from("alice");

        assert_eq!(node.bind(&alice, None), Err(CommandError::NoAddressProvided));
        assert_eq!(
            node.bind(&alice, Some("0x1234")),
            Err(CommandError::InvalidAddress("0x1234".into()))
        );
        assert_eq!(node.balance(&alice), Err(CommandError::NoWalletBound));
    }

    #[test]
    fn test_balance_requires_ledger_entry() {
        let dir = TempDir::new().unwrap();
        let (node, _, _) = start(config(&dir));
        let alice = ParticipantId::from("alice");

        node.bind(&alice, Some(ADDR)).unwrap();
        assert_eq!(node.balance(&alice), Err(CommandError::NoBalanceRecorded));
    }

    #[test]
    fn test_balance_after_tick() {
        let dir = TempDir::new().unwrap();
        let (node, roster, afk) = start(config(&dir));
        let alice = ParticipantId::from("alice");

        node.bind(&alice, Some(ADDR)).unwrap();
        roster.join(alice.clone());
        node.scheduler().start_clock(1_000);
        node.scheduler().tick_at(1_010);

        let report = node.balance(&alice).unwrap();
        assert_eq!(report.formatted(), "10.00");
        assert_eq!(report.status, EarningStatus::Earning);

        afk.mark_afk(alice.clone());
        node.scheduler().tick_at(1_020);
        let report = node.balance(&alice).unwrap();
        assert_eq!(report.balance, 10 * ONE_PTE);
        assert_eq!(report.status, EarningStatus::NotEarning);
    }

    #[test]
    fn test_flush_skips_ledger_when_resync_pending() {
        let dir = TempDir::new().unwrap();
        let (node, roster, _) = start(config(&dir));
        let alice = ParticipantId::from("alice");
        node.bind(&alice, Some(ADDR)).unwrap();
        roster.join(alice);

        node.gateway().request_resync().unwrap();
        node.flush().unwrap();

        assert!(!node.gateway().paths().ledger.exists());
        let bindings = node.gateway().load_bindings().unwrap().unwrap();
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_run_writes_bindings_and_flushes() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.accrual.millis_per_tick = 50;
        let (node, _, _) = start(config);
        let node = Arc::new(node);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = {
            let node = node.clone();
            tokio::spawn(async move {
                node.run(async {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        node.bind(&"alice".into(), Some(ADDR)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let bindings = node.gateway().load_bindings().unwrap().unwrap();
        assert_eq!(bindings.len(), 1);

        stop_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(node.gateway().paths().ledger.exists());
        assert!(!node.gateway().is_locked());
    }

    #[tokio::test]
    async fn test_run_without_earning_starts_no_scheduler() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.accrual.millis_per_tick = 10;
        config.accrual.earn_by_playing = false;
        let (node, roster, _) = start(config);
        node.bind(&"alice".into(), Some(ADDR)).unwrap();
        roster.join("alice".into());

        node.run(tokio::time::sleep(Duration::from_millis(60)))
            .await
            .unwrap();

        assert_eq!(node.scheduler().stats().ticks_completed, 0);
        assert_eq!(
            node.balance(&"alice".into()),
            Err(CommandError::NoBalanceRecorded)
        );
    }
}
