use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use beaconwatch_shared::beacon_time::BeaconTime;

use crate::controllers::Controllers;
use crate::prometheus_metrics::Metrics;
use crate::storage::{Error as StorageError, Store};

use super::epoch_processor::EpochProcessor;

/// Keeps a bounded window of epoch rows ahead of the processor. Rows are
/// only ever appended consecutively; `create_epochs` validates that.
pub struct EpochCreator {
    store: Arc<Store>,
    time: BeaconTime,
    max_unprocessed: u64,
}

impl EpochCreator {
    pub fn new(store: Arc<Store>, time: BeaconTime, max_unprocessed: u64) -> Self {
        Self {
            store,
            time,
            max_unprocessed,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let tick = Duration::from_millis(self.time.slot_duration_ms());
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(error) = self.tick().await {
                tracing::error!("Epoch creator tick failed: {error}");
            }
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Epoch creator stopped");
    }

    async fn tick(&self) -> Result<(), StorageError> {
        let unprocessed = self.store.count_unprocessed_epochs().await? as u64;
        if unprocessed >= self.max_unprocessed {
            return Ok(());
        }
        let baseline = self.time.lookback_epoch();
        let next = self
            .store
            .max_epoch()
            .await?
            .map(|max| max + 1)
            .unwrap_or(baseline);
        let count = self.max_unprocessed - unprocessed;
        let epochs: Vec<u64> = (next..next + count).collect();
        self.store.create_epochs(&epochs, baseline).await?;
        tracing::info!(from = next, count, "Created epoch rows");
        Ok(())
    }
}

/// Polls for the earliest unprocessed epoch and runs one processor at a
/// time, so epochs complete in strictly increasing order.
pub struct EpochOrchestrator {
    controllers: Arc<Controllers>,
    store: Arc<Store>,
    time: BeaconTime,
    metrics: Arc<Metrics>,
}

impl EpochOrchestrator {
    pub fn new(
        controllers: Arc<Controllers>,
        store: Arc<Store>,
        time: BeaconTime,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            controllers,
            store,
            time,
            metrics,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let idle = Duration::from_millis(self.time.slot_duration_ms() / 3);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.store.get_min_epoch_to_process().await {
                Ok(Some(epoch)) => {
                    self.metrics.pipeline.current_epoch.set(epoch as i64);
                    let processor = EpochProcessor::new(
                        epoch,
                        Arc::clone(&self.controllers),
                        Arc::clone(&self.store),
                        self.time.clone(),
                        Arc::clone(&self.metrics),
                    );
                    match processor.run().await {
                        Ok(()) => {
                            self.metrics.pipeline.epochs_processed.inc();
                        }
                        Err(error) => {
                            tracing::error!(epoch, "Epoch processor failed: {error:?}");
                            tokio::select! {
                                _ = tokio::time::sleep(idle) => {}
                                _ = shutdown.changed() => {}
                            }
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(error) => {
                    tracing::error!("Failed to query next epoch: {error}");
                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        tracing::info!("Epoch orchestrator stopped");
    }
}
