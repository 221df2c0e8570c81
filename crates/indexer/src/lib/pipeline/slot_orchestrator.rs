use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;

use crate::controllers::{Controllers, Error};
use crate::prometheus_metrics::Metrics;
use crate::storage::Store;

use super::slot_processor::SlotProcessor;

/// Advances the slots of one epoch strictly in order: one range query finds
/// the next unprocessed slot, one processor runs at a time.
pub struct SlotOrchestrator {
    controllers: Arc<Controllers>,
    store: Arc<Store>,
    time: BeaconTime,
    metrics: Arc<Metrics>,
}

impl SlotOrchestrator {
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

    pub async fn run(&self, epoch: u64) -> Result<(), Error> {
        let from = self
            .time
            .epoch_start_slot(epoch)
            .max(self.time.lookback_slot());
        let to = self.time.epoch_end_slot(epoch);

        loop {
            let cursor = self.store.next_unprocessed_slot(from, to).await?;
            match cursor.next_slot_to_process {
                None => {
                    tracing::info!(epoch, "All slots of epoch processed");
                    return Ok(());
                }
                Some(slot) => {
                    let processor =
                        SlotProcessor::new(slot, Arc::clone(&self.controllers), self.time.clone());
                    processor.run().await?;
                    self.metrics.pipeline.slots_processed.inc();
                }
            }
        }
    }
}
