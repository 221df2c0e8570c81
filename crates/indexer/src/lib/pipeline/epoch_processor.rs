use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use beaconwatch_shared::beacon_time::BeaconTime;

use crate::controllers::{Controllers, Error};
use crate::prometheus_metrics::Metrics;
use crate::storage::Store;

use super::retry_stage;
use super::slot_orchestrator::SlotOrchestrator;

/// Stage-completion events raised by child tasks. The processor reacts by
/// starting whatever the event unblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpochEvent {
    EpochStarted,
    CommitteesFetched,
    SyncCommitteesFetched,
    ProposerDutiesFetched,
    BalancesFetched,
    ActivationTracked,
    RewardsFetched,
    SlotsProcessed,
}

#[derive(Debug, Default)]
struct StageProgress {
    committees: bool,
    sync_committees: bool,
    proposer_duties: bool,
    balances: bool,
    activation: bool,
    rewards: bool,
    slots: bool,
}

impl StageProgress {
    fn complete(&self) -> bool {
        self.committees
            && self.sync_committees
            && self.proposer_duties
            && self.balances
            && self.activation
            && self.rewards
            && self.slots
    }
}

/// Event-driven actor coordinating one epoch's stage graph.
///
/// Committees, sync committees and proposer duties start immediately (the
/// epoch is admissible one epoch ahead of its own start). Balances and
/// activation tracking wait for the epoch start slot; the slot orchestrator
/// waits for committees; attestation rewards wait for balances plus the end
/// of the epoch. Only when every branch has reported does the epoch get
/// marked processed.
pub struct EpochProcessor {
    epoch: u64,
    controllers: Arc<Controllers>,
    store: Arc<Store>,
    time: BeaconTime,
    metrics: Arc<Metrics>,
}

impl EpochProcessor {
    pub fn new(
        epoch: u64,
        controllers: Arc<Controllers>,
        store: Arc<Store>,
        time: BeaconTime,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            epoch,
            controllers,
            store,
            time,
            metrics,
        }
    }

    fn spawn_stage<F, Fut>(
        &self,
        tx: &mpsc::Sender<EpochEvent>,
        done: EpochEvent,
        label: &'static str,
        op: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            retry_stage(label, op).await;
            let _ = tx.send(done).await;
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let epoch = self.epoch;
        let row = self
            .store
            .get_epoch(epoch)
            .await?
            .ok_or_else(|| anyhow!("Epoch {epoch} has no row"))?;
        if row.processed {
            tracing::debug!(epoch, "Epoch already processed");
            return Ok(());
        }

        // Admissibility gate: the previous epoch must have started.
        self.time
            .wait_until_slot_start(self.time.epoch_start_slot(epoch.saturating_sub(1)))
            .await;
        tracing::info!(epoch, "Processing epoch");

        let (tx, mut rx) = mpsc::channel::<EpochEvent>(16);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(self.spawn_stage(&tx, EpochEvent::CommitteesFetched, "committees", {
            let controllers = Arc::clone(&self.controllers);
            move || {
                let controllers = Arc::clone(&controllers);
                async move { controllers.epochs.fetch_committees(epoch).await }
            }
        }));
        tasks.push(self.spawn_stage(&tx, EpochEvent::SyncCommitteesFetched, "sync_committees", {
            let controllers = Arc::clone(&self.controllers);
            move || {
                let controllers = Arc::clone(&controllers);
                async move { controllers.epochs.fetch_sync_committees(epoch).await }
            }
        }));
        tasks.push(self.spawn_stage(&tx, EpochEvent::ProposerDutiesFetched, "proposer_duties", {
            let controllers = Arc::clone(&self.controllers);
            move || {
                let controllers = Arc::clone(&controllers);
                async move { controllers.epochs.fetch_proposer_duties(epoch).await }
            }
        }));

        {
            let time = self.time.clone();
            let tx = tx.clone();
            let start_slot = self.time.epoch_start_slot(epoch);
            tasks.push(tokio::spawn(async move {
                time.wait_until_slot_start(start_slot).await;
                let _ = tx.send(EpochEvent::EpochStarted).await;
            }));
        }

        let mut progress = StageProgress::default();
        while !progress.complete() {
            let event = rx
                .recv()
                .await
                .ok_or_else(|| anyhow!("Epoch {epoch} stage channel closed"))?;
            tracing::debug!(epoch, ?event, "Epoch stage event");
            match event {
                EpochEvent::EpochStarted => {
                    tasks.push(self.spawn_stage(&tx, EpochEvent::BalancesFetched, "balances", {
                        let controllers = Arc::clone(&self.controllers);
                        move || {
                            let controllers = Arc::clone(&controllers);
                            async move { controllers.validators.fetch_balances(epoch).await }
                        }
                    }));
                    tasks.push(self.spawn_stage(&tx, EpochEvent::ActivationTracked, "activation", {
                        let controllers = Arc::clone(&self.controllers);
                        move || {
                            let controllers = Arc::clone(&controllers);
                            async move { controllers.validators.track_activations(epoch).await }
                        }
                    }));
                }
                EpochEvent::CommitteesFetched => {
                    progress.committees = true;
                    tasks.push(self.spawn_stage(&tx, EpochEvent::SlotsProcessed, "slots", {
                        let controllers = Arc::clone(&self.controllers);
                        let store = Arc::clone(&self.store);
                        let time = self.time.clone();
                        let metrics = Arc::clone(&self.metrics);
                        move || {
                            let controllers = Arc::clone(&controllers);
                            let store = Arc::clone(&store);
                            let time = time.clone();
                            let metrics = Arc::clone(&metrics);
                            async move {
                                let orchestrator = SlotOrchestrator::new(
                                    Arc::clone(&controllers),
                                    Arc::clone(&store),
                                    time,
                                    metrics,
                                );
                                orchestrator.run(epoch).await?;
                                store.mark_all_slots_processed(epoch).await?;
                                Ok(())
                            }
                        }
                    }));
                }
                EpochEvent::BalancesFetched => {
                    progress.balances = true;
                    tasks.push(self.spawn_stage(&tx, EpochEvent::RewardsFetched, "rewards", {
                        let controllers = Arc::clone(&self.controllers);
                        let time = self.time.clone();
                        move || {
                            let controllers = Arc::clone(&controllers);
                            let time = time.clone();
                            async move {
                                // The beacon API serves attestation rewards
                                // only for ended epochs.
                                time.wait_until_epoch_end(epoch).await;
                                controllers.epochs.fetch_attestation_rewards(epoch).await
                            }
                        }
                    }));
                }
                EpochEvent::SyncCommitteesFetched => progress.sync_committees = true,
                EpochEvent::ProposerDutiesFetched => progress.proposer_duties = true,
                EpochEvent::ActivationTracked => progress.activation = true,
                EpochEvent::RewardsFetched => progress.rewards = true,
                EpochEvent::SlotsProcessed => progress.slots = true,
            }
        }

        retry_stage("mark_processed", || {
            let controllers = Arc::clone(&self.controllers);
            async move { controllers.epochs.mark_processed(epoch).await }
        })
        .await;
        tracing::info!(epoch, "Epoch processed");

        if let Err(error) = self.controllers.epochs.cleanup_committees(epoch).await {
            tracing::warn!(epoch, "Committee cleanup failed: {error}");
        }

        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}
