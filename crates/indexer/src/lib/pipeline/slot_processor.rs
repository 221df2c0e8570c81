use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;

use crate::client::beacon::BeaconBlock;
use crate::controllers::{Controllers, Error};

use super::retry_stage;

/// States of one slot's journey. A missed slot short-circuits from block
/// fetch straight to completion marking; it has no data but must still be
/// marked done.
enum SlotState {
    GettingSlot,
    WaitingForSlotToStart,
    FetchingBeaconBlock,
    ProcessingSlot(Box<BeaconBlock>),
    MarkingSlotCompleted,
    Completed,
}

/// Drives a single slot through its state machine. The processing state
/// fans out into parallel fetch branches; every branch but attestations
/// retries itself on failure, attestation failures are fatal for the slot
/// and surface to the orchestrator.
pub struct SlotProcessor {
    slot: u64,
    controllers: Arc<Controllers>,
    time: BeaconTime,
}

impl SlotProcessor {
    pub fn new(slot: u64, controllers: Arc<Controllers>, time: BeaconTime) -> Self {
        Self {
            slot,
            controllers,
            time,
        }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let slot = self.slot;
        let mut state = SlotState::GettingSlot;
        loop {
            state = match state {
                SlotState::GettingSlot => {
                    let row = self.controllers.slots.get_slot(slot).await?;
                    if row.processed {
                        tracing::debug!(slot, "Slot already processed");
                        SlotState::Completed
                    } else {
                        SlotState::WaitingForSlotToStart
                    }
                }
                SlotState::WaitingForSlotToStart => {
                    self.time.wait_until_slot_start(slot).await;
                    SlotState::FetchingBeaconBlock
                }
                SlotState::FetchingBeaconBlock => {
                    let block = retry_stage("fetch_block", || {
                        self.controllers.slots.fetch_block(slot)
                    })
                    .await;
                    match block {
                        None => {
                            tracing::info!(slot, "Slot missed, no block to process");
                            SlotState::MarkingSlotCompleted
                        }
                        Some(block) => SlotState::ProcessingSlot(Box::new(block)),
                    }
                }
                SlotState::ProcessingSlot(block) => {
                    self.process_block(&block).await?;
                    SlotState::MarkingSlotCompleted
                }
                SlotState::MarkingSlotCompleted => {
                    self.controllers.slots.mark_slot_processed(slot).await?;
                    tracing::info!(slot, "Slot processed");
                    SlotState::Completed
                }
                SlotState::Completed => return Ok(()),
            };
        }
    }

    async fn process_block(&self, block: &BeaconBlock) -> Result<(), Error> {
        let slots = &self.controllers.slots;
        let row = slots.get_slot(self.slot).await?;

        let attestations = slots.process_attestations(&row, block);
        let consensus = retry_stage("consensus_rewards", || slots.process_consensus_rewards(&row));
        let sync = retry_stage("sync_rewards", || slots.process_sync_rewards(&row));
        let execution = retry_stage("execution_rewards", || {
            slots.process_execution_rewards(&row, block)
        });
        let withdrawals = retry_stage("ep_withdrawals", || slots.process_withdrawals(&row, block));
        let deposits = retry_stage("deposits", || slots.process_deposits(&row, block));
        let exits = retry_stage("voluntary_exits", || {
            slots.process_voluntary_exits(&row, block)
        });
        let er_deposits = retry_stage("er_deposits", || slots.process_er_deposits(&row, block));
        let er_withdrawals = retry_stage("er_withdrawals", || {
            slots.process_er_withdrawals(&row, block)
        });
        let er_consolidations = retry_stage("er_consolidations", || {
            slots.process_er_consolidations(&row, block)
        });

        let (attestations, ..) = tokio::join!(
            attestations,
            consensus,
            sync,
            execution,
            withdrawals,
            deposits,
            exits,
            er_deposits,
            er_withdrawals,
            er_consolidations,
        );
        attestations
    }
}
