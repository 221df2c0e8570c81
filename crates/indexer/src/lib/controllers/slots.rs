use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;
use beaconwatch_shared::bits::{bitlist_bits, bitvector_set_indices};

use crate::client::beacon::{Attestation, BeaconBlock, BeaconClient};
use crate::client::execution::ExecutionClient;
use crate::storage::committees::AttestationDelayUpdate;
use crate::storage::events::{
    ConsolidationRequestRow, DepositRow, ExitRow, WithdrawalRequestRow, WithdrawalRow,
    DEPOSIT_SOURCE_BLOCK, DEPOSIT_SOURCE_EXECUTION_REQUEST,
};
use crate::storage::slots::{SlotFlag, SlotRow};
use crate::storage::Store;

use super::Error;

/// Slot-level fetch branches. Every branch takes the slot-row snapshot read
/// at the start of slot processing, no-ops when its flag is already set, and
/// commits its raw rows together with the flag flip.
pub struct SlotsController {
    beacon: Arc<BeaconClient>,
    execution: Arc<ExecutionClient>,
    store: Arc<Store>,
    time: BeaconTime,
}

/// Walks every attestation of a block, consuming the aggregation bitlist
/// committee by committee, and keeps the minimum delay per committee
/// position. `sizes` maps each referenced slot to its ordered committee
/// sizes.
pub(crate) fn decode_attestation_updates(
    attestations: &[&Attestation],
    sizes: &HashMap<u64, Vec<u64>>,
    inclusion_slot: u64,
) -> Result<Vec<AttestationDelayUpdate>, Error> {
    let mut best: HashMap<(u64, u64, u64), i16> = HashMap::new();

    for attestation in attestations {
        let referenced = attestation.data.slot;
        let slot_sizes = sizes
            .get(&referenced)
            .ok_or(Error::MissingCommitteeSize {
                slot: inclusion_slot,
                referenced,
            })?;
        let delay = (inclusion_slot - referenced - 1) as i16;
        let bits = bitlist_bits(&attestation.aggregation_bits)?;

        let mut offset = 0usize;
        for committee_index in bitvector_set_indices(&attestation.committee_bits) {
            let size = *slot_sizes
                .get(committee_index)
                .ok_or(Error::MissingCommitteeSize {
                    slot: inclusion_slot,
                    referenced,
                })? as usize;
            if offset + size > bits.len() {
                return Err(Error::AggregationBitsOverrun {
                    slot: inclusion_slot,
                });
            }
            for position in 0..size {
                if bits[offset + position] {
                    let key = (referenced, committee_index as u64, position as u64);
                    best.entry(key)
                        .and_modify(|existing| *existing = (*existing).min(delay))
                        .or_insert(delay);
                }
            }
            offset += size;
        }
    }

    Ok(best
        .into_iter()
        .map(
            |((slot, committee_index, aggregation_bits_index), delay)| AttestationDelayUpdate {
                slot,
                committee_index,
                aggregation_bits_index,
                delay,
            },
        )
        .collect())
}

impl SlotsController {
    pub fn new(
        beacon: Arc<BeaconClient>,
        execution: Arc<ExecutionClient>,
        store: Arc<Store>,
        time: BeaconTime,
    ) -> Self {
        Self {
            beacon,
            execution,
            store,
            time,
        }
    }

    pub async fn get_slot(&self, slot: u64) -> Result<SlotRow, Error> {
        self.store
            .get_slot(slot)
            .await?
            .ok_or(Error::UnknownSlot { slot })
    }

    pub async fn fetch_block(&self, slot: u64) -> Result<Option<BeaconBlock>, Error> {
        Ok(self.beacon.get_block(slot).await?)
    }

    pub async fn mark_slot_processed(&self, slot: u64) -> Result<(), Error> {
        self.store.mark_slot_processed(slot).await?;
        Ok(())
    }

    /// The lookback slot itself is a pure flag flip: its attestations would
    /// reference slots the indexer never stores.
    pub async fn process_attestations(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.attestations_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        if slot == self.time.lookback_slot() {
            self.store
                .flip_slot_flag_only(slot, SlotFlag::Attestations)
                .await?;
            return Ok(());
        }

        let lookback = self.time.lookback_slot();
        let attestations: Vec<&Attestation> = block
            .body
            .attestations
            .iter()
            .filter(|attestation| attestation.data.slot >= lookback)
            .collect();
        let referenced: BTreeSet<u64> = attestations
            .iter()
            .map(|attestation| attestation.data.slot)
            .collect();
        let referenced: Vec<u64> = referenced.into_iter().collect();
        let sizes = self.store.committee_counts_for_slots(&referenced).await?;

        let updates = decode_attestation_updates(&attestations, &sizes, slot)?;
        tracing::debug!(slot, updates = updates.len(), "Applying attestation delays");
        self.store.apply_attestation_updates(slot, &updates).await?;
        Ok(())
    }

    pub async fn process_consensus_rewards(&self, row: &SlotRow) -> Result<(), Error> {
        if row.consensus_rewards_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        match self.beacon.get_block_rewards(slot).await? {
            None => {
                self.store
                    .flip_slot_flag_only(slot, SlotFlag::ConsensusRewards)
                    .await?;
            }
            Some(rewards) => {
                let hour = self.time.hour_of_slot(slot);
                self.store
                    .store_block_reward(
                        slot,
                        row.epoch as u64,
                        rewards.proposer_index,
                        rewards.total,
                        hour,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn process_sync_rewards(&self, row: &SlotRow) -> Result<(), Error> {
        if row.sync_rewards_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let validators = self
            .store
            .sync_committee_validators(row.epoch as u64)
            .await?
            .ok_or(Error::MissingSyncCommittee {
                epoch: row.epoch as u64,
            })?;
        match self.beacon.get_sync_committee_rewards(slot, &validators).await? {
            None => {
                self.store
                    .flip_slot_flag_only(slot, SlotFlag::SyncRewards)
                    .await?;
            }
            Some(rewards) => {
                let pairs: Vec<(u64, i64)> = rewards
                    .iter()
                    .map(|reward| (reward.validator_index, reward.reward))
                    .collect();
                self.store.store_sync_committee_rewards(slot, &pairs).await?;
            }
        }
        Ok(())
    }

    pub async fn process_execution_rewards(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.execution_rewards_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let Some(payload) = &block.body.execution_payload else {
            self.store
                .flip_slot_flag_only(slot, SlotFlag::ExecutionRewards)
                .await?;
            return Ok(());
        };
        let reward = self.execution.get_block(payload.block_number).await?;
        self.store.store_execution_reward(slot, &reward).await?;
        Ok(())
    }

    pub async fn process_withdrawals(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.ep_withdrawals_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<WithdrawalRow> = block
            .body
            .execution_payload
            .iter()
            .flat_map(|payload| &payload.withdrawals)
            .map(|withdrawal| WithdrawalRow {
                withdrawal_index: withdrawal.index,
                validator_index: withdrawal.validator_index,
                address: withdrawal.address.clone(),
                amount_gwei: withdrawal.amount,
            })
            .collect();
        self.store.store_withdrawals(slot, &rows).await?;
        Ok(())
    }

    pub async fn process_deposits(&self, row: &SlotRow, block: &BeaconBlock) -> Result<(), Error> {
        if row.deposits_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<DepositRow> = block
            .body
            .deposits
            .iter()
            .map(|deposit| DepositRow {
                pubkey: deposit.data.pubkey.clone(),
                amount_gwei: deposit.data.amount,
            })
            .collect();
        self.store
            .store_deposits(slot, &rows, DEPOSIT_SOURCE_BLOCK, SlotFlag::Deposits)
            .await?;
        Ok(())
    }

    pub async fn process_voluntary_exits(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.voluntary_exits_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<ExitRow> = block
            .body
            .voluntary_exits
            .iter()
            .map(|exit| ExitRow {
                validator_index: exit.message.validator_index,
                epoch: exit.message.epoch,
            })
            .collect();
        self.store.store_voluntary_exits(slot, &rows).await?;
        Ok(())
    }

    pub async fn process_er_deposits(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.er_deposits_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<DepositRow> = block
            .body
            .execution_requests
            .iter()
            .flat_map(|requests| &requests.deposits)
            .map(|deposit| DepositRow {
                pubkey: deposit.pubkey.clone(),
                amount_gwei: deposit.amount,
            })
            .collect();
        self.store
            .store_deposits(
                slot,
                &rows,
                DEPOSIT_SOURCE_EXECUTION_REQUEST,
                SlotFlag::ErDeposits,
            )
            .await?;
        Ok(())
    }

    pub async fn process_er_withdrawals(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.er_withdrawals_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<WithdrawalRequestRow> = block
            .body
            .execution_requests
            .iter()
            .flat_map(|requests| &requests.withdrawals)
            .map(|request| WithdrawalRequestRow {
                source_address: request.source_address.clone(),
                validator_pubkey: request.validator_pubkey.clone(),
                amount_gwei: request.amount,
            })
            .collect();
        self.store.store_withdrawal_requests(slot, &rows).await?;
        Ok(())
    }

    pub async fn process_er_consolidations(
        &self,
        row: &SlotRow,
        block: &BeaconBlock,
    ) -> Result<(), Error> {
        if row.er_consolidations_fetched {
            return Ok(());
        }
        let slot = row.slot as u64;
        let rows: Vec<ConsolidationRequestRow> = block
            .body
            .execution_requests
            .iter()
            .flat_map(|requests| &requests.consolidations)
            .map(|request| ConsolidationRequestRow {
                source_address: request.source_address.clone(),
                source_pubkey: request.source_pubkey.clone(),
                target_pubkey: request.target_pubkey.clone(),
            })
            .collect();
        self.store.store_consolidation_requests(slot, &rows).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::beacon::AttestationData;

    fn attestation(slot: u64, aggregation_bits: Vec<u8>, committee_bits: Vec<u8>) -> Attestation {
        Attestation {
            aggregation_bits,
            committee_bits,
            data: AttestationData { slot, index: 0 },
        }
    }

    fn sizes(slot: u64, counts: Vec<u64>) -> HashMap<u64, Vec<u64>> {
        HashMap::from([(slot, counts)])
    }

    #[test]
    fn decodes_single_committee_attestation() {
        // Committee 0 of size 3; validators at positions 0 and 2 attested.
        // Bitlist 0b0000_1101: data bits 101, terminator at index 3.
        let att = attestation(100, vec![0x0D], vec![0x01]);
        let updates =
            decode_attestation_updates(&[&att], &sizes(100, vec![3]), 101).unwrap();

        let mut keys: Vec<(u64, u64, u64, i16)> = updates
            .iter()
            .map(|u| (u.slot, u.committee_index, u.aggregation_bits_index, u.delay))
            .collect();
        keys.sort();
        assert_eq!(keys, vec![(100, 0, 0, 0), (100, 0, 2, 0)]);
    }

    #[test]
    fn splits_aggregation_bits_across_committees() {
        // Committees 0 (size 2) and 2 (size 3) participate. The bitlist
        // carries 5 data bits: 11 for committee 0, 011 for committee 2.
        // Data bits LSB-first: 1,1,0,1,1 -> byte 0b0011_1011 = 0x3B.
        let att = attestation(100, vec![0x3B], vec![0x05]);
        let updates =
            decode_attestation_updates(&[&att], &sizes(100, vec![2, 9, 3]), 102).unwrap();

        let mut keys: Vec<(u64, u64, u64, i16)> = updates
            .iter()
            .map(|u| (u.slot, u.committee_index, u.aggregation_bits_index, u.delay))
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![(100, 0, 0, 1), (100, 0, 1, 1), (100, 2, 1, 1), (100, 2, 2, 1)]
        );
    }

    #[test]
    fn keeps_minimum_delay_across_inclusions() {
        // Same position attested in two aggregates included at +1 and +2.
        let early = attestation(100, vec![0x03], vec![0x01]);
        let late = attestation(100, vec![0x03], vec![0x01]);

        let updates = decode_attestation_updates(
            &[&late, &early],
            &sizes(100, vec![1]),
            102,
        )
        .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].delay, 1);

        // An inclusion one slot after the attested slot has delay zero.
        let updates =
            decode_attestation_updates(&[&early], &sizes(100, vec![1]), 101).unwrap();
        assert_eq!(updates[0].delay, 0);
    }

    #[test]
    fn fails_on_missing_committee_sizes() {
        let att = attestation(100, vec![0x03], vec![0x01]);
        let err = decode_attestation_updates(&[&att], &HashMap::new(), 101).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingCommitteeSize {
                slot: 101,
                referenced: 100
            }
        ));
    }

    #[test]
    fn fails_when_bitlist_shorter_than_committees() {
        // Committee of size 8 but only 1 data bit in the list.
        let att = attestation(100, vec![0x03], vec![0x01]);
        let err =
            decode_attestation_updates(&[&att], &sizes(100, vec![8]), 101).unwrap_err();
        assert!(matches!(err, Error::AggregationBitsOverrun { slot: 101 }));
    }
}
