use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;
use beaconwatch_shared::util::gwei_bucket;

use crate::client::beacon::{
    BeaconClient, CommitteeData, IdealAttestationReward, StateId, ValidatorAttestationReward,
};
use crate::storage::committees::{CommitteeRow, SlotCommittees};
use crate::storage::epochs::EpochFlag;
use crate::storage::hourly::HourlyDelta;
use crate::storage::rewards::EpochRewardsRow;
use crate::storage::Store;

use super::Error;

const ATTESTATION_REWARDS_CHUNK: usize = 100_000;

/// Committee rows are kept for three epochs past their slot before cleanup.
const COMMITTEE_RETENTION_EPOCHS: u64 = 3;

/// Delays above two epochs are outside the chain's inclusion window; rows
/// that settled below it can be dropped once old enough.
const TRACKED_DELAY_EPOCHS: u64 = 2;

/// Ideal attestation reward components for one effective-balance bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdealRewards {
    pub head: i64,
    pub target: i64,
    pub source: i64,
    pub inactivity: i64,
}

/// Epoch-level stages: committees, sync committees, proposer duties and
/// attestation rewards. Every stage short-circuits when its epoch flag is
/// already set, so re-runs cost neither a network call nor a DB write.
pub struct EpochsController {
    beacon: Arc<BeaconClient>,
    store: Arc<Store>,
    time: BeaconTime,
}

/// Flattens the committees response into slot rows (with ordered committee
/// sizes) and membership rows. Slots before the lookback are dropped.
pub(crate) fn build_epoch_committees(
    committees: &[CommitteeData],
    lookback_slot: u64,
) -> (Vec<SlotCommittees>, Vec<CommitteeRow>) {
    let mut sizes: BTreeMap<u64, BTreeMap<u64, u64>> = BTreeMap::new();
    let mut rows = Vec::new();

    for committee in committees {
        if committee.slot < lookback_slot {
            continue;
        }
        sizes
            .entry(committee.slot)
            .or_default()
            .insert(committee.index, committee.validators.len() as u64);
        for (position, validator_index) in committee.validators.iter().enumerate() {
            rows.push(CommitteeRow {
                slot: committee.slot,
                committee_index: committee.index,
                aggregation_bits_index: position as u64,
                validator_index: *validator_index,
            });
        }
    }

    let slots = sizes
        .into_iter()
        .map(|(slot, by_index)| SlotCommittees {
            slot,
            counts: by_index.into_values().collect(),
        })
        .collect();
    (slots, rows)
}

pub(crate) fn build_ideal_rewards_map(
    ideal: &[IdealAttestationReward],
) -> HashMap<u64, IdealRewards> {
    ideal
        .iter()
        .map(|reward| {
            (
                reward.effective_balance,
                IdealRewards {
                    head: reward.head,
                    target: reward.target,
                    source: reward.source,
                    inactivity: reward.inactivity,
                },
            )
        })
        .collect()
}

/// Received components are stored as-is; missed components are
/// ideal-minus-received clamped at zero. A validator whose source reward is
/// not positive while the ideal is did not attest this epoch.
pub(crate) fn compute_reward_row(
    total: &ValidatorAttestationReward,
    ideal: &IdealRewards,
) -> (EpochRewardsRow, HourlyDelta) {
    let missed_head = (ideal.head - total.head).max(0);
    let missed_target = (ideal.target - total.target).max(0);
    let missed_source = (ideal.source - total.source).max(0);
    let missed_inactivity = (ideal.inactivity - total.inactivity).max(0);

    let row = EpochRewardsRow {
        validator_index: total.validator_index,
        head: total.head,
        target: total.target,
        source: total.source,
        inactivity: total.inactivity,
        missed_head,
        missed_target,
        missed_source,
        missed_inactivity,
        inclusion_delay: total.inclusion_delay.unwrap_or(0),
    };
    let delta = HourlyDelta {
        validator_index: total.validator_index,
        cl_rewards: total.head + total.target + total.source + total.inactivity,
        cl_missed_rewards: missed_head + missed_target + missed_source + missed_inactivity,
        missed_attestations: i16::from(total.source <= 0 && ideal.source > 0),
    };
    (row, delta)
}

impl EpochsController {
    pub fn new(beacon: Arc<BeaconClient>, store: Arc<Store>, time: BeaconTime) -> Self {
        Self { beacon, store, time }
    }

    async fn epoch_row(&self, epoch: u64) -> Result<crate::storage::epochs::EpochRow, Error> {
        self.store
            .get_epoch(epoch)
            .await?
            .ok_or(Error::UnknownEpoch { epoch })
    }

    pub async fn fetch_committees(&self, epoch: u64) -> Result<(), Error> {
        if self.epoch_row(epoch).await?.committees_fetched {
            tracing::debug!(epoch, "Committees already fetched");
            return Ok(());
        }
        let start_slot = self.time.epoch_start_slot(epoch);
        let committees = self
            .beacon
            .get_committees(&StateId::Slot(start_slot), epoch)
            .await?;
        let (slots, rows) = build_epoch_committees(&committees, self.time.lookback_slot());
        tracing::info!(epoch, slots = slots.len(), rows = rows.len(), "Storing committees");
        self.store.store_epoch_committees(epoch, &slots, &rows).await?;
        Ok(())
    }

    /// One upstream call per sync committee period; later epochs of the same
    /// period only flip their flag against the stored row.
    pub async fn fetch_sync_committees(&self, epoch: u64) -> Result<(), Error> {
        if self.epoch_row(epoch).await?.sync_committees_fetched {
            tracing::debug!(epoch, "Sync committees already fetched");
            return Ok(());
        }
        if self.store.find_sync_committee_covering(epoch).await?.is_some() {
            self.store
                .flip_epoch_flag_only(epoch, EpochFlag::SyncCommittees)
                .await?;
            return Ok(());
        }

        let (from_epoch, to_epoch) = self.time.sync_period_bounds(epoch);
        let state_slot = self.time.epoch_start_slot(from_epoch);
        let committee = self
            .beacon
            .get_sync_committees(&StateId::Slot(state_slot), from_epoch)
            .await?;
        tracing::info!(epoch, from_epoch, to_epoch, "Storing sync committee period");
        self.store
            .insert_sync_committee(
                epoch,
                from_epoch,
                to_epoch,
                &committee.validators,
                &committee.validator_aggregates,
            )
            .await?;
        Ok(())
    }

    pub async fn fetch_proposer_duties(&self, epoch: u64) -> Result<(), Error> {
        if self.epoch_row(epoch).await?.validator_proposer_duties_fetched {
            tracing::debug!(epoch, "Proposer duties already fetched");
            return Ok(());
        }
        let duties = self.beacon.get_proposer_duties(epoch).await?;
        let pairs: Vec<(u64, u64)> = duties
            .iter()
            .map(|duty| (duty.slot, duty.validator_index))
            .collect();
        self.store.apply_proposer_duties(epoch, &pairs).await?;
        Ok(())
    }

    /// Requires validator balances for the epoch to be in the DB already:
    /// the ideal-reward row is looked up by balance floored to a whole gwei
    /// bucket.
    pub async fn fetch_attestation_rewards(&self, epoch: u64) -> Result<(), Error> {
        if self.epoch_row(epoch).await?.rewards_fetched {
            tracing::debug!(epoch, "Attestation rewards already fetched");
            return Ok(());
        }
        let ids = self.store.active_validator_ids().await?;
        let mut ideal_map: Option<HashMap<u64, IdealRewards>> = None;
        let mut rows = Vec::with_capacity(ids.len());
        let mut hourly = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(ATTESTATION_REWARDS_CHUNK) {
            let balances: HashMap<u64, u64> = self
                .store
                .validator_balances(chunk)
                .await?
                .into_iter()
                .collect();
            let data = self.beacon.get_attestation_rewards(epoch, chunk).await?;
            let map =
                ideal_map.get_or_insert_with(|| build_ideal_rewards_map(&data.ideal_rewards));
            for total in &data.total_rewards {
                let bucket =
                    gwei_bucket(balances.get(&total.validator_index).copied().unwrap_or(0));
                let ideal = map.get(&bucket).copied().unwrap_or_default();
                let (row, delta) = compute_reward_row(total, &ideal);
                rows.push(row);
                hourly.push(delta);
            }
        }

        let hour = self.time.hour_of_slot(self.time.epoch_start_slot(epoch));
        tracing::info!(epoch, validators = rows.len(), "Storing attestation rewards");
        self.store.store_epoch_rewards(epoch, &rows, hour, &hourly).await?;
        Ok(())
    }

    /// Final step of the epoch pipeline; refuses to mark with stages open.
    pub async fn mark_processed(&self, epoch: u64) -> Result<(), Error> {
        let row = self.epoch_row(epoch).await?;
        if !row.all_stage_flags_set() {
            return Err(Error::EpochStagesIncomplete { epoch });
        }
        self.store.mark_epoch_processed(epoch).await?;
        Ok(())
    }

    pub async fn cleanup_committees(&self, epoch: u64) -> Result<(), Error> {
        let slots_per_epoch = self.time.slots_per_epoch();
        let before_slot = self
            .time
            .epoch_end_slot(epoch)
            .saturating_sub(COMMITTEE_RETENTION_EPOCHS * slots_per_epoch);
        let max_delay = (TRACKED_DELAY_EPOCHS * slots_per_epoch) as i16;
        let deleted = self.store.cleanup_old_committees(before_slot, max_delay).await?;
        if deleted > 0 {
            tracing::debug!(epoch, deleted, "Cleaned up settled committee rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee(slot: u64, index: u64, validators: Vec<u64>) -> CommitteeData {
        CommitteeData {
            slot,
            index,
            validators,
        }
    }

    #[test]
    fn committees_flatten_into_rows_and_ordered_counts() {
        let data = vec![
            committee(100, 1, vec![7, 8, 9]),
            committee(100, 0, vec![5, 6]),
            committee(101, 0, vec![1]),
        ];
        let (slots, rows) = build_epoch_committees(&data, 0);

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].slot, 100);
        assert_eq!(slots[0].counts, vec![2, 3]);
        assert_eq!(slots[1].counts, vec![1]);

        assert_eq!(rows.len(), 6);
        assert!(rows.contains(&CommitteeRow {
            slot: 100,
            committee_index: 1,
            aggregation_bits_index: 2,
            validator_index: 9,
        }));
        assert!(rows.contains(&CommitteeRow {
            slot: 100,
            committee_index: 0,
            aggregation_bits_index: 0,
            validator_index: 5,
        }));
    }

    #[test]
    fn committees_before_lookback_are_dropped() {
        let data = vec![
            committee(99, 0, vec![1, 2]),
            committee(100, 0, vec![3]),
        ];
        let (slots, rows) = build_epoch_committees(&data, 100);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot, 100);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn committee_counts_for_a_full_gnosis_epoch() {
        // 16 slots of 64 committees each: 1024 unique (slot, index) pairs.
        let mut data = Vec::new();
        let mut total_rows = 0u64;
        for slot in 0..16u64 {
            for index in 0..64u64 {
                let size = 262 + (slot + index) % 2;
                total_rows += size;
                data.push(committee(24472848 + slot, index, (0..size).collect()));
            }
        }
        let (slots, rows) = build_epoch_committees(&data, 0);
        assert_eq!(slots.len(), 16);
        assert!(slots.iter().all(|entry| entry.counts.len() == 64));
        assert_eq!(rows.len() as u64, total_rows);

        let unique_pairs: std::collections::HashSet<(u64, u64)> = rows
            .iter()
            .map(|row| (row.slot, row.committee_index))
            .collect();
        assert_eq!(unique_pairs.len(), 1024);
    }

    fn total(
        validator_index: u64,
        head: i64,
        target: i64,
        source: i64,
        inactivity: i64,
    ) -> ValidatorAttestationReward {
        ValidatorAttestationReward {
            validator_index,
            head,
            target,
            source,
            inclusion_delay: None,
            inactivity,
        }
    }

    #[test]
    fn reward_row_computes_missed_components() {
        let ideal = IdealRewards {
            head: 87524,
            target: 163524,
            source: 87929,
            inactivity: 0,
        };
        let (row, delta) = compute_reward_row(&total(549417, 87524, 163524, 87929, 0), &ideal);
        assert_eq!(row.missed_head, 0);
        assert_eq!(delta.cl_rewards, 338977);
        assert_eq!(delta.cl_missed_rewards, 0);
        assert_eq!(delta.missed_attestations, 0);

        let (row, delta) = compute_reward_row(&total(549419, 0, -70458, 0, 0), &ideal);
        assert_eq!(row.missed_head, 87524);
        assert_eq!(row.missed_target, 163524 + 70458);
        assert_eq!(row.missed_source, 87929);
        assert_eq!(delta.cl_rewards, -70458);
        assert_eq!(delta.missed_attestations, 1);
    }

    #[test]
    fn missed_rewards_never_negative() {
        let ideal = IdealRewards {
            head: 10,
            target: 20,
            source: 30,
            inactivity: 0,
        };
        // Received more than ideal (can happen at bucket boundaries).
        let (row, _) = compute_reward_row(&total(1, 15, 25, 35, 0), &ideal);
        assert_eq!(row.missed_head, 0);
        assert_eq!(row.missed_target, 0);
        assert_eq!(row.missed_source, 0);
    }

    #[test]
    fn epoch_rewards_fold_into_one_hour_bucket() {
        // Two consecutive epochs landing in the same hour; the additive
        // upsert semantics are modeled by a plain map fold.
        let ideal = IdealRewards {
            head: 87524,
            target: 163524,
            source: 87929,
            inactivity: 0,
        };
        let per_epoch: Vec<Vec<ValidatorAttestationReward>> = vec![
            vec![
                total(549417, 87524, 163524, 87929, 0),
                total(549418, 87524, 163524, 87929, 0),
                total(549419, 37711, 70458, 37886, 0),
            ],
            vec![
                total(549417, 87314, 163553, 87978, 0),
                total(549418, 87314, 163553, 87978, 0),
                total(549419, 37621, 70470, 37907, 0),
            ],
        ];

        let mut hour_bucket: HashMap<u64, i64> = HashMap::new();
        for rewards in &per_epoch {
            for reward in rewards {
                let (_, delta) = compute_reward_row(reward, &ideal);
                *hour_bucket.entry(delta.validator_index).or_default() += delta.cl_rewards;
            }
        }

        assert_eq!(hour_bucket[&549417], 677822);
        assert_eq!(hour_bucket[&549418], 677822);
        assert_eq!(hour_bucket[&549419], 292053);
    }

    #[test]
    fn ideal_map_keyed_by_effective_balance() {
        let ideal = vec![IdealAttestationReward {
            effective_balance: 32_000_000_000,
            head: 1,
            target: 2,
            source: 3,
            inclusion_delay: None,
            inactivity: 0,
        }];
        let map = build_ideal_rewards_map(&ideal);
        assert_eq!(map[&32_000_000_000].target, 2);
        assert_eq!(map.get(&gwei_bucket(32_999_999_999)), Some(&map[&32_000_000_000]));
    }
}
