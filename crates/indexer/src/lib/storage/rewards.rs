use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use beaconwatch_shared::util::u64_to_i64;

use crate::client::execution::ExecutionBlockReward;

use super::epochs::{flip_epoch_flag, EpochFlag};
use super::hourly::{add_hourly_stats, HourlyDelta};
use super::slots::{flip_slot_flag, SlotFlag};
use super::{rows_per_statement, Error, Store};

/// Attestation reward components for one validator in one epoch. The missed
/// columns are ideal-minus-received, clamped at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochRewardsRow {
    pub validator_index: u64,
    pub head: i64,
    pub target: i64,
    pub source: i64,
    pub inactivity: i64,
    pub missed_head: i64,
    pub missed_target: i64,
    pub missed_source: i64,
    pub missed_inactivity: i64,
    pub inclusion_delay: i64,
}

const EPOCH_REWARDS_BINDS_PER_ROW: usize = 11;
const SYNC_REWARDS_BINDS_PER_ROW: usize = 3;

impl Store {
    /// Rewards stage commit: temp-table load of the per-validator rows, the
    /// hourly fold, and the epoch flag in one transaction.
    pub async fn store_epoch_rewards(
        &self,
        epoch: u64,
        rows: &[EpochRewardsRow],
        hour: DateTime<Utc>,
        hourly: &[HourlyDelta],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        sqlx::query(
            "CREATE TEMP TABLE epoch_rewards_load \
             (LIKE epoch_rewards INCLUDING DEFAULTS) ON COMMIT DROP",
        )
        .execute(&mut *tx)
        .await?;

        for chunk in rows.chunks(rows_per_statement(EPOCH_REWARDS_BINDS_PER_ROW)) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO epoch_rewards_load \
                 (epoch, validator_index, head, target, source, inactivity, \
                  missed_head, missed_target, missed_source, missed_inactivity, inclusion_delay) ",
            );
            builder.push_values(chunk, |mut row, reward| {
                row.push_bind(u64_to_i64(epoch))
                    .push_bind(reward.validator_index as i32)
                    .push_bind(reward.head)
                    .push_bind(reward.target)
                    .push_bind(reward.source)
                    .push_bind(reward.inactivity)
                    .push_bind(reward.missed_head)
                    .push_bind(reward.missed_target)
                    .push_bind(reward.missed_source)
                    .push_bind(reward.missed_inactivity)
                    .push_bind(reward.inclusion_delay);
            });
            builder.build().execute(&mut *tx).await?;
        }

        sqlx::query("INSERT INTO epoch_rewards SELECT * FROM epoch_rewards_load")
            .execute(&mut *tx)
            .await?;

        add_hourly_stats(&mut tx, hour, hourly).await?;
        flip_epoch_flag(&mut tx, epoch, EpochFlag::Rewards).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Block-reward commit: proposer and total on the slot row, the hourly
    /// fold for the proposer, and the branch flag.
    pub async fn store_block_reward(
        &self,
        slot: u64,
        epoch: u64,
        proposer_index: u64,
        total: i64,
        hour: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        sqlx::query(
            "INSERT INTO slot (slot, epoch, proposer_index, consensus_reward) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (slot) DO UPDATE SET \
                 proposer_index = EXCLUDED.proposer_index, \
                 consensus_reward = EXCLUDED.consensus_reward",
        )
        .bind(u64_to_i64(slot))
        .bind(u64_to_i64(epoch))
        .bind(proposer_index as i32)
        .bind(total)
        .execute(&mut *tx)
        .await?;

        let delta = HourlyDelta {
            validator_index: proposer_index,
            cl_rewards: total,
            ..HourlyDelta::default()
        };
        add_hourly_stats(&mut tx, hour, std::slice::from_ref(&delta)).await?;
        flip_slot_flag(&mut tx, slot, SlotFlag::ConsensusRewards).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Per-slot sync committee rewards. Not folded into hourly stats here,
    /// the scheduled summary job owns that aggregation.
    pub async fn store_sync_committee_rewards(
        &self,
        slot: u64,
        rewards: &[(u64, i64)],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for chunk in rewards.chunks(rows_per_statement(SYNC_REWARDS_BINDS_PER_ROW)) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO sync_committee_rewards (slot, validator_index, sync_committee_reward) ",
            );
            builder.push_values(chunk, |mut row, (validator_index, reward)| {
                row.push_bind(u64_to_i64(slot))
                    .push_bind(*validator_index as i32)
                    .push_bind(*reward);
            });
            builder.build().execute(&mut *tx).await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::SyncRewards).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Execution-layer reward commit: the reward row, the slot's
    /// execution_reward mirror, and the branch flag.
    pub async fn store_execution_reward(
        &self,
        slot: u64,
        reward: &ExecutionBlockReward,
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        sqlx::query(
            "INSERT INTO execution_rewards (block_number, address, timestamp, amount) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (block_number) DO NOTHING",
        )
        .bind(u64_to_i64(reward.block_number))
        .bind(&reward.miner_address)
        .bind(reward.timestamp)
        .bind(&reward.amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE slot SET execution_reward = $1 WHERE slot = $2")
            .bind(&reward.amount)
            .bind(u64_to_i64(slot))
            .execute(&mut *tx)
            .await?;

        flip_slot_flag(&mut tx, slot, SlotFlag::ExecutionRewards).await?;
        tx.commit().await?;
        Ok(())
    }
}
