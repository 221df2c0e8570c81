use std::collections::HashMap;

use sqlx::{Postgres, Transaction};

use beaconwatch_shared::util::u64_to_i64;

use super::epochs::{flip_epoch_flag, EpochFlag};
use super::{Error, Store};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SlotRow {
    pub slot: i64,
    pub epoch: i64,
    pub processed: bool,
    pub attestations_fetched: bool,
    pub consensus_rewards_fetched: bool,
    pub execution_rewards_fetched: bool,
    pub sync_rewards_fetched: bool,
    pub ep_withdrawals_fetched: bool,
    pub deposits_fetched: bool,
    pub voluntary_exits_fetched: bool,
    pub er_deposits_fetched: bool,
    pub er_withdrawals_fetched: bool,
    pub er_consolidations_fetched: bool,
    pub proposer_index: Option<i32>,
    pub consensus_reward: Option<i64>,
    pub committees_count_in_slot: Option<serde_json::Value>,
}

impl SlotRow {
    pub fn flag(&self, flag: SlotFlag) -> bool {
        match flag {
            SlotFlag::Attestations => self.attestations_fetched,
            SlotFlag::ConsensusRewards => self.consensus_rewards_fetched,
            SlotFlag::ExecutionRewards => self.execution_rewards_fetched,
            SlotFlag::SyncRewards => self.sync_rewards_fetched,
            SlotFlag::EpWithdrawals => self.ep_withdrawals_fetched,
            SlotFlag::Deposits => self.deposits_fetched,
            SlotFlag::VoluntaryExits => self.voluntary_exits_fetched,
            SlotFlag::ErDeposits => self.er_deposits_fetched,
            SlotFlag::ErWithdrawals => self.er_withdrawals_fetched,
            SlotFlag::ErConsolidations => self.er_consolidations_fetched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFlag {
    Attestations,
    ConsensusRewards,
    ExecutionRewards,
    SyncRewards,
    EpWithdrawals,
    Deposits,
    VoluntaryExits,
    ErDeposits,
    ErWithdrawals,
    ErConsolidations,
}

impl SlotFlag {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Attestations => "attestations_fetched",
            Self::ConsensusRewards => "consensus_rewards_fetched",
            Self::ExecutionRewards => "execution_rewards_fetched",
            Self::SyncRewards => "sync_rewards_fetched",
            Self::EpWithdrawals => "ep_withdrawals_fetched",
            Self::Deposits => "deposits_fetched",
            Self::VoluntaryExits => "voluntary_exits_fetched",
            Self::ErDeposits => "er_deposits_fetched",
            Self::ErWithdrawals => "er_withdrawals_fetched",
            Self::ErConsolidations => "er_consolidations_fetched",
        }
    }
}

pub(crate) async fn flip_slot_flag(
    tx: &mut Transaction<'static, Postgres>,
    slot: u64,
    flag: SlotFlag,
) -> Result<(), Error> {
    let sql = format!("UPDATE slot SET {} = TRUE WHERE slot = $1", flag.column());
    sqlx::query(&sql)
        .bind(u64_to_i64(slot))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    pub next_slot_to_process: Option<u64>,
    pub all_slots_processed: bool,
}

impl Store {
    /// One range scan answering both "what next" and "are we done".
    pub async fn next_unprocessed_slot(&self, from: u64, to: u64) -> Result<SlotCursor, Error> {
        let (next, remaining): (Option<i64>, i64) = sqlx::query_as(
            "SELECT min(slot) FILTER (WHERE NOT processed), \
                    count(*) FILTER (WHERE NOT processed) \
             FROM slot WHERE slot BETWEEN $1 AND $2",
        )
        .bind(u64_to_i64(from))
        .bind(u64_to_i64(to))
        .fetch_one(&self.pool)
        .await?;
        Ok(SlotCursor {
            next_slot_to_process: next.map(|slot| slot as u64),
            all_slots_processed: remaining == 0,
        })
    }

    pub async fn get_slot(&self, slot: u64) -> Result<Option<SlotRow>, Error> {
        let row = sqlx::query_as::<_, SlotRow>("SELECT * FROM slot WHERE slot = $1")
            .bind(u64_to_i64(slot))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Marks the slot done. Every per-stage flag is forced true as well, so
    /// missed slots (which skip their branches) still satisfy the
    /// processed-implies-flags invariant.
    pub async fn mark_slot_processed(&self, slot: u64) -> Result<(), Error> {
        sqlx::query(
            "UPDATE slot SET processed = TRUE, \
                    attestations_fetched = TRUE, \
                    consensus_rewards_fetched = TRUE, \
                    execution_rewards_fetched = TRUE, \
                    sync_rewards_fetched = TRUE, \
                    ep_withdrawals_fetched = TRUE, \
                    deposits_fetched = TRUE, \
                    voluntary_exits_fetched = TRUE, \
                    er_deposits_fetched = TRUE, \
                    er_withdrawals_fetched = TRUE, \
                    er_consolidations_fetched = TRUE \
             WHERE slot = $1",
        )
        .bind(u64_to_i64(slot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ordered committee sizes per slot, as stored by the committees stage.
    pub async fn committee_counts_for_slots(
        &self,
        slots: &[u64],
    ) -> Result<HashMap<u64, Vec<u64>>, Error> {
        let ids: Vec<i64> = slots.iter().map(|slot| u64_to_i64(*slot)).collect();
        let rows: Vec<(i64, Option<serde_json::Value>)> = sqlx::query_as(
            "SELECT slot, committees_count_in_slot FROM slot WHERE slot = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (slot, value) in rows {
            let Some(value) = value else { continue };
            let sizes: Vec<u64> = serde_json::from_value(value).unwrap_or_default();
            counts.insert(slot as u64, sizes);
        }
        Ok(counts)
    }

    /// Upserts `slot.proposer_index` for every duty and flips the epoch flag,
    /// in one transaction.
    pub async fn apply_proposer_duties(
        &self,
        epoch: u64,
        duties: &[(u64, u64)],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        let slots: Vec<i64> = duties.iter().map(|(slot, _)| u64_to_i64(*slot)).collect();
        let proposers: Vec<i32> = duties
            .iter()
            .map(|(_, validator)| *validator as i32)
            .collect();
        sqlx::query(
            "INSERT INTO slot (slot, epoch, proposer_index) \
             SELECT u.slot, $3::bigint, u.proposer \
             FROM unnest($1::bigint[], $2::int[]) AS u(slot, proposer) \
             ON CONFLICT (slot) DO UPDATE SET proposer_index = EXCLUDED.proposer_index",
        )
        .bind(&slots)
        .bind(&proposers)
        .bind(u64_to_i64(epoch))
        .execute(&mut *tx)
        .await?;
        flip_epoch_flag(&mut tx, epoch, EpochFlag::ProposerDuties).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Single-flag flip for branches with nothing to store (missed slot,
    /// empty payload section).
    pub async fn flip_slot_flag_only(&self, slot: u64, flag: SlotFlag) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        flip_slot_flag(&mut tx, slot, flag).await?;
        tx.commit().await?;
        Ok(())
    }
}
