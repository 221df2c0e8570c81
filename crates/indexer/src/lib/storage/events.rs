use beaconwatch_shared::util::u64_to_i64;

use super::slots::{flip_slot_flag, SlotFlag};
use super::{Error, Store};

pub const DEPOSIT_SOURCE_BLOCK: &str = "block";
pub const DEPOSIT_SOURCE_EXECUTION_REQUEST: &str = "execution_request";
pub const EXIT_EVENT_VOLUNTARY: &str = "voluntary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRow {
    pub withdrawal_index: u64,
    pub validator_index: u64,
    pub address: Vec<u8>,
    pub amount_gwei: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRow {
    pub pubkey: Vec<u8>,
    pub amount_gwei: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRow {
    pub validator_index: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequestRow {
    pub source_address: Vec<u8>,
    pub validator_pubkey: Vec<u8>,
    pub amount_gwei: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationRequestRow {
    pub source_address: Vec<u8>,
    pub source_pubkey: Vec<u8>,
    pub target_pubkey: Vec<u8>,
}

/// Per-slot event logs. Natural keys keep every insert idempotent
/// (`ON CONFLICT DO NOTHING`), and each write commits together with its
/// branch flag.
impl Store {
    pub async fn store_withdrawals(&self, slot: u64, rows: &[WithdrawalRow]) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO validator_withdrawals \
                 (withdrawal_index, slot, validator_index, address, amount_gwei) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (withdrawal_index) DO NOTHING",
            )
            .bind(u64_to_i64(row.withdrawal_index))
            .bind(u64_to_i64(slot))
            .bind(row.validator_index as i32)
            .bind(&row.address)
            .bind(u64_to_i64(row.amount_gwei))
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::EpWithdrawals).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn store_deposits(
        &self,
        slot: u64,
        rows: &[DepositRow],
        source: &str,
        flag: SlotFlag,
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for (ordinal, row) in rows.iter().enumerate() {
            sqlx::query(
                "INSERT INTO validator_deposits (slot, ordinal, source, pubkey, amount_gwei) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (slot, ordinal, source) DO NOTHING",
            )
            .bind(u64_to_i64(slot))
            .bind(ordinal as i16)
            .bind(source)
            .bind(&row.pubkey)
            .bind(u64_to_i64(row.amount_gwei))
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, flag).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn store_voluntary_exits(&self, slot: u64, rows: &[ExitRow]) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO validator_exits (validator_index, slot, epoch, event) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (validator_index) DO NOTHING",
            )
            .bind(row.validator_index as i32)
            .bind(u64_to_i64(slot))
            .bind(u64_to_i64(row.epoch))
            .bind(EXIT_EVENT_VOLUNTARY)
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::VoluntaryExits).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn store_withdrawal_requests(
        &self,
        slot: u64,
        rows: &[WithdrawalRequestRow],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for (ordinal, row) in rows.iter().enumerate() {
            sqlx::query(
                "INSERT INTO validator_withdrawal_requests \
                 (slot, ordinal, source_address, validator_pubkey, amount_gwei) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (slot, ordinal) DO NOTHING",
            )
            .bind(u64_to_i64(slot))
            .bind(ordinal as i16)
            .bind(&row.source_address)
            .bind(&row.validator_pubkey)
            .bind(u64_to_i64(row.amount_gwei))
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::ErWithdrawals).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn store_consolidation_requests(
        &self,
        slot: u64,
        rows: &[ConsolidationRequestRow],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for (ordinal, row) in rows.iter().enumerate() {
            sqlx::query(
                "INSERT INTO validator_consolidation_requests \
                 (slot, ordinal, source_address, source_pubkey, target_pubkey) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (slot, ordinal) DO NOTHING",
            )
            .bind(u64_to_i64(slot))
            .bind(ordinal as i16)
            .bind(&row.source_address)
            .bind(&row.source_pubkey)
            .bind(&row.target_pubkey)
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::ErConsolidations).await?;
        tx.commit().await?;
        Ok(())
    }
}
