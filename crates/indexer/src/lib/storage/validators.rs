use sqlx::{Postgres, QueryBuilder};

use beaconwatch_shared::util::u64_to_i64;
use beaconwatch_shared::validator_status::ValidatorStatus;

use super::epochs::{flip_epoch_flag, EpochFlag};
use super::{rows_per_statement, Error, Store};

/// Full validator record as written by the initial sync and the activation
/// tracking stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub id: u64,
    pub status: ValidatorStatus,
    pub balance: u64,
    pub effective_balance: u64,
    pub pubkey: Vec<u8>,
    pub withdrawal_address: Option<Vec<u8>>,
}

const VALIDATOR_BINDS_PER_ROW: usize = 6;
const BALANCE_UPDATE_CHUNK: usize = 10_000;

fn terminal_status_codes() -> Vec<i16> {
    vec![
        ValidatorStatus::ExitedUnslashed.code(),
        ValidatorStatus::ExitedSlashed.code(),
        ValidatorStatus::WithdrawalDone.code(),
    ]
}

impl Store {
    pub async fn count_validators(&self) -> Result<i64, Error> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM validator")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Initial sync: temp-table bulk load into an empty validator table.
    pub async fn seed_validators(&self, records: &[ValidatorRecord]) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        sqlx::query(
            "CREATE TEMP TABLE validator_load \
             (LIKE validator INCLUDING DEFAULTS) ON COMMIT DROP",
        )
        .execute(&mut *tx)
        .await?;

        for chunk in records.chunks(rows_per_statement(VALIDATOR_BINDS_PER_ROW)) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO validator_load \
                 (id, status, balance, effective_balance, pubkey, withdrawal_address) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id as i32)
                    .push_bind(record.status.code())
                    .push_bind(u64_to_i64(record.balance))
                    .push_bind(u64_to_i64(record.effective_balance))
                    .push_bind(&record.pubkey)
                    .push_bind(&record.withdrawal_address);
            });
            builder.build().execute(&mut *tx).await?;
        }

        sqlx::query("INSERT INTO validator SELECT * FROM validator_load")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn validator_ids_with_statuses(
        &self,
        statuses: &[ValidatorStatus],
    ) -> Result<Vec<u64>, Error> {
        let codes: Vec<i16> = statuses.iter().map(|status| status.code()).collect();
        let ids: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM validator WHERE status = ANY($1) ORDER BY id")
                .bind(&codes)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    /// Everyone still eligible for balance tracking.
    pub async fn non_terminal_validator_ids(&self) -> Result<Vec<u64>, Error> {
        let ids: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM validator WHERE status <> ALL($1) ORDER BY id")
                .bind(terminal_status_codes())
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    pub async fn active_validator_ids(&self) -> Result<Vec<u64>, Error> {
        self.validator_ids_with_statuses(&[
            ValidatorStatus::ActiveOngoing,
            ValidatorStatus::ActiveExiting,
            ValidatorStatus::ActiveSlashed,
        ])
        .await
    }

    pub async fn validator_balances(&self, ids: &[u64]) -> Result<Vec<(u64, u64)>, Error> {
        let wanted: Vec<i32> = ids.iter().map(|id| *id as i32).collect();
        let rows: Vec<(i32, i64)> =
            sqlx::query_as("SELECT id, balance FROM validator WHERE id = ANY($1)")
                .bind(&wanted)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, balance)| (id as u64, balance as u64))
            .collect())
    }

    /// Balance stage commit: balance updates plus the epoch flag.
    pub async fn apply_validator_balances(
        &self,
        epoch: u64,
        balances: &[(u64, u64)],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for chunk in balances.chunks(BALANCE_UPDATE_CHUNK) {
            let ids: Vec<i32> = chunk.iter().map(|(id, _)| *id as i32).collect();
            let amounts: Vec<i64> = chunk
                .iter()
                .map(|(_, balance)| u64_to_i64(*balance))
                .collect();
            sqlx::query(
                "UPDATE validator AS v SET balance = u.balance \
                 FROM (SELECT * FROM unnest($1::int[], $2::bigint[]) AS t(id, balance)) u \
                 WHERE v.id = u.id",
            )
            .bind(&ids)
            .bind(&amounts)
            .execute(&mut *tx)
            .await?;
        }
        flip_epoch_flag(&mut tx, epoch, EpochFlag::Balances).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Activation stage commit: status/balance upserts (creating validators
    /// first seen here) plus the epoch flag.
    pub async fn apply_validator_activations(
        &self,
        epoch: u64,
        records: &[ValidatorRecord],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO validator \
                 (id, status, balance, effective_balance, pubkey, withdrawal_address) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (id) DO UPDATE SET \
                     status = EXCLUDED.status, \
                     balance = EXCLUDED.balance, \
                     effective_balance = EXCLUDED.effective_balance, \
                     withdrawal_address = EXCLUDED.withdrawal_address",
            )
            .bind(record.id as i32)
            .bind(record.status.code())
            .bind(u64_to_i64(record.balance))
            .bind(u64_to_i64(record.effective_balance))
            .bind(&record.pubkey)
            .bind(&record.withdrawal_address)
            .execute(&mut *tx)
            .await?;
        }
        flip_epoch_flag(&mut tx, epoch, EpochFlag::Activation).await?;
        tx.commit().await?;
        Ok(())
    }
}
