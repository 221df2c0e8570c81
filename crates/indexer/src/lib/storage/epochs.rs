use sqlx::{Postgres, QueryBuilder, Transaction};

use beaconwatch_shared::util::u64_to_i64;

use super::{Error, Store};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EpochRow {
    pub epoch: i64,
    pub processed: bool,
    pub committees_fetched: bool,
    pub sync_committees_fetched: bool,
    pub validator_proposer_duties_fetched: bool,
    pub validators_balances_fetched: bool,
    pub validators_activation_fetched: bool,
    pub rewards_fetched: bool,
    pub all_slots_processed: bool,
}

impl EpochRow {
    pub fn all_stage_flags_set(&self) -> bool {
        self.committees_fetched
            && self.sync_committees_fetched
            && self.validator_proposer_duties_fetched
            && self.validators_balances_fetched
            && self.validators_activation_fetched
            && self.rewards_fetched
            && self.all_slots_processed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochFlag {
    Committees,
    SyncCommittees,
    ProposerDuties,
    Balances,
    Activation,
    Rewards,
    AllSlots,
}

impl EpochFlag {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Committees => "committees_fetched",
            Self::SyncCommittees => "sync_committees_fetched",
            Self::ProposerDuties => "validator_proposer_duties_fetched",
            Self::Balances => "validators_balances_fetched",
            Self::Activation => "validators_activation_fetched",
            Self::Rewards => "rewards_fetched",
            Self::AllSlots => "all_slots_processed",
        }
    }
}

pub(crate) async fn flip_epoch_flag(
    tx: &mut Transaction<'static, Postgres>,
    epoch: u64,
    flag: EpochFlag,
) -> Result<(), Error> {
    let sql = format!("UPDATE epoch SET {} = TRUE WHERE epoch = $1", flag.column());
    sqlx::query(&sql)
        .bind(u64_to_i64(epoch))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Validates the batch before inserting: strictly consecutive, continuing
/// from the stored maximum (or from `baseline` on an empty table).
fn validate_epoch_batch(epochs: &[u64], expected_start: u64) -> Result<(), Error> {
    let consecutive = epochs
        .windows(2)
        .all(|pair| pair[1] == pair[0] + 1);
    if !consecutive || epochs[0] != expected_start {
        return Err(Error::InvalidEpochSequence {
            expected: expected_start,
            got: epochs.to_vec(),
        });
    }
    Ok(())
}

impl Store {
    pub async fn create_epochs(&self, epochs: &[u64], baseline: u64) -> Result<(), Error> {
        if epochs.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin_tx().await?;
        let max_existing: Option<i64> = sqlx::query_scalar("SELECT max(epoch) FROM epoch")
            .fetch_one(&mut *tx)
            .await?;
        let expected_start = max_existing.map(|max| max as u64 + 1).unwrap_or(baseline);
        validate_epoch_batch(epochs, expected_start)?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO epoch (epoch) ");
        builder.push_values(epochs, |mut row, epoch| {
            row.push_bind(u64_to_i64(*epoch));
        });
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn count_unprocessed_epochs(&self) -> Result<i64, Error> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM epoch WHERE NOT processed")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn max_epoch(&self) -> Result<Option<u64>, Error> {
        let max: Option<i64> = sqlx::query_scalar("SELECT max(epoch) FROM epoch")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|value| value as u64))
    }

    /// Earliest epoch with `processed = false`; the orchestrator's work queue.
    pub async fn get_min_epoch_to_process(&self) -> Result<Option<u64>, Error> {
        let min: Option<i64> =
            sqlx::query_scalar("SELECT min(epoch) FROM epoch WHERE NOT processed")
                .fetch_one(&self.pool)
                .await?;
        Ok(min.map(|value| value as u64))
    }

    pub async fn get_epoch(&self, epoch: u64) -> Result<Option<EpochRow>, Error> {
        let row = sqlx::query_as::<_, EpochRow>("SELECT * FROM epoch WHERE epoch = $1")
            .bind(u64_to_i64(epoch))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn mark_epoch_processed(&self, epoch: u64) -> Result<(), Error> {
        sqlx::query("UPDATE epoch SET processed = TRUE WHERE epoch = $1")
            .bind(u64_to_i64(epoch))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_all_slots_processed(&self, epoch: u64) -> Result<(), Error> {
        sqlx::query("UPDATE epoch SET all_slots_processed = TRUE WHERE epoch = $1")
            .bind(u64_to_i64(epoch))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Single-flag flip for stages that turn out to be no-ops.
    pub async fn flip_epoch_flag_only(&self, epoch: u64, flag: EpochFlag) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        flip_epoch_flag(&mut tx, epoch, flag).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_consecutive_batch_from_expected_start() {
        assert!(validate_epoch_batch(&[10, 11, 12], 10).is_ok());
        assert!(validate_epoch_batch(&[10], 10).is_ok());
    }

    #[test]
    fn rejects_gap_or_wrong_start() {
        assert!(matches!(
            validate_epoch_batch(&[10, 12], 10),
            Err(Error::InvalidEpochSequence { expected: 10, .. })
        ));
        assert!(matches!(
            validate_epoch_batch(&[11, 12], 10),
            Err(Error::InvalidEpochSequence { expected: 10, .. })
        ));
        assert!(matches!(
            validate_epoch_batch(&[12, 11], 12),
            Err(Error::InvalidEpochSequence { .. })
        ));
    }
}
