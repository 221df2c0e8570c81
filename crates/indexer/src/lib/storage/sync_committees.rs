use beaconwatch_shared::util::u64_to_i64;

use super::epochs::{flip_epoch_flag, EpochFlag};
use super::{Error, Store};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncCommitteeRow {
    pub from_epoch: i64,
    pub to_epoch: i64,
    pub validators: serde_json::Value,
    pub validator_aggregates: serde_json::Value,
}

impl Store {
    pub async fn find_sync_committee_covering(
        &self,
        epoch: u64,
    ) -> Result<Option<SyncCommitteeRow>, Error> {
        let row = sqlx::query_as::<_, SyncCommitteeRow>(
            "SELECT * FROM sync_committee WHERE from_epoch <= $1 AND to_epoch >= $1",
        )
        .bind(u64_to_i64(epoch))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Flat validator list of the period covering `epoch`, if stored.
    pub async fn sync_committee_validators(&self, epoch: u64) -> Result<Option<Vec<u64>>, Error> {
        let row = self.find_sync_committee_covering(epoch).await?;
        Ok(row.map(|committee| {
            serde_json::from_value(committee.validators).unwrap_or_default()
        }))
    }

    /// Inserts the period row and flips the requesting epoch's flag together.
    pub async fn insert_sync_committee(
        &self,
        epoch: u64,
        from_epoch: u64,
        to_epoch: u64,
        validators: &[u64],
        validator_aggregates: &[Vec<u64>],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        sqlx::query(
            "INSERT INTO sync_committee (from_epoch, to_epoch, validators, validator_aggregates) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(u64_to_i64(from_epoch))
        .bind(u64_to_i64(to_epoch))
        .bind(serde_json::to_value(validators).unwrap_or_default())
        .bind(serde_json::to_value(validator_aggregates).unwrap_or_default())
        .execute(&mut *tx)
        .await?;
        flip_epoch_flag(&mut tx, epoch, EpochFlag::SyncCommittees).await?;
        tx.commit().await?;
        Ok(())
    }
}
