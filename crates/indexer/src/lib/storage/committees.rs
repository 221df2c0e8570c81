use sqlx::{Postgres, QueryBuilder, Transaction};

use beaconwatch_shared::util::u64_to_i64;

use super::epochs::{flip_epoch_flag, EpochFlag};
use super::slots::{flip_slot_flag, SlotFlag};
use super::{rows_per_statement, Error, Store};

/// One committee membership position. `aggregation_bits_index` is the
/// validator's position inside the committee's aggregation bitlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeRow {
    pub slot: u64,
    pub committee_index: u64,
    pub aggregation_bits_index: u64,
    pub validator_index: u64,
}

/// Ordered committee sizes for one slot (position = committee index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCommittees {
    pub slot: u64,
    pub counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDelayUpdate {
    pub slot: u64,
    pub committee_index: u64,
    pub aggregation_bits_index: u64,
    pub delay: i16,
}

const COMMITTEE_BINDS_PER_ROW: usize = 4;
const DELAY_UPDATE_CHUNK: usize = 5_000;

async fn bulk_load_committees(
    tx: &mut Transaction<'static, Postgres>,
    rows: &[CommitteeRow],
) -> Result<(), Error> {
    // Temp-table load; duplicates hit the target's primary key and abort
    // the transaction. A replayed batch must surface, not be absorbed.
    sqlx::query(
        "CREATE TEMP TABLE committee_load \
         (LIKE committee INCLUDING DEFAULTS) ON COMMIT DROP",
    )
    .execute(&mut **tx)
    .await?;

    for chunk in rows.chunks(rows_per_statement(COMMITTEE_BINDS_PER_ROW)) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO committee_load \
             (slot, committee_index, aggregation_bits_index, validator_index) ",
        );
        builder.push_values(chunk, |mut row, committee| {
            row.push_bind(u64_to_i64(committee.slot))
                .push_bind(committee.committee_index as i16)
                .push_bind(committee.aggregation_bits_index as i16)
                .push_bind(committee.validator_index as i32);
        });
        builder.build().execute(&mut **tx).await?;
    }

    sqlx::query(
        "INSERT INTO committee (slot, committee_index, aggregation_bits_index, validator_index) \
         SELECT slot, committee_index, aggregation_bits_index, validator_index \
         FROM committee_load",
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Store {
    /// Committees stage commit: slot rows with their committee sizes, the
    /// committee membership bulk load, and the epoch flag, atomically.
    pub async fn store_epoch_committees(
        &self,
        epoch: u64,
        slots: &[SlotCommittees],
        rows: &[CommitteeRow],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;

        for entry in slots {
            let counts = serde_json::to_value(&entry.counts)
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
            sqlx::query(
                "INSERT INTO slot (slot, epoch, committees_count_in_slot) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (slot) DO UPDATE \
                 SET committees_count_in_slot = EXCLUDED.committees_count_in_slot",
            )
            .bind(u64_to_i64(entry.slot))
            .bind(u64_to_i64(epoch))
            .bind(counts)
            .execute(&mut *tx)
            .await?;
        }

        bulk_load_committees(&mut tx, rows).await?;
        flip_epoch_flag(&mut tx, epoch, EpochFlag::Committees).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Applies minimum-delay updates and flips `slot.attestations_fetched`
    /// in one transaction. The predicate only ever lowers a stored delay.
    pub async fn apply_attestation_updates(
        &self,
        slot: u64,
        updates: &[AttestationDelayUpdate],
    ) -> Result<(), Error> {
        let mut tx = self.begin_tx().await?;
        for chunk in updates.chunks(DELAY_UPDATE_CHUNK) {
            let slots: Vec<i64> = chunk.iter().map(|u| u64_to_i64(u.slot)).collect();
            let committees: Vec<i16> = chunk.iter().map(|u| u.committee_index as i16).collect();
            let positions: Vec<i16> = chunk
                .iter()
                .map(|u| u.aggregation_bits_index as i16)
                .collect();
            let delays: Vec<i16> = chunk.iter().map(|u| u.delay).collect();
            sqlx::query(
                "UPDATE committee AS c SET attestation_delay = v.delay \
                 FROM (SELECT * FROM unnest($1::bigint[], $2::smallint[], $3::smallint[], $4::smallint[]) \
                       AS t(slot, committee_index, aggregation_bits_index, delay)) v \
                 WHERE c.slot = v.slot \
                   AND c.committee_index = v.committee_index \
                   AND c.aggregation_bits_index = v.aggregation_bits_index \
                   AND (c.attestation_delay IS NULL OR c.attestation_delay > v.delay)",
            )
            .bind(&slots)
            .bind(&committees)
            .bind(&positions)
            .bind(&delays)
            .execute(&mut *tx)
            .await?;
        }
        flip_slot_flag(&mut tx, slot, SlotFlag::Attestations).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops committee rows that have served their purpose: old enough and
    /// with a recorded delay under the tracked maximum. NULL delays are kept,
    /// they carry missed-attestation information.
    pub async fn cleanup_old_committees(
        &self,
        before_slot: u64,
        max_delay: i16,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            "DELETE FROM committee \
             WHERE slot < $1 AND attestation_delay IS NOT NULL AND attestation_delay <= $2",
        )
        .bind(u64_to_i64(before_slot))
        .bind(max_delay)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
