use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use super::Error;

/// One validator's contribution to an hourly bucket. Only ever applied
/// additively, and always in the same transaction as the raw write that
/// produced it: a committed delta must never be applied twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourlyDelta {
    pub validator_index: u64,
    pub cl_rewards: i64,
    pub cl_missed_rewards: i64,
    pub missed_attestations: i16,
}

const HOURLY_CHUNK: usize = 7_000;

pub(crate) async fn add_hourly_stats(
    tx: &mut Transaction<'static, Postgres>,
    hour: DateTime<Utc>,
    deltas: &[HourlyDelta],
) -> Result<(), Error> {
    for chunk in deltas.chunks(HOURLY_CHUNK) {
        let validators: Vec<i32> = chunk.iter().map(|d| d.validator_index as i32).collect();
        let rewards: Vec<i64> = chunk.iter().map(|d| d.cl_rewards).collect();
        let missed: Vec<i64> = chunk.iter().map(|d| d.cl_missed_rewards).collect();
        let missed_attestations: Vec<i16> = chunk.iter().map(|d| d.missed_attestations).collect();
        sqlx::query(
            "INSERT INTO hourly_validator_stats \
             (datetime_hour, validator_index, cl_rewards, cl_missed_rewards, missed_attestations_count) \
             SELECT $1, u.validator_index, u.cl_rewards, u.cl_missed_rewards, u.missed_attestations \
             FROM unnest($2::int[], $3::bigint[], $4::bigint[], $5::smallint[]) \
                  AS u(validator_index, cl_rewards, cl_missed_rewards, missed_attestations) \
             ON CONFLICT (datetime_hour, validator_index) DO UPDATE SET \
                 cl_rewards = hourly_validator_stats.cl_rewards + EXCLUDED.cl_rewards, \
                 cl_missed_rewards = hourly_validator_stats.cl_missed_rewards + EXCLUDED.cl_missed_rewards, \
                 missed_attestations_count = hourly_validator_stats.missed_attestations_count + EXCLUDED.missed_attestations_count",
        )
        .bind(hour)
        .bind(&validators)
        .bind(&rewards)
        .bind(&missed)
        .bind(&missed_attestations)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
