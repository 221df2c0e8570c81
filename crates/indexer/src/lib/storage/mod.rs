pub mod committees;
pub mod epochs;
pub mod events;
pub mod hourly;
pub mod rewards;
pub mod slots;
pub mod sync_committees;
pub mod validators;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Upper bound on bind variables per statement; bulk loads are chunked to
/// stay under it.
pub const MAX_BINDS_PER_STATEMENT: usize = 30_000;

const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Epoch batch must start at {expected} and be consecutive, got {got:?}")]
    InvalidEpochSequence { expected: u64, got: Vec<u64> },
}

/// All persistent state lives behind this handle. Writes that span more than
/// one table, or pair a flag flip with data rows, go through a single
/// transaction opened by `begin_tx`, which carries an explicit statement
/// timeout.
pub struct Store {
    pool: PgPool,
    statement_timeout: Duration,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) async fn begin_tx(&self) -> Result<Transaction<'static, Postgres>, Error> {
        let mut tx = self.pool.begin().await?;
        let timeout_ms = self.statement_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

/// Chunk size keeping `binds_per_row` bind variables per row under the
/// statement-wide cap.
pub(crate) fn rows_per_statement(binds_per_row: usize) -> usize {
    (MAX_BINDS_PER_STATEMENT / binds_per_row).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_bind_cap() {
        assert_eq!(rows_per_statement(5), 6_000);
        assert_eq!(rows_per_statement(11), 2_727);
        assert_eq!(rows_per_statement(MAX_BINDS_PER_STATEMENT * 2), 1);
    }
}
