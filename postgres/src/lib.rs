//! `PostgreSQL` storage for the Moby Comps reservation core.
//!
//! [`PostgresStore`] implements every storage trait from `moby-comps-core`.
//! Each conditional update is a single SQL statement whose affected rows
//! decide the winner, so any number of service instances can share the
//! database without application locks:
//!
//! - reserve: `INSERT ... ON CONFLICT DO UPDATE ... WHERE status = 'available'`
//! - release, purchase, sweep: `UPDATE ... WHERE status = 'reserved' AND ...`
//! - settlement claim: `INSERT ... ON CONFLICT DO NOTHING`
//!
//! # Example
//!
//! ```no_run
//! use moby_comps_postgres::PostgresStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPoolOptions::new()
//!     .max_connections(10)
//!     .connect("postgres://localhost/moby_comps")
//!     .await?;
//! let store = PostgresStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod rows;
mod store;

use moby_comps_core::error::StoreError;
use sqlx::PgPool;

/// Storage backed by a `PostgreSQL` connection pool.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    ///
    /// Idempotent; safe to run on every startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}
