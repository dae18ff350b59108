//! # docket-db
//!
//! PostgreSQL persistence layer for the docket job queue.
//!
//! This crate provides:
//! - Connection pool management
//! - The `PgJobStore` implementation of [`docket_core::JobStore`]
//! - Schema migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use docket_db::Database;
//! use docket_core::{JobStore, JobType, NewJob};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/docket").await?;
//!     db.migrate().await?;
//!
//!     let job_id = db
//!         .jobs
//!         .enqueue(NewJob::new(JobType::ParseText))
//!         .await?;
//!
//!     println!("Enqueued job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod pool;

// Test fixtures for integration tests
// Note: always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use docket_core::*;

pub use jobs::PgJobStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store for queue operations.
    pub jobs: PgJobStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Verify the store is reachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            jobs: PgJobStore::new(self.pool.clone()),
            pool: self.pool.clone(),
        }
    }
}
