//! # notebridge-db
//!
//! Persistence for the update queue and user settings.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for the update queue and users
//! - In-memory repositories with the same contracts
//!
//! ## Example
//!
//! ```rust,ignore
//! use notebridge_db::{Database, ClaimFilter, UpdateQueue};
//!
//! let db = Database::connect("postgres://localhost/notebridge").await?;
//! let batch = db.updates.claim_batch(100, &ClaimFilter::new()).await?;
//! ```

pub mod memory;
pub mod pool;
pub mod updates;
pub mod users;

// Re-export core types
pub use notebridge_core::*;

pub use memory::{MemoryUpdateQueue, MemoryUserRepository};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use updates::PgUpdateQueue;
pub use users::PgUserRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Inbound update queue.
    pub updates: PgUpdateQueue,
    /// User settings.
    pub users: PgUserRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            updates: PgUpdateQueue::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Replace the update queue's claim lease.
    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.updates = self.updates.with_claim_lease(lease);
        self
    }

    /// Apply the embedded schema migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.into()))
    }
}
