//! Update queue repository implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use notebridge_core::{
    defaults, ClaimFilter, Error, NewUpdate, RequestType, Result, UpdateQueue, UpdateRecord,
};

const RECORD_COLUMNS: &str = "id, user_id, request_type, data, chat_id, status_message_id, \
                              in_process, claimed_at, created_at";

/// PostgreSQL implementation of UpdateQueue.
///
/// Claims are a single conditional `UPDATE … RETURNING` over rows locked
/// with `FOR UPDATE SKIP LOCKED`, so concurrent claimers never see the same
/// row. A claim older than the lease is treated as abandoned.
#[derive(Clone)]
pub struct PgUpdateQueue {
    pool: Pool<Postgres>,
    claim_lease: Option<Duration>,
}

impl PgUpdateQueue {
    /// Create a queue with the default claim lease.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            claim_lease: lease_from_secs(defaults::CLAIM_LEASE_SECS),
        }
    }

    /// Override the claim lease. `Duration::ZERO` disables expiry.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease_from_secs(lease.as_secs());
        self
    }

    fn stale_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let lease = self.claim_lease?;
        chrono::Duration::from_std(lease).ok().map(|d| now - d)
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> UpdateRecord {
        let request_type: Option<String> = row.get("request_type");
        UpdateRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            request_type: RequestType::parse(request_type.as_deref()),
            data: row.get("data"),
            chat_id: row.get("chat_id"),
            status_message_id: row.get("status_message_id"),
            in_process: row.get("in_process"),
            claimed_at: row.get("claimed_at"),
            created_at: row.get("created_at"),
        }
    }

    /// Fetch a record regardless of claim state.
    pub async fn get(&self, id: Uuid) -> Result<Option<UpdateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM update_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_row))
    }
}

pub(crate) fn lease_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[async_trait]
impl UpdateQueue for PgUpdateQueue {
    async fn enqueue(&self, update: NewUpdate) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO update_queue (id, user_id, request_type, data, chat_id, status_message_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(update.user_id)
        .bind(update.request_type.as_str())
        .bind(&update.data)
        .bind(update.chat_id)
        .bind(update.status_message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn claim_batch(&self, limit: i64, filter: &ClaimFilter) -> Result<Vec<UpdateRecord>> {
        let now = Utc::now();
        let rows = sqlx::query(&format!(
            "UPDATE update_queue
             SET in_process = TRUE, claimed_at = $1
             WHERE id IN (
                 SELECT id FROM update_queue
                 WHERE (in_process = FALSE OR ($2::timestamptz IS NOT NULL AND claimed_at < $2))
                   AND NOT (user_id = ANY($3))
                 ORDER BY created_at ASC, id ASC
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(now)
        .bind(self.stale_cutoff(now))
        .bind(&filter.exclude_users)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        // RETURNING does not preserve the subquery order.
        let mut records: Vec<UpdateRecord> = rows.into_iter().map(Self::parse_row).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        debug!(
            subsystem = "db",
            component = "queue",
            op = "claim_batch",
            claimed = records.len(),
            excluded_users = filter.exclude_users.len(),
            "Claimed update batch"
        );
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM update_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE update_queue SET in_process = FALSE, claimed_at = NULL WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM update_queue WHERE in_process = FALSE")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
