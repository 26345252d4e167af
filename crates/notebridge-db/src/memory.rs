//! In-memory update queue and user store.
//!
//! Same contracts as the Postgres repositories, backed by a mutex-guarded
//! vector. Used by the dealer and processor test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use notebridge_core::{
    defaults, ClaimFilter, Error, NewUpdate, Result, UpdateQueue, UpdateRecord, User,
    UserRepository,
};

use crate::updates::lease_from_secs;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("in-memory store lock poisoned".into()))
}

/// In-memory implementation of UpdateQueue.
#[derive(Clone)]
pub struct MemoryUpdateQueue {
    records: Arc<Mutex<Vec<UpdateRecord>>>,
    claim_lease: Option<Duration>,
}

impl Default for MemoryUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUpdateQueue {
    /// Create an empty queue with the default claim lease.
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            claim_lease: lease_from_secs(defaults::CLAIM_LEASE_SECS),
        }
    }

    /// Override the claim lease. `Duration::ZERO` disables expiry.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = (!lease.is_zero()).then_some(lease);
        self
    }

    /// Copy of every record, claimed or not, in queue order.
    pub fn snapshot(&self) -> Vec<UpdateRecord> {
        lock(&self.records).map(|r| r.clone()).unwrap_or_default()
    }

    /// Copy of one record.
    pub fn get(&self, id: Uuid) -> Option<UpdateRecord> {
        lock(&self.records)
            .ok()
            .and_then(|r| r.iter().find(|u| u.id == id).cloned())
    }

    /// Total number of records, claimed or not.
    pub fn len(&self) -> usize {
        lock(&self.records).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claimable(&self, record: &UpdateRecord, now: chrono::DateTime<Utc>) -> bool {
        if !record.in_process {
            return true;
        }
        match (self.claim_lease, record.claimed_at) {
            (Some(lease), Some(claimed_at)) => chrono::Duration::from_std(lease)
                .map(|lease| claimed_at + lease < now)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl UpdateQueue for MemoryUpdateQueue {
    async fn enqueue(&self, update: NewUpdate) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let record = UpdateRecord {
            id,
            user_id: update.user_id,
            request_type: update.request_type,
            data: update.data,
            chat_id: update.chat_id,
            status_message_id: update.status_message_id,
            in_process: false,
            claimed_at: None,
            created_at: Utc::now(),
        };
        lock(&self.records)?.push(record);
        Ok(id)
    }

    async fn claim_batch(&self, limit: i64, filter: &ClaimFilter) -> Result<Vec<UpdateRecord>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let now = Utc::now();
        let mut records = lock(&self.records)?;

        let mut claimed = Vec::new();
        for record in records.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if filter.admits(record.user_id) && self.claimable(record, now) {
                record.in_process = true;
                record.claimed_at = Some(now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64> {
        let mut records = lock(&self.records)?;
        let mut released = 0;
        for record in records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.in_process = false;
            record.claimed_at = None;
            released += 1;
        }
        Ok(released)
    }

    async fn pending_count(&self) -> Result<i64> {
        let records = lock(&self.records)?;
        Ok(records.iter().filter(|r| !r.in_process).count() as i64)
    }
}

/// In-memory implementation of UserRepository.
#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<Mutex<HashMap<i64, User>>>,
    saves: Arc<Mutex<u64>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert(&self, user: User) {
        if let Ok(mut users) = lock(&self.users) {
            users.insert(user.id, user);
        }
    }

    /// Current stored copy of a user.
    pub fn snapshot(&self, user_id: i64) -> Option<User> {
        lock(&self.users).ok().and_then(|u| u.get(&user_id).cloned())
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> u64 {
        lock(&self.saves).map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get(&self, user_id: i64) -> Result<User> {
        lock(&self.users)?
            .get(&user_id)
            .cloned()
            .ok_or(Error::UserNotFound(user_id))
    }

    async fn save(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users)?;
        if !users.contains_key(&user.id) {
            return Err(Error::UserNotFound(user.id));
        }
        users.insert(user.id, user.clone());
        *lock(&self.saves)? += 1;
        Ok(())
    }
}
