//! Test helpers for dealer and processor tests.
//!
//! Provides an in-memory world (queue, users, mock note store, mock chat)
//! sharing one call log, plus queue wrappers for ordering and failure
//! scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use notebridge_db::MemoryUpdateQueue;
use notebridge_db::MemoryUserRepository;
use notebridge_jobs::{
    ClaimFilter, DealerBuilder, DealerEvent, Error, FailureReporter, HandlerRegistry, NewUpdate,
    NoteMode, NoteStore, Notebook, RemoteNote, RequestType, Result, UpdateProcessor, UpdateQueue,
    UpdateRecord, User,
};
use notebridge_remote::mock::{CallLog, MockChat, MockNoteStore};

pub const NOTEBOOK_GUID: &str = "nb-inbox";

/// Queue wrapper that records deletions into the shared call log.
#[derive(Clone)]
pub struct RecordingQueue {
    pub inner: MemoryUpdateQueue,
    log: CallLog,
}

impl RecordingQueue {
    pub fn new(inner: MemoryUpdateQueue, log: CallLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl UpdateQueue for RecordingQueue {
    async fn enqueue(&self, update: NewUpdate) -> Result<Uuid> {
        self.inner.enqueue(update).await
    }

    async fn claim_batch(&self, limit: i64, filter: &ClaimFilter) -> Result<Vec<UpdateRecord>> {
        self.inner.claim_batch(limit, filter).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = self.inner.delete(id).await;
        self.log.record("delete", id.to_string(), result.is_ok());
        result
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64> {
        self.inner.release(ids).await
    }

    async fn pending_count(&self) -> Result<i64> {
        self.inner.pending_count().await
    }
}

/// Queue wrapper whose claims fail a set number of times.
#[derive(Clone)]
pub struct FlakyQueue {
    pub inner: MemoryUpdateQueue,
    transient_failures: Arc<AtomicUsize>,
    fatal: bool,
    pub claims: Arc<AtomicUsize>,
}

impl FlakyQueue {
    /// Fail the first `n` claims with a transient error.
    pub fn transient(inner: MemoryUpdateQueue, n: usize) -> Self {
        Self {
            inner,
            transient_failures: Arc::new(AtomicUsize::new(n)),
            fatal: false,
            claims: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every claim with a non-transient error.
    pub fn fatal(inner: MemoryUpdateQueue) -> Self {
        Self {
            inner,
            transient_failures: Arc::new(AtomicUsize::new(0)),
            fatal: true,
            claims: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl UpdateQueue for FlakyQueue {
    async fn enqueue(&self, update: NewUpdate) -> Result<Uuid> {
        self.inner.enqueue(update).await
    }

    async fn claim_batch(&self, limit: i64, filter: &ClaimFilter) -> Result<Vec<UpdateRecord>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(Error::Config("queue schema mismatch".into()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Request("connection reset".into()));
        }
        self.inner.claim_batch(limit, filter).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64> {
        self.inner.release(ids).await
    }

    async fn pending_count(&self) -> Result<i64> {
        self.inner.pending_count().await
    }
}

/// Note store wrapper tracking how many calls run at once per credential.
///
/// Every test user gets its own access token, so the per-token peak is the
/// per-user concurrency.
#[derive(Clone)]
pub struct ConcurrencyProbe {
    inner: MockNoteStore,
    delay: Duration,
    active: Arc<Mutex<HashMap<String, usize>>>,
    peak: Arc<Mutex<HashMap<String, usize>>>,
    total_active: Arc<AtomicUsize>,
    total_peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new(inner: MockNoteStore, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            active: Arc::default(),
            peak: Arc::default(),
            total_active: Arc::default(),
            total_peak: Arc::default(),
        }
    }

    /// Highest number of simultaneous calls seen for any one user.
    pub fn max_per_user(&self) -> usize {
        self.peak.lock().unwrap().values().copied().max().unwrap_or(0)
    }

    /// Highest number of simultaneous calls seen overall.
    pub fn max_total(&self) -> usize {
        self.total_peak.load(Ordering::SeqCst)
    }

    async fn enter<T>(&self, token: &str, call: impl std::future::Future<Output = T>) -> T {
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(token.to_string()).or_insert(0);
            *count += 1;
            let mut peak = self.peak.lock().unwrap();
            let best = peak.entry(token.to_string()).or_insert(0);
            *best = (*best).max(*count);
        }
        let now = self.total_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        let result = call.await;

        self.total_active.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active.lock().unwrap().get_mut(token) {
            *count -= 1;
        }
        result
    }
}

#[async_trait]
impl NoteStore for ConcurrencyProbe {
    async fn get_note(&self, token: &str, guid: &str) -> Result<RemoteNote> {
        self.enter(token, self.inner.get_note(token, guid)).await
    }

    async fn save_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        self.enter(token, self.inner.save_note(token, note)).await
    }

    async fn update_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        self.enter(token, self.inner.update_note(token, note)).await
    }
}

/// Everything a pass talks to, wired to one call log.
pub struct World {
    pub log: CallLog,
    pub queue: RecordingQueue,
    pub users: MemoryUserRepository,
    pub notes: MockNoteStore,
    pub chat: MockChat,
    pub events: broadcast::Sender<DealerEvent>,
}

impl World {
    pub fn new() -> Self {
        let log = CallLog::new();
        let (events, _) = broadcast::channel(256);
        Self {
            queue: RecordingQueue::new(MemoryUpdateQueue::new(), log.clone()),
            users: MemoryUserRepository::new(),
            notes: MockNoteStore::new().with_call_log(log.clone()),
            chat: MockChat::new().with_call_log(log.clone()),
            events,
            log,
        }
    }

    /// A processor over this world with the built-in handlers.
    pub fn processor(&self) -> UpdateProcessor {
        self.processor_with(Arc::new(self.notes.clone()), HandlerRegistry::with_defaults())
    }

    pub fn processor_with(
        &self,
        notes: Arc<dyn NoteStore>,
        handlers: HandlerRegistry,
    ) -> UpdateProcessor {
        UpdateProcessor::new(
            Arc::new(self.queue.clone()),
            Arc::new(self.users.clone()),
            notes,
            Arc::new(self.chat.clone()),
            Arc::new(handlers),
            FailureReporter::new(self.events.clone()),
        )
    }

    /// A dealer builder over this world.
    pub fn dealer(&self) -> DealerBuilder {
        DealerBuilder::new(
            Arc::new(self.queue.clone()),
            Arc::new(self.users.clone()),
            Arc::new(self.notes.clone()),
            Arc::new(self.chat.clone()),
        )
    }

    /// Register a user writing into the test notebook.
    pub fn add_user(&self, id: i64, mode: NoteMode) -> User {
        let user = User {
            id,
            chat_id: id * 100,
            access_token: format!("token-{}", id),
            mode,
            current_notebook: Notebook {
                guid: NOTEBOOK_GUID.into(),
                name: "Inbox".into(),
            },
            places: HashMap::new(),
        };
        self.users.insert(user.clone());
        user
    }

    /// Point a user's running note at `guid`.
    pub fn set_running_note(&self, user_id: i64, guid: &str) {
        let mut user = self.users.snapshot(user_id).expect("user exists");
        user.set_default_note(guid);
        self.users.insert(user);
    }

    /// Enqueue a text update with a status message.
    pub async fn text(&self, user_id: i64, text: &str) -> Uuid {
        let message_id = self.queue.inner.len() as i64 + 1;
        self.queue
            .enqueue(NewUpdate::text(user_id, user_id * 100, text).with_status_message(message_id))
            .await
            .unwrap()
    }

    /// Enqueue an update of another request type.
    pub async fn typed(&self, user_id: i64, request_type: RequestType) -> Uuid {
        self.queue
            .enqueue(
                NewUpdate::text(user_id, user_id * 100, "")
                    .with_request_type(request_type)
                    .with_status_message(7),
            )
            .await
            .unwrap()
    }

    /// Claim every pending record of `user_id`, the way the dealer would.
    pub async fn claim(&self, user_id: i64) -> Vec<UpdateRecord> {
        self.queue
            .claim_batch(1000, &ClaimFilter::new())
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect()
    }

    /// Put claimed records back so the next pass sees them.
    pub async fn release_all(&self) {
        let ids: Vec<Uuid> = self.queue.inner.snapshot().iter().map(|r| r.id).collect();
        self.queue.release(&ids).await.unwrap();
    }

    /// An existing running note with some content.
    pub fn seed_note(&self, body: &str) -> String {
        let mut note = RemoteNote::new("Running", Some(NOTEBOOK_GUID.into()));
        note.content = format!("<en-note><div>{}</div></en-note>", body);
        self.notes.insert_note(note)
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
