//! The dealer: claims queued updates and fans them out per user.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use notebridge_core::{
    defaults, ChatNotifier, ClaimFilter, Error, NoteStore, Result, UpdateQueue, UpdateRecord,
    UserRepository,
};

use crate::handler::{ContentHandler, HandlerRegistry};
use crate::processor::{BatchOutcome, UpdateProcessor};
use crate::report::{FailureRecord, FailureReporter, FailureStage};

/// Configuration for the dealer.
#[derive(Debug, Clone)]
pub struct DealerConfig {
    /// Whether to run the dispatch loop at all.
    pub enabled: bool,
    /// Maximum records claimed per poll.
    pub batch_size: i64,
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum per-user tasks running at once.
    pub max_concurrent_users: usize,
    /// Deadline for each remote call, in seconds.
    pub remote_timeout_secs: u64,
    /// First backoff step after a failed claim.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for DealerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: defaults::DEALER_BATCH_SIZE,
            poll_interval_ms: defaults::DEALER_POLL_INTERVAL_MS,
            max_concurrent_users: defaults::DEALER_MAX_CONCURRENT_USERS,
            remote_timeout_secs: defaults::REMOTE_TIMEOUT_SECS,
            base_backoff_ms: defaults::DEALER_BASE_BACKOFF_MS,
            max_backoff_ms: defaults::DEALER_MAX_BACKOFF_MS,
        }
    }
}

impl DealerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DEALER_ENABLED` | `true` | Enable/disable the dispatch loop |
    /// | `DEALER_BATCH_SIZE` | `100` | Records claimed per poll |
    /// | `DEALER_POLL_INTERVAL_MS` | `500` | Sleep when the queue is empty |
    /// | `DEALER_MAX_CONCURRENT_USERS` | `32` | Per-user tasks running at once |
    /// | `DEALER_REMOTE_TIMEOUT_SECS` | `30` | Deadline for each remote call |
    pub fn from_env() -> Self {
        let enabled = std::env::var("DEALER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let batch_size = std::env::var("DEALER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::DEALER_BATCH_SIZE)
            .max(1);

        let poll_interval_ms = std::env::var("DEALER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::DEALER_POLL_INTERVAL_MS);

        let max_concurrent_users = std::env::var("DEALER_MAX_CONCURRENT_USERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::DEALER_MAX_CONCURRENT_USERS)
            .max(1);

        let remote_timeout_secs = std::env::var("DEALER_REMOTE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::REMOTE_TIMEOUT_SECS)
            .max(1);

        Self {
            enabled,
            batch_size,
            poll_interval_ms,
            max_concurrent_users,
            remote_timeout_secs,
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent_users(mut self, max: usize) -> Self {
        self.max_concurrent_users = max;
        self
    }

    pub fn with_remote_timeout(mut self, secs: u64) -> Self {
        self.remote_timeout_secs = secs;
        self
    }

    /// Set the claim retry backoff range.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_backoff_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Delay before the `attempt`-th consecutive claim retry (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.max(1).saturating_sub(1).min(16);
        let delay = self.base_backoff_ms.saturating_mul(1 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Event emitted by the dealer.
#[derive(Debug, Clone)]
pub enum DealerEvent {
    /// The dispatch loop started.
    DealerStarted,
    /// A poll claimed records.
    BatchClaimed { claimed: usize, groups: usize },
    /// A per-user task was spawned.
    UserBatchStarted { user_id: i64, updates: usize },
    /// A per-user task finished.
    UserBatchFinished(BatchOutcome),
    /// Something failed and was survived (or, for `Fatal`, ended the loop).
    Failure(FailureRecord),
    /// The dispatch loop stopped.
    DealerStopped,
}

/// Handle for controlling a running dealer.
pub struct DealerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<DealerEvent>,
    task: JoinHandle<Result<()>>,
    finished: bool,
}

impl DealerHandle {
    /// Ask the dealer to stop polling. In-flight user batches finish first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for dealer events.
    pub fn events(&self) -> broadcast::Receiver<DealerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the dispatch loop to end.
    ///
    /// Returns the fatal error that stopped the loop, if any. Safe to call
    /// again after it returned; later calls return `Ok(())`.
    pub async fn join(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let result = (&mut self.task).await;
        self.finished = true;
        match result {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("dealer task failed: {}", e))),
        }
    }
}

/// Claims pending updates and runs one processor task per user.
pub struct Dealer {
    queue: Arc<dyn UpdateQueue>,
    processor: UpdateProcessor,
    reporter: FailureReporter,
    config: DealerConfig,
    event_tx: broadcast::Sender<DealerEvent>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Dealer {
    /// Start the dispatch loop and return a handle for control.
    pub fn start(self) -> DealerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));
        DealerHandle {
            shutdown_tx,
            event_rx,
            task,
            finished: false,
        }
    }

    /// Get a receiver for dealer events.
    pub fn events(&self) -> broadcast::Receiver<DealerEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &DealerConfig {
        &self.config
    }

    /// Users with a processor currently running.
    pub fn in_flight_users(&self) -> Vec<i64> {
        let users = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        users.iter().copied().collect()
    }

    /// Run one poll: claim a batch and spawn its per-user tasks into `tasks`.
    ///
    /// Never lets `tasks` grow past `max_concurrent_users`; when the batch
    /// has more groups than free slots, waits for running tasks to finish.
    /// Returns the number of records claimed.
    pub async fn poll_once(&self, tasks: &mut UserTasks) -> Result<usize> {
        let filter = ClaimFilter::new().excluding(self.in_flight_users());
        let timeout = Duration::from_secs(self.config.remote_timeout_secs);
        let batch = match tokio::time::timeout(
            timeout,
            self.queue.claim_batch(self.config.batch_size, &filter),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(timeout.as_secs())),
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let claimed = batch.len();
        let groups = partition_by_user(batch);
        debug!(
            subsystem = "dealer",
            component = "loop",
            claimed,
            groups = groups.len(),
            excluded = filter.exclude_users.len(),
            "Claimed update batch"
        );
        let _ = self.event_tx.send(DealerEvent::BatchClaimed {
            claimed,
            groups: groups.len(),
        });

        let max_concurrent = self.config.max_concurrent_users.max(1);
        for (user_id, updates) in groups {
            // A batch can span more users than there are free slots.
            while tasks.len() >= max_concurrent {
                match tasks.set.join_next_with_id().await {
                    Some(result) => self.reap(tasks, result),
                    None => break,
                }
            }
            self.dispatch(tasks, user_id, updates).await;
        }
        Ok(claimed)
    }

    async fn dispatch(&self, tasks: &mut UserTasks, user_id: i64, updates: Vec<UpdateRecord>) {
        if updates.is_empty() {
            debug!(user_id, "Skipping empty user group");
            return;
        }

        let Some(guard) = InFlightGuard::acquire(self.in_flight.clone(), user_id) else {
            // Only reachable if the queue ignored the exclusion filter.
            warn!(user_id, "User already has a batch running, releasing records");
            let ids: Vec<_> = updates.iter().map(|u| u.id).collect();
            if let Err(e) = self.queue.release(&ids).await {
                self.reporter
                    .report(FailureRecord::from_error(FailureStage::Claim, &e).for_user(user_id));
            }
            return;
        };

        let _ = self.event_tx.send(DealerEvent::UserBatchStarted {
            user_id,
            updates: updates.len(),
        });
        let processor = self.processor.clone();
        let handle = tasks.set.spawn(async move {
            let _guard = guard;
            processor.process(user_id, updates).await
        });
        tasks.users.insert(handle.id(), user_id);
    }

    fn reap(&self, tasks: &mut UserTasks, result: TaskResult) {
        match result {
            Ok((id, outcome)) => {
                tasks.users.remove(&id);
                let _ = self.event_tx.send(DealerEvent::UserBatchFinished(outcome));
            }
            Err(e) => {
                let user_id = tasks.users.remove(&e.id());
                self.reporter.task_failed(user_id, &e);
            }
        }
    }

    /// Run the dispatch loop until shutdown or a fatal claim error.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "dealer", component = "loop"))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        if !self.config.enabled {
            info!("Dealer is disabled, not starting");
            return Ok(());
        }

        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent_users = self.config.max_concurrent_users,
            remote_timeout_secs = self.config.remote_timeout_secs,
            "Dealer started"
        );
        let _ = self.event_tx.send(DealerEvent::DealerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_users.max(1);
        let mut tasks = UserTasks::new();
        let mut claim_failures: u32 = 0;

        let result = loop {
            while let Some(result) = tasks.set.try_join_next_with_id() {
                self.reap(&mut tasks, result);
            }

            match shutdown_rx.try_recv() {
                Ok(()) => {
                    info!("Dealer received shutdown signal");
                    break Ok(());
                }
                Err(TryRecvError::Disconnected) => {
                    info!("Dealer handle dropped, stopping");
                    break Ok(());
                }
                Err(TryRecvError::Empty) => {}
            }

            if tasks.len() >= max_concurrent {
                // At the cap: wait for a slot instead of polling.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dealer received shutdown signal");
                        break Ok(());
                    }
                    Some(result) = tasks.set.join_next_with_id() => self.reap(&mut tasks, result),
                }
                continue;
            }

            match self.poll_once(&mut tasks).await {
                Ok(0) => {
                    claim_failures = 0;
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Dealer received shutdown signal");
                            break Ok(());
                        }
                        _ = sleep(poll_interval) => {}
                    }
                }
                Ok(_) => {
                    claim_failures = 0;
                }
                Err(e) if e.is_transient() => {
                    claim_failures = claim_failures.saturating_add(1);
                    let backoff = self.config.backoff_for_attempt(claim_failures);
                    self.reporter
                        .report(FailureRecord::from_error(FailureStage::Claim, &e));
                    debug!(
                        attempt = claim_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Backing off before next claim"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Dealer received shutdown signal");
                            break Ok(());
                        }
                        _ = sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    self.reporter
                        .report(FailureRecord::from_error(FailureStage::Fatal, &e));
                    break Err(e);
                }
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Draining in-flight user batches");
        }
        while let Some(result) = tasks.set.join_next_with_id().await {
            self.reap(&mut tasks, result);
        }

        let _ = self.event_tx.send(DealerEvent::DealerStopped);
        info!("Dealer stopped");
        result
    }
}

type TaskResult = std::result::Result<(tokio::task::Id, BatchOutcome), JoinError>;

/// Per-user tasks spawned by the dealer, with the user each one serves.
pub struct UserTasks {
    set: JoinSet<BatchOutcome>,
    users: HashMap<tokio::task::Id, i64>,
}

impl Default for UserTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl UserTasks {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
            users: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Wait for every task and collect the outcomes of those that finished.
    pub async fn join_all(mut self) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.set.len());
        while let Some(result) = self.set.join_next().await {
            if let Ok(outcome) = result {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

/// Marks a user as in flight until dropped.
struct InFlightGuard {
    users: Arc<Mutex<HashSet<i64>>>,
    user_id: i64,
}

impl InFlightGuard {
    fn acquire(users: Arc<Mutex<HashSet<i64>>>, user_id: i64) -> Option<Self> {
        let inserted = users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
        inserted.then_some(Self { users, user_id })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

/// Group records by user, keeping first-seen user order and per-user FIFO.
pub fn partition_by_user(records: Vec<UpdateRecord>) -> Vec<(i64, Vec<UpdateRecord>)> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<(i64, Vec<UpdateRecord>)> = Vec::new();
    for record in records {
        let slot = *index.entry(record.user_id).or_insert_with(|| {
            groups.push((record.user_id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }
    groups
}

/// Builder for creating a dealer with its collaborators.
pub struct DealerBuilder {
    queue: Arc<dyn UpdateQueue>,
    users: Arc<dyn UserRepository>,
    notes: Arc<dyn NoteStore>,
    chat: Arc<dyn ChatNotifier>,
    config: DealerConfig,
    handlers: HandlerRegistry,
}

impl DealerBuilder {
    /// Create a builder with the default config and built-in handlers.
    pub fn new(
        queue: Arc<dyn UpdateQueue>,
        users: Arc<dyn UserRepository>,
        notes: Arc<dyn NoteStore>,
        chat: Arc<dyn ChatNotifier>,
    ) -> Self {
        Self {
            queue,
            users,
            notes,
            chat,
            config: DealerConfig::default(),
            handlers: HandlerRegistry::with_defaults(),
        }
    }

    /// Set the dealer configuration.
    pub fn with_config(mut self, config: DealerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a content handler.
    pub fn with_handler<H: ContentHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.register(handler);
        self
    }

    /// Replace the handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Build and return the dealer.
    pub fn build(self) -> Dealer {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let reporter = FailureReporter::new(event_tx.clone());
        let processor = UpdateProcessor::new(
            self.queue.clone(),
            self.users,
            self.notes,
            self.chat,
            Arc::new(self.handlers),
            reporter.clone(),
        )
        .with_remote_timeout(Duration::from_secs(self.config.remote_timeout_secs));

        Dealer {
            queue: self.queue,
            processor,
            reporter,
            config: self.config,
            event_tx,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}
