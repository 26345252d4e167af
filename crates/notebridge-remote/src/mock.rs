//! Mock note store and chat for deterministic testing.
//!
//! Both mocks can share a [`CallLog`], which records every finished call
//! with a global sequence number so tests can assert ordering across
//! collaborators (a note write completing before the chat confirmation,
//! for instance).
//!
//! ## Usage
//!
//! ```rust
//! use notebridge_remote::mock::{CallLog, MockChat, MockNoteStore};
//!
//! let log = CallLog::new();
//! let store = MockNoteStore::new().with_call_log(log.clone());
//! let chat = MockChat::new().with_call_log(log.clone());
//! store.fail_next_updates(1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use notebridge_core::{ChatNotifier, Error, NoteStore, RemoteNote, Result};

/// One finished call against a mock collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Position in the shared log.
    pub seq: usize,
    pub operation: String,
    /// Guid, chat id or message id the call addressed.
    pub target: String,
    /// Whether the call returned `Ok`.
    pub ok: bool,
}

/// Ordered record of calls, shareable between mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call; returns its sequence number.
    pub fn record(&self, operation: &str, target: impl Into<String>, ok: bool) -> usize {
        let mut calls = self.calls.lock().unwrap();
        let seq = calls.len();
        calls.push(MockCall {
            seq,
            operation: operation.to_string(),
            target: target.into(),
            ok,
        });
        seq
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to `operation`, successful or not.
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Sequence number of the first successful call matching both fields.
    pub fn first_ok(&self, operation: &str, target: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.ok && c.operation == operation && c.target == target)
            .map(|c| c.seq)
    }

    /// Sequence number of the last successful call to `operation`.
    pub fn last_ok(&self, operation: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.ok && c.operation == operation)
            .map(|c| c.seq)
    }

    /// Clear the call log.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear()
    }
}

#[derive(Debug, Default)]
struct NoteState {
    notes: HashMap<String, RemoteNote>,
    next_guid: u64,
    fail_gets: usize,
    fail_saves: usize,
    fail_updates: usize,
}

/// In-memory note store with failure injection.
#[derive(Clone)]
pub struct MockNoteStore {
    state: Arc<Mutex<NoteState>>,
    log: CallLog,
    latency_ms: u64,
    failure_rate: f64,
}

impl Default for MockNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNoteStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NoteState::default())),
            log: CallLog::new(),
            latency_ms: 0,
            failure_rate: 0.0,
        }
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Set simulated latency for all operations.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set failure rate (0.0 - 1.0) for every operation.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Store a note directly, assigning a guid when it has none.
    pub fn insert_note(&self, mut note: RemoteNote) -> String {
        let mut state = self.state.lock().unwrap();
        let guid = match note.guid.clone() {
            Some(guid) => guid,
            None => {
                state.next_guid += 1;
                format!("note-{}", state.next_guid)
            }
        };
        note.guid = Some(guid.clone());
        state.notes.insert(guid.clone(), note);
        guid
    }

    /// Delete a note behind the dealer's back.
    pub fn remove_note(&self, guid: &str) -> Option<RemoteNote> {
        self.state.lock().unwrap().notes.remove(guid)
    }

    /// Current copy of a note.
    pub fn note(&self, guid: &str) -> Option<RemoteNote> {
        self.state.lock().unwrap().notes.get(guid).cloned()
    }

    /// All stored notes, ordered by guid.
    pub fn notes(&self) -> Vec<RemoteNote> {
        let mut notes: Vec<RemoteNote> =
            self.state.lock().unwrap().notes.values().cloned().collect();
        notes.sort_by(|a, b| a.guid.cmp(&b.guid));
        notes
    }

    /// Make the next `n` fetches fail with a transient error.
    pub fn fail_next_gets(&self, n: usize) {
        self.state.lock().unwrap().fail_gets = n;
    }

    /// Make the next `n` creations fail with a transient error.
    pub fn fail_next_saves(&self, n: usize) {
        self.state.lock().unwrap().fail_saves = n;
    }

    /// Make the next `n` updates fail with a transient error.
    pub fn fail_next_updates(&self, n: usize) {
        self.state.lock().unwrap().fail_updates = n;
    }

    /// The log this store records into.
    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn random_failure(&self) -> bool {
        use rand::Rng;
        self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate
    }

    fn take_failure(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn finish<T>(&self, operation: &str, target: &str, result: Result<T>) -> Result<T> {
        self.log.record(operation, target, result.is_ok());
        result
    }
}

#[async_trait]
impl NoteStore for MockNoteStore {
    async fn get_note(&self, _token: &str, guid: &str) -> Result<RemoteNote> {
        self.simulate_latency().await;
        let fail = self.random_failure();
        let result = {
            let mut state = self.state.lock().unwrap();
            if Self::take_failure(&mut state.fail_gets) || fail {
                Err(Error::NoteStore("simulated fetch failure".into()))
            } else {
                state
                    .notes
                    .get(guid)
                    .cloned()
                    .ok_or_else(|| Error::NoteNotFound(guid.to_string()))
            }
        };
        self.finish("get_note", guid, result)
    }

    async fn save_note(&self, _token: &str, mut note: RemoteNote) -> Result<RemoteNote> {
        self.simulate_latency().await;
        let fail = self.random_failure();
        let result = {
            let mut state = self.state.lock().unwrap();
            if Self::take_failure(&mut state.fail_saves) || fail {
                Err(Error::NoteStore("simulated create failure".into()))
            } else {
                state.next_guid += 1;
                let guid = format!("note-{}", state.next_guid);
                note.guid = Some(guid.clone());
                state.notes.insert(guid, note.clone());
                Ok(note)
            }
        };
        let target = result
            .as_ref()
            .ok()
            .and_then(|n| n.guid.clone())
            .unwrap_or_default();
        self.finish("save_note", &target, result)
    }

    async fn update_note(&self, _token: &str, note: RemoteNote) -> Result<RemoteNote> {
        self.simulate_latency().await;
        let fail = self.random_failure();
        let guid = note.guid.clone().unwrap_or_default();
        let result = {
            let mut state = self.state.lock().unwrap();
            if Self::take_failure(&mut state.fail_updates) || fail {
                Err(Error::NoteStore("simulated update failure".into()))
            } else if !state.notes.contains_key(&guid) {
                Err(Error::NoteNotFound(guid.clone()))
            } else {
                state.notes.insert(guid.clone(), note.clone());
                Ok(note)
            }
        };
        self.finish("update_note", &guid, result)
    }
}

/// A message the mock chat accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    /// Set for edits, `None` for new messages.
    pub message_id: Option<i64>,
    pub text: String,
}

/// Chat platform mock recording every accepted message.
#[derive(Clone, Default)]
pub struct MockChat {
    messages: Arc<Mutex<Vec<SentMessage>>>,
    fail_next: Arc<Mutex<usize>>,
    log: CallLog,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record calls into a shared log.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock().unwrap() = n;
    }

    /// Messages accepted so far.
    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn accept(&self, operation: &str, target: String, message: SentMessage) -> Result<()> {
        let failed = {
            let mut fail_next = self.fail_next.lock().unwrap();
            MockNoteStore::take_failure(&mut fail_next)
        };
        self.log.record(operation, target, !failed);
        if failed {
            return Err(Error::Chat("simulated chat failure".into()));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

#[async_trait]
impl ChatNotifier for MockChat {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.accept(
            "send_text",
            chat_id.to_string(),
            SentMessage {
                chat_id,
                message_id: None,
                text: text.to_string(),
            },
        )
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        self.accept(
            "edit_message_text",
            format!("{}:{}", chat_id, message_id),
            SentMessage {
                chat_id,
                message_id: Some(message_id),
                text: text.to_string(),
            },
        )
    }
}
