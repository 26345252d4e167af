//! Collaborator traits for notebridge.
//!
//! The dealer only talks to the outside world through these traits:
//! the durable update queue, the user store, the remote note store and the
//! chat platform. Concrete implementations live in `notebridge-db` and
//! `notebridge-remote`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// UPDATE QUEUE
// =============================================================================

/// Durable store of inbound update records.
#[async_trait]
pub trait UpdateQueue: Send + Sync {
    /// Append a new record, returning its id.
    async fn enqueue(&self, update: NewUpdate) -> Result<Uuid>;

    /// Atomically claim up to `limit` unclaimed records admitted by `filter`,
    /// oldest first.
    ///
    /// A record is never returned to two concurrent callers.
    async fn claim_batch(&self, limit: i64, filter: &ClaimFilter) -> Result<Vec<UpdateRecord>>;

    /// Remove a record. Returns `false` when it was already gone.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Clear the claim flag on the given records.
    async fn release(&self, ids: &[Uuid]) -> Result<u64>;

    /// Number of records not currently claimed.
    async fn pending_count(&self) -> Result<i64>;
}

// =============================================================================
// USER STORE
// =============================================================================

/// Persistence for user settings read by the dealer.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Load a user. Fails with `Error::UserNotFound` when absent.
    async fn get(&self, user_id: i64) -> Result<User>;

    /// Persist the mutable fields of a user (mode, notebook, places).
    async fn save(&self, user: &User) -> Result<()>;
}

// =============================================================================
// REMOTE NOTE STORE
// =============================================================================

/// Client for the remote note-taking service.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Fetch a note. Fails with `Error::NoteNotFound` when the store has no
    /// such note.
    async fn get_note(&self, token: &str, guid: &str) -> Result<RemoteNote>;

    /// Create a note; the returned copy carries the assigned guid.
    async fn save_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote>;

    /// Overwrite an existing note's content and resources.
    async fn update_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote>;
}

// =============================================================================
// CHAT
// =============================================================================

/// The chat platform the updates came from.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Send a new message.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Replace the text of an existing message.
    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;
}
