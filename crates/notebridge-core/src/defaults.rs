//! Centralized default constants for notebridge.
//!
//! All crates and the daemon reference these constants instead of defining
//! their own magic numbers. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// DEALER
// =============================================================================

/// Maximum number of update records claimed per poll cycle.
pub const DEALER_BATCH_SIZE: i64 = 100;

/// Sleep between polls when the queue is empty, in milliseconds.
pub const DEALER_POLL_INTERVAL_MS: u64 = 500;

/// Maximum number of per-user processors running at once.
pub const DEALER_MAX_CONCURRENT_USERS: usize = 32;

/// First backoff step after a failed claim, in milliseconds.
pub const DEALER_BASE_BACKOFF_MS: u64 = 500;

/// Backoff ceiling after repeated failed claims, in milliseconds.
pub const DEALER_MAX_BACKOFF_MS: u64 = 30_000;

/// Deadline for any single remote call (note store, chat, user store).
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Dealer event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// QUEUE
// =============================================================================

/// Age after which a claim is considered abandoned and the record becomes
/// claimable again. Zero disables expiry.
pub const CLAIM_LEASE_SECS: u64 = 600;

// =============================================================================
// NOTES
// =============================================================================

/// Title used for the running note created in one-note mode.
pub const DEFAULT_NOTE_TITLE: &str = "Note for Notebridge";

/// Texts longer than this (in characters) get a truncated title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Number of characters kept when a title is truncated.
pub const TITLE_TRUNCATED_CHARS: usize = 25;

/// Appended to a truncated title.
pub const TITLE_ELLIPSIS: &str = "...";

// =============================================================================
// ADAPTERS
// =============================================================================

/// Default note store gateway URL.
pub const NOTE_STORE_URL: &str = "http://localhost:8080";

/// Default Telegram Bot API base URL.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
