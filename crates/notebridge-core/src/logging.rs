//! Structured logging field name constants for notebridge.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service or fatal dealer stop, requires operator attention |
//! | WARN  | Per-update or per-batch failure, left for a later pass |
//! | INFO  | Lifecycle events (startup, shutdown), batch completions |
//! | DEBUG | Decision points (mode, note re-creation), intermediate counts |
//! | TRACE | Per-record iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "dealer", "db", "notes", "chat", "daemon"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "loop", "processor", "reporter", "pool", "queue"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_batch", "one_note", "cleanup", "get_note"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owning user id of a batch or record.
pub const USER_ID: &str = "user_id";

/// Update record UUID.
pub const UPDATE_ID: &str = "update_id";

/// Remote note guid.
pub const NOTE_GUID: &str = "note_guid";

/// Notebook guid.
pub const NOTEBOOK_GUID: &str = "notebook_guid";

/// Request type of an update record.
pub const REQUEST_TYPE: &str = "request_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of records claimed in one poll.
pub const CLAIMED: &str = "claimed";

/// Number of user groups dispatched from one poll.
pub const GROUPS: &str = "groups";

/// Number of records committed in one pass.
pub const PROCESSED: &str = "processed";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
