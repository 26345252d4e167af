//! Failure reporting for the dealer.
//!
//! Every failure the dealer survives goes through [`FailureReporter`]: it is
//! logged with structured fields and broadcast as a [`DealerEvent::Failure`]
//! so operators and tests see the same record. Nothing here ever panics or
//! returns an error.

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, warn};
use uuid::Uuid;

use notebridge_core::{logging, Error, RequestType, UpdateRecord};

use crate::dealer::DealerEvent;

/// Where in a pass a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Claiming a batch from the queue.
    Claim,
    /// Loading the user owning a batch.
    LoadUser,
    /// Fetching the running note.
    FetchNote,
    /// Creating a note.
    CreateNote,
    /// Building content for one update.
    Content,
    /// Writing the merged running note back.
    WriteNote,
    /// Sending the chat confirmation.
    Notify,
    /// Deleting a committed record.
    Delete,
    /// A per-user task panicked or was cancelled.
    Task,
    /// The dispatch loop cannot continue.
    Fatal,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Claim => "claim",
            FailureStage::LoadUser => "load_user",
            FailureStage::FetchNote => "fetch_note",
            FailureStage::CreateNote => "create_note",
            FailureStage::Content => "content",
            FailureStage::WriteNote => "write_note",
            FailureStage::Notify => "notify",
            FailureStage::Delete => "delete",
            FailureStage::Task => "task",
            FailureStage::Fatal => "fatal",
        }
    }
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub stage: FailureStage,
    pub user_id: Option<i64>,
    pub update_id: Option<Uuid>,
    pub request_type: Option<RequestType>,
    pub note_guid: Option<String>,
    pub error: String,
    /// Whether a later pass may succeed without intervention.
    pub transient: bool,
}

impl FailureRecord {
    /// A failure described by a message only.
    pub fn new(stage: FailureStage, message: impl Into<String>, transient: bool) -> Self {
        Self {
            stage,
            user_id: None,
            update_id: None,
            request_type: None,
            note_guid: None,
            error: message.into(),
            transient,
        }
    }

    /// A failure caused by `err`.
    pub fn from_error(stage: FailureStage, err: &Error) -> Self {
        Self::new(stage, err.to_string(), err.is_transient())
    }

    pub fn for_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attribute the failure to one update record.
    pub fn for_update(mut self, update: &UpdateRecord) -> Self {
        self.user_id = Some(update.user_id);
        self.update_id = Some(update.id);
        self.request_type = Some(update.request_type.clone());
        self
    }

    pub fn with_note(mut self, guid: impl Into<String>) -> Self {
        self.note_guid = Some(guid.into());
        self
    }

    /// Flat JSON form keyed by the shared log field names.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert(logging::SUBSYSTEM.into(), json!("dealer"));
        map.insert(logging::COMPONENT.into(), json!("reporter"));
        map.insert(logging::OPERATION.into(), json!(self.stage.as_str()));
        if let Some(user_id) = self.user_id {
            map.insert(logging::USER_ID.into(), json!(user_id));
        }
        if let Some(update_id) = self.update_id {
            map.insert(logging::UPDATE_ID.into(), json!(update_id.to_string()));
        }
        if let Some(request_type) = &self.request_type {
            map.insert(logging::REQUEST_TYPE.into(), json!(request_type.as_str()));
        }
        if let Some(guid) = &self.note_guid {
            map.insert(logging::NOTE_GUID.into(), json!(guid));
        }
        map.insert(logging::SUCCESS.into(), json!(false));
        map.insert(logging::ERROR_MSG.into(), json!(self.error));
        map.insert("transient".into(), json!(self.transient));
        JsonValue::Object(map)
    }
}

/// Logs failures and broadcasts them as dealer events.
#[derive(Clone)]
pub struct FailureReporter {
    event_tx: broadcast::Sender<DealerEvent>,
}

impl FailureReporter {
    pub fn new(event_tx: broadcast::Sender<DealerEvent>) -> Self {
        Self { event_tx }
    }

    /// Log `record` at the level its stage calls for and broadcast it.
    pub fn report(&self, record: FailureRecord) {
        let fields = record.to_json();
        match record.stage {
            FailureStage::Fatal | FailureStage::Task => error!(
                subsystem = "dealer",
                component = "reporter",
                stage = record.stage.as_str(),
                user_id = record.user_id,
                error = %record.error,
                record = %fields,
                "Dealer failure"
            ),
            _ => warn!(
                subsystem = "dealer",
                component = "reporter",
                stage = record.stage.as_str(),
                user_id = record.user_id,
                update_id = ?record.update_id,
                transient = record.transient,
                error = %record.error,
                record = %fields,
                "Update processing failed, left for a later pass"
            ),
        }
        // No subscribers is fine.
        let _ = self.event_tx.send(DealerEvent::Failure(record));
    }

    /// Report a per-user task that panicked or was cancelled.
    pub fn task_failed(&self, user_id: Option<i64>, err: &JoinError) {
        let message = if err.is_panic() {
            format!("per-user task panicked: {}", err)
        } else {
            format!("per-user task cancelled: {}", err)
        };
        let mut record = FailureRecord::new(FailureStage::Task, message, true);
        record.user_id = user_id;
        self.report(record);
    }
}
