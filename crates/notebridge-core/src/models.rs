//! Core data models for notebridge.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// UPDATE RECORDS
// =============================================================================

/// Kind of inbound chat event carried by an update record.
///
/// Only [`RequestType::Text`] has a content handler today; the other
/// variants are recognised so they can be logged and left in the queue
/// until a handler exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RequestType {
    #[default]
    Text,
    Photo,
    Voice,
    Document,
    Location,
    /// A type this build does not know about.
    Other(String),
}

impl RequestType {
    /// Wire name as stored in the queue.
    pub fn as_str(&self) -> &str {
        match self {
            RequestType::Text => "text",
            RequestType::Photo => "photo",
            RequestType::Voice => "voice",
            RequestType::Document => "document",
            RequestType::Location => "location",
            RequestType::Other(s) => s.as_str(),
        }
    }

    /// Parse a stored request type. Missing or empty values mean text.
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(str::trim) {
            None | Some("") | Some("text") => RequestType::Text,
            Some("photo") => RequestType::Photo,
            Some("voice") => RequestType::Voice,
            Some("document") => RequestType::Document,
            Some("location") => RequestType::Location,
            Some(other) => RequestType::Other(other.to_string()),
        }
    }

    /// Capitalized label used in chat confirmations ("Text", "Photo").
    pub fn label(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RequestType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RequestType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(RequestType::parse(s.as_deref()))
    }
}

/// One inbound event waiting in the update queue.
///
/// The claim flag is the exclusivity token: a claimed record belongs to the
/// claiming pass until it is deleted or its claim lease expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: Uuid,
    pub user_id: i64,
    #[serde(default)]
    pub request_type: RequestType,
    /// Opaque payload as received from the chat platform.
    pub data: JsonValue,
    /// Chat where the status message lives.
    pub chat_id: i64,
    /// Message edited into the "saved" confirmation.
    pub status_message_id: Option<i64>,
    pub in_process: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UpdateRecord {
    /// Text carried in the payload, empty when absent.
    pub fn text(&self) -> &str {
        self.data
            .get("text")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
    }
}

/// Request to enqueue a new update record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUpdate {
    pub user_id: i64,
    pub request_type: RequestType,
    pub data: JsonValue,
    pub chat_id: i64,
    pub status_message_id: Option<i64>,
}

impl NewUpdate {
    /// Convenience constructor for a text update.
    pub fn text(user_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            user_id,
            request_type: RequestType::Text,
            data: serde_json::json!({ "text": text.into() }),
            chat_id,
            status_message_id: None,
        }
    }

    /// Set the status message id.
    pub fn with_status_message(mut self, message_id: i64) -> Self {
        self.status_message_id = Some(message_id);
        self
    }

    /// Override the request type.
    pub fn with_request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }
}

/// Predicate applied by the queue when claiming a batch.
#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    /// Users whose records must not be claimed (they have a pass running).
    pub exclude_users: Vec<i64>,
}

impl ClaimFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude these users from the claim.
    pub fn excluding(mut self, users: impl IntoIterator<Item = i64>) -> Self {
        self.exclude_users.extend(users);
        self
    }

    /// Whether a record owned by `user_id` may be claimed.
    pub fn admits(&self, user_id: i64) -> bool {
        !self.exclude_users.contains(&user_id)
    }
}

// =============================================================================
// USERS
// =============================================================================

/// How a user's updates are turned into notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteMode {
    /// All updates accumulate into one running note per notebook.
    #[default]
    OneNote,
    /// Every update becomes its own note.
    MultipleNote,
}

impl NoteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteMode::OneNote => "one_note",
            NoteMode::MultipleNote => "multiple_note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_note" => Some(NoteMode::OneNote),
            "multiple_note" => Some(NoteMode::MultipleNote),
            _ => None,
        }
    }
}

/// Notebook the user currently writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Notebook {
    pub guid: String,
    pub name: String,
}

/// A chat user linked to a note store account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub chat_id: i64,
    /// Credential passed to every note store call.
    pub access_token: String,
    pub mode: NoteMode,
    pub current_notebook: Notebook,
    /// Notebook guid to the guid of the running note used in one-note mode.
    #[serde(default)]
    pub places: HashMap<String, String>,
}

impl User {
    /// Guid of the running note in the current notebook, if any.
    pub fn default_note_guid(&self) -> Option<&str> {
        self.places
            .get(&self.current_notebook.guid)
            .map(String::as_str)
    }

    /// Point the current notebook's running note at `note_guid`.
    pub fn set_default_note(&mut self, note_guid: impl Into<String>) {
        self.places
            .insert(self.current_notebook.guid.clone(), note_guid.into());
    }
}

// =============================================================================
// REMOTE NOTES
// =============================================================================

/// A file attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub mime: String,
    pub file_name: Option<String>,
    /// Raw bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Lowercase hex md5 of `data`, referenced from the note body.
    pub hash: String,
}

impl Resource {
    /// Build a resource, computing its body hash.
    pub fn new(mime: impl Into<String>, data: Vec<u8>, file_name: Option<String>) -> Self {
        let hash = format!("{:x}", md5::compute(&data));
        Self {
            mime: mime.into(),
            file_name,
            data,
            hash,
        }
    }
}

/// The note store's representation of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNote {
    /// Assigned by the store on creation.
    pub guid: Option<String>,
    pub title: String,
    pub notebook_guid: Option<String>,
    /// Body in the store's markup (ENML).
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl RemoteNote {
    /// A new, unsaved note.
    pub fn new(title: impl Into<String>, notebook_guid: Option<String>) -> Self {
        Self {
            guid: None,
            title: title.into(),
            notebook_guid,
            content: String::new(),
            resources: Vec::new(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
