//! HTTP note store adapter.
//!
//! Talks JSON to a note-service gateway that fronts the note-taking
//! service's native API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch | `GET {base}/notes/{guid}` |
//! | create | `POST {base}/notes` |
//! | update | `PUT {base}/notes/{guid}` |
//!
//! Every request carries the user's credential as a bearer token. A 404 on
//! fetch or update is reported as [`Error::NoteNotFound`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use notebridge_core::{defaults, Error, NoteStore, RemoteNote, Result};

/// Timeout for note store requests (seconds).
pub const NOTE_STORE_TIMEOUT_SECS: u64 = defaults::REMOTE_TIMEOUT_SECS;

/// JSON/HTTP note store client.
#[derive(Clone)]
pub struct HttpNoteStore {
    client: Client,
    base_url: String,
}

impl HttpNoteStore {
    /// Create a client for `base_url` with the given request timeout.
    pub fn with_config(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        info!(
            subsystem = "notes",
            component = "http_store",
            base_url = %base_url,
            timeout_secs = timeout.as_secs(),
            "Initializing note store client"
        );

        Ok(Self { client, base_url })
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `NOTE_STORE_URL` | `http://localhost:8080` |
    /// | `NOTE_STORE_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("NOTE_STORE_URL")
            .unwrap_or_else(|_| defaults::NOTE_STORE_URL.to_string());
        let timeout = std::env::var("NOTE_STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(NOTE_STORE_TIMEOUT_SECS);
        Self::with_config(base_url, Duration::from_secs(timeout))
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn note_url(&self, guid: &str) -> String {
        format!("{}/notes/{}", self.base_url, guid)
    }

    async fn read_note(response: Response, guid: Option<&str>) -> Result<RemoteNote> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NoteNotFound(guid.unwrap_or_default().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                subsystem = "notes",
                component = "http_store",
                status = status.as_u16(),
                "Note store returned an error"
            );
            return Err(Error::NoteStore(format!("{}: {}", status, body)));
        }
        Ok(response.json::<RemoteNote>().await?)
    }
}

#[async_trait]
impl NoteStore for HttpNoteStore {
    #[instrument(skip(self, token), fields(subsystem = "notes", op = "get_note"))]
    async fn get_note(&self, token: &str, guid: &str) -> Result<RemoteNote> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.note_url(guid))
            .bearer_auth(token)
            .send()
            .await?;
        let note = Self::read_note(response, Some(guid)).await?;
        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched note"
        );
        Ok(note)
    }

    #[instrument(skip(self, token, note), fields(subsystem = "notes", op = "save_note"))]
    async fn save_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/notes", self.base_url))
            .bearer_auth(token)
            .json(&note)
            .send()
            .await?;
        let saved = Self::read_note(response, None).await?;
        if saved.guid.is_none() {
            return Err(Error::NoteStore(
                "created note came back without a guid".into(),
            ));
        }
        debug!(
            note_guid = saved.guid.as_deref().unwrap_or_default(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Created note"
        );
        Ok(saved)
    }

    #[instrument(skip(self, token, note), fields(subsystem = "notes", op = "update_note"))]
    async fn update_note(&self, token: &str, note: RemoteNote) -> Result<RemoteNote> {
        let guid = note
            .guid
            .clone()
            .ok_or_else(|| Error::InvalidInput("cannot update a note without a guid".into()))?;
        let start = Instant::now();
        let response = self
            .client
            .put(self.note_url(&guid))
            .bearer_auth(token)
            .json(&note)
            .send()
            .await?;
        let updated = Self::read_note(response, Some(&guid)).await?;
        debug!(
            note_guid = %guid,
            duration_ms = start.elapsed().as_millis() as u64,
            "Updated note"
        );
        Ok(updated)
    }
}
