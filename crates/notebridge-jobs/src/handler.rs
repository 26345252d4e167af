//! Content handlers for each request type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use notebridge_core::{derive_title, Error, NoteDraft, RequestType, Result, UpdateRecord};

/// Turns one update record into note content.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    /// The request type this handler builds content for.
    fn request_type(&self) -> RequestType;

    /// Append the update's content to `draft`.
    async fn append(&self, draft: &mut NoteDraft, update: &UpdateRecord) -> Result<()>;

    /// Title for a note created from this update alone.
    fn title(&self, update: &UpdateRecord) -> String {
        let explicit = update.data.get("title").and_then(JsonValue::as_str);
        derive_title(explicit, update.text())
    }
}

/// Plain text messages.
pub struct TextHandler;

#[async_trait]
impl ContentHandler for TextHandler {
    fn request_type(&self) -> RequestType {
        RequestType::Text
    }

    async fn append(&self, draft: &mut NoteDraft, update: &UpdateRecord) -> Result<()> {
        draft.add_text(update.text());
        Ok(())
    }
}

/// Request type to handler lookup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<RequestType, Arc<dyn ContentHandler>>,
}

impl HandlerRegistry {
    /// An empty registry. Every request type is unsupported.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TextHandler);
        registry
    }

    /// Register a handler, replacing any previous one for its type.
    pub fn register<H: ContentHandler + 'static>(&mut self, handler: H) {
        let request_type = handler.request_type();
        debug!(request_type = %request_type, "Registered content handler");
        self.handlers.insert(request_type, Arc::new(handler));
    }

    /// Look up the handler for `request_type`.
    pub fn get(&self, request_type: &RequestType) -> Result<Arc<dyn ContentHandler>> {
        self.handlers
            .get(request_type)
            .cloned()
            .ok_or_else(|| Error::UnsupportedRequestType(request_type.to_string()))
    }

    pub fn supports(&self, request_type: &RequestType) -> bool {
        self.handlers.contains_key(request_type)
    }

    /// Append `update` to `draft` through its handler.
    pub async fn append(&self, draft: &mut NoteDraft, update: &UpdateRecord) -> Result<()> {
        self.get(&update.request_type)?.append(draft, update).await
    }
}
