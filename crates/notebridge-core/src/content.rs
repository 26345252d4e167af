//! Note content building.
//!
//! A [`NoteDraft`] wraps a [`RemoteNote`] (fetched or freshly constructed),
//! keeps the body that was already there, and appends new blocks and
//! attachments. The body is rendered as ENML, the note store's XHTML
//! dialect. Rendering is deterministic: the same note and the same blocks
//! always produce the same string.

use crate::defaults::{TITLE_ELLIPSIS, TITLE_MAX_CHARS, TITLE_TRUNCATED_CHARS};
use crate::models::{RemoteNote, Resource};

/// XML prolog and doctype every ENML document starts with.
pub const ENML_PROLOG: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<!DOCTYPE en-note SYSTEM "http://xml.evernote.com/pub/enml2.dtd">"#
);

/// One unit of appended content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    /// Inline reference to an attached resource.
    Media { mime: String, hash: String },
}

impl ContentBlock {
    fn render(&self, out: &mut String) {
        match self {
            ContentBlock::Text(text) => {
                out.push_str("<div>");
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 {
                        out.push_str("<br/>");
                    }
                    escape_into(line.trim_end_matches('\r'), out);
                }
                out.push_str("</div>");
            }
            ContentBlock::Media { mime, hash } => {
                out.push_str("<div><en-media type=\"");
                escape_into(mime, out);
                out.push_str("\" hash=\"");
                escape_into(hash, out);
                out.push_str("\"/></div>");
            }
        }
    }
}

/// In-memory accumulation of content for a single remote write.
#[derive(Debug, Clone)]
pub struct NoteDraft {
    note: RemoteNote,
    existing_body: String,
    blocks: Vec<ContentBlock>,
    resources: Vec<Resource>,
}

impl NoteDraft {
    /// Start a draft for a note that does not exist remotely yet.
    pub fn new(title: impl Into<String>, notebook_guid: Option<String>) -> Self {
        Self::wrap(RemoteNote::new(title, notebook_guid))
    }

    /// Start a draft on top of an existing note, keeping its body and
    /// attachments.
    pub fn wrap(mut note: RemoteNote) -> Self {
        let existing_body = extract_body(&note.content);
        let resources = std::mem::take(&mut note.resources);
        Self {
            note,
            existing_body,
            blocks: Vec::new(),
            resources,
        }
    }

    /// Append a text block.
    pub fn add_text(&mut self, text: &str) {
        self.blocks.push(ContentBlock::Text(text.to_string()));
    }

    /// Attach a resource and reference it from the body.
    pub fn add_resource(&mut self, resource: Resource) {
        self.blocks.push(ContentBlock::Media {
            mime: resource.mime.clone(),
            hash: resource.hash.clone(),
        });
        self.resources.push(resource);
    }

    /// All attachments, pre-existing ones first.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Blocks appended since the draft was created.
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    /// Whether anything was appended.
    pub fn has_changes(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Guid of the wrapped note, if it exists remotely.
    pub fn guid(&self) -> Option<&str> {
        self.note.guid.as_deref()
    }

    /// Render the full ENML document.
    pub fn content(&self) -> String {
        let mut out = String::with_capacity(
            ENML_PROLOG.len() + self.existing_body.len() + 64 * (self.blocks.len() + 1),
        );
        out.push_str(ENML_PROLOG);
        out.push_str("<en-note>");
        out.push_str(&self.existing_body);
        for block in &self.blocks {
            block.render(&mut out);
        }
        out.push_str("</en-note>");
        out
    }

    /// Produce the note to send to the store.
    pub fn into_note(self) -> RemoteNote {
        let content = self.content();
        let mut note = self.note;
        note.content = content;
        note.resources = self.resources;
        note
    }
}

/// Derive a note title from an update's text.
///
/// An explicit title always wins. Texts longer than 30 characters are cut
/// to their first 25 characters followed by `...`; shorter texts are used
/// as-is, so empty text gives an empty title.
pub fn derive_title(explicit: Option<&str>, text: &str) -> String {
    if let Some(title) = explicit {
        return title.to_string();
    }
    if text.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = text.chars().take(TITLE_TRUNCATED_CHARS).collect();
        title.push_str(TITLE_ELLIPSIS);
        title
    } else {
        text.to_string()
    }
}

/// Inner markup of the `<en-note>` element.
///
/// Content without an `en-note` element is treated as plain text.
fn extract_body(content: &str) -> String {
    let Some(open) = content.find("<en-note") else {
        if content.trim().is_empty() {
            return String::new();
        }
        let mut out = String::new();
        ContentBlock::Text(content.to_string()).render(&mut out);
        return out;
    };
    let Some(open_end) = content[open..].find('>').map(|i| open + i) else {
        return String::new();
    };
    if content[..open_end].ends_with('/') {
        return String::new();
    }
    let start = open_end + 1;
    match content.rfind("</en-note>") {
        Some(close) if close >= start => content[start..close].to_string(),
        _ => content[start..].to_string(),
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
}
