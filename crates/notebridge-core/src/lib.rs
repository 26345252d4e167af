//! # notebridge-core
//!
//! Core types, traits, and abstractions for notebridge.
//!
//! This crate provides the data model shared by the dealer and its
//! collaborators, the error taxonomy, the collaborator traits (update queue,
//! user store, note store, chat), and the note content builder.

pub mod content;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use content::{derive_title, ContentBlock, NoteDraft, ENML_PROLOG};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
