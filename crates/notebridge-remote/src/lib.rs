//! # notebridge-remote
//!
//! Adapters for the two remote collaborators of the dealer.
//!
//! This crate provides:
//! - [`HttpNoteStore`], a JSON/HTTP client for the note store gateway
//! - [`TelegramNotifier`], a Bot API client for chat confirmations
//! - Mock collaborators with call logs (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockNoteStore`] and [`mock::MockChat`]

pub mod note_store;
pub mod telegram;

// Mock collaborators for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use notebridge_core::*;

pub use note_store::{HttpNoteStore, NOTE_STORE_TIMEOUT_SECS};
pub use telegram::{TelegramConfig, TelegramNotifier, TELEGRAM_TIMEOUT_SECS};
