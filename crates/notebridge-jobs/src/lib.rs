//! # notebridge-jobs
//!
//! The dealer: background dispatch of queued chat updates into notes.
//!
//! This crate provides:
//! - A dispatch loop that claims update batches and runs one task per user
//! - Per-user processing in one-note and multiple-note modes
//! - A content handler registry keyed by request type
//! - Failure reporting via structured logs and broadcast events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use notebridge_jobs::{DealerBuilder, DealerConfig};
//!
//! let dealer = DealerBuilder::new(queue, users, notes, chat)
//!     .with_config(DealerConfig::from_env())
//!     .build();
//!
//! // Start the dealer and get a handle
//! let mut handle = dealer.start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown, then wait for in-flight batches
//! handle.shutdown().await?;
//! handle.join().await?;
//! ```

pub mod dealer;
pub mod handler;
pub mod processor;
pub mod report;

// Re-export core types
pub use notebridge_core::*;

pub use dealer::{
    partition_by_user, Dealer, DealerBuilder, DealerConfig, DealerEvent, DealerHandle, UserTasks,
};
pub use handler::{ContentHandler, HandlerRegistry, TextHandler};
pub use processor::{BatchOutcome, UpdateProcessor};
pub use report::{FailureRecord, FailureReporter, FailureStage};
