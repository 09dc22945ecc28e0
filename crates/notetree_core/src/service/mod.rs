//! Core use-case services.
//!
//! # Responsibility
//! - Combine tree, tag table, undo histories and navigation into one
//!   editing session.
//! - Keep callers away from snapshot and history bookkeeping.
//!
//! # See also
//! - `history` for coalescing rules.

pub mod document;

pub use document::{DocumentSession, SessionError, SessionResult};
