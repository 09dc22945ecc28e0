//! Document content model.
//!
//! # Responsibility
//! - Define nodes, rich-text buffers, formatting tags and embedded objects.
//! - Provide the slot walk shared by serialization and export.
//!
//! # Invariants
//! - Buffer offsets count characters, one slot per embedded object.
//! - Formatting and embedded objects only exist in rich-text buffers.

pub mod buffer;
pub mod embedded;
pub mod node;
pub mod tag;
pub mod walk;
