//! Core document engine for NoteTree.
//! Owns the node tree, rich-text buffers, undo histories, the XML document
//! format and the derived export formats.

pub mod cancel;
pub mod config;
pub mod export;
pub mod history;
pub mod logging;
pub mod model;
pub mod serialize;
pub mod service;
pub mod tree;
mod xml;

pub use cancel::CancelToken;
pub use config::{ConfigError, EngineConfig, HtmlOptions, PlainTextOptions, PrintOptions};
pub use export::{
    DanglingReason, DanglingReference, ExportError, ExportReport, ExportResult, ExportScope,
    Exporter, HtmlExport, HtmlExporter, PlainTextExport, PlainTextExporter, PrintExport,
    PrintExporter,
};
pub use history::{
    EditKind, HistoryState, Snapshot, SnapshotError, UndoHistory, VisitedNodes,
    DEFAULT_UNDO_LIMIT,
};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::buffer::{BufferError, BufferResult, DeletedSlice, Heading, RichBuffer, Run, TagChange};
pub use model::embedded::{
    CodeBox, EmbeddedKind, EmbeddedObject, EmbeddedObjectStore, Justification, Table,
    OBJECT_PLACEHOLDER,
};
pub use model::node::{Node, NodeId, SyntaxKind};
pub use model::tag::{LinkTarget, TagEntry, TagError, TagProperty, TagTable};
pub use model::walk::{Segment, SlotWalk, Span};
pub use serialize::{
    deserialize, serialize_node, serialize_subtree, serialize_subtree_with_cancel, serialize_tree,
    serialize_tree_with_cancel, MalformedReason, SerializeError, SerializeResult,
};
pub use service::{DocumentSession, SessionError, SessionResult};
pub use tree::{DocumentTree, IdPolicy, TreeError, TreeResult};
pub use xml::XmlError;
