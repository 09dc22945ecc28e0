//! Per-node undo/redo history.
//!
//! # Responsibility
//! - Keep bounded back/forward stacks of buffer snapshots for one node.
//! - Coalesce consecutive keystrokes into one entry.
//!
//! # Invariants
//! - `back.len() <= limit`; the oldest entry is evicted first.
//! - Every capture clears the forward stack, coalesced or not.
//! - `undo`/`redo` never fail; empty stacks make them no-ops.
//!
//! # See also
//! - `visited` for node navigation history.

pub mod visited;

use crate::model::buffer::RichBuffer;
use crate::model::embedded::EmbeddedObject;
use crate::model::node::SyntaxKind;
use crate::serialize::{buffer_from_fragment, buffer_to_fragment, SerializeError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use visited::VisitedNodes;

/// History depth used when none is configured.
pub const DEFAULT_UNDO_LIMIT: usize = 20;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshot capture or restore failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Buffer could not be written to its snapshot form.
    Capture(SerializeError),
    /// Stored snapshot no longer parses.
    Corrupt(SerializeError),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture(err) => write!(f, "snapshot capture failed: {err}"),
            Self::Corrupt(err) => write!(f, "corrupt snapshot: {err}"),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Capture(err) | Self::Corrupt(err) => Some(err),
        }
    }
}

/// Serialized state of one buffer plus the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Run list in canonical XML form.
    pub rich_text: String,
    /// Embedded objects at their snapshot offsets.
    pub embedded: Vec<EmbeddedObject>,
    pub cursor: usize,
    pub syntax: SyntaxKind,
}

impl Snapshot {
    pub fn take(buffer: &RichBuffer, cursor: usize) -> SnapshotResult<Self> {
        let (rich_text, embedded) = buffer_to_fragment(buffer).map_err(SnapshotError::Capture)?;
        Ok(Self {
            rich_text,
            embedded,
            cursor: cursor.min(buffer.len()),
            syntax: buffer.syntax().clone(),
        })
    }

    /// Rebuilds the buffer. On failure nothing is applied; the error is
    /// logged and returned.
    pub fn restore(&self) -> SnapshotResult<RichBuffer> {
        buffer_from_fragment(self.syntax.clone(), &self.rich_text, &self.embedded).map_err(|err| {
            warn!(
                "event=snapshot_restore module=history status=error objects={} error={err}",
                self.embedded.len()
            );
            SnapshotError::Corrupt(err)
        })
    }

    /// Kind tags of the embedded objects, in offset order.
    pub fn object_kinds(&self) -> Vec<&'static str> {
        self.embedded
            .iter()
            .map(|object| object.kind.kind_name())
            .collect()
    }
}

/// What kind of edit a capture precedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Single typed character; coalesces while recording.
    Keystroke,
    /// Newline insertion; always starts an entry.
    ParagraphBreak,
    /// Tag change, paste, delete, object placement.
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryState {
    #[default]
    Idle,
    Recording,
}

/// Bounded back/forward snapshot stacks for one node.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    back: VecDeque<Snapshot>,
    forward: Vec<Snapshot>,
    limit: usize,
    state: HistoryState,
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_LIMIT)
    }
}

impl UndoHistory {
    /// Creates a history keeping at most `limit` entries (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            back: VecDeque::new(),
            forward: Vec::new(),
            limit: limit.max(1),
            state: HistoryState::Idle,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn state(&self) -> HistoryState {
        self.state
    }

    pub fn can_undo(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.forward.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.back.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.forward.len()
    }

    /// Records the state preceding an edit of `kind`.
    ///
    /// Returns `true` when a new entry was pushed, `false` when the
    /// keystroke merged into the entry being recorded.
    pub fn capture(&mut self, kind: EditKind, snapshot: Snapshot) -> bool {
        self.forward.clear();
        if kind == EditKind::Keystroke && self.state == HistoryState::Recording {
            return false;
        }
        self.back.push_back(snapshot);
        while self.back.len() > self.limit {
            self.back.pop_front();
        }
        self.state = match kind {
            EditKind::Keystroke => HistoryState::Recording,
            EditKind::ParagraphBreak | EditKind::Structural => HistoryState::Idle,
        };
        debug!(
            "event=history_capture module=history status=ok kind={kind:?} depth={}",
            self.back.len()
        );
        true
    }

    /// Ends the current coalescing run.
    pub fn flush(&mut self) {
        self.state = HistoryState::Idle;
    }

    /// Pops the last entry, stashing `current` for redo.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.back.pop_back()?;
        self.forward.push(current);
        self.state = HistoryState::Idle;
        Some(previous)
    }

    /// Pops the last undone entry, stashing `current` for undo.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.forward.pop()?;
        self.back.push_back(current);
        while self.back.len() > self.limit {
            self.back.pop_front();
        }
        self.state = HistoryState::Idle;
        Some(next)
    }

    /// Changes the depth limit, evicting the oldest entries if needed.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        while self.back.len() > self.limit {
            self.back.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.back.clear();
        self.forward.clear();
        self.state = HistoryState::Idle;
    }
}
