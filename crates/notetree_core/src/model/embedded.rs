//! Embedded objects anchored at buffer offsets.
//!
//! # Responsibility
//! - Define the embedded object variants carried by rich-text buffers.
//! - Keep objects ordered by offset and shift them as text changes.
//!
//! # Invariants
//! - At most one object per offset.
//! - Iteration is always ascending by offset.

use crate::model::tag::LinkTarget;
use std::collections::BTreeMap;

/// Object-replacement character occupying an embedded object's slot.
pub const OBJECT_PLACEHOLDER: char = '\u{FFFC}';

/// Horizontal alignment of an embedded object or paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Justification {
    #[default]
    Left,
    Center,
    Right,
    Fill,
}

impl Justification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::Fill => "fill",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            "fill" => Some(Self::Fill),
            _ => None,
        }
    }
}

/// Table payload. The first row is the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
    pub column_widths: Vec<u32>,
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Code box payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBox {
    pub source: String,
    /// Syntax language id, or `plain-text`.
    pub language: String,
    pub width: u32,
    pub height: u32,
    pub width_in_pixels: bool,
    pub highlight_brackets: bool,
    pub show_line_numbers: bool,
}

impl Default for CodeBox {
    fn default() -> Self {
        Self {
            source: String::new(),
            language: "plain-text".to_string(),
            width: 500,
            height: 100,
            width_in_pixels: true,
            highlight_brackets: true,
            show_line_numbers: false,
        }
    }
}

/// Embedded object variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedKind {
    Image { png: Vec<u8>, link: Option<LinkTarget> },
    Table(Table),
    CodeBox(CodeBox),
    Anchor { name: String },
    LinkMarker { target: LinkTarget },
}

impl EmbeddedKind {
    /// Element/kind name used by the serializer and in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Image { .. } => "image",
            Self::Table(_) => "table",
            Self::CodeBox(_) => "codebox",
            Self::Anchor { .. } => "anchor",
            Self::LinkMarker { .. } => "link",
        }
    }
}

/// One embedded object occupying a single buffer offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedObject {
    pub offset: usize,
    pub kind: EmbeddedKind,
    pub justification: Justification,
}

/// Ordered offset -> object registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedObjectStore {
    objects: BTreeMap<usize, EmbeddedObject>,
}

impl EmbeddedObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one object at its own offset.
    ///
    /// Returns the rejected object when the offset is already occupied.
    pub fn insert(&mut self, object: EmbeddedObject) -> Result<(), EmbeddedObject> {
        if self.objects.contains_key(&object.offset) {
            return Err(object);
        }
        self.objects.insert(object.offset, object);
        Ok(())
    }

    pub fn get(&self, offset: usize) -> Option<&EmbeddedObject> {
        self.objects.get(&offset)
    }

    pub fn get_mut(&mut self, offset: usize) -> Option<&mut EmbeddedObject> {
        self.objects.get_mut(&offset)
    }

    pub fn remove(&mut self, offset: usize) -> Option<EmbeddedObject> {
        self.objects.remove(&offset)
    }

    /// Objects with `start <= offset < end`, ascending.
    pub fn iter_in_range(&self, start: usize, end: usize) -> impl Iterator<Item = &EmbeddedObject> {
        let end = end.max(start);
        self.objects.range(start..end).map(|(_, object)| object)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmbeddedObject> {
        self.objects.values()
    }

    /// Payload access; offsets must not be changed through this iterator.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut EmbeddedObject> {
        self.objects.values_mut()
    }

    /// Moves every object at `offset >= from_offset` by `delta`.
    ///
    /// Callers remove objects inside a deleted range before shifting left.
    pub fn shift(&mut self, from_offset: usize, delta: isize) {
        if delta == 0 {
            return;
        }
        let moved = self.objects.split_off(&from_offset);
        for (_, mut object) in moved {
            object.offset = object.offset.saturating_add_signed(delta);
            self.objects.insert(object.offset, object);
        }
    }

    /// Removes and returns every object in `[start, end)`.
    pub fn drain_range(&mut self, start: usize, end: usize) -> Vec<EmbeddedObject> {
        let offsets: Vec<usize> = self.objects.range(start..end.max(start)).map(|(k, _)| *k).collect();
        offsets
            .into_iter()
            .filter_map(|offset| self.objects.remove(&offset))
            .collect()
    }

    /// Named anchors, ascending by offset.
    pub fn anchors(&self) -> impl Iterator<Item = (usize, &str)> {
        self.objects.values().filter_map(|object| match &object.kind {
            EmbeddedKind::Anchor { name } => Some((object.offset, name.as_str())),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{EmbeddedKind, EmbeddedObject, EmbeddedObjectStore, Justification};

    fn anchor(offset: usize, name: &str) -> EmbeddedObject {
        EmbeddedObject {
            offset,
            kind: EmbeddedKind::Anchor {
                name: name.to_string(),
            },
            justification: Justification::Left,
        }
    }

    #[test]
    fn insert_rejects_offset_collision() {
        let mut store = EmbeddedObjectStore::new();
        store.insert(anchor(3, "a")).expect("first insert should succeed");
        let rejected = store.insert(anchor(3, "b")).expect_err("collision must fail");
        assert_eq!(rejected.offset, 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn shift_moves_only_tail_objects() {
        let mut store = EmbeddedObjectStore::new();
        store.insert(anchor(1, "a")).expect("insert a");
        store.insert(anchor(5, "b")).expect("insert b");
        store.insert(anchor(9, "c")).expect("insert c");

        store.shift(5, 3);
        let offsets: Vec<usize> = store.iter().map(|object| object.offset).collect();
        assert_eq!(offsets, vec![1, 8, 12]);

        store.shift(8, -2);
        let offsets: Vec<usize> = store.iter().map(|object| object.offset).collect();
        assert_eq!(offsets, vec![1, 6, 10]);
    }

    #[test]
    fn iter_in_range_is_half_open_and_ascending() {
        let mut store = EmbeddedObjectStore::new();
        for (offset, name) in [(4, "x"), (0, "y"), (2, "z")] {
            store.insert(anchor(offset, name)).expect("insert");
        }
        let names: Vec<&str> = store.anchors().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["y", "z", "x"]);
        let in_range: Vec<usize> = store.iter_in_range(0, 4).map(|o| o.offset).collect();
        assert_eq!(in_range, vec![0, 2]);
    }
}
