//! Rich-text buffer: characters, formatting runs and embedded objects.
//!
//! # Responsibility
//! - Own one node's text, its tag runs and its embedded objects.
//! - Keep run boundaries and object offsets consistent across edits.
//! - Implement tag application rules per property class.
//!
//! # Invariants
//! - Runs are contiguous, non-empty, cover `0..len` and adjacent runs differ.
//! - Every embedded object sits on exactly one placeholder character.
//! - Placeholder slots never carry tags.
//! - Only rich-text buffers hold tags or embedded objects.
//! - Range arguments are validated, never clamped.

use crate::model::embedded::{
    EmbeddedKind, EmbeddedObject, EmbeddedObjectStore, Justification, OBJECT_PLACEHOLDER,
};
use crate::model::node::{NodeId, SyntaxKind};
use crate::model::tag::{parse_tag_name, tag_name, LinkTarget, TagError, TagProperty, TagRule};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::Range;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w-]+").expect("valid word regex"));

pub type BufferResult<T> = Result<T, BufferError>;

/// Errors from rich-text buffer operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Offset or range outside `0..=len`, or `start > end`.
    OutOfRange { start: usize, end: usize, len: usize },
    /// Operation requires a rich-text buffer.
    InvalidForSyntax {
        operation: &'static str,
        syntax: String,
    },
    /// Paragraph-scoped operation on an empty buffer.
    NoParagraph,
    /// Cursor-only formatting found no word to act on.
    NoSelection { cursor: usize },
    /// No embedded object at the given offset.
    NoEmbeddedObject(usize),
    /// Two embedded objects claimed the same offset.
    OffsetCollision(usize),
    /// Tag name failed validation.
    InvalidTag(TagError),
}

impl Display for BufferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { start, end, len } => {
                write!(f, "range {start}..{end} out of bounds for length {len}")
            }
            Self::InvalidForSyntax { operation, syntax } => {
                write!(f, "`{operation}` requires rich text, buffer syntax is `{syntax}`")
            }
            Self::NoParagraph => write!(f, "buffer has no paragraph"),
            Self::NoSelection { cursor } => write!(f, "no word at cursor {cursor}"),
            Self::NoEmbeddedObject(offset) => write!(f, "no embedded object at offset {offset}"),
            Self::OffsetCollision(offset) => {
                write!(f, "embedded object offset collision at {offset}")
            }
            Self::InvalidTag(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidTag(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TagError> for BufferError {
    fn from(value: TagError) -> Self {
        Self::InvalidTag(value)
    }
}

/// Half-open character range sharing one tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub end: usize,
    pub tags: BTreeSet<String>,
}

impl Run {
    pub fn new(start: usize, end: usize, tags: BTreeSet<String>) -> Self {
        Self { start, end, tags }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Content removed by `delete`, with run and object offsets relative to the
/// start of the removed range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedSlice {
    pub text: String,
    pub runs: Vec<Run>,
    pub objects: Vec<EmbeddedObject>,
}

impl DeletedSlice {
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Removed text without object placeholders.
    pub fn plain_text(&self) -> String {
        self.text.chars().filter(|c| *c != OBJECT_PLACEHOLDER).collect()
    }
}

/// Outcome of one `apply_tag` call, with the effective range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagChange {
    Added { start: usize, end: usize },
    Removed { start: usize, end: usize },
    Unchanged,
}

/// One `scale_h1..h3` heading with its stable anchor name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub anchor: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Rich-text buffer of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichBuffer {
    syntax: SyntaxKind,
    text: Vec<char>,
    runs: Vec<Run>,
    store: EmbeddedObjectStore,
}

impl RichBuffer {
    pub fn new(syntax: SyntaxKind) -> Self {
        Self {
            syntax,
            ..Self::default()
        }
    }

    /// Creates an untagged buffer holding `text`.
    pub fn with_text(syntax: SyntaxKind, text: &str) -> Self {
        let mut buffer = Self::new(syntax);
        buffer.splice_untagged(0, text);
        buffer
    }

    pub fn syntax(&self) -> &SyntaxKind {
        &self.syntax
    }

    /// Length in character offsets, embedded object slots included.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn embedded(&self) -> &EmbeddedObjectStore {
        &self.store
    }

    /// Raw characters in `[start, end)`, placeholders included.
    pub fn text(&self, start: usize, end: usize) -> BufferResult<String> {
        self.check_range(start, end)?;
        Ok(self.text[start..end].iter().collect())
    }

    /// Whole text without object placeholders.
    pub fn plain_text(&self) -> String {
        self.text
            .iter()
            .filter(|c| **c != OBJECT_PLACEHOLDER)
            .collect()
    }

    pub(crate) fn chars(&self) -> &[char] {
        &self.text
    }

    pub fn tags_at(&self, offset: usize) -> Option<&BTreeSet<String>> {
        let index = self.runs.partition_point(|run| run.end <= offset);
        self.runs
            .get(index)
            .filter(|run| run.start <= offset)
            .map(|run| &run.tags)
    }

    /// True when a syntax change away from rich text would drop content.
    pub fn has_rich_content(&self) -> bool {
        !self.store.is_empty() || self.runs.iter().any(|run| !run.tags.is_empty())
    }

    /// Inserts untagged text, splitting any run crossing `offset`.
    ///
    /// Returns the inserted range. Object placeholder characters are
    /// filtered out of `text`.
    ///
    /// # Errors
    /// - `OutOfRange` when `offset > len`.
    pub fn insert(&mut self, offset: usize, text: &str) -> BufferResult<Range<usize>> {
        self.insert_with_tags(offset, text, &BTreeSet::new())
    }

    /// Inserts text carrying `tags`.
    ///
    /// # Errors
    /// - `OutOfRange` when `offset > len`.
    /// - `InvalidForSyntax` when tags are given to a non-rich buffer.
    /// - `InvalidTag` when a tag name fails validation.
    pub fn insert_with_tags(
        &mut self,
        offset: usize,
        text: &str,
        tags: &BTreeSet<String>,
    ) -> BufferResult<Range<usize>> {
        self.check_offset(offset)?;
        if !tags.is_empty() {
            self.ensure_rich_text("insert_with_tags")?;
        }
        let tags = tags
            .iter()
            .map(|name| -> BufferResult<String> {
                let (property, value) = parse_tag_name(name)?;
                Ok(tag_name(property, &value))
            })
            .collect::<BufferResult<BTreeSet<String>>>()?;
        let chars: Vec<char> = text.chars().filter(|c| *c != OBJECT_PLACEHOLDER).collect();
        let count = chars.len();
        if count == 0 {
            return Ok(offset..offset);
        }
        self.splice(offset, chars, vec![Run::new(0, count, tags)]);
        Ok(offset..offset + count)
    }

    /// Removes `[start, end)` and returns the removed content.
    ///
    /// # Errors
    /// - `OutOfRange` when `start > end` or `end > len`.
    pub fn delete(&mut self, start: usize, end: usize) -> BufferResult<DeletedSlice> {
        self.check_range(start, end)?;
        if start == end {
            return Ok(DeletedSlice::default());
        }
        let count = end - start;
        let first = self.split_at(start);
        let last = self.split_at(end);
        let runs = self
            .runs
            .drain(first..last)
            .map(|run| Run::new(run.start - start, run.end - start, run.tags))
            .collect();
        for run in &mut self.runs[first..] {
            run.start -= count;
            run.end -= count;
        }
        let text = self.text.drain(start..end).collect();
        let objects = self
            .store
            .drain_range(start, end)
            .into_iter()
            .map(|mut object| {
                object.offset -= start;
                object
            })
            .collect();
        self.store.shift(end, -(count as isize));
        self.normalize();
        Ok(DeletedSlice {
            text,
            runs,
            objects,
        })
    }

    /// Re-inserts a slice produced by `delete`, tags and objects included.
    ///
    /// # Errors
    /// - `OutOfRange` when `offset > len`.
    /// - `InvalidForSyntax` when the slice carries rich content and this
    ///   buffer is not rich text.
    pub fn insert_slice(
        &mut self,
        offset: usize,
        slice: &DeletedSlice,
    ) -> BufferResult<Range<usize>> {
        self.check_offset(offset)?;
        let carries_rich =
            !slice.objects.is_empty() || slice.runs.iter().any(|run| !run.tags.is_empty());
        if carries_rich {
            self.ensure_rich_text("insert_slice")?;
        }
        let chars: Vec<char> = slice.text.chars().collect();
        let count = chars.len();
        if count == 0 {
            return Ok(offset..offset);
        }
        let runs = if runs_cover(&slice.runs, count) {
            slice.runs.clone()
        } else {
            vec![Run::new(0, count, BTreeSet::new())]
        };
        self.splice(offset, chars, runs);
        for object in &slice.objects {
            let mut object = object.clone();
            object.offset += offset;
            self.store
                .insert(object)
                .map_err(|rejected| BufferError::OffsetCollision(rejected.offset))?;
        }
        Ok(offset..offset + count)
    }

    /// Applies `name` over `[start, end)` following its property class rule.
    ///
    /// Toggle classes remove the tag when it already covers every text
    /// character of the range; otherwise any tag of the same class is
    /// cleared before `name` is attached. Justification widens the range to
    /// whole paragraphs and realigns embedded objects inside them.
    ///
    /// # Errors
    /// - `InvalidForSyntax` on non-rich buffers.
    /// - `InvalidTag` when `name` fails validation.
    /// - `OutOfRange` for invalid ranges.
    /// - `NoParagraph` for justification on an empty buffer.
    pub fn apply_tag(&mut self, name: &str, start: usize, end: usize) -> BufferResult<TagChange> {
        self.ensure_rich_text("apply_tag")?;
        let (property, value) = parse_tag_name(name)?;
        let name = tag_name(property, &value);
        self.check_range(start, end)?;
        let (start, end) = match property.rule() {
            TagRule::Paragraph => self.paragraph_span(start, end)?,
            _ => (start, end),
        };
        if start == end {
            return Ok(TagChange::Unchanged);
        }

        let covered = match property {
            TagProperty::Justification => self.justification_covers(&name, &value, start, end),
            _ => self.covers(&name, start, end),
        };
        let change = if property.rule() != TagRule::Replace && covered {
            self.modify_range(start, end, |tags| {
                tags.remove(&name);
            });
            TagChange::Removed { start, end }
        } else {
            let prefix = format!("{}_", property.as_str());
            self.modify_range(start, end, |tags| {
                tags.retain(|tag| !tag.starts_with(&prefix));
                tags.insert(name.clone());
            });
            self.clear_placeholder_tags(start, end);
            TagChange::Added { start, end }
        };

        if property == TagProperty::Justification {
            let justification = match change {
                TagChange::Added { .. } => Justification::parse(&value).unwrap_or_default(),
                _ => Justification::Left,
            };
            let offsets: Vec<usize> = self
                .store
                .iter_in_range(start, end)
                .map(|object| object.offset)
                .collect();
            for offset in offsets {
                if let Some(object) = self.store.get_mut(offset) {
                    object.justification = justification;
                }
            }
        }
        self.normalize();
        Ok(change)
    }

    /// Cursor-only variant of `apply_tag`.
    ///
    /// Justification targets the paragraph holding `cursor`; every other
    /// class targets the word around it.
    ///
    /// # Errors
    /// - `NoSelection` when no word touches `cursor`.
    /// - Same errors as `apply_tag`.
    pub fn apply_tag_at_cursor(&mut self, name: &str, cursor: usize) -> BufferResult<TagChange> {
        self.ensure_rich_text("apply_tag")?;
        let (property, _) = parse_tag_name(name)?;
        self.check_offset(cursor)?;
        if property.rule() == TagRule::Paragraph {
            return self.apply_tag(name, cursor, cursor);
        }
        let word = self
            .word_bounds(cursor)
            .ok_or(BufferError::NoSelection { cursor })?;
        self.apply_tag(name, word.start, word.end)
    }

    /// Removes one tag from `[start, end)`.
    pub fn remove_tag(&mut self, name: &str, start: usize, end: usize) -> BufferResult<()> {
        let (property, value) = parse_tag_name(name)?;
        let name = tag_name(property, &value);
        self.check_range(start, end)?;
        if start == end {
            return Ok(());
        }
        self.modify_range(start, end, |tags| {
            tags.remove(&name);
        });
        self.normalize();
        Ok(())
    }

    /// Removes every tag from `[start, end)`.
    pub fn remove_all_tags(&mut self, start: usize, end: usize) -> BufferResult<()> {
        self.check_range(start, end)?;
        if start == end {
            return Ok(());
        }
        self.modify_range(start, end, BTreeSet::clear);
        self.normalize();
        Ok(())
    }

    /// Inserts a one-slot placeholder at `offset` and stores the object there.
    ///
    /// # Errors
    /// - `InvalidForSyntax` on non-rich buffers.
    /// - `OutOfRange` when `offset > len`.
    pub fn place_embedded(
        &mut self,
        offset: usize,
        kind: EmbeddedKind,
        justification: Justification,
    ) -> BufferResult<()> {
        self.ensure_rich_text("place_embedded")?;
        self.check_offset(offset)?;
        self.splice(
            offset,
            vec![OBJECT_PLACEHOLDER],
            vec![Run::new(0, 1, BTreeSet::new())],
        );
        self.store
            .insert(EmbeddedObject {
                offset,
                kind,
                justification,
            })
            .map_err(|rejected| BufferError::OffsetCollision(rejected.offset))
    }

    /// Removes the embedded object at `offset` together with its slot.
    pub fn remove_embedded(&mut self, offset: usize) -> BufferResult<EmbeddedObject> {
        if self.store.get(offset).is_none() {
            return Err(BufferError::NoEmbeddedObject(offset));
        }
        let mut slice = self.delete(offset, offset + 1)?;
        let mut object = slice
            .objects
            .pop()
            .ok_or(BufferError::NoEmbeddedObject(offset))?;
        object.offset = offset;
        Ok(object)
    }

    /// Replaces the payload of the object at `offset`, returning the old one.
    pub fn replace_embedded(
        &mut self,
        offset: usize,
        kind: EmbeddedKind,
    ) -> BufferResult<EmbeddedKind> {
        let object = self
            .store
            .get_mut(offset)
            .ok_or(BufferError::NoEmbeddedObject(offset))?;
        Ok(std::mem::replace(&mut object.kind, kind))
    }

    /// Paragraph containing `cursor`, newline excluded.
    ///
    /// # Errors
    /// - `NoParagraph` when the buffer is empty.
    /// - `OutOfRange` when `cursor > len`.
    pub fn paragraph_bounds(&self, cursor: usize) -> BufferResult<Range<usize>> {
        if self.text.is_empty() {
            return Err(BufferError::NoParagraph);
        }
        self.check_offset(cursor)?;
        let start = self.text[..cursor]
            .iter()
            .rposition(|c| *c == '\n')
            .map_or(0, |index| index + 1);
        let end = self.text[cursor..]
            .iter()
            .position(|c| *c == '\n')
            .map_or(self.text.len(), |index| cursor + index);
        Ok(start..end)
    }

    /// Word touching `cursor`, if any.
    pub fn word_bounds(&self, cursor: usize) -> Option<Range<usize>> {
        let paragraph = self.paragraph_bounds(cursor).ok()?;
        let text: String = self.text[paragraph.clone()].iter().collect();
        let relative = cursor - paragraph.start;
        WORD_RE.find_iter(&text).find_map(|found| {
            let start = text[..found.start()].chars().count();
            let end = start + found.as_str().chars().count();
            (start <= relative && relative <= end)
                .then(|| paragraph.start + start..paragraph.start + end)
        })
    }

    /// Heading runs in document order with `h<level>-<n>` anchors.
    pub fn headings(&self) -> Vec<Heading> {
        let mut headings: Vec<Heading> = Vec::new();
        let mut counters = [0usize; 3];
        let mut previous_end = None;
        for run in &self.runs {
            let level = run.tags.iter().find_map(|tag| match tag.as_str() {
                "scale_h1" => Some(1u8),
                "scale_h2" => Some(2),
                "scale_h3" => Some(3),
                _ => None,
            });
            let Some(level) = level else {
                previous_end = None;
                continue;
            };
            let text: String = self.text[run.start..run.end].iter().collect();
            match headings.last_mut() {
                Some(last) if previous_end == Some(run.start) && last.level == level => {
                    last.text.push_str(&text);
                    last.end = run.end;
                }
                _ => {
                    let counter = &mut counters[usize::from(level - 1)];
                    *counter += 1;
                    headings.push(Heading {
                        level,
                        anchor: format!("h{level}-{counter}"),
                        text,
                        start: run.start,
                        end: run.end,
                    });
                }
            }
            previous_end = Some(run.end);
        }
        headings
    }

    /// Points node links at new ids after a subtree was re-numbered.
    pub(crate) fn remap_node_links(&mut self, mapping: &HashMap<NodeId, NodeId>) {
        for run in &mut self.runs {
            let remapped: BTreeSet<String> = run
                .tags
                .iter()
                .map(|tag| {
                    tag.strip_prefix("link_")
                        .and_then(LinkTarget::parse)
                        .and_then(|target| target.remapped(mapping))
                        .map_or_else(|| tag.clone(), |target| {
                            tag_name(TagProperty::Link, &target.to_value())
                        })
                })
                .collect();
            run.tags = remapped;
        }
        for object in self.store.iter_mut() {
            let target = match &mut object.kind {
                EmbeddedKind::Image {
                    link: Some(target), ..
                } => target,
                EmbeddedKind::LinkMarker { target } => target,
                _ => continue,
            };
            if let Some(remapped) = target.remapped(mapping) {
                *target = remapped;
            }
        }
        self.normalize();
    }

    /// Plain-text copy of this buffer under a different syntax.
    pub(crate) fn converted(&self, syntax: SyntaxKind) -> Self {
        Self::with_text(syntax, &self.plain_text())
    }

    fn ensure_rich_text(&self, operation: &'static str) -> BufferResult<()> {
        if self.syntax.is_rich_text() {
            return Ok(());
        }
        Err(BufferError::InvalidForSyntax {
            operation,
            syntax: self.syntax.as_str().to_string(),
        })
    }

    fn check_offset(&self, offset: usize) -> BufferResult<()> {
        self.check_range(offset, offset)
    }

    pub(crate) fn check_range(&self, start: usize, end: usize) -> BufferResult<()> {
        if start > end || end > self.text.len() {
            return Err(BufferError::OutOfRange {
                start,
                end,
                len: self.text.len(),
            });
        }
        Ok(())
    }

    fn paragraph_span(&self, start: usize, end: usize) -> BufferResult<(usize, usize)> {
        let first = self.paragraph_bounds(start)?.start;
        let last_position = if end > start && self.text[end - 1] == '\n' {
            end - 1
        } else {
            end
        };
        let last = self.paragraph_bounds(last_position.max(start))?.end;
        Ok((first, last.max(first)))
    }

    fn covers(&self, name: &str, start: usize, end: usize) -> bool {
        let first = self.runs.partition_point(|run| run.end <= start);
        let mut saw_text = false;
        for run in self.runs[first..].iter().take_while(|run| run.start < end) {
            let from = run.start.max(start);
            let to = run.end.min(end);
            if run.tags.contains(name) {
                saw_text = true;
                continue;
            }
            if self.text[from..to].iter().any(|c| *c != OBJECT_PLACEHOLDER) {
                return false;
            }
        }
        saw_text
    }

    /// Text decides coverage; a paragraph holding only objects is covered
    /// when every object already has `value` as its justification.
    fn justification_covers(&self, name: &str, value: &str, start: usize, end: usize) -> bool {
        if self.text[start..end].iter().any(|c| *c != OBJECT_PLACEHOLDER) {
            return self.covers(name, start, end);
        }
        let Some(justification) = Justification::parse(value) else {
            return false;
        };
        let mut objects = self.store.iter_in_range(start, end).peekable();
        objects.peek().is_some() && objects.all(|object| object.justification == justification)
    }

    fn splice_untagged(&mut self, offset: usize, text: &str) {
        let chars: Vec<char> = text.chars().filter(|c| *c != OBJECT_PLACEHOLDER).collect();
        let count = chars.len();
        if count > 0 {
            self.splice(offset, chars, vec![Run::new(0, count, BTreeSet::new())]);
        }
    }

    /// Inserts `chars` at `offset` with runs relative to the inserted range.
    fn splice(&mut self, offset: usize, chars: Vec<char>, runs: Vec<Run>) {
        let count = chars.len();
        let index = self.split_at(offset);
        for run in &mut self.runs[index..] {
            run.start += count;
            run.end += count;
        }
        let inserted = runs
            .into_iter()
            .map(|run| Run::new(run.start + offset, run.end + offset, run.tags));
        self.runs.splice(index..index, inserted);
        self.text.splice(offset..offset, chars);
        self.store.shift(offset, count as isize);
        self.normalize();
    }

    /// Ensures a run boundary at `offset`; returns the index of the run
    /// starting there (or `runs.len()`).
    fn split_at(&mut self, offset: usize) -> usize {
        let index = self.runs.partition_point(|run| run.end <= offset);
        if let Some(run) = self.runs.get_mut(index) {
            if run.start < offset {
                let tail = Run::new(offset, run.end, run.tags.clone());
                run.end = offset;
                self.runs.insert(index + 1, tail);
                return index + 1;
            }
        }
        index
    }

    fn modify_range(&mut self, start: usize, end: usize, mut apply: impl FnMut(&mut BTreeSet<String>)) {
        let first = self.split_at(start);
        let last = self.split_at(end);
        for run in &mut self.runs[first..last] {
            apply(&mut run.tags);
        }
    }

    fn clear_placeholder_tags(&mut self, start: usize, end: usize) {
        let offsets: Vec<usize> = self
            .store
            .iter_in_range(start, end)
            .map(|object| object.offset)
            .collect();
        for offset in offsets {
            self.modify_range(offset, offset + 1, BTreeSet::clear);
        }
    }

    fn normalize(&mut self) {
        let mut merged: Vec<Run> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if run.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.end == run.start && last.tags == run.tags => {
                    last.end = run.end;
                }
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }
}

fn runs_cover(runs: &[Run], count: usize) -> bool {
    let mut expected = 0;
    for run in runs {
        if run.start != expected || run.is_empty() {
            return false;
        }
        expected = run.end;
    }
    expected == count
}
