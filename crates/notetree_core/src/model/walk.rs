//! Slot walking over a rich-text buffer.
//!
//! # Responsibility
//! - Produce the alternating text-slot / embedded-object sequence shared by
//!   the serializer and every exporter.
//!
//! # Invariants
//! - `slots.len() == embedded.len() + 1`.
//! - `slots[i]` holds the text immediately preceding `embedded[i]`.
//! - The attribute map is updated at run boundaries only, from the tag
//!   difference between neighbouring runs.
//! - An object sharing its offset with a run boundary is emitted first.

use crate::model::buffer::{BufferResult, RichBuffer};
use crate::model::embedded::EmbeddedObject;
use crate::model::tag::TagProperty;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Active formatting: one value per property class.
pub type AttributeSet = BTreeMap<TagProperty, String>;

/// Text sharing one attribute set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Absolute buffer offset of the first character.
    pub start: usize,
    pub text: String,
    pub attributes: AttributeSet,
}

impl Span {
    pub fn attribute(&self, property: TagProperty) -> Option<&str> {
        self.attributes.get(&property).map(String::as_str)
    }
}

/// Output of `RichBuffer::walk_slots`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWalk<'a> {
    pub slots: Vec<Vec<Span>>,
    pub embedded: Vec<&'a EmbeddedObject>,
}

/// Interleaved view of a `SlotWalk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'w, 'a> {
    Text(&'w Span),
    Object(&'a EmbeddedObject),
}

impl<'a> SlotWalk<'a> {
    /// Spans and objects in document order.
    pub fn segments(&self) -> impl Iterator<Item = Segment<'_, 'a>> + '_ {
        self.slots.iter().enumerate().flat_map(move |(index, slot)| {
            slot.iter()
                .map(Segment::Text)
                .chain(self.embedded.get(index).copied().map(Segment::Object))
        })
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.slots.iter().flatten()
    }
}

impl RichBuffer {
    /// Walks `range` (whole buffer when `None`) into text slots and
    /// embedded objects.
    ///
    /// # Errors
    /// - `OutOfRange` when `range` exceeds the buffer.
    pub fn walk_slots(&self, range: Option<Range<usize>>) -> BufferResult<SlotWalk<'_>> {
        let range = range.unwrap_or(0..self.len());
        self.check_range(range.start, range.end)?;

        let chars = self.chars();
        let runs = self.runs();
        let mut walk = SlotWalk {
            slots: vec![Vec::new()],
            embedded: Vec::new(),
        };
        let mut attributes = AttributeSet::new();
        let mut previous: Option<&BTreeSet<String>> = None;
        let mut objects = self
            .embedded()
            .iter_in_range(range.start, range.end)
            .peekable();

        let first = runs.partition_point(|run| run.end <= range.start);
        for run in runs[first..].iter().take_while(|run| run.start < range.end) {
            update_attributes(&mut attributes, previous, &run.tags);
            previous = Some(&run.tags);

            let run_end = run.end.min(range.end);
            let mut cursor = run.start.max(range.start);
            while cursor < run_end {
                let next_object = objects.peek().map(|object| object.offset);
                match next_object.filter(|offset| *offset < run_end) {
                    Some(offset) => {
                        push_text(&mut walk, chars, cursor..offset, &attributes);
                        if let Some(object) = objects.next() {
                            walk.embedded.push(object);
                        }
                        walk.slots.push(Vec::new());
                        cursor = offset + 1;
                    }
                    None => {
                        push_text(&mut walk, chars, cursor..run_end, &attributes);
                        cursor = run_end;
                    }
                }
            }
        }
        Ok(walk)
    }
}

fn update_attributes(
    attributes: &mut AttributeSet,
    previous: Option<&BTreeSet<String>>,
    current: &BTreeSet<String>,
) {
    let empty = BTreeSet::new();
    let previous = previous.unwrap_or(&empty);
    for tag in previous.difference(current) {
        if let Some((property, _)) = split_tag(tag) {
            attributes.remove(&property);
        }
    }
    for tag in current.difference(previous) {
        if let Some((property, value)) = split_tag(tag) {
            attributes.insert(property, value.to_string());
        }
    }
}

fn split_tag(tag: &str) -> Option<(TagProperty, &str)> {
    let (property, value) = tag.split_once('_')?;
    TagProperty::parse(property)
        .ok()
        .map(|property| (property, value))
}

fn push_text(walk: &mut SlotWalk<'_>, chars: &[char], range: Range<usize>, attributes: &AttributeSet) {
    if range.is_empty() {
        return;
    }
    let Some(slot) = walk.slots.last_mut() else {
        return;
    };
    let text: String = chars[range.clone()].iter().collect();
    match slot.last_mut() {
        Some(span) if span.attributes == *attributes => span.text.push_str(&text),
        _ => slot.push(Span {
            start: range.start,
            text,
            attributes: attributes.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::Segment;
    use crate::model::buffer::RichBuffer;
    use crate::model::embedded::{EmbeddedKind, Justification};
    use crate::model::node::SyntaxKind;
    use crate::model::tag::TagProperty;

    #[test]
    fn walk_without_objects_yields_single_slot() {
        let mut buffer = RichBuffer::with_text(SyntaxKind::RichText, "plain bold");
        buffer.apply_tag("weight_heavy", 6, 10).expect("bold");
        let walk = buffer.walk_slots(None).expect("walk should succeed");
        assert_eq!(walk.slots.len(), 1);
        assert!(walk.embedded.is_empty());
        let spans = &walk.slots[0];
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "plain ");
        assert!(spans[0].attributes.is_empty());
        assert_eq!(spans[1].attribute(TagProperty::Weight), Some("heavy"));
    }

    #[test]
    fn objects_split_slots_in_order() {
        let mut buffer = RichBuffer::with_text(SyntaxKind::RichText, "ab");
        for (offset, name) in [(0, "first"), (2, "second")] {
            buffer
                .place_embedded(
                    offset,
                    EmbeddedKind::Anchor {
                        name: name.to_string(),
                    },
                    Justification::Left,
                )
                .expect("anchor should place");
        }
        let walk = buffer.walk_slots(None).expect("walk should succeed");
        assert_eq!(walk.slots.len(), walk.embedded.len() + 1);
        assert!(walk.slots[0].is_empty());
        assert_eq!(walk.slots[1][0].text, "a");
        assert_eq!(walk.slots[2][0].text, "b");
        let order: Vec<&str> = walk
            .segments()
            .map(|segment| match segment {
                Segment::Text(span) => span.text.as_str(),
                Segment::Object(object) => object.kind.kind_name(),
            })
            .collect();
        assert_eq!(order, vec!["anchor", "a", "anchor", "b"]);
    }

    #[test]
    fn attribute_changes_at_boundaries_are_incremental() {
        let mut buffer = RichBuffer::with_text(SyntaxKind::RichText, "abc");
        buffer.apply_tag("foreground_#ff0000", 0, 2).expect("red");
        buffer.apply_tag("foreground_#0000ff", 1, 3).expect("blue");
        let walk = buffer.walk_slots(Some(0..3)).expect("walk should succeed");
        let colours: Vec<Option<&str>> = walk
            .spans()
            .map(|span| span.attribute(TagProperty::Foreground))
            .collect();
        assert_eq!(colours, vec![Some("#ff0000"), Some("#0000ff")]);
    }

    #[test]
    fn partial_range_starts_with_run_attributes() {
        let mut buffer = RichBuffer::with_text(SyntaxKind::RichText, "abcdef");
        buffer.apply_tag("style_italic", 0, 6).expect("italic");
        let walk = buffer.walk_slots(Some(2..4)).expect("walk should succeed");
        assert_eq!(walk.slots[0].len(), 1);
        assert_eq!(walk.slots[0][0].text, "cd");
        assert_eq!(walk.slots[0][0].start, 2);
        assert_eq!(walk.slots[0][0].attribute(TagProperty::Style), Some("italic"));
        assert!(buffer.walk_slots(Some(4..9)).is_err());
    }
}
