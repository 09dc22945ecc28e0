//! Buffer content codec shared by documents and undo snapshots.
//!
//! # Invariants
//! - Written object offsets count the characters actually emitted, so a
//!   document stays self-consistent after forbidden characters are stripped.
//! - Lossless writers keep every character, so snapshots restore exactly.
//! - Objects are re-placed in ascending offset order after all text.

use crate::model::buffer::RichBuffer;
use crate::model::embedded::{
    CodeBox, EmbeddedKind, EmbeddedObject, Justification, Table,
};
use crate::model::node::SyntaxKind;
use crate::model::tag::{tag_name, LinkTarget, TagProperty};
use crate::serialize::{malformed, MalformedReason, SerializeResult};
use crate::xml::{strip_forbidden, ForbiddenChars, XmlEvent, XmlReader, XmlWriter};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::ops::Range;

pub(crate) const RICH_TEXT: &str = "rich_text";
const IMAGE: &str = "image";
const TABLE: &str = "table";
const ROW: &str = "row";
const CELL: &str = "cell";
const CODEBOX: &str = "codebox";
const ANCHOR: &str = "anchor";
const LINK: &str = "link";

pub(crate) type Attributes<'a> = [(&'a str, String)];

pub(crate) fn is_embedded_element(name: &str) -> bool {
    matches!(name, IMAGE | TABLE | CODEBOX | ANCHOR | LINK)
}

pub(crate) fn attribute<'x>(attributes: &'x Attributes<'_>, key: &str) -> Option<&'x str> {
    attributes
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
}

/// Writes `range` as `rich_text` elements and returns the embedded objects
/// paired with their emitted offsets.
pub(crate) fn write_runs<'b>(
    writer: &mut XmlWriter,
    buffer: &'b RichBuffer,
    range: Option<Range<usize>>,
) -> SerializeResult<Vec<(usize, &'b EmbeddedObject)>> {
    let walk = buffer
        .walk_slots(range)
        .map_err(|err| malformed(MalformedReason::Buffer(err)))?;
    let mut objects = Vec::with_capacity(walk.embedded.len());
    let mut emitted = 0usize;
    for (index, slot) in walk.slots.iter().enumerate() {
        for span in slot {
            let text = match writer.forbidden_chars() {
                ForbiddenChars::Strip => strip_forbidden(&span.text),
                ForbiddenChars::Reference => Cow::Borrowed(span.text.as_str()),
            };
            if text.is_empty() {
                continue;
            }
            emitted += text.chars().count();
            let attributes: Vec<(&str, Cow<'_, str>)> = span
                .attributes
                .iter()
                .map(|(property, value)| (property.as_str(), Cow::Borrowed(value.as_str())))
                .collect();
            writer.start(RICH_TEXT, &attributes);
            writer.text(&text);
            writer.end();
        }
        if let Some(object) = walk.embedded.get(index) {
            objects.push((emitted, *object));
            emitted += 1;
        }
    }
    Ok(objects)
}

/// Writes one embedded object as its typed element.
pub(crate) fn write_object(writer: &mut XmlWriter, offset: usize, object: &EmbeddedObject) {
    let mut attributes: Vec<(&str, Cow<'_, str>)> = vec![
        ("offset", Cow::Owned(offset.to_string())),
        ("justification", Cow::Borrowed(object.justification.as_str())),
    ];
    match &object.kind {
        EmbeddedKind::Image { png, link } => {
            if let Some(link) = link {
                attributes.push(("link", Cow::Owned(link.to_value())));
            }
            writer.start(IMAGE, &attributes);
            writer.text(&STANDARD.encode(png));
            writer.end();
        }
        EmbeddedKind::Table(table) => {
            let widths = table
                .column_widths
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            attributes.push(("col_widths", Cow::Owned(widths)));
            writer.start(TABLE, &attributes);
            for row in &table.rows {
                writer.start(ROW, &[]);
                for cell in row {
                    writer.start(CELL, &[]);
                    writer.text(cell);
                    writer.end();
                }
                writer.end();
            }
            writer.end();
        }
        EmbeddedKind::CodeBox(codebox) => {
            attributes.extend([
                ("language", Cow::Borrowed(codebox.language.as_str())),
                ("width", Cow::Owned(codebox.width.to_string())),
                ("height", Cow::Owned(codebox.height.to_string())),
                ("width_in_pixels", Cow::Borrowed(bool_str(codebox.width_in_pixels))),
                (
                    "highlight_brackets",
                    Cow::Borrowed(bool_str(codebox.highlight_brackets)),
                ),
                (
                    "show_line_numbers",
                    Cow::Borrowed(bool_str(codebox.show_line_numbers)),
                ),
            ]);
            writer.start(CODEBOX, &attributes);
            writer.text(&codebox.source);
            writer.end();
        }
        EmbeddedKind::Anchor { name } => {
            attributes.push(("name", Cow::Borrowed(name.as_str())));
            writer.empty(ANCHOR, &attributes);
        }
        EmbeddedKind::LinkMarker { target } => {
            attributes.push(("target", Cow::Owned(target.to_value())));
            writer.empty(LINK, &attributes);
        }
    }
}

/// Reads the body of a `rich_text` element whose start was just consumed.
pub(crate) fn read_rich_text(
    reader: &mut XmlReader<'_>,
    attributes: &Attributes<'_>,
) -> SerializeResult<(String, BTreeSet<String>)> {
    let tags = attributes
        .iter()
        .map(|(key, value)| -> SerializeResult<String> {
            let property = TagProperty::parse(key)
                .map_err(|_| malformed(MalformedReason::UnknownTag(format!("{key}_{value}"))))?;
            let value = property
                .normalize_value(value)
                .map_err(|_| malformed(MalformedReason::UnknownTag(format!("{key}_{value}"))))?;
            Ok(tag_name(property, &value))
        })
        .collect::<SerializeResult<BTreeSet<String>>>()?;
    let text = read_text(reader, RICH_TEXT)?;
    Ok((text, tags))
}

/// Reads one embedded element whose start was just consumed.
pub(crate) fn read_object(
    reader: &mut XmlReader<'_>,
    element: &str,
    attributes: &Attributes<'_>,
) -> SerializeResult<EmbeddedObject> {
    let offset = required_number::<usize>(element, attributes, "offset")?;
    let justification = match attribute(attributes, "justification") {
        Some(value) => Justification::parse(value)
            .ok_or_else(|| invalid_attribute(element, "justification", value))?,
        None => Justification::default(),
    };
    let kind = match element {
        IMAGE => {
            let link = optional_link(element, attributes, "link")?;
            let encoded = read_text(reader, IMAGE)?;
            let png = STANDARD
                .decode(encoded.trim())
                .map_err(|err| malformed(MalformedReason::InvalidPayload(format!("image base64: {err}"))))?;
            EmbeddedKind::Image { png, link }
        }
        TABLE => {
            let column_widths = match attribute(attributes, "col_widths") {
                Some("") | None => Vec::new(),
                Some(value) => value
                    .split(',')
                    .map(|width| width.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid_attribute(element, "col_widths", value))?,
            };
            let rows = read_table_rows(reader)?;
            EmbeddedKind::Table(Table {
                rows,
                column_widths,
            })
        }
        CODEBOX => {
            let defaults = CodeBox::default();
            let codebox = CodeBox {
                language: attribute(attributes, "language")
                    .map_or(defaults.language, str::to_string),
                width: optional_number(element, attributes, "width")?.unwrap_or(defaults.width),
                height: optional_number(element, attributes, "height")?.unwrap_or(defaults.height),
                width_in_pixels: optional_bool(element, attributes, "width_in_pixels")?
                    .unwrap_or(defaults.width_in_pixels),
                highlight_brackets: optional_bool(element, attributes, "highlight_brackets")?
                    .unwrap_or(defaults.highlight_brackets),
                show_line_numbers: optional_bool(element, attributes, "show_line_numbers")?
                    .unwrap_or(defaults.show_line_numbers),
                source: read_text(reader, CODEBOX)?,
            };
            EmbeddedKind::CodeBox(codebox)
        }
        ANCHOR => {
            let name = attribute(attributes, "name")
                .ok_or_else(|| missing_attribute(element, "name"))?
                .to_string();
            read_text(reader, ANCHOR)?;
            EmbeddedKind::Anchor { name }
        }
        LINK => {
            let target = optional_link(element, attributes, "target")?
                .ok_or_else(|| missing_attribute(element, "target"))?;
            read_text(reader, LINK)?;
            EmbeddedKind::LinkMarker { target }
        }
        other => {
            return Err(malformed(MalformedReason::UnexpectedElement(
                other.to_string(),
            )))
        }
    };
    Ok(EmbeddedObject {
        offset,
        kind,
        justification,
    })
}

/// Rebuilds a buffer: text runs first, then objects in ascending offset order.
pub(crate) fn build_buffer(
    syntax: SyntaxKind,
    runs: Vec<(String, BTreeSet<String>)>,
    mut objects: Vec<EmbeddedObject>,
) -> SerializeResult<RichBuffer> {
    let mut buffer = RichBuffer::new(syntax);
    for (text, tags) in runs {
        buffer
            .insert_with_tags(buffer.len(), &text, &tags)
            .map_err(|err| malformed(MalformedReason::Buffer(err)))?;
    }
    objects.sort_by_key(|object| object.offset);
    if let Some(pair) = objects.windows(2).find(|pair| pair[0].offset == pair[1].offset) {
        return Err(malformed(MalformedReason::OffsetCollision(pair[0].offset)));
    }
    for object in objects {
        if object.offset > buffer.len() {
            return Err(malformed(MalformedReason::OffsetOutOfRange {
                offset: object.offset,
                len: buffer.len(),
            }));
        }
        buffer
            .place_embedded(object.offset, object.kind, object.justification)
            .map_err(|err| malformed(MalformedReason::Buffer(err)))?;
    }
    Ok(buffer)
}

/// Next event that is not whitespace-only text.
pub(crate) fn next_significant<'a>(reader: &mut XmlReader<'a>) -> SerializeResult<XmlEvent<'a>> {
    loop {
        match reader
            .next_event()
            .map_err(|err| malformed(MalformedReason::Xml(err)))?
        {
            Some(XmlEvent::Text(text)) if text.trim().is_empty() => continue,
            Some(XmlEvent::Text(_)) => {
                return Err(malformed(MalformedReason::UnexpectedText));
            }
            Some(event) => return Ok(event),
            None => {
                return Err(malformed(MalformedReason::Xml(
                    crate::xml::XmlError::UnexpectedEof { open: None },
                )))
            }
        }
    }
}

/// Collects character data up to the end of `element`.
pub(crate) fn read_text(reader: &mut XmlReader<'_>, element: &str) -> SerializeResult<String> {
    let mut text = String::new();
    loop {
        match reader
            .next_event()
            .map_err(|err| malformed(MalformedReason::Xml(err)))?
        {
            Some(XmlEvent::Text(chunk)) => text.push_str(&chunk),
            Some(XmlEvent::End { name }) if name == element => return Ok(text),
            Some(XmlEvent::Start { name, .. }) | Some(XmlEvent::End { name }) => {
                return Err(malformed(MalformedReason::UnexpectedElement(
                    name.to_string(),
                )))
            }
            None => {
                return Err(malformed(MalformedReason::Xml(
                    crate::xml::XmlError::UnexpectedEof {
                        open: Some(element.to_string()),
                    },
                )))
            }
        }
    }
}

fn read_table_rows(reader: &mut XmlReader<'_>) -> SerializeResult<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    loop {
        match next_significant(reader)? {
            XmlEvent::Start { name: ROW, .. } => {
                let mut cells = Vec::new();
                loop {
                    match next_significant(reader)? {
                        XmlEvent::Start { name: CELL, .. } => cells.push(read_text(reader, CELL)?),
                        XmlEvent::End { name: ROW } => break,
                        XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
                            return Err(malformed(MalformedReason::UnexpectedElement(
                                name.to_string(),
                            )))
                        }
                        XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
                    }
                }
                rows.push(cells);
            }
            XmlEvent::End { name: TABLE } => return Ok(rows),
            XmlEvent::Start { name, .. } | XmlEvent::End { name } => {
                return Err(malformed(MalformedReason::UnexpectedElement(
                    name.to_string(),
                )))
            }
            XmlEvent::Text(_) => return Err(malformed(MalformedReason::UnexpectedText)),
        }
    }
}

fn optional_link(
    element: &str,
    attributes: &Attributes<'_>,
    key: &str,
) -> SerializeResult<Option<LinkTarget>> {
    attribute(attributes, key)
        .map(|value| LinkTarget::parse(value).ok_or_else(|| invalid_attribute(element, key, value)))
        .transpose()
}

pub(crate) fn required_number<T: std::str::FromStr>(
    element: &str,
    attributes: &Attributes<'_>,
    key: &str,
) -> SerializeResult<T> {
    optional_number(element, attributes, key)?.ok_or_else(|| missing_attribute(element, key))
}

pub(crate) fn optional_number<T: std::str::FromStr>(
    element: &str,
    attributes: &Attributes<'_>,
    key: &str,
) -> SerializeResult<Option<T>> {
    attribute(attributes, key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| invalid_attribute(element, key, value))
        })
        .transpose()
}

pub(crate) fn optional_bool(
    element: &str,
    attributes: &Attributes<'_>,
    key: &str,
) -> SerializeResult<Option<bool>> {
    attribute(attributes, key)
        .map(|value| match value {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(invalid_attribute(element, key, other)),
        })
        .transpose()
}

pub(crate) fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn missing_attribute(element: &str, attribute: &str) -> crate::serialize::SerializeError {
    malformed(MalformedReason::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    })
}

fn invalid_attribute(element: &str, attribute: &str, value: &str) -> crate::serialize::SerializeError {
    malformed(MalformedReason::InvalidAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}
