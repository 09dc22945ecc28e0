//! Formatting tags and the shared tag table.
//!
//! # Responsibility
//! - Define the closed set of formatting property classes.
//! - Parse and build tag names of the form `<property>_<value>`.
//! - Own the lazily-grown registry of tag definitions used by one session.
//!
//! # Invariants
//! - A tag name maps to exactly one `(property, value)` pair.
//! - Colour values are stored lower-case.
//! - Legacy scale values `large`/`largo` normalize to `h1`/`h2`.
//! - The tag table only grows.

use crate::model::embedded::Justification;
use crate::model::node::NodeId;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};

static COLOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{6}|[0-9a-fA-F]{12})$").expect("valid colour regex")
});

pub type TagResult<T> = Result<T, TagError>;

/// Errors from tag name parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Tag name has no `<property>_` prefix.
    MalformedName(String),
    /// Property prefix is not one of the known classes.
    UnknownProperty(String),
    /// Value is not accepted by the property class.
    InvalidValue {
        property: TagProperty,
        value: String,
    },
}

impl Display for TagError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedName(name) => write!(f, "malformed tag name: `{name}`"),
            Self::UnknownProperty(property) => write!(f, "unknown tag property: `{property}`"),
            Self::InvalidValue { property, value } => {
                write!(f, "invalid value `{value}` for tag property `{property}`")
            }
        }
    }
}

impl Error for TagError {}

/// Formatting property class.
///
/// Declaration order is the canonical attribute order used by the
/// serializer and by `walk_slots` attribute maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagProperty {
    Weight,
    Foreground,
    Background,
    Style,
    Underline,
    Strikethrough,
    Scale,
    Justification,
    Link,
    Family,
}

/// How `apply_tag` treats an existing tag of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRule {
    /// Applying the same value over a fully covered range removes it.
    Toggle,
    /// Toggle semantics widened to whole paragraphs.
    Paragraph,
    /// Last applied value wins.
    Replace,
}

impl TagProperty {
    pub const ALL: [TagProperty; 10] = [
        Self::Weight,
        Self::Foreground,
        Self::Background,
        Self::Style,
        Self::Underline,
        Self::Strikethrough,
        Self::Scale,
        Self::Justification,
        Self::Link,
        Self::Family,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Style => "style",
            Self::Underline => "underline",
            Self::Strikethrough => "strikethrough",
            Self::Scale => "scale",
            Self::Justification => "justification",
            Self::Link => "link",
            Self::Family => "family",
        }
    }

    pub fn parse(value: &str) -> TagResult<Self> {
        Self::ALL
            .into_iter()
            .find(|property| property.as_str() == value)
            .ok_or_else(|| TagError::UnknownProperty(value.to_string()))
    }

    pub fn rule(self) -> TagRule {
        match self {
            Self::Foreground | Self::Background | Self::Link => TagRule::Replace,
            Self::Justification => TagRule::Paragraph,
            _ => TagRule::Toggle,
        }
    }

    /// Validates and normalizes one value for this property.
    ///
    /// # Errors
    /// - `InvalidValue` when the value is outside the property's domain.
    pub fn normalize_value(self, value: &str) -> TagResult<String> {
        let invalid = || TagError::InvalidValue {
            property: self,
            value: value.to_string(),
        };
        let normalized = match self {
            Self::Weight if value == "heavy" => value.to_string(),
            Self::Style if value == "italic" => value.to_string(),
            Self::Underline if value == "single" => value.to_string(),
            Self::Strikethrough if value == "true" => value.to_string(),
            Self::Family if value == "monospace" => value.to_string(),
            Self::Scale => match value {
                "small" | "h1" | "h2" | "h3" | "sup" | "sub" => value.to_string(),
                "large" => "h1".to_string(),
                "largo" => "h2".to_string(),
                _ => return Err(invalid()),
            },
            Self::Justification => Justification::parse(value)
                .ok_or_else(invalid)?
                .as_str()
                .to_string(),
            Self::Foreground | Self::Background if COLOR_RE.is_match(value) => {
                value.to_ascii_lowercase()
            }
            Self::Link => LinkTarget::parse(value).ok_or_else(invalid)?.to_value(),
            _ => return Err(invalid()),
        };
        Ok(normalized)
    }
}

impl Display for TagProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the canonical tag name for a validated `(property, value)` pair.
pub fn tag_name(property: TagProperty, value: &str) -> String {
    format!("{}_{}", property.as_str(), value)
}

/// Splits and validates a tag name into its property and normalized value.
pub fn parse_tag_name(name: &str) -> TagResult<(TagProperty, String)> {
    let (property, value) = name
        .split_once('_')
        .ok_or_else(|| TagError::MalformedName(name.to_string()))?;
    let property = TagProperty::parse(property)?;
    let value = property.normalize_value(value)?;
    Ok((property, value))
}

/// Destination of a hyperlink tag or link marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Web(String),
    File(String),
    Folder(String),
    Node {
        id: NodeId,
        anchor: Option<String>,
    },
}

impl LinkTarget {
    /// Parses the link payload format `<kind> <data>`.
    ///
    /// File and folder paths are base64-encoded in the payload.
    pub fn parse(value: &str) -> Option<Self> {
        let (kind, rest) = value.split_once(' ')?;
        match kind {
            "webs" if !rest.is_empty() => Some(Self::Web(rest.to_string())),
            "file" => decode_path(rest).map(Self::File),
            "fold" => decode_path(rest).map(Self::Folder),
            "node" => {
                let (id, anchor) = match rest.split_once(' ') {
                    Some((id, anchor)) if !anchor.trim().is_empty() => {
                        (id, Some(anchor.to_string()))
                    }
                    Some((id, _)) => (id, None),
                    None => (rest, None),
                };
                let id = id.parse::<u64>().ok()?;
                Some(Self::Node {
                    id: NodeId(id),
                    anchor,
                })
            }
            _ => None,
        }
    }

    pub fn to_value(&self) -> String {
        match self {
            Self::Web(url) => format!("webs {url}"),
            Self::File(path) => format!("file {}", STANDARD.encode(path.as_bytes())),
            Self::Folder(path) => format!("fold {}", STANDARD.encode(path.as_bytes())),
            Self::Node {
                id,
                anchor: Some(anchor),
            } => format!("node {} {anchor}", id.0),
            Self::Node { id, anchor: None } => format!("node {}", id.0),
        }
    }

    /// Rewrites node ids through `mapping`; other targets are unchanged.
    pub fn remapped(&self, mapping: &HashMap<NodeId, NodeId>) -> Option<Self> {
        match self {
            Self::Node { id, anchor } => mapping.get(id).map(|new_id| Self::Node {
                id: *new_id,
                anchor: anchor.clone(),
            }),
            _ => None,
        }
    }

    /// Human-readable destination, used by the plain-text exporter.
    pub fn display_text(&self) -> String {
        match self {
            Self::Web(url) => url.clone(),
            Self::File(path) | Self::Folder(path) => path.clone(),
            Self::Node {
                id,
                anchor: Some(anchor),
            } => format!("node {}#{anchor}", id.0),
            Self::Node { id, anchor: None } => format!("node {}", id.0),
        }
    }
}

fn decode_path(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Rendering style derived from one tag definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub monospace: bool,
    pub scale: Option<f32>,
    pub rise: Option<i32>,
    pub foreground: Option<String>,
    pub background: Option<String>,
    pub justification: Option<Justification>,
    pub link: Option<LinkTarget>,
}

impl TagStyle {
    fn derive(property: TagProperty, value: &str) -> Self {
        let mut style = Self::default();
        match property {
            TagProperty::Weight => style.bold = true,
            TagProperty::Style => style.italic = true,
            TagProperty::Underline => style.underline = true,
            TagProperty::Strikethrough => style.strikethrough = true,
            TagProperty::Family => style.monospace = true,
            TagProperty::Foreground => style.foreground = Some(value.to_string()),
            TagProperty::Background => style.background = Some(value.to_string()),
            TagProperty::Justification => style.justification = Justification::parse(value),
            TagProperty::Link => style.link = LinkTarget::parse(value),
            TagProperty::Scale => match value {
                "h1" => style.scale = Some(1.728),
                "h2" => style.scale = Some(1.44),
                "h3" => style.scale = Some(1.2),
                "small" => style.scale = Some(0.833),
                "sup" => {
                    style.scale = Some(0.694);
                    style.rise = Some(4);
                }
                "sub" => {
                    style.scale = Some(0.694);
                    style.rise = Some(-4);
                }
                _ => {}
            },
        }
        style
    }
}

/// One registered tag definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    pub name: String,
    pub property: TagProperty,
    pub value: String,
    pub style: TagStyle,
}

/// Registry of tag definitions shared by every buffer in a session.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    entries: BTreeMap<String, TagEntry>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the definition for `(property, value)`, creating it if needed.
    ///
    /// # Errors
    /// - `InvalidValue` when `value` is outside the property's domain.
    pub fn lookup_or_create(&mut self, property: TagProperty, value: &str) -> TagResult<&TagEntry> {
        let value = property.normalize_value(value)?;
        let name = tag_name(property, &value);
        Ok(self.entries.entry(name.clone()).or_insert_with(|| {
            log::debug!(
                "event=tag_create module=tag status=ok property={}",
                property.as_str()
            );
            TagEntry {
                style: TagStyle::derive(property, &value),
                name,
                property,
                value,
            }
        }))
    }

    /// Same as `lookup_or_create`, starting from a full tag name.
    pub fn lookup_or_create_name(&mut self, name: &str) -> TagResult<&TagEntry> {
        let (property, value) = parse_tag_name(name)?;
        self.lookup_or_create(property, &value)
    }

    pub fn get(&self, name: &str) -> Option<&TagEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_tag_name, LinkTarget, TagError, TagProperty, TagRule, TagTable};
    use crate::model::node::NodeId;

    #[test]
    fn parse_tag_name_normalizes_legacy_scale_and_colour_case() {
        assert_eq!(
            parse_tag_name("scale_large").expect("legacy scale should parse"),
            (TagProperty::Scale, "h1".to_string())
        );
        assert_eq!(
            parse_tag_name("foreground_#FF0000").expect("colour should parse"),
            (TagProperty::Foreground, "#ff0000".to_string())
        );
    }

    #[test]
    fn parse_tag_name_rejects_unknown_and_invalid() {
        let error = parse_tag_name("glow_bright").expect_err("unknown property must fail");
        assert_eq!(error, TagError::UnknownProperty("glow".to_string()));
        let error = parse_tag_name("weight_light").expect_err("invalid weight must fail");
        assert!(matches!(error, TagError::InvalidValue { .. }));
        let error = parse_tag_name("boldness").expect_err("missing separator must fail");
        assert!(matches!(error, TagError::MalformedName(_)));
    }

    #[test]
    fn link_target_round_trips_through_payload() {
        let file = LinkTarget::File("/home/user/notes.txt".to_string());
        assert_eq!(LinkTarget::parse(&file.to_value()), Some(file));

        let node = LinkTarget::parse("node 7 h1-2").expect("node link should parse");
        assert_eq!(
            node,
            LinkTarget::Node {
                id: NodeId(7),
                anchor: Some("h1-2".to_string())
            }
        );
        assert_eq!(LinkTarget::parse("node x"), None);
    }

    #[test]
    fn property_rules_match_classes() {
        assert_eq!(TagProperty::Weight.rule(), TagRule::Toggle);
        assert_eq!(TagProperty::Justification.rule(), TagRule::Paragraph);
        assert_eq!(TagProperty::Foreground.rule(), TagRule::Replace);
    }

    #[test]
    fn tag_table_creates_once_and_only_grows() {
        let mut table = TagTable::new();
        let name = table
            .lookup_or_create(TagProperty::Weight, "heavy")
            .expect("weight should register")
            .name
            .clone();
        assert_eq!(name, "weight_heavy");
        table
            .lookup_or_create_name("weight_heavy")
            .expect("second lookup should succeed");
        assert_eq!(table.len(), 1);
        let entry = table.get("weight_heavy").expect("entry should exist");
        assert!(entry.style.bold);
    }
}
