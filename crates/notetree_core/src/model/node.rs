//! Document node identity and per-node metadata.

use crate::model::buffer::RichBuffer;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Stable node identifier, allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const RICH_TEXT: &str = "custom-colors";
const PLAIN_TEXT: &str = "plain-text";

/// Content syntax of a node's buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyntaxKind {
    #[default]
    RichText,
    PlainText,
    /// Source code in the named language.
    Code(String),
}

impl SyntaxKind {
    /// Value of the `syntax_highlighting` attribute.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RichText => RICH_TEXT,
            Self::PlainText => PLAIN_TEXT,
            Self::Code(language) => language.as_str(),
        }
    }

    /// Code syntax for `language`; `None` when the name would not survive
    /// the attribute round trip.
    pub fn code(language: &str) -> Option<Self> {
        let kind = Self::Code(language.to_string());
        kind.is_valid().then_some(kind)
    }

    /// True when `parse(as_str())` yields this kind again.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Code(language) => {
                !language.is_empty()
                    && language.trim() == language
                    && language != RICH_TEXT
                    && language != PLAIN_TEXT
            }
            _ => true,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            RICH_TEXT | "" => Self::RichText,
            PLAIN_TEXT => Self::PlainText,
            language => Self::Code(language.to_string()),
        }
    }

    pub fn is_rich_text(&self) -> bool {
        matches!(self, Self::RichText)
    }
}

/// One document node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub read_only: bool,
    pub tags: BTreeSet<String>,
    pub buffer: RichBuffer,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, syntax: SyntaxKind) -> Self {
        Self {
            id,
            name,
            parent: None,
            children: Vec::new(),
            read_only: false,
            tags: BTreeSet::new(),
            buffer: RichBuffer::new(syntax),
        }
    }

    pub fn syntax(&self) -> &SyntaxKind {
        self.buffer.syntax()
    }
}

#[cfg(test)]
mod tests {
    use super::SyntaxKind;

    #[test]
    fn syntax_kind_round_trips_attribute_values() {
        for kind in [
            SyntaxKind::RichText,
            SyntaxKind::PlainText,
            SyntaxKind::Code("python".to_string()),
        ] {
            assert_eq!(SyntaxKind::parse(kind.as_str()), kind);
        }
        assert_eq!(SyntaxKind::parse(""), SyntaxKind::RichText);
    }

    #[test]
    fn reserved_language_names_are_not_code() {
        for language in ["", " rust", "plain-text", "custom-colors"] {
            assert_eq!(SyntaxKind::code(language), None, "{language:?}");
            assert!(!SyntaxKind::Code(language.to_string()).is_valid());
        }
        assert_eq!(
            SyntaxKind::code("rust"),
            Some(SyntaxKind::Code("rust".to_string()))
        );
    }
}
