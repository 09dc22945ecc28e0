//! Minimal XML codec for the canonical document format.
//!
//! # Responsibility
//! - Write well-formed, escaped XML into an in-memory string.
//! - Read XML in one forward pass as a stream of events (see `reader`).
//!
//! # Invariants
//! - Characters XML 1.0 cannot represent are stripped on write, unless the
//!   writer is `lossless`, which emits them as character references.
//! - Attribute values escape whitespace controls so they survive re-reading.

pub mod reader;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;

pub use reader::{XmlError, XmlEvent, XmlReader, XmlResult};

static FORBIDDEN_CHARS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x{FFFE}\x{FFFF}]").expect("valid forbidden char regex")
});

/// Removes characters that cannot appear in an XML 1.0 document.
pub fn strip_forbidden(value: &str) -> Cow<'_, str> {
    FORBIDDEN_CHARS_RE.replace_all(value, "")
}

/// Treatment of characters XML 1.0 cannot represent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForbiddenChars {
    /// Dropped from the output.
    #[default]
    Strip,
    /// Written as hex character references. Only `XmlReader` reads these
    /// back, so this mode is for in-memory fragments.
    Reference,
}

/// Escapes character data.
pub fn escape_text(value: &str) -> String {
    escape(value, false, ForbiddenChars::Strip)
}

/// Escapes an attribute value for double-quoted output.
pub fn escape_attribute(value: &str) -> String {
    escape(value, true, ForbiddenChars::Strip)
}

fn escape(value: &str, attribute: bool, forbidden: ForbiddenChars) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\r' => escaped.push_str("&#13;"),
            '"' if attribute => escaped.push_str("&quot;"),
            '\n' if attribute => escaped.push_str("&#10;"),
            '\t' if attribute => escaped.push_str("&#9;"),
            other => escaped.push(other),
        }
    }
    match forbidden {
        ForbiddenChars::Strip => strip_forbidden(&escaped).into_owned(),
        ForbiddenChars::Reference => FORBIDDEN_CHARS_RE
            .replace_all(&escaped, |caps: &Captures<'_>| {
                let code = caps[0].chars().next().map_or(0, u32::from);
                format!("&#x{code:X};")
            })
            .into_owned(),
    }
}

/// Streaming XML writer over a growing string.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    open: Vec<&'static str>,
    forbidden: ForbiddenChars,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer that keeps forbidden characters as character references.
    pub fn lossless() -> Self {
        Self {
            forbidden: ForbiddenChars::Reference,
            ..Self::default()
        }
    }

    pub fn forbidden_chars(&self) -> ForbiddenChars {
        self.forbidden
    }

    /// Starts a document with the XML declaration.
    pub fn with_declaration() -> Self {
        let mut writer = Self::new();
        writer
            .out
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        writer
    }

    pub fn start(&mut self, name: &'static str, attributes: &[(&str, Cow<'_, str>)]) {
        self.open_tag(name, attributes);
        self.out.push('>');
        self.open.push(name);
    }

    pub fn empty(&mut self, name: &'static str, attributes: &[(&str, Cow<'_, str>)]) {
        self.open_tag(name, attributes);
        self.out.push_str("/>");
    }

    pub fn text(&mut self, value: &str) {
        self.out.push_str(&escape(value, false, self.forbidden));
    }

    /// Closes the most recently started element.
    pub fn end(&mut self) {
        if let Some(name) = self.open.pop() {
            self.out.push_str("</");
            self.out.push_str(name);
            self.out.push('>');
        }
    }

    /// Inserts a newline between structural elements.
    pub fn newline(&mut self) {
        self.out.push('\n');
    }

    /// Closes any open elements and returns the document.
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.end();
        }
        self.out
    }

    fn open_tag(&mut self, name: &str, attributes: &[(&str, Cow<'_, str>)]) {
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attributes {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            let escaped = escape(value, true, self.forbidden);
            self.out.push_str(&escaped);
            self.out.push('"');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_attribute, escape_text, strip_forbidden, XmlEvent, XmlReader, XmlWriter};
    use std::borrow::Cow;

    #[test]
    fn strip_forbidden_drops_control_characters_only() {
        assert_eq!(strip_forbidden("a\u{1}b\tc\nd"), "ab\tc\nd");
    }

    #[test]
    fn escaping_covers_markup_and_attribute_whitespace() {
        assert_eq!(escape_text("a<b & c>"), "a&lt;b &amp; c&gt;");
        assert_eq!(escape_attribute("say \"hi\"\n"), "say &quot;hi&quot;&#10;");
    }

    #[test]
    fn lossless_writer_keeps_control_characters_readable() {
        let mut writer = XmlWriter::lossless();
        writer.start("t", &[("a", Cow::Borrowed("\u{1b}x"))]);
        writer.text("a\u{1}b\u{ffff}");
        let xml = writer.finish();
        assert_eq!(xml, "<t a=\"&#x1B;x\">a&#x1;b&#xFFFF;</t>");

        let mut reader = XmlReader::new(&xml);
        let start = reader.next_event().expect("start").expect("event");
        assert_eq!(
            start,
            XmlEvent::Start {
                name: "t",
                attributes: vec![("a", "\u{1b}x".to_string())],
            }
        );
        let text = reader.next_event().expect("text").expect("event");
        assert_eq!(text, XmlEvent::Text("a\u{1}b\u{ffff}".to_string()));
    }

    #[test]
    fn writer_nests_and_closes_elements() {
        let mut writer = XmlWriter::new();
        writer.start("node", &[("name", Cow::Borrowed("A&B"))]);
        writer.empty("anchor", &[("offset", Cow::Owned(3.to_string()))]);
        writer.text("x");
        let xml = writer.finish();
        assert_eq!(xml, "<node name=\"A&amp;B\"><anchor offset=\"3\"/>x</node>");
    }
}
