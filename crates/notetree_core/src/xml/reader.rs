//! Single forward-pass XML event reader.
//!
//! # Invariants
//! - Every `Start` event is matched by exactly one `End` event, including
//!   self-closing elements.
//! - End-of-input with open elements is an error, never a silent close.
//! - Only the five predefined entities and numeric references are accepted.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type XmlResult<T> = Result<T, XmlError>;

/// Structural XML errors, positioned by byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// Input ended inside markup or with open elements.
    UnexpectedEof { open: Option<String> },
    /// Closing tag does not match the innermost open element.
    MismatchedEnd {
        expected: String,
        found: String,
        position: usize,
    },
    /// Unknown or malformed entity reference.
    InvalidEntity { position: usize },
    /// Any other syntax violation.
    Syntax { position: usize, message: String },
}

impl Display for XmlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEof { open: Some(name) } => {
                write!(f, "unexpected end of input inside `<{name}>`")
            }
            Self::UnexpectedEof { open: None } => write!(f, "unexpected end of input"),
            Self::MismatchedEnd {
                expected,
                found,
                position,
            } => write!(
                f,
                "mismatched closing tag at byte {position}: expected `</{expected}>`, found `</{found}>`"
            ),
            Self::InvalidEntity { position } => write!(f, "invalid entity at byte {position}"),
            Self::Syntax { position, message } => {
                write!(f, "xml syntax error at byte {position}: {message}")
            }
        }
    }
}

impl Error for XmlError {}

/// One parsed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent<'a> {
    Start {
        name: &'a str,
        attributes: Vec<(&'a str, String)>,
    },
    End {
        name: &'a str,
    },
    Text(String),
}

/// Pull reader over a borrowed document.
#[derive(Debug)]
pub struct XmlReader<'a> {
    input: &'a str,
    position: usize,
    open: Vec<&'a str>,
    pending_end: Option<&'a str>,
}

impl<'a> XmlReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            position: 0,
            open: Vec::new(),
            pending_end: None,
        }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Returns the next event, or `None` at a well-formed end of input.
    pub fn next_event(&mut self) -> XmlResult<Option<XmlEvent<'a>>> {
        if let Some(name) = self.pending_end.take() {
            return Ok(Some(XmlEvent::End { name }));
        }
        let input = self.input;
        loop {
            let rest = &input[self.position..];
            if rest.is_empty() {
                return match self.open.last() {
                    Some(name) => Err(XmlError::UnexpectedEof {
                        open: Some((*name).to_string()),
                    }),
                    None => Ok(None),
                };
            }
            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                let start = self.position;
                self.position += end;
                if self.open.is_empty() {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    return Err(self.syntax(start, "text outside the root element"));
                }
                return Ok(Some(XmlEvent::Text(decode_entities(raw, start)?)));
            }
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
                continue;
            }
            if rest.starts_with("<!--") {
                self.skip_past("-->")?;
                continue;
            }
            if let Some(body) = rest.strip_prefix("<![CDATA[") {
                let end = body.find("]]>").ok_or_else(|| self.eof())?;
                let text = body[..end].to_string();
                self.position += "<![CDATA[".len() + end + "]]>".len();
                return Ok(Some(XmlEvent::Text(text)));
            }
            if rest.starts_with("<!") {
                self.skip_past(">")?;
                continue;
            }
            if rest.starts_with("</") {
                return self.read_end_tag().map(Some);
            }
            return self.read_start_tag().map(Some);
        }
    }

    fn read_end_tag(&mut self) -> XmlResult<XmlEvent<'a>> {
        let input = self.input;
        let start = self.position;
        let body_start = start + 2;
        let close = input[body_start..].find('>').ok_or_else(|| self.eof())?;
        let name = input[body_start..body_start + close].trim_end();
        self.position = body_start + close + 1;
        match self.open.pop() {
            Some(expected) if expected == name => Ok(XmlEvent::End { name: expected }),
            Some(expected) => Err(XmlError::MismatchedEnd {
                expected: expected.to_string(),
                found: name.to_string(),
                position: start,
            }),
            None => Err(self.syntax(start, "closing tag without open element")),
        }
    }

    fn read_start_tag(&mut self) -> XmlResult<XmlEvent<'a>> {
        let input = self.input;
        let start = self.position;
        let mut cursor = start + 1;
        let name_end = scan_name(input, cursor);
        if name_end == cursor {
            return Err(self.syntax(start, "expected element name"));
        }
        let name = &input[cursor..name_end];
        cursor = name_end;

        let mut attributes = Vec::new();
        loop {
            cursor = skip_whitespace(input, cursor);
            let rest = &input[cursor..];
            if rest.is_empty() {
                return Err(self.eof());
            }
            if rest.starts_with("/>") {
                self.position = cursor + 2;
                self.pending_end = Some(name);
                return Ok(XmlEvent::Start { name, attributes });
            }
            if rest.starts_with('>') {
                self.position = cursor + 1;
                self.open.push(name);
                return Ok(XmlEvent::Start { name, attributes });
            }

            let key_end = scan_name(input, cursor);
            if key_end == cursor {
                return Err(self.syntax(cursor, "expected attribute name"));
            }
            let key = &input[cursor..key_end];
            cursor = skip_whitespace(input, key_end);
            if !input[cursor..].starts_with('=') {
                return Err(self.syntax(cursor, "expected `=` after attribute name"));
            }
            cursor = skip_whitespace(input, cursor + 1);
            let quote = input[cursor..]
                .chars()
                .next()
                .filter(|c| *c == '"' || *c == '\'')
                .ok_or_else(|| self.syntax(cursor, "expected quoted attribute value"))?;
            let value_start = cursor + 1;
            let value_len = input[value_start..]
                .find(quote)
                .ok_or_else(|| self.eof())?;
            let raw = &input[value_start..value_start + value_len];
            if raw.contains('<') {
                return Err(self.syntax(value_start, "`<` in attribute value"));
            }
            if attributes.iter().any(|(existing, _)| *existing == key) {
                return Err(self.syntax(cursor, "duplicate attribute"));
            }
            attributes.push((key, decode_entities(raw, value_start)?));
            cursor = value_start + value_len + 1;
        }
    }

    fn skip_past(&mut self, terminator: &str) -> XmlResult<()> {
        let rest = &self.input[self.position..];
        let end = rest.find(terminator).ok_or_else(|| self.eof())?;
        self.position += end + terminator.len();
        Ok(())
    }

    fn eof(&self) -> XmlError {
        XmlError::UnexpectedEof {
            open: self.open.last().map(|name| (*name).to_string()),
        }
    }

    fn syntax(&self, position: usize, message: &str) -> XmlError {
        XmlError::Syntax {
            position,
            message: message.to_string(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn scan_name(input: &str, from: usize) -> usize {
    input[from..]
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map_or(input.len(), |(index, _)| from + index)
}

fn skip_whitespace(input: &str, from: usize) -> usize {
    input[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(input.len(), |(index, _)| from + index)
}

/// Replaces entity and character references in `raw`.
fn decode_entities(raw: &str, position: usize) -> XmlResult<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut offset = position;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after.find(';').ok_or(XmlError::InvalidEntity {
            position: offset + amp,
        })?;
        let entity = &after[..semi];
        let value = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(decimal) = entity.strip_prefix('#') {
                    decimal.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or(XmlError::InvalidEntity {
                        position: offset + amp,
                    })?
            }
        };
        decoded.push(value);
        let consumed = amp + 1 + semi + 1;
        rest = &rest[consumed..];
        offset += consumed;
    }
    decoded.push_str(rest);
    Ok(decoded)
}
