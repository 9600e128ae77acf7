pub mod fields;


use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;
use crate::error::StandaloneError;

pub use self::fields::{FieldReference, PathField};

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)<!--.*?-->",
        r"|<!\[CDATA\[.*?\]\]>",
        r"|<\?.*?\?>",
        r"|<![^>]*>",
        r"|</\s*(?P<end>[A-Za-z_][\w:.\-]*)\s*>",
        r#"|<(?P<start>[A-Za-z_][\w:.\-]*)(?P<attrs>(?:\s+[^\s=/>]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*(?P<empty>/?)>"#,
    ))
    .expect("static pattern")
});

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static pattern")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    /// Unescaped value.
    pub value: String,
    quote: char,
    /// Byte range of the raw value (between the quotes) in the source text.
    span: Range<usize>,
    dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub depth: usize,
    pub parent: Option<usize>,
    pub attributes: Vec<Attribute>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|a| a.name == name).map(|a| a.value.as_str())
    }

    /// `configuration Name="Common"` style label used in messages.
    pub fn label(&self) -> String {
        match self.attr("Name") {
            Some(n) => format!("{} Name=\"{}\"", self.name, n),
            None => self.name.clone(),
        }
    }
}

/// Project descriptor kept as its original text plus an element index over it.
/// Only edited attribute values differ on serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    text: String,
    elements: Vec<Element>,
}

impl Descriptor {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(StandaloneError::MissingInput {
                path: path.to_path_buf(),
                what: "project descriptor",
            }
            .into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project descriptor {}", path.display()))?;
        let descriptor = Self::parse(&text).map_err(|reason| StandaloneError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(descriptor)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let mut elements: Vec<Element> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut cursor = 0;

        for caps in MARKUP_RE.captures_iter(text) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            check_gap(text, cursor..whole.start)?;
            cursor = whole.end;

            if let Some(end) = caps.name("end") {
                let Some(index) = open.pop() else {
                    return Err(format!("unexpected </{}> at byte {}", end.as_str(), whole.start));
                };
                if elements[index].name != end.as_str() {
                    return Err(format!(
                        "</{}> at byte {} closes <{}>",
                        end.as_str(),
                        whole.start,
                        elements[index].name
                    ));
                }
            } else if let Some(start) = caps.name("start") {
                let attributes = match caps.name("attrs") {
                    Some(region) => parse_attributes(region.as_str(), region.start()),
                    None => Vec::new(),
                };
                let index = elements.len();
                elements.push(Element {
                    name: start.as_str().to_string(),
                    depth: open.len(),
                    parent: open.last().copied(),
                    attributes,
                });
                let self_closing = caps.name("empty").is_some_and(|m| !m.as_str().is_empty());
                if !self_closing {
                    open.push(index);
                }
            }
        }
        check_gap(text, cursor..text.len())?;

        if let Some(&index) = open.last() {
            return Err(format!("<{}> is never closed", elements[index].name));
        }
        if elements.is_empty() {
            return Err("no elements found".to_string());
        }

        Ok(Self {
            text: text.to_string(),
            elements,
        })
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn set_attribute(&mut self, element: usize, attribute: usize, value: String) {
        let attr = &mut self.elements[element].attributes[attribute];
        if attr.value != value {
            attr.value = value;
            attr.dirty = true;
        }
    }

    /// Original text with edited attribute values spliced in.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for attr in self.elements.iter().flat_map(|e| e.attributes.iter()).filter(|a| a.dirty) {
            out.push_str(&self.text[cursor..attr.span.start]);
            out.push_str(&escape(&attr.value, attr.quote));
            cursor = attr.span.end;
        }
        out.push_str(&self.text[cursor..]);
        out
    }
}

fn check_gap(text: &str, gap: Range<usize>) -> Result<(), String> {
    match text[gap.clone()].find('<') {
        Some(offset) => Err(format!("unrecognized markup at byte {}", gap.start + offset)),
        None => Ok(()),
    }
}

fn parse_attributes(region: &str, offset: usize) -> Vec<Attribute> {
    ATTRIBUTE_RE
        .captures_iter(region)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let (value, quote) = match caps.get(2) {
                Some(v) => (v, '"'),
                None => (caps.get(3)?, '\''),
            };
            Some(Attribute {
                name,
                value: unescape(value.as_str()),
                quote,
                span: offset + value.start()..offset + value.end(),
                dirty: false,
            })
        })
        .collect()
}

pub fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' if quote == '"' => out.push_str("&quot;"),
            '\'' if quote == '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
