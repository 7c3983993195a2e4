//! XML normalization for feed responses.
//!
//! The feed answers in XML. Before extraction every body is turned into a
//! uniform node tree:
//!
//! - an element becomes an object keyed by its attribute and child names
//! - attribute values are kept as strings
//! - a child that appears more than once becomes an array, a lone child stays
//!   a single object (the extractor coerces both)
//! - element text, with references and CDATA resolved, is trimmed and stored
//!   under `content` unless it is blank
//!
//! The root element is wrapped in an object keyed by its own name, so a
//! `<body>` document reads as `{"body": {...}}`.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::FeedError;

pub type NodeTree = Value;

const TEXT_KEY: &str = "content";

/// Parses an XML document into a [`NodeTree`].
///
/// # Errors
///
/// Returns [`FeedError::Format`] if the body is not UTF-8, is not well formed,
/// or has no root element.
pub fn parse_document(bytes: &[u8]) -> Result<NodeTree, FeedError> {
    let xml = std::str::from_utf8(bytes).map_err(|e| FeedError::Format(e.to_string()))?;
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<(String, Map<String, Value>)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let (name, node) = open_element(&reader, &e)?;
                stack.push(OpenElement {
                    name,
                    node,
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                let (name, node) = open_element(&reader, &e)?;
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.node, name, Value::Object(node)),
                    None => root = Some((name, node)),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| FeedError::Format("unbalanced closing tag".to_string()))?;
                let (name, node) = element.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.node, name, Value::Object(node)),
                    None => root = Some((name, node)),
                }
            }
            Event::Text(t) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&decode(&reader, &t)?);
                }
            }
            Event::CData(c) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&decode(&reader, &c)?);
                }
            }
            Event::GeneralRef(r) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&resolve_reference(&reader, &r)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(FeedError::Format(format!(
            "document ended with {} unclosed element(s)",
            stack.len()
        )));
    }

    let (name, node) =
        root.ok_or_else(|| FeedError::Format("document has no root element".to_string()))?;
    let mut doc = Map::new();
    doc.insert(name, Value::Object(node));
    Ok(Value::Object(doc))
}

/// An element whose closing tag has not been read yet. Text, references and
/// CDATA accumulate in `text` until then.
struct OpenElement {
    name: String,
    node: Map<String, Value>,
    text: String,
}

impl OpenElement {
    fn close(mut self) -> (String, Map<String, Value>) {
        let text = self.text.trim();
        if !text.is_empty() {
            self.node
                .insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        (self.name, self.node)
    }
}

fn decode(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String, FeedError> {
    reader
        .decoder()
        .decode(raw)
        .map(|text| text.into_owned())
        .map_err(|e| FeedError::Format(e.to_string()))
}

/// `&amp;`, `&#60;`, `&#x3C;` and the other predefined references.
fn resolve_reference(
    reader: &Reader<&[u8]>,
    reference: &BytesRef<'_>,
) -> Result<String, FeedError> {
    let resolved = reference
        .resolve_char_ref()
        .map_err(|e| FeedError::Format(e.to_string()))?;
    if let Some(ch) = resolved {
        return Ok(ch.to_string());
    }

    let name = decode(reader, reference)?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| FeedError::Format(format!("unknown entity reference '&{name};'")))
}

fn open_element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<(String, Map<String, Value>), FeedError> {
    let decoder = reader.decoder();
    let name = decoder
        .decode(start.name().as_ref())
        .map_err(|e| FeedError::Format(e.to_string()))?
        .into_owned();

    let mut node = Map::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| FeedError::Format(e.to_string()))?;
        let key = decoder
            .decode(attr.key.as_ref())
            .map_err(|e| FeedError::Format(e.to_string()))?
            .into_owned();
        let value = attr.decode_and_unescape_value(decoder)?.into_owned();
        node.insert(key, Value::String(value));
    }

    Ok((name, node))
}

fn insert_child(parent: &mut Map<String, Value>, name: String, child: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(child),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, child]);
        }
        None => {
            parent.insert(name, child);
        }
    }
}
