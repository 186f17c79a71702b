//! Parsing one visual segment and dispatching it to a builder.
//!
//! The dialect is a small XML vocabulary: a single root element carrying a
//! `type` attribute, whose body is either heading-structured text (mind-maps)
//! or a list of positioned child elements (diagrams).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::VisualError;
use crate::markup::mindmap::{build_mindmap, MindmapGraph};
use crate::markup::positional::{build_positional, parse_leading_int, PositionalLayout};
use crate::render::RichTextRenderer;

// ---------------------------------------------------------------------------
// Visual kinds
// ---------------------------------------------------------------------------

/// Closed set of renderable visual kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualKind {
    Mindmap,
    Flowchart,
    Diagram,
    CheatSheet,
}

/// Prefix table consulted once at the parse boundary. Matching is
/// case-sensitive and tags such as `mindmap-radial` select the same kind.
const KIND_PREFIXES: [(&str, VisualKind); 4] = [
    ("mindmap", VisualKind::Mindmap),
    ("flowchart", VisualKind::Flowchart),
    ("diagram", VisualKind::Diagram),
    ("cheat-sheet", VisualKind::CheatSheet),
];

impl VisualKind {
    pub fn classify(tag: &str) -> Result<Self, VisualError> {
        if tag.is_empty() {
            return Err(VisualError::UnknownVisualType(String::new()));
        }
        KIND_PREFIXES
            .iter()
            .find(|(prefix, _)| tag.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| VisualError::UnknownVisualType(tag.to_string()))
    }

    pub fn is_positional(self) -> bool {
        !matches!(self, VisualKind::Mindmap)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VisualKind::Mindmap => "mindmap",
            VisualKind::Flowchart => "flowchart",
            VisualKind::Diagram => "diagram",
            VisualKind::CheatSheet => "cheat-sheet",
        }
    }
}

impl std::fmt::Display for VisualKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parsed element tree
// ---------------------------------------------------------------------------

/// A direct child of the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content, including nested elements.
    pub text: String,
}

impl ChildElement {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The root of one visual segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualElement {
    pub visual_type: String,
    /// Container width; `None` when absent, unparseable or not positive.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Text content of the whole element (the mind-map body).
    pub raw_text: String,
    pub children: Vec<ChildElement>,
}

#[derive(Debug, Default)]
struct OpenElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<ChildElement>,
}

fn malformed(detail: impl std::fmt::Display) -> VisualError {
    VisualError::MalformedVisualMarkup(detail.to_string())
}

fn open_element(start: &BytesStart<'_>) -> Result<OpenElement, VisualError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        attributes.push((key, value));
    }
    Ok(OpenElement { name, attributes, ..Default::default() })
}

fn positive(value: Option<&str>) -> Option<u32> {
    value
        .and_then(parse_leading_int)
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
}

/// Parse a segment into a [`VisualElement`]. The document must have exactly
/// one root element, balanced tags, and no text outside the root.
pub fn parse_visual_element(source: &str) -> Result<VisualElement, VisualError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<OpenElement> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(malformed(format!("at byte {}: {e}", reader.buffer_position())));
            }
        };
        match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(malformed("more than one root element"));
                }
                stack.push(open_element(&start)?);
            }
            Event::Empty(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(malformed("more than one root element"));
                }
                let el = open_element(&start)?;
                close_element(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| malformed("unexpected closing tag"))?;
                close_element(&mut stack, &mut root, el)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                append_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&mut stack, &text)?;
            }
            Event::Eof => break,
            // declarations, comments, processing instructions
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!("unclosed element <{}>", open.name)));
    }
    let root = root.ok_or_else(|| malformed("no root element"))?;

    let visual_type = root
        .attributes
        .iter()
        .find(|(k, _)| k == "type")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let attr = |key: &str| root.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    Ok(VisualElement {
        width: positive(attr("width")),
        height: positive(attr("height")),
        visual_type,
        raw_text: root.text,
        children: root.children,
    })
}

fn close_element(
    stack: &mut [OpenElement],
    root: &mut Option<OpenElement>,
    el: OpenElement,
) -> Result<(), VisualError> {
    match stack.last_mut() {
        Some(parent) => {
            // grandchildren only contribute their text, already accumulated
            parent.children.push(ChildElement {
                name: el.name,
                attributes: el.attributes,
                text: el.text,
            });
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(malformed("more than one root element")),
    }
}

fn append_text(stack: &mut [OpenElement], text: &str) -> Result<(), VisualError> {
    if stack.is_empty() {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(malformed("text outside the root element"));
    }
    for open in stack.iter_mut() {
        open.text.push_str(text);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Output of a successful segment conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualRender {
    /// Graph description, still to be laid out by the external engine.
    Mindmap(MindmapGraph),
    Positional(PositionalLayout),
}

/// Parses segments and routes them to the matching builder.
#[derive(Debug, Clone, Default)]
pub struct VisualDocumentParser<R> {
    renderer: R,
}

impl<R: RichTextRenderer> VisualDocumentParser<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn render(&self, source: &str) -> Result<VisualRender, VisualError> {
        let element = parse_visual_element(source)?;
        let kind = VisualKind::classify(&element.visual_type)?;
        match kind {
            VisualKind::Mindmap => Ok(VisualRender::Mindmap(build_mindmap(&element.raw_text))),
            VisualKind::Flowchart | VisualKind::Diagram | VisualKind::CheatSheet => Ok(
                VisualRender::Positional(build_positional(kind, &element, &self.renderer)),
            ),
        }
    }
}
