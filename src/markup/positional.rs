//! Positional graphics: absolutely placed text boxes on a fixed canvas.

use std::fmt::Write as _;

use quick_xml::escape::escape;

use crate::error::VisualError;
use crate::markup::document::{ChildElement, VisualElement, VisualKind};
use crate::render::RichTextRenderer;

pub const DEFAULT_WIDTH: u32 = 1000;
pub const DEFAULT_HEIGHT: u32 = 800;

/// Tag name of the only child kind that is rendered.
pub const TEXT_BOX_TAG: &str = "text";

/// One positioned box, as declared in the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    /// Style class names in declaration order, `_` normalised to `-`.
    pub style_classes: Vec<String>,
    /// Rich-text source of the box contents.
    pub body: String,
}

impl TextBox {
    pub fn from_element(child: &ChildElement) -> Result<Self, VisualError> {
        let int_attr = |key: &str| -> Result<i64, VisualError> {
            let raw = child.attribute(key).ok_or_else(|| VisualError::MissingLayoutAttribute {
                element: child.name.clone(),
                attribute: key.to_string(),
            })?;
            parse_leading_int(raw).ok_or_else(|| VisualError::InvalidLayoutAttribute {
                attribute: key.to_string(),
                value: raw.to_string(),
            })
        };
        Ok(TextBox {
            x: int_attr("x")?,
            y: int_attr("y")?,
            width: int_attr("width")?,
            height: int_attr("height")?,
            style_classes: style_classes(child.attribute("style").unwrap_or_default()),
            body: dedent(&child.text),
        })
    }
}

/// A text box together with its rendered contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedBox {
    pub text_box: TextBox,
    pub content_html: String,
}

/// One entry of the layout, in document order. Later entries paint over
/// earlier ones.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutItem {
    Box(PlacedBox),
    /// A text box that could not be placed; `index` is its position among the
    /// container's children.
    Error { index: usize, error: VisualError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionalLayout {
    pub kind: VisualKind,
    pub width: u32,
    pub height: u32,
    pub items: Vec<LayoutItem>,
}

impl PositionalLayout {
    pub fn boxes(&self) -> impl Iterator<Item = &PlacedBox> {
        self.items.iter().filter_map(|item| match item {
            LayoutItem::Box(b) => Some(b),
            LayoutItem::Error { .. } => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &VisualError> {
        self.items.iter().filter_map(|item| match item {
            LayoutItem::Error { error, .. } => Some(error),
            LayoutItem::Box(_) => None,
        })
    }

    /// Standalone HTML fragment with every box absolutely positioned inside a
    /// relatively positioned container.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "<div class=\"visual-container positional-graphic {}\" style=\"position:relative;width:{}px;height:{}px;\">",
            self.kind, self.width, self.height
        );
        for item in &self.items {
            match item {
                LayoutItem::Box(placed) => {
                    let b = &placed.text_box;
                    let mut classes = String::from("positional-text");
                    for class in &b.style_classes {
                        classes.push(' ');
                        classes.push_str(&escape(class.as_str()));
                    }
                    let _ = writeln!(
                        out,
                        "  <div class=\"{classes}\" style=\"position:absolute;left:{}px;top:{}px;width:{}px;height:{}px;\">{}</div>",
                        b.x, b.y, b.width, b.height, placed.content_html.trim_end()
                    );
                }
                LayoutItem::Error { error, .. } => {
                    let message = error.to_string();
                    let _ = writeln!(
                        out,
                        "  <div class=\"error-box\">Failed to render element: {}</div>",
                        escape(message.as_str())
                    );
                }
            }
        }
        out.push_str("</div>\n");
        out
    }
}

/// Split a space-delimited `style` attribute into class names.
pub fn style_classes(attr: &str) -> Vec<String> {
    let mut classes: Vec<String> = Vec::new();
    for token in attr.split_whitespace() {
        let class = token.replace('_', "-");
        if !classes.contains(&class) {
            classes.push(class);
        }
    }
    classes
}

/// Integer at the start of `s`, after leading whitespace: `"120px"` is 120,
/// `"-4"` is -4, `"px"` is `None`.
pub fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

/// Strip surrounding blank lines and the indentation common to all
/// non-blank lines, so indented markup bodies are not read as code blocks.
fn dedent(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

/// Lay out every text-box child of `element`. Other child kinds are
/// skipped. A text box with bad attributes becomes an inline error entry
/// and does not affect its siblings.
pub fn build_positional<R: RichTextRenderer + ?Sized>(
    kind: VisualKind,
    element: &VisualElement,
    renderer: &R,
) -> PositionalLayout {
    let items = element
        .children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.name.eq_ignore_ascii_case(TEXT_BOX_TAG))
        .map(|(index, child)| match TextBox::from_element(child) {
            Ok(text_box) => {
                let content_html = renderer.render(&text_box.body);
                LayoutItem::Box(PlacedBox { text_box, content_html })
            }
            Err(error) => {
                tracing::debug!(index, %error, "text box skipped");
                LayoutItem::Error { index, error }
            }
        })
        .collect();

    PositionalLayout {
        kind,
        width: element.width.unwrap_or(DEFAULT_WIDTH),
        height: element.height.unwrap_or(DEFAULT_HEIGHT),
        items,
    }
}
