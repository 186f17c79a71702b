//! # Visual markup
//!
//! Conversion of the embedded visual dialect into renderable forms.
//!
//! ## Pipeline
//!
//! 1. **scanner** finds unresolved segments in a message view.
//! 2. **document** parses a segment and picks a builder by its `type` tag.
//! 3. **mindmap** turns heading text into a node/edge graph (Mermaid source).
//! 4. **positional** turns text-box children into an absolute layout.
//!
//! A failure anywhere in steps 2-4 is confined to the one segment.

pub mod document;
pub mod mindmap;
pub mod positional;
pub mod scanner;

pub use document::{parse_visual_element, ChildElement, VisualDocumentParser, VisualElement, VisualKind, VisualRender};
pub use mindmap::{build_mindmap, GraphEdge, MindmapGraph, MindmapNode};
pub use positional::{build_positional, LayoutItem, PlacedBox, PositionalLayout, TextBox};
pub use scanner::{MarkupScanner, ScanReport};
