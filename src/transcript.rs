//! Conversation state: the wire messages plus, for each one, a rendered view
//! in which visual segments are resolved in place.
//!
//! ## Segment lifecycle
//! - A fenced block labelled with the dialect's fence label becomes a
//!   [`VisualSegment`] in `Pending` state when the message is appended.
//! - The first scan that reaches it resolves it to a visual or to an error
//!   indicator and flips its [`RenderRecord`]. Later scans skip it.
//! - Mind-map graphs are laid out asynchronously; the result is attached by
//!   [`Transcript::apply_graph_render`] if the segment is still there.

use std::collections::HashMap;

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use tracing::debug;

use crate::error::VisualError;
use crate::markup::mindmap::MindmapGraph;
use crate::markup::positional::PositionalLayout;
use crate::markup::scanner::{MarkupScanner, ScanReport};
use crate::protocol::{data_uri_mime, ChatMessage, ContentPart, MessageContent};
use crate::render::{GraphRenderResponse, RichTextRenderer};

/// One-way flag: once a segment is rendered it is never processed again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderRecord {
    rendered: bool,
}

impl RenderRecord {
    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// Returns `false` if the record was already set.
    fn mark_rendered(&mut self) -> bool {
        !std::mem::replace(&mut self.rendered, true)
    }
}

/// A mind-map handed to the layout engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphView {
    pub graph_id: String,
    pub graph: MindmapGraph,
    pub description: String,
    /// Filled in when the layout engine answers.
    pub artifact: Option<Result<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedVisual {
    Graph(GraphView),
    Positional(PositionalLayout),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutput {
    Pending,
    Visual(ResolvedVisual),
    Error(VisualError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualSegment {
    source: String,
    record: RenderRecord,
    output: SegmentOutput,
}

impl VisualSegment {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), record: RenderRecord::default(), output: SegmentOutput::Pending }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn record(&self) -> RenderRecord {
        self.record
    }

    pub fn output(&self) -> &SegmentOutput {
        &self.output
    }

    /// Text shown in place of a segment that failed to render.
    pub fn error_indicator(&self) -> Option<String> {
        match &self.output {
            SegmentOutput::Error(e) => Some(format!("Failed to render visual: {e}")),
            _ => None,
        }
    }

    /// Store the outcome of the first scan. Later calls are ignored.
    pub(crate) fn resolve(&mut self, output: SegmentOutput) -> bool {
        if !self.record.mark_rendered() {
            return false;
        }
        self.output = output;
        true
    }

    fn graph_mut(&mut self, graph_id: &str) -> Option<&mut GraphView> {
        match &mut self.output {
            SegmentOutput::Visual(ResolvedVisual::Graph(view)) if view.graph_id == graph_id => Some(view),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Ordinary rich text, kept as source.
    Markdown(String),
    Visual(VisualSegment),
    /// An uploaded file, by MIME type.
    Attachment(String),
}

/// A message split into displayable blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageView {
    blocks: Vec<Block>,
}

impl MessageView {
    /// Split `markdown` around fenced blocks whose info string starts with
    /// `fence_label`.
    pub fn parse(markdown: &str, fence_label: &str) -> Self {
        let mut view = MessageView::default();
        view.extend_from_markdown(markdown, fence_label);
        view
    }

    pub fn from_message(message: &ChatMessage, fence_label: &str) -> Self {
        match &message.content {
            MessageContent::Text(text) => Self::parse(text, fence_label),
            MessageContent::Parts(parts) => {
                let mut view = MessageView::default();
                for part in parts {
                    match part {
                        ContentPart::Text { text } => view.extend_from_markdown(text, fence_label),
                        ContentPart::ImageUrl { image_url } => {
                            let mime = data_uri_mime(&image_url.url).unwrap_or("image");
                            view.blocks.push(Block::Attachment(mime.to_string()));
                        }
                    }
                }
                view
            }
        }
    }

    fn extend_from_markdown(&mut self, markdown: &str, fence_label: &str) {
        let mut cursor = 0;
        let mut open: Option<(usize, usize, String)> = None;

        for (event, range) in Parser::new(markdown).into_offset_iter() {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info)))
                    if info.split_whitespace().next() == Some(fence_label) =>
                {
                    open = Some((range.start, range.end, String::new()));
                }
                Event::Text(text) => {
                    if let Some((_, _, source)) = open.as_mut() {
                        source.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((start, end, source)) = open.take() {
                        self.push_markdown(&markdown[cursor..start]);
                        self.blocks.push(Block::Visual(VisualSegment::new(source)));
                        cursor = end;
                    }
                }
                _ => {}
            }
        }
        self.push_markdown(&markdown[cursor..]);
    }

    fn push_markdown(&mut self, text: &str) {
        if !text.trim().is_empty() {
            self.blocks.push(Block::Markdown(text.to_string()));
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn segments(&self) -> impl Iterator<Item = &VisualSegment> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Visual(s) => Some(s),
            _ => None,
        })
    }

    /// Segments with their block index.
    pub(crate) fn segments_mut(&mut self) -> impl Iterator<Item = (usize, &mut VisualSegment)> {
        self.blocks.iter_mut().enumerate().filter_map(|(i, b)| match b {
            Block::Visual(s) => Some((i, s)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub message: ChatMessage,
    pub view: MessageView,
}

/// Owned conversation state, threaded through the stream consumer and the
/// scanner.
#[derive(Debug, Clone)]
pub struct Transcript {
    fence_label: String,
    entries: Vec<TranscriptEntry>,
    /// graph id → (message index, block index) awaiting a layout response
    pending_graphs: HashMap<String, (usize, usize)>,
}

impl Transcript {
    pub fn new(fence_label: impl Into<String>) -> Self {
        Self { fence_label: fence_label.into(), entries: Vec::new(), pending_graphs: HashMap::new() }
    }

    pub fn fence_label(&self) -> &str {
        &self.fence_label
    }

    /// Append a message; returns its index.
    pub fn push(&mut self, message: ChatMessage) -> usize {
        let view = MessageView::from_message(&message, &self.fence_label);
        self.entries.push(TranscriptEntry { message, view });
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Drop every message. Layout responses still in flight become no-ops.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_graphs.clear();
    }

    pub fn pending_graphs(&self) -> usize {
        self.pending_graphs.len()
    }

    pub fn scan_message<R: RichTextRenderer>(&mut self, index: usize, scanner: &MarkupScanner<'_, R>) -> ScanReport {
        let Some(entry) = self.entries.get_mut(index) else {
            return ScanReport::default();
        };
        let report = scanner.scan(&mut entry.view);
        for (block, graph_id) in &report.submitted {
            self.pending_graphs.insert(graph_id.clone(), (index, *block));
        }
        report
    }

    pub fn scan_all<R: RichTextRenderer>(&mut self, scanner: &MarkupScanner<'_, R>) -> ScanReport {
        let mut total = ScanReport::default();
        for index in 0..self.entries.len() {
            total.merge(self.scan_message(index, scanner));
        }
        total
    }

    /// Attach a layout result to its segment. Returns `false` without error
    /// when the target is gone: unknown id, cleared transcript, or a block
    /// that no longer holds this graph.
    pub fn apply_graph_render(&mut self, response: GraphRenderResponse) -> bool {
        let Some((message, block)) = self.pending_graphs.remove(&response.graph_id) else {
            debug!(graph_id = %response.graph_id, "layout result for unknown target ignored");
            return false;
        };
        let target = self
            .entries
            .get_mut(message)
            .and_then(|e| e.view.blocks.get_mut(block))
            .and_then(|b| match b {
                Block::Visual(segment) => segment.graph_mut(&response.graph_id),
                _ => None,
            });
        match target {
            Some(view) => {
                view.artifact = Some(response.outcome);
                true
            }
            None => {
                debug!(graph_id = %response.graph_id, "layout target no longer present");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ImageUrl;

    const FENCE: &str = "mymap";

    #[test]
    fn test_parse_splits_around_labelled_fences() {
        let md = "Intro\n\n```mymap\n<visual type=\"mindmap\"># A</visual>\n```\n\n```rust\nfn main() {}\n```\n\nOutro\n";
        let view = MessageView::parse(md, FENCE);
        assert_eq!(view.blocks().len(), 3);
        assert!(matches!(&view.blocks()[0], Block::Markdown(t) if t.trim() == "Intro"));
        match &view.blocks()[1] {
            Block::Visual(seg) => {
                assert_eq!(seg.source(), "<visual type=\"mindmap\"># A</visual>\n");
                assert!(!seg.record().is_rendered());
            }
            other => panic!("expected visual, got {other:?}"),
        }
        match &view.blocks()[2] {
            Block::Markdown(t) => {
                assert!(t.contains("```rust"));
                assert!(t.contains("Outro"));
            }
            other => panic!("expected markdown, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_label_with_extra_info_words() {
        let view = MessageView::parse("```mymap title=x\n<v/>\n```\n", FENCE);
        assert_eq!(view.segments().count(), 1);
    }

    #[test]
    fn test_parse_no_segments() {
        let view = MessageView::parse("plain *text*", FENCE);
        assert_eq!(view.blocks(), &[Block::Markdown("plain *text*".to_string())]);
    }

    #[test]
    fn test_parts_message_produces_attachment_block() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::text("Analyse this"),
            ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/jpeg;base64,AAAA".into() } },
        ]);
        let view = MessageView::from_message(&msg, FENCE);
        assert_eq!(view.blocks()[1], Block::Attachment("image/jpeg".to_string()));
    }

    #[test]
    fn test_record_transitions_once() {
        let mut seg = VisualSegment::new("<x/>");
        assert!(seg.resolve(SegmentOutput::Error(VisualError::UnknownVisualType(String::new()))));
        assert!(!seg.resolve(SegmentOutput::Pending));
        assert!(seg.record().is_rendered());
        assert_eq!(seg.error_indicator().as_deref(), Some("Failed to render visual: unknown visual type: \"\""));
    }

    #[test]
    fn test_apply_unknown_graph_is_noop() {
        let mut t = Transcript::new(FENCE);
        t.push(ChatMessage::assistant("hi"));
        let applied = t.apply_graph_render(GraphRenderResponse {
            graph_id: "mermaid-missing".into(),
            outcome: Ok("svg".into()),
        });
        assert!(!applied);
    }
}
