use tracing::{debug, warn};
use uuid::Uuid;

use crate::markup::document::{VisualDocumentParser, VisualRender};
use crate::render::{GraphRenderRequest, LayoutEngine, RichTextRenderer};
use crate::transcript::{GraphView, MessageView, ResolvedVisual, SegmentOutput};

/// Counts from one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub rendered: usize,
    pub failed: usize,
    /// Segments already resolved by an earlier pass.
    pub skipped: usize,
    /// `(block index, graph id)` for every layout request sent.
    pub submitted: Vec<(usize, String)>,
}

impl ScanReport {
    pub fn merge(&mut self, other: ScanReport) {
        self.rendered += other.rendered;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.submitted.extend(other.submitted);
    }
}

fn new_graph_id() -> String {
    format!("mermaid-{}", Uuid::new_v4().simple())
}

/// Resolves the pending visual segments of a message in document order.
pub struct MarkupScanner<'a, R> {
    parser: &'a VisualDocumentParser<R>,
    layout: &'a dyn LayoutEngine,
}

impl<'a, R: RichTextRenderer> MarkupScanner<'a, R> {
    pub fn new(parser: &'a VisualDocumentParser<R>, layout: &'a dyn LayoutEngine) -> Self {
        Self { parser, layout }
    }

    /// Resolve every segment not yet rendered. Safe to call repeatedly: a
    /// resolved segment, including one holding an error, is left untouched.
    pub fn scan(&self, view: &mut MessageView) -> ScanReport {
        let mut report = ScanReport::default();
        for (block, segment) in view.segments_mut() {
            if segment.record().is_rendered() {
                report.skipped += 1;
                continue;
            }
            match self.parser.render(segment.source()) {
                Ok(VisualRender::Mindmap(graph)) => {
                    let graph_id = new_graph_id();
                    let description = graph.to_mermaid();
                    segment.resolve(SegmentOutput::Visual(ResolvedVisual::Graph(GraphView {
                        graph_id: graph_id.clone(),
                        graph,
                        description: description.clone(),
                        artifact: None,
                    })));
                    debug!(%graph_id, "mind-map submitted for layout");
                    self.layout.submit(GraphRenderRequest { graph_id: graph_id.clone(), description });
                    report.submitted.push((block, graph_id));
                    report.rendered += 1;
                }
                Ok(VisualRender::Positional(layout)) => {
                    debug!(kind = %layout.kind, boxes = layout.items.len(), "positional graphic laid out");
                    segment.resolve(SegmentOutput::Visual(ResolvedVisual::Positional(layout)));
                    report.rendered += 1;
                }
                Err(error) => {
                    warn!(%error, block, "visual segment failed to render");
                    segment.resolve(SegmentOutput::Error(error));
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MarkdownRenderer;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        requests: RefCell<Vec<GraphRenderRequest>>,
    }

    impl LayoutEngine for Recorder {
        fn submit(&self, request: GraphRenderRequest) {
            self.requests.borrow_mut().push(request);
        }
    }

    const MESSAGE: &str = "Here:\n\n```mymap\n<visual type=\"mindmap\">\n# A\n## B\n</visual>\n```\n\nand\n\n```mymap\n<visual type=\"bogus\"/>\n```\n\n```mymap\n<visual type=\"diagram\"><text x=\"0\" y=\"0\" width=\"10\" height=\"10\">t</text></visual>\n```\n";

    #[test]
    fn test_scan_resolves_each_segment() {
        let parser = VisualDocumentParser::new(MarkdownRenderer);
        let recorder = Recorder::default();
        let scanner = MarkupScanner::new(&parser, &recorder);
        let mut view = MessageView::parse(MESSAGE, "mymap");

        let report = scanner.scan(&mut view);
        assert_eq!(report.rendered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.submitted.len(), 1);

        let requests = recorder.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].graph_id.starts_with("mermaid-"));
        assert!(requests[0].description.contains("node0 --> node1"));

        let outputs: Vec<_> = view.segments().map(|s| s.output().clone()).collect();
        assert!(matches!(outputs[0], SegmentOutput::Visual(ResolvedVisual::Graph(_))));
        assert!(matches!(outputs[1], SegmentOutput::Error(_)));
        assert!(matches!(outputs[2], SegmentOutput::Visual(ResolvedVisual::Positional(_))));
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let parser = VisualDocumentParser::new(MarkdownRenderer);
        let recorder = Recorder::default();
        let scanner = MarkupScanner::new(&parser, &recorder);
        let mut view = MessageView::parse(MESSAGE, "mymap");

        scanner.scan(&mut view);
        let before = view.clone();
        let second = scanner.scan(&mut view);

        assert_eq!(second.rendered + second.failed, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(recorder.requests.borrow().len(), 1);
        assert_eq!(view, before);
    }

    #[test]
    fn test_graph_ids_are_unique_per_invocation() {
        let parser = VisualDocumentParser::new(MarkdownRenderer);
        let recorder = Recorder::default();
        let scanner = MarkupScanner::new(&parser, &recorder);
        let segment = "```mymap\n<visual type=\"mindmap\"># Same</visual>\n```\n";
        let mut a = MessageView::parse(segment, "mymap");
        let mut b = MessageView::parse(segment, "mymap");
        let ra = scanner.scan(&mut a);
        let rb = scanner.scan(&mut b);
        assert_ne!(ra.submitted[0].1, rb.submitted[0].1);
        let requests = recorder.requests.borrow();
        assert_eq!(requests[0].description, requests[1].description);
    }
}
