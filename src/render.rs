//! Interfaces to the external renderers: rich text for box contents and the
//! graph layout engine for mind-maps.
//!
//! The layout engine is fire-and-forget. A request carries the graph
//! description and a fresh id; the picture comes back later as a
//! [`GraphRenderResponse`] that the transcript applies only if the target
//! segment still exists.

use std::path::PathBuf;

use pulldown_cmark::{html, Options, Parser};
use tokio::sync::mpsc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Rich text
// ---------------------------------------------------------------------------

/// Turns rich-text source into display markup.
pub trait RichTextRenderer {
    fn render(&self, source: &str) -> String;
}

/// CommonMark (with tables and strikethrough) to HTML.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl RichTextRenderer for MarkdownRenderer {
    fn render(&self, source: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        let parser = Parser::new_ext(source, options);
        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

// ---------------------------------------------------------------------------
// Graph layout engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRenderRequest {
    /// Unique per invocation; used to route the response back.
    pub graph_id: String,
    /// Mermaid source.
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRenderResponse {
    pub graph_id: String,
    /// Rendered artifact, or the engine's error message.
    pub outcome: Result<String, String>,
}

/// Accepts render requests without waiting for them to finish.
pub trait LayoutEngine {
    fn submit(&self, request: GraphRenderRequest);
}

/// Engine that drops every request; graphs stay as descriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLayoutEngine;

impl LayoutEngine for DetachedLayoutEngine {
    fn submit(&self, request: GraphRenderRequest) {
        debug!(graph_id = %request.graph_id, "no layout engine attached; request dropped");
    }
}

/// Sends requests to a worker task spawned by [`spawn_layout_worker`].
#[derive(Debug, Clone)]
pub struct ChannelLayoutEngine {
    tx: mpsc::UnboundedSender<GraphRenderRequest>,
}

impl LayoutEngine for ChannelLayoutEngine {
    fn submit(&self, request: GraphRenderRequest) {
        if self.tx.send(request).is_err() {
            debug!("layout worker has stopped; request dropped");
        }
    }
}

/// Produces a picture from a graph description.
pub trait GraphRasterizer {
    fn rasterize(&self, graph_id: &str, description: &str) -> Result<String, String>;
}

/// Returns the description unchanged, for text terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineRasterizer;

impl GraphRasterizer for OutlineRasterizer {
    fn rasterize(&self, _graph_id: &str, description: &str) -> Result<String, String> {
        Ok(description.to_string())
    }
}

/// Writes `<dir>/<graph_id>.mmd` and returns the written path.
#[derive(Debug, Clone)]
pub struct MermaidFileRasterizer {
    pub dir: PathBuf,
}

impl GraphRasterizer for MermaidFileRasterizer {
    fn rasterize(&self, graph_id: &str, description: &str) -> Result<String, String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;
        let path = self.dir.join(format!("{graph_id}.mmd"));
        std::fs::write(&path, description).map_err(|e| e.to_string())?;
        Ok(path.display().to_string())
    }
}

/// Spawn a tokio task that rasterizes requests one at a time. Responses for
/// which nobody is listening any more are discarded.
pub fn spawn_layout_worker<G>(rasterizer: G) -> (ChannelLayoutEngine, mpsc::UnboundedReceiver<GraphRenderResponse>)
where
    G: GraphRasterizer + Send + 'static,
{
    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<GraphRenderRequest>();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel::<GraphRenderResponse>();

    tokio::spawn(async move {
        while let Some(request) = req_rx.recv().await {
            let outcome = rasterizer.rasterize(&request.graph_id, &request.description);
            let response = GraphRenderResponse { graph_id: request.graph_id, outcome };
            if resp_tx.send(response).is_err() {
                debug!("layout responses receiver dropped; stopping worker");
                break;
            }
        }
    });

    (ChannelLayoutEngine { tx: req_tx }, resp_rx)
}
