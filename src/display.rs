//! Terminal presentation of message views, plus file export of finished
//! visuals.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use colored::*;

use crate::config::Settings;
use crate::markup::mindmap::MindmapGraph;
use crate::markup::positional::{LayoutItem, PositionalLayout};
use crate::transcript::{Block, GraphView, MessageView, ResolvedVisual, SegmentOutput, VisualSegment};

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

pub fn print_header(settings: &Settings) {
    println!("{}", "MYMAP CHAT".bright_cyan().bold());
    println!("{}: {}", "Server".bright_yellow(), settings.base_url.bright_white());
    println!("{}: {}", "Model".bright_yellow(), settings.model);
    println!("{}: {}", "Session".bright_yellow(), settings.user);
    println!("{}", "=".repeat(50).bright_blue());
}

pub fn rule() -> String {
    "=".repeat(50).bright_blue().to_string()
}

// ---------------------------------------------------------------------------
// Message views
// ---------------------------------------------------------------------------

/// Every block of `view`, in order.
pub fn format_view(view: &MessageView, raw: bool) -> String {
    let mut out = String::new();
    for block in view.blocks() {
        match block {
            Block::Markdown(text) => {
                let _ = writeln!(out, "{}", text.trim_end());
            }
            Block::Attachment(mime) => {
                let _ = writeln!(out, "{}", format!("[attachment: {mime}]").dimmed());
            }
            Block::Visual(segment) => out.push_str(&format_segment(segment, raw)),
        }
    }
    out
}

/// Only the visual blocks of `view`. Used after a streamed reply whose text
/// has already been printed.
pub fn format_visuals(view: &MessageView, raw: bool) -> String {
    view.segments().map(|s| format_segment(s, raw)).collect()
}

pub fn format_segment(segment: &VisualSegment, raw: bool) -> String {
    let mut out = String::new();
    if raw {
        let _ = writeln!(out, "{}", segment.source().trim_end().dimmed());
        return out;
    }
    match segment.output() {
        SegmentOutput::Pending => {
            let _ = writeln!(out, "{}", "[visual pending]".dimmed());
        }
        SegmentOutput::Error(_) => {
            if let Some(indicator) = segment.error_indicator() {
                let _ = writeln!(out, "{}", indicator.bright_red());
            }
        }
        SegmentOutput::Visual(ResolvedVisual::Graph(view)) => format_graph(&mut out, view),
        SegmentOutput::Visual(ResolvedVisual::Positional(layout)) => format_positional(&mut out, layout),
    }
    out
}

fn format_graph(out: &mut String, view: &GraphView) {
    let _ = writeln!(out, "{}", format!("-- mind-map {} --", view.graph_id).bright_magenta());
    for line in outline(&view.graph) {
        let _ = writeln!(out, "{line}");
    }
    match &view.artifact {
        None => {
            let _ = writeln!(out, "{}", "(layout pending)".dimmed());
        }
        Some(Ok(artifact)) if *artifact != view.description => {
            let _ = writeln!(out, "{} {}", "layout:".bright_green(), artifact);
        }
        Some(Ok(_)) => {}
        Some(Err(e)) => {
            let _ = writeln!(out, "{} {}", "layout failed:".bright_red(), e);
        }
    }
}

fn format_positional(out: &mut String, layout: &PositionalLayout) {
    let _ = writeln!(
        out,
        "{}",
        format!("-- {} {}x{} --", layout.kind, layout.width, layout.height).bright_magenta()
    );
    for item in &layout.items {
        match item {
            LayoutItem::Box(placed) => {
                let b = &placed.text_box;
                let first = b.body.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
                let classes: String = b.style_classes.iter().map(|c| format!(" .{c}")).collect();
                let _ = writeln!(
                    out,
                    "  {}{} {}",
                    format!("[{},{} {}x{}]", b.x, b.y, b.width, b.height).bright_yellow(),
                    classes.cyan(),
                    first.trim()
                );
            }
            LayoutItem::Error { index, error } => {
                let _ = writeln!(out, "  {}", format!("[child {index}] {error}").bright_red());
            }
        }
    }
}

/// Indented tree of a mind-map. A node reachable from several parents is
/// listed under each of them.
pub fn outline(graph: &MindmapGraph) -> Vec<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        children.entry(edge.parent.as_str()).or_default().push(edge.child.as_str());
    }
    let mut lines = Vec::new();
    for root in graph.roots() {
        walk(graph, &children, &root.id, 0, &mut lines);
    }
    lines
}

fn walk(graph: &MindmapGraph, children: &HashMap<&str, Vec<&str>>, id: &str, depth: usize, lines: &mut Vec<String>) {
    let Some(node) = graph.node(id) else {
        return;
    };
    lines.push(format!("{}- {}", "  ".repeat(depth + 1), node.label));
    for child in children.get(id).into_iter().flatten() {
        walk(graph, children, child, depth + 1, lines);
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write each positional layout of `view` as `<kind>-<message>-<block>.html`
/// under `dir`. Mind-maps are exported by the layout worker.
pub fn export_layouts(view: &MessageView, message_index: usize, dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (block_index, block) in view.blocks().iter().enumerate() {
        let Block::Visual(segment) = block else {
            continue;
        };
        if let SegmentOutput::Visual(ResolvedVisual::Positional(layout)) = segment.output() {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}-{message_index}-{block_index}.html", layout.kind));
            std::fs::write(&path, layout.to_html())?;
            written.push(path);
        }
    }
    Ok(written)
}
