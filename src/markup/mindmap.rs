//! Heading-structured text → node/edge graph description.
//!
//! Every heading line (`#` … `######`, whitespace, label) becomes a node.
//! A node's parent is the most recent node at the nearest shallower level
//! that is still active. Identical `(level, label)` pairs collapse into one
//! node, so a label repeated under two parents yields one node with two
//! incoming edges.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Deepest heading level recognised.
pub const MAX_LEVEL: usize = 6;

/// Escape token substituted for `"` inside Mermaid string literals.
const QUOTE_ESCAPE: &str = "#quot;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MindmapNode {
    pub id: String,
    pub label: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphEdge {
    pub parent: String,
    pub child: String,
}

/// Deterministic graph built from one mind-map body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MindmapGraph {
    pub nodes: Vec<MindmapNode>,
    pub edges: Vec<GraphEdge>,
}

impl MindmapGraph {
    /// Mermaid flowchart source: node declarations first, then edges, both in
    /// discovery order.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for node in &self.nodes {
            let _ = writeln!(out, "    {}[\"{}\"]", node.id, escape_label(&node.label));
        }
        for edge in &self.edges {
            let _ = writeln!(out, "    {} --> {}", edge.parent, edge.child);
        }
        out
    }

    pub fn node(&self, id: &str) -> Option<&MindmapNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes with no incoming edge.
    pub fn roots(&self) -> impl Iterator<Item = &MindmapNode> {
        self.nodes
            .iter()
            .filter(move |n| !self.edges.iter().any(|e| e.child == n.id))
    }
}

fn escape_label(label: &str) -> String {
    label.replace('"', QUOTE_ESCAPE)
}

/// Split a line into `(level, label)` if it is a heading line.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let line = line.trim();
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > MAX_LEVEL {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let label = rest.trim();
    if label.is_empty() {
        return None;
    }
    Some((level, label))
}

/// Build the graph for a mind-map body. Non-heading lines are ignored.
pub fn build_mindmap(text: &str) -> MindmapGraph {
    let mut graph = MindmapGraph::default();
    let mut ids: HashMap<(usize, String), String> = HashMap::new();
    let mut seen_edges: HashSet<(String, String)> = HashSet::new();
    // index = level; entry = id of the active parent at that level
    let mut active: [Option<String>; MAX_LEVEL + 1] = Default::default();

    for line in text.lines() {
        let Some((level, label)) = parse_heading(line) else {
            continue;
        };

        let key = (level, label.to_string());
        let id = match ids.get(&key) {
            Some(id) => id.clone(),
            None => {
                let id = format!("node{}", ids.len());
                ids.insert(key, id.clone());
                graph.nodes.push(MindmapNode {
                    id: id.clone(),
                    label: label.to_string(),
                    level: level as u8,
                });
                id
            }
        };

        if let Some(parent) = (1..level).rev().find_map(|l| active[l].clone()) {
            let pair = (parent, id.clone());
            if seen_edges.insert(pair.clone()) {
                graph.edges.push(GraphEdge { parent: pair.0, child: pair.1 });
            }
        }

        active[level] = Some(id);
        for slot in active.iter_mut().skip(level + 1) {
            *slot = None;
        }
    }
    graph
}
