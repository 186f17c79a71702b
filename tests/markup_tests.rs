//! External tests for the visual markup dialect: type dispatch, mind-map
//! graphs, and positional layouts.

use proptest::prelude::*;
use rstest::rstest;

use mymap_chat::error::VisualError;
use mymap_chat::markup::*;
use mymap_chat::render::MarkdownRenderer;

fn render(source: &str) -> Result<VisualRender, VisualError> {
    VisualDocumentParser::new(MarkdownRenderer).render(source)
}

// -- Dispatch ----------------------------------------------------------------

#[rstest]
#[case("flowchart", VisualKind::Flowchart)]
#[case("flowchart-lr", VisualKind::Flowchart)]
#[case("diagram", VisualKind::Diagram)]
#[case("cheat-sheet", VisualKind::CheatSheet)]
#[case("cheat-sheet-compact", VisualKind::CheatSheet)]
fn test_positional_types_dispatch(#[case] tag: &str, #[case] expected: VisualKind) {
    let src = format!("<visual type=\"{tag}\"></visual>");
    match render(&src) {
        Ok(VisualRender::Positional(layout)) => assert_eq!(layout.kind, expected),
        other => panic!("expected positional layout, got {other:?}"),
    }
}

#[rstest]
#[case("mindmap")]
#[case("mindmap-radial")]
fn test_mindmap_types_dispatch(#[case] tag: &str) {
    let src = format!("<visual type=\"{tag}\"># Root</visual>");
    assert!(matches!(render(&src), Ok(VisualRender::Mindmap(_))));
}

#[rstest]
#[case("<visual type=\"timeline\"/>", "timeline")]
#[case("<visual type=\"MINDMAP\"/>", "MINDMAP")]
#[case("<visual/>", "")]
fn test_unknown_types_are_reported(#[case] src: &str, #[case] tag: &str) {
    assert_eq!(render(src), Err(VisualError::UnknownVisualType(tag.to_string())));
}

#[rstest]
#[case("<visual type=\"mindmap\"># A")]
#[case("<visual type=\"mindmap\"></other>")]
#[case("<a/><b/>")]
#[case("")]
fn test_malformed_markup(#[case] src: &str) {
    assert!(matches!(render(src), Err(VisualError::MalformedVisualMarkup(_))));
}

// -- Mind-maps ---------------------------------------------------------------

#[test]
fn test_mindmap_example_graph() {
    let graph = build_mindmap("# A\n## B\n## C\n### D");
    assert_eq!(
        graph.to_mermaid(),
        "graph TD\n    node0[\"A\"]\n    node1[\"B\"]\n    node2[\"C\"]\n    node3[\"D\"]\n    node0 --> node1\n    node0 --> node2\n    node2 --> node3\n"
    );
}

#[test]
fn test_mindmap_skipped_level_attaches_to_nearest_ancestor() {
    let graph = build_mindmap("# A\n### C");
    assert_eq!(graph.edges, vec![GraphEdge { parent: "node0".into(), child: "node1".into() }]);
}

#[test]
fn test_mindmap_without_headings_is_empty() {
    let graph = build_mindmap("just prose\n\n- a list item");
    assert!(graph.nodes.is_empty());
    assert_eq!(graph.to_mermaid(), "graph TD\n");
}

#[test]
fn test_mindmap_quotes_escaped() {
    let graph = build_mindmap("# Say \"hi\"");
    assert!(graph.to_mermaid().contains("node0[\"Say #quot;hi#quot;\"]"));
}

fn heading_line() -> impl Strategy<Value = String> {
    (1usize..=6, prop::sample::select(vec!["Alpha", "Beta", "Gamma", "Delta"]))
        .prop_map(|(level, label)| format!("{} {}", "#".repeat(level), label))
}

proptest! {
    #[test]
    fn prop_mindmap_is_deterministic(lines in prop::collection::vec(heading_line(), 0..24)) {
        let text = lines.join("\n");
        let first = build_mindmap(&text);
        let second = build_mindmap(&text);
        prop_assert_eq!(first.to_mermaid(), second.to_mermaid());
        prop_assert_eq!(&first, &second);
    }

    #[test]
    fn prop_mindmap_edges_are_unique_and_resolved(lines in prop::collection::vec(heading_line(), 0..24)) {
        let graph = build_mindmap(&lines.join("\n"));
        for (i, edge) in graph.edges.iter().enumerate() {
            prop_assert!(graph.node(&edge.parent).is_some());
            prop_assert!(graph.node(&edge.child).is_some());
            prop_assert!(!graph.edges[..i].contains(edge));
            let parent = graph.node(&edge.parent).map(|n| n.level);
            let child = graph.node(&edge.child).map(|n| n.level);
            prop_assert!(parent < child);
        }
    }
}

// -- Positional layouts ------------------------------------------------------

#[test]
fn test_missing_height_defaults() {
    match render("<visual type=\"diagram\" width=\"640\"></visual>") {
        Ok(VisualRender::Positional(layout)) => {
            assert_eq!(layout.width, 640);
            assert_eq!(layout.height, 800);
        }
        other => panic!("expected positional layout, got {other:?}"),
    }
}

#[test]
fn test_bad_child_does_not_affect_siblings() {
    let src = r#"<visual type="flowchart">
        <text x="10" y="20" width="100" height="40" style="box_blue">**Start**</text>
        <text x="10" width="100" height="40">lost</text>
        <arrow from="a" to="b"/>
        <text x="10" y="90" width="100" height="40">End</text>
    </visual>"#;
    let Ok(VisualRender::Positional(layout)) = render(src) else {
        panic!("expected positional layout");
    };
    assert_eq!(layout.items.len(), 3);
    assert_eq!(layout.boxes().count(), 2);
    assert_eq!(
        layout.errors().collect::<Vec<_>>(),
        vec![&VisualError::MissingLayoutAttribute { element: "text".into(), attribute: "y".into() }]
    );

    let first = layout.boxes().next().expect("box");
    assert_eq!(first.text_box.style_classes, vec!["box-blue".to_string()]);
    assert!(first.content_html.contains("<strong>Start</strong>"));

    let html = layout.to_html();
    assert!(html.contains("left:10px;top:90px;width:100px;height:40px;"));
    assert!(html.contains("Failed to render element"));
}
