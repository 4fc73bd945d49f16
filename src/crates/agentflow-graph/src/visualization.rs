//! Graph rendering for documentation and debugging
//!
//! Renders a [`CompiledGraph`] in three formats: DOT (Graphviz), Mermaid
//! (markdown/web docs), and a terse ASCII listing for console debugging.
//! Direct edges render solid; conditional branches render dashed with their
//! path label.

use crate::compile::CompiledGraph;
use crate::graph::END;
use std::collections::BTreeSet;

/// Output format for [`visualize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationFormat {
    #[default]
    Dot,
    Mermaid,
    Ascii,
}

/// Rendering options
#[derive(Debug, Clone, Default)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    pub title: Option<String>,
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self {
            format: VisualizationFormat::Dot,
            title: None,
        }
    }

    pub fn mermaid() -> Self {
        Self {
            format: VisualizationFormat::Mermaid,
            title: None,
        }
    }

    pub fn ascii() -> Self {
        Self {
            format: VisualizationFormat::Ascii,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Edge as rendered: direct, or a conditional branch with its label
struct RenderedEdge<'g> {
    from: &'g str,
    to: &'g str,
    branch: Option<&'g str>,
}

fn collect_edges(graph: &CompiledGraph) -> Vec<RenderedEdge<'_>> {
    let mut edges = Vec::new();

    let mut sources: Vec<&String> = graph.adjacency.keys().collect();
    sources.sort();

    for source in sources {
        let conditional_targets: BTreeSet<&str> = graph
            .conditionals
            .get(source.as_str())
            .map(|c| c.path_map.values().map(String::as_str).collect())
            .unwrap_or_default();

        for target in &graph.adjacency[source] {
            if !conditional_targets.contains(target.as_str()) {
                edges.push(RenderedEdge {
                    from: source,
                    to: target,
                    branch: None,
                });
            }
        }
    }

    let mut conditional_sources: Vec<&String> = graph.conditionals.keys().collect();
    conditional_sources.sort();

    for source in conditional_sources {
        let conditional = &graph.conditionals[source];
        let mut branches: Vec<(&String, &String)> = conditional.path_map.iter().collect();
        branches.sort();

        for (branch, target) in branches {
            edges.push(RenderedEdge {
                from: source,
                to: target,
                branch: Some(branch),
            });
        }
    }

    edges
}

fn node_names(graph: &CompiledGraph) -> Vec<&str> {
    let mut names: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
    names.sort();
    names
}

/// Render the graph in the requested format
pub fn visualize(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => render_dot(graph, options),
        VisualizationFormat::Mermaid => render_mermaid(graph, options),
        VisualizationFormat::Ascii => render_ascii(graph, options),
    }
}

fn render_dot(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    let mut out = String::from("digraph G {\n");
    out.push_str("    rankdir=TB;\n");

    if let Some(title) = &options.title {
        out.push_str(&format!("    label=\"{}\";\n", title));
    }

    out.push_str(&format!(
        "    \"{}\" [shape=circle, style=filled, fillcolor=lightgreen];\n",
        graph.entry_point
    ));
    out.push_str(&format!("    \"{}\" [shape=doublecircle];\n", END));

    for name in node_names(graph) {
        if name != graph.entry_point {
            out.push_str(&format!("    \"{}\" [shape=box];\n", name));
        }
    }

    for edge in collect_edges(graph) {
        match edge.branch {
            Some(branch) => out.push_str(&format!(
                "    \"{}\" -> \"{}\" [style=dashed, label=\"{}\"];\n",
                edge.from, edge.to, branch
            )),
            None => out.push_str(&format!("    \"{}\" -> \"{}\";\n", edge.from, edge.to)),
        }
    }

    out.push_str("}\n");
    out
}

fn render_mermaid(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    let mut out = String::new();

    if let Some(title) = &options.title {
        out.push_str(&format!("---\ntitle: {}\n---\n", title));
    }
    out.push_str("graph TD\n");

    out.push_str(&format!(
        "    {}(({}))\n",
        mermaid_id(&graph.entry_point),
        graph.entry_point
    ));
    out.push_str(&format!("    {}(({}))\n", mermaid_id(END), END));

    for name in node_names(graph) {
        if name != graph.entry_point {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
        }
    }

    for edge in collect_edges(graph) {
        let from = mermaid_id(edge.from);
        let to = mermaid_id(edge.to);
        match edge.branch {
            Some(branch) => out.push_str(&format!("    {} -.->|{}| {}\n", from, branch, to)),
            None => out.push_str(&format!("    {} --> {}\n", from, to)),
        }
    }

    out
}

// Mermaid node ids cannot start with underscores.
fn mermaid_id(name: &str) -> String {
    let trimmed = name.trim_matches('_');
    if trimmed.is_empty() {
        "node".to_string()
    } else {
        trimmed.replace(|c: char| !c.is_alphanumeric(), "_")
    }
}

fn render_ascii(graph: &CompiledGraph, options: &VisualizationOptions) -> String {
    let mut out = String::new();

    if let Some(title) = &options.title {
        out.push_str(&format!("{}\n", title));
    }
    out.push_str(&format!("entry: {}\n", graph.entry_point));
    out.push_str(&format!("nodes: {}\n", node_names(graph).join(", ")));

    for edge in collect_edges(graph) {
        match edge.branch {
            Some(branch) => {
                out.push_str(&format!("  {} -[{}]-> {}\n", edge.from, branch, edge.to))
            }
            None => out.push_str(&format!("  {} -> {}\n", edge.from, edge.to)),
        }
    }

    out
}
