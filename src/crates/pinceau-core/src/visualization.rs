//! Graph export to DOT (Graphviz) and Mermaid.
//!
//! Nodes show the task label with its id underneath. Edge styles encode the
//! edge kind:
//!
//! | kind | DOT | Mermaid |
//! |------|-----|---------|
//! | `DIRECT` | plain | `-->` |
//! | `CONDITIONAL` | dashed | `-.->` |
//! | `LOOP` | bold | `==>` |
//! | `LOOP_START` / `LOOP_END` | dotted, labelled | `-. label .->` |
//!
//! ```rust
//! use pinceau_core::visualization::{export, ExportOptions};
//! use pinceau_core::{DagBuilder, TaskRegistry};
//! use pinceau_core::tasks::WaitTask;
//!
//! let registry = TaskRegistry::with_builtins();
//! let dag = DagBuilder::new("pair")
//!     .add(registry.create(WaitTask::record("a", 1.0)).unwrap())
//!     .add(registry.create(WaitTask::record("b", 1.0)).unwrap())
//!     .edge("a", "b")
//!     .build()
//!     .unwrap();
//!
//! let dot = export(&dag, &ExportOptions::dot());
//! assert!(dot.contains("\"a\" -> \"b\";"));
//! ```

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::dag::TaskDag;
use crate::types::{EdgeKind, Status};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Dot,
    Mermaid,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dot" | "graphviz" => Ok(Format::Dot),
            "mermaid" => Ok(Format::Mermaid),
            other => Err(format!("unknown graph format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: Format,
    /// Label every edge with its kind
    pub show_kinds: bool,
    /// Append the task status to node labels
    pub show_status: bool,
}

impl ExportOptions {
    pub fn dot() -> Self {
        Self::default()
    }

    pub fn mermaid() -> Self {
        Self {
            format: Format::Mermaid,
            ..Self::default()
        }
    }

    pub fn with_kinds(mut self) -> Self {
        self.show_kinds = true;
        self
    }

    pub fn with_status(mut self) -> Self {
        self.show_status = true;
        self
    }
}

struct NodeView {
    id: String,
    label: String,
    status: Status,
}

struct EdgeView {
    from: String,
    to: String,
    kind: EdgeKind,
}

/// Render the current plan of `dag`, including tasks spliced in by fan-out.
pub fn export(dag: &TaskDag, options: &ExportOptions) -> String {
    let (nodes, edges) = dag.with_graph(|graph| {
        let nodes = graph
            .nodes()
            .map(|node| NodeView {
                id: node.task().id().to_string(),
                label: node.task().label(),
                status: node.task().status(),
            })
            .collect::<Vec<_>>();
        let edges = graph
            .edges()
            .map(|edge| EdgeView {
                from: edge.from_id.clone(),
                to: edge.to_id.clone(),
                kind: edge.kind,
            })
            .collect::<Vec<_>>();
        (nodes, edges)
    });

    match options.format {
        Format::Dot => render_dot(&dag.label(), &nodes, &edges, options),
        Format::Mermaid => render_mermaid(&dag.label(), &nodes, &edges, options),
    }
}

fn node_label(node: &NodeView, options: &ExportOptions, newline: &str) -> String {
    let mut label = if node.label == node.id {
        node.id.clone()
    } else {
        format!("{}{newline}{}", node.label, node.id)
    };
    if options.show_status {
        let _ = write!(label, "{newline}[{}]", node.status);
    }
    label
}

fn render_dot(
    title: &str,
    nodes: &[NodeView],
    edges: &[EdgeView],
    options: &ExportOptions,
) -> String {
    let mut out = String::new();
    out.push_str("digraph G {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=rounded];\n");
    if !title.is_empty() {
        out.push_str("    labelloc=\"t\";\n");
        let _ = writeln!(out, "    label=\"{}\";", escape_dot(title));
    }

    for node in nodes {
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\"];",
            escape_dot(&node.id),
            escape_dot(&node_label(node, options, "\n"))
        );
    }

    for edge in edges {
        let mut attrs = Vec::new();
        match edge.kind {
            EdgeKind::Conditional => attrs.push("style=dashed".to_string()),
            EdgeKind::Loop => attrs.push("style=bold".to_string()),
            EdgeKind::LoopStart | EdgeKind::LoopEnd => {
                attrs.push("style=dotted".to_string());
                if !options.show_kinds {
                    attrs.push(format!("label=\"{}\"", edge.kind));
                }
            }
            EdgeKind::Direct | EdgeKind::Default => {}
        }
        if options.show_kinds {
            attrs.push(format!("label=\"{}\"", edge.kind));
        }

        let from = escape_dot(&edge.from);
        let to = escape_dot(&edge.to);
        if attrs.is_empty() {
            let _ = writeln!(out, "    \"{from}\" -> \"{to}\";");
        } else {
            let _ = writeln!(out, "    \"{from}\" -> \"{to}\" [{}];", attrs.join(", "));
        }
    }

    out.push_str("}\n");
    out
}

fn render_mermaid(
    title: &str,
    nodes: &[NodeView],
    edges: &[EdgeView],
    options: &ExportOptions,
) -> String {
    let mut out = String::new();
    if !title.is_empty() {
        let _ = writeln!(out, "---\ntitle: {}\n---", escape_mermaid(title));
    }
    out.push_str("graph TD\n");

    for node in nodes {
        let _ = writeln!(
            out,
            "    {}[\"{}\"]",
            sanitize_id(&node.id),
            escape_mermaid(&node_label(node, options, "<br/>"))
        );
    }

    for edge in edges {
        let from = sanitize_id(&edge.from);
        let to = sanitize_id(&edge.to);
        let line = match (edge.kind, options.show_kinds) {
            (EdgeKind::LoopStart | EdgeKind::LoopEnd, _) => {
                format!("{from} -. {} .-> {to}", edge.kind)
            }
            (EdgeKind::Conditional, true) => format!("{from} -. {} .-> {to}", edge.kind),
            (EdgeKind::Conditional, false) => format!("{from} -.-> {to}"),
            (EdgeKind::Loop, true) => format!("{from} == {} ==> {to}", edge.kind),
            (EdgeKind::Loop, false) => format!("{from} ==> {to}"),
            (_, true) => format!("{from} -- {} --> {to}", edge.kind),
            (_, false) => format!("{from} --> {to}"),
        };
        let _ = writeln!(out, "    {line}");
    }

    out
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "#quot;")
}

fn sanitize_id(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
