//! `-D`: render the DAG as a Graphviz `digraph` (spec.md §6 "Graphviz
//! output"), grounded in the original's `dag_print`. Ellipse nodes are
//! commands, labelled by the first whitespace token of the command
//! (`display_command`, pre-translation where available, so cluster/worker
//! pool runs still show the command the user wrote); box nodes are files;
//! edges run `file -> N{id}` for sources and `N{id} -> file` for targets.

use std::fmt::Write as _;

use crate::dag::Graph;

/// Render `graph` as a `digraph { ... }` block. `display_command` returns
/// the label for a node's command; pass the untranslated command when one
/// is available so the diagram reads the way the user wrote it.
pub fn render<F>(graph: &Graph, mut display_command: F) -> String
where
    F: FnMut(crate::ids::NodeId) -> String,
{
    let mut out = String::new();
    out.push_str("digraph {\n");

    for node in graph.iter() {
        let command = display_command(node.id);
        let head = command.split_whitespace().next().unwrap_or("?");
        let _ = writeln!(out, "\tN{} [shape=ellipse label=\"{}\"];", node.id, escape(head));
    }

    let mut files: Vec<&str> = Vec::new();
    for node in graph.iter() {
        for f in node.sources.iter().chain(node.targets.iter()) {
            if !files.contains(&f.as_str()) {
                files.push(f.as_str());
            }
        }
    }
    for f in &files {
        let _ = writeln!(out, "\t\"{}\" [shape=box];", escape(f));
    }

    for node in graph.iter() {
        for src in &node.sources {
            let _ = writeln!(out, "\t\"{}\" -> N{};", escape(src), node.id);
        }
        for tgt in &node.targets {
            let _ = writeln!(out, "\tN{} -> \"{}\";", node.id, escape(tgt));
        }
    }

    out.push_str("}\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
