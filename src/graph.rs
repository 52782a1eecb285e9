// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Reference graph with petgraph backing for walks and export

use crate::types::{format_field_path, Resource, ResourceRef};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// A node of the reference graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    /// Resource id
    pub id: String,
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Owning file
    pub file_path: String,
}

/// An edge of the reference graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    /// Source resource id
    pub from: String,
    /// Target resource id; `None` for unresolved references
    pub to: Option<String>,
    /// Rule name
    pub ref_type: String,
    /// Referenced name or path
    pub name: String,
    /// Whether the target was found
    pub satisfied: bool,
    /// Whether the reference is optional
    pub optional: bool,
    /// Location in the source content
    pub field: String,
}

#[derive(Serialize)]
struct GraphExport<'a> {
    nodes: &'a [GraphNode],
    edges: &'a [GraphEdge],
}

/// Resources and their outgoing references
pub struct ReferenceGraph {
    graph: DiGraph<String, String>,
    node_indices: HashMap<String, NodeIndex>,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl ReferenceGraph {
    /// Build the graph of a resource set; edges to resources outside the set are ignored
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let resources: Vec<&Resource> = resources.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        let mut nodes = Vec::with_capacity(resources.len());

        for resource in &resources {
            let idx = graph.add_node(resource.id.clone());
            node_indices.insert(resource.id.clone(), idx);
            nodes.push(GraphNode {
                id: resource.id.clone(),
                kind: resource.kind.clone(),
                name: resource.name.clone(),
                file_path: resource.file_path.clone(),
            });
        }

        let mut edges = Vec::new();
        for resource in &resources {
            for r in resource.outgoing_refs() {
                let target = r.target_id.as_ref().filter(|t| node_indices.contains_key(*t));
                if r.is_satisfied() && target.is_none() {
                    continue;
                }
                if let Some(to) = target {
                    graph.add_edge(node_indices[&resource.id], node_indices[to], r.ref_type.clone());
                }
                edges.push(edge_for(&resource.id, r, target.cloned()));
            }
        }

        Self {
            graph,
            node_indices,
            nodes,
            edges,
        }
    }

    /// Number of resources
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of satisfied edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every edge, unresolved ones included
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Edges leaving a resource
    #[must_use]
    pub fn edges_from(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    /// Satisfied edges arriving at a resource
    #[must_use]
    pub fn edges_to(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.to.as_deref() == Some(id))
            .collect()
    }

    /// Every resource reachable from `start` over edges in either direction
    ///
    /// Includes `start` itself when it is in the graph. Cycles terminate on
    /// the visited set.
    #[must_use]
    pub fn connected(&self, start: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(&origin) = self.node_indices.get(start) else {
            return found;
        };
        let mut visited = HashSet::from([origin]);
        let mut queue = VecDeque::from([origin]);
        while let Some(idx) = queue.pop_front() {
            found.insert(self.graph[idx].clone());
            for next in self.graph.neighbors_undirected(idx) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// Export to DOT format for Graphviz
    ///
    /// Unresolved references point at a dashed placeholder node.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph resources {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=rounded];\n\n");

        for node in &self.nodes {
            let _ = writeln!(
                dot,
                "  \"{}\" [label=\"{}\\n{}\"];",
                node.id,
                escape(&node.name),
                node.kind
            );
        }

        dot.push('\n');

        let mut missing = BTreeSet::new();
        for edge in &self.edges {
            if let Some(to) = &edge.to {
                let _ = writeln!(dot, "  \"{}\" -> \"{}\" [label=\"{}\"];", edge.from, to, edge.ref_type);
            } else {
                let placeholder = format!("missing:{}", escape(&edge.name));
                let style = if edge.optional { "dotted" } else { "dashed" };
                let _ = writeln!(
                    dot,
                    "  \"{}\" -> \"{placeholder}\" [label=\"{}\", style={style}];",
                    edge.from, edge.ref_type
                );
                missing.insert(placeholder);
            }
        }

        if !missing.is_empty() {
            dot.push('\n');
            for placeholder in missing {
                let _ = writeln!(dot, "  \"{placeholder}\" [style=dashed, color=red];");
            }
        }

        dot.push_str("}\n");
        dot
    }

    /// Export to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&GraphExport {
            nodes: &self.nodes,
            edges: &self.edges,
        })
    }
}

fn edge_for(from: &str, r: &ResourceRef, to: Option<String>) -> GraphEdge {
    GraphEdge {
        from: from.to_string(),
        to,
        ref_type: r.ref_type.clone(),
        name: r.name.clone(),
        satisfied: r.is_satisfied(),
        optional: r.optional,
        field: format_field_path(&r.field_path),
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "\\\"")
}
