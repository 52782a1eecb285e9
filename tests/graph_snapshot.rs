// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Snapshot of the DOT export for a small project

use kubeyard::codec::extract_resources;
use kubeyard::graph::ReferenceGraph;
use kubeyard::kinds::KindRegistry;
use kubeyard::resolver::{resolve, ResolveScope, View};
use kubeyard::types::{ProcessingOptions, ResourceMap};

const MANIFESTS: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
        - name: app
          envFrom:
            - configMapRef:
                name: cfg
            - configMapRef:
                name: gone
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cfg
";

#[test]
fn test_dot_export_snapshot() {
    let (resources, failures) = extract_resources(MANIFESTS, "app.yaml");
    assert!(failures.is_empty());
    let order: Vec<String> = resources.iter().map(|r| r.id.clone()).collect();
    let mut map: ResourceMap = resources.into_iter().map(|r| (r.id.clone(), r)).collect();
    resolve(&mut map, View::Local, &KindRegistry::builtin(), &ResolveScope::Full, ProcessingOptions::default());

    let graph = ReferenceGraph::from_resources(order.iter().filter_map(|id| map.get(id)));
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);

    // ids are content hashes; show them as kind/name
    let mut dot = graph.to_dot();
    for id in &order {
        let r = &map[id];
        dot = dot.replace(id.as_str(), &format!("{}/{}", r.kind, r.name));
    }

    insta::assert_snapshot!(dot.trim_end(), @r#"
    digraph resources {
      rankdir=LR;
      node [shape=box, style=rounded];

      "Deployment/web" [label="web\nDeployment"];
      "ConfigMap/cfg" [label="cfg\nConfigMap"];

      "Deployment/web" -> "ConfigMap/cfg" [label="configMapRef"];
      "Deployment/web" -> "missing:gone" [label="configMapRef", style=dashed];

      "missing:gone" [style=dashed, color=red];
    }
    "#);
}
