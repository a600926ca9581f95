//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The dependency graph derived from the catalog's trigger/message relation.
//!
//! Built on `petgraph` rather than a DAG-only crate: a cyclic catalog is
//! tolerated as an authoring error rather than a load failure, so the graph
//! type itself must allow cycles. `petgraph::Graph` does; traversal stays
//! cycle-safe via an explicit visited set.

use std::collections::{BTreeSet, HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::catalog::task::Task;

pub struct DependencyGraph {
    graph: DiGraph<String, String>,
    index_of: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// For every ordered pair `(u, v)` of tasks and every label `l`: if
    /// `l ∈ u.messages` and `l ∈ v.triggers`, add edge `(l, u, v)`. Self-edges
    /// are permitted.
    pub fn build(tasks: &HashMap<String, Task>) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::with_capacity(tasks.len());

        for name in tasks.keys() {
            let idx = graph.add_node(name.clone());
            index_of.insert(name.clone(), idx);
        }

        let mut trigger_index: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, task) in tasks {
            for trigger in task.triggers() {
                trigger_index.entry(trigger.as_str()).or_default().push(name.as_str());
            }
        }

        for (u_name, u_task) in tasks {
            for label in u_task.messages() {
                if let Some(dests) = trigger_index.get(label.as_str()) {
                    for &v_name in dests {
                        graph.add_edge(index_of[u_name], index_of[v_name], label.clone());
                    }
                }
            }
        }

        DependencyGraph { graph, index_of }
    }

    /// Immediate parents of `name`: all `u` with an edge `u -> name`.
    pub fn parents_of(&self, name: &str) -> BTreeSet<String> {
        match self.index_of.get(name) {
            None => BTreeSet::new(),
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
        }
    }

    /// Transitive descendants of `name`, cycle-safe. The returned map's key
    /// set is `{name} ∪ all descendants`; each value is that node's
    /// immediate children.
    pub fn child_tree(&self, name: &str) -> HashMap<String, Vec<String>> {
        self.tree(name, Direction::Outgoing)
    }

    /// Symmetric, for ancestors.
    pub fn parent_tree(&self, name: &str) -> HashMap<String, Vec<String>> {
        self.tree(name, Direction::Incoming)
    }

    fn tree(&self, name: &str, direction: Direction) -> HashMap<String, Vec<String>> {
        let mut result = HashMap::new();
        if !self.index_of.contains_key(name) {
            return result;
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(name.to_string());
        visited.insert(name.to_string());

        while let Some(current) = queue.pop_front() {
            let idx = self.index_of[&current];

            let mut immediate = Vec::new();
            let mut seen = BTreeSet::new();
            for neighbor in self.graph.neighbors_directed(idx, direction) {
                let neighbor_name = self.graph[neighbor].clone();
                if seen.insert(neighbor_name.clone()) {
                    immediate.push(neighbor_name);
                }
            }

            result.insert(current, immediate.clone());

            for child in immediate {
                if visited.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::task::TaskDocument;

    fn task(name: &str, triggers: &[&str], messages: &[&str]) -> (String, Task) {
        let doc = TaskDocument {
            name: name.to_string(),
            command: "true".to_string(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            messages: messages.iter().map(|s| s.to_string()).collect(),
            parameters: vec![],
            log: None,
            parent_success: false,
            replay: None,
        };
        (name.to_string(), Task::from_document(doc, "f.yml".to_string()).unwrap())
    }

    #[test]
    fn derives_edge_iff_message_meets_trigger() {
        let mut tasks = HashMap::new();
        let (n, t) = task("A", &["t1"], &["m1"]);
        tasks.insert(n, t);
        let (n, t) = task("B", &["m1"], &[]);
        tasks.insert(n, t);

        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.parents_of("B"), BTreeSet::from(["A".to_string()]));
        assert!(graph.parents_of("A").is_empty());
    }

    #[test]
    fn child_tree_terminates_on_cycle() {
        let mut tasks = HashMap::new();
        let (n, t) = task("A", &["t1", "m3"], &["m1"]);
        tasks.insert(n, t);
        let (n, t) = task("B", &["m1"], &["m2"]);
        tasks.insert(n, t);
        let (n, t) = task("C", &["m2"], &["m3"]);
        tasks.insert(n, t);

        let graph = DependencyGraph::build(&tasks);
        let tree = graph.child_tree("A");
        let keys: BTreeSet<&String> = tree.keys().collect();
        assert_eq!(
            keys,
            BTreeSet::from([&"A".to_string(), &"B".to_string(), &"C".to_string()])
        );
    }
}
