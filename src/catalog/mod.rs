//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Parses declarative task files, derives the dependency graph, and answers
//! memoized lookups over both.

pub mod expand;
pub mod graph;
pub mod task;

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};

use crate::catalog::graph::DependencyGraph;
pub use crate::catalog::task::{Task, TaskDocument};

struct Inner {
    tasks: HashMap<String, Task>,
    graph: DependencyGraph,
    trigger_memo: HashMap<String, Vec<Task>>,
    child_tree_memo: HashMap<String, HashMap<String, Vec<String>>>,
    parent_tree_memo: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Inner {
    fn empty() -> Self {
        Inner {
            tasks: HashMap::new(),
            graph: DependencyGraph::build(&HashMap::new()),
            trigger_memo: HashMap::new(),
            child_tree_memo: HashMap::new(),
            parent_tree_memo: HashMap::new(),
        }
    }
}

/// Owns the in-memory set of task specifications and their derived graph.
///
/// Process-local, rebuilt atomically on `reload()`: readers observe either
/// the previous or the new snapshot, never a partial one, because the whole
/// `Inner` is swapped under one write-lock acquisition.
pub struct Catalog {
    pattern: String,
    inner: RwLock<Inner>,
}

impl Catalog {
    pub fn new(pattern: impl Into<String>) -> Self {
        Catalog {
            pattern: pattern.into(),
            inner: RwLock::new(Inner::empty()),
        }
    }

    pub fn load(pattern: impl Into<String>) -> Result<Self> {
        let catalog = Catalog::new(pattern);
        catalog.reload()?;
        Ok(catalog)
    }

    /// Re-read all files, clear all caches, rebuild the graph, recompute
    /// `parents` for every task. On parse or duplicate-name failure the
    /// previous catalog is left untouched.
    pub fn reload(&self) -> Result<()> {
        let built = Self::build(&self.pattern)?;
        let mut guard = self.inner.write().expect("catalog lock poisoned");
        *guard = built;
        Ok(())
    }

    fn build(pattern: &str) -> Result<Inner> {
        let mut tasks: HashMap<String, Task> = HashMap::new();

        for entry in glob::glob(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
            let path = entry.context("Reading catalog directory entry")?;
            let config_source = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Reading task file {}", path.display()))?;
            let documents: Vec<TaskDocument> = serde_yaml::from_str(&content)
                .with_context(|| format!("Parsing task file {}", path.display()))?;

            for doc in documents {
                let name = doc.name.clone();
                if tasks.contains_key(&name) {
                    return Err(anyhow!("Duplicate task name in catalog: {}", name));
                }
                let task = Task::from_document(doc, config_source.clone())
                    .with_context(|| format!("Building task '{}' from {}", name, config_source))?;
                tasks.insert(name, task);
            }
        }

        let graph = DependencyGraph::build(&tasks);
        for (name, task) in tasks.iter_mut() {
            task.set_parents(graph.parents_of(name));
        }

        Ok(Inner {
            tasks,
            graph,
            trigger_memo: HashMap::new(),
            child_tree_memo: HashMap::new(),
            parent_tree_memo: HashMap::new(),
        })
    }

    pub fn get_tasks_by_trigger(&self, label: &str) -> Vec<Task> {
        {
            let guard = self.inner.read().expect("catalog lock poisoned");
            if let Some(cached) = guard.trigger_memo.get(label) {
                return cached.clone();
            }
        }

        let mut guard = self.inner.write().expect("catalog lock poisoned");
        // Re-check: another writer may have populated it while we upgraded.
        if let Some(cached) = guard.trigger_memo.get(label) {
            return cached.clone();
        }

        let matches: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| t.triggers().contains(label))
            .cloned()
            .collect();
        guard.trigger_memo.insert(label.to_string(), matches.clone());
        matches
    }

    pub fn get_task_by_name(&self, name: &str) -> Option<Task> {
        self.inner.read().expect("catalog lock poisoned").tasks.get(name).cloned()
    }

    pub fn get_child_tree(&self, name: &str) -> HashMap<String, Vec<String>> {
        self.memoized_tree(name, true)
    }

    pub fn get_parent_tree(&self, name: &str) -> HashMap<String, Vec<String>> {
        self.memoized_tree(name, false)
    }

    fn memoized_tree(&self, name: &str, children: bool) -> HashMap<String, Vec<String>> {
        {
            let guard = self.inner.read().expect("catalog lock poisoned");
            let memo = if children { &guard.child_tree_memo } else { &guard.parent_tree_memo };
            if let Some(cached) = memo.get(name) {
                return cached.clone();
            }
        }

        let mut guard = self.inner.write().expect("catalog lock poisoned");
        let memo = if children { &guard.child_tree_memo } else { &guard.parent_tree_memo };
        if let Some(cached) = memo.get(name) {
            return cached.clone();
        }

        let tree = if children {
            guard.graph.child_tree(name)
        } else {
            guard.graph.parent_tree(name)
        };

        let memo = if children { &mut guard.child_tree_memo } else { &mut guard.parent_tree_memo };
        memo.insert(name.to_string(), tree.clone());
        tree
    }

    pub fn iterate(&self) -> Vec<Task> {
        self.inner.read().expect("catalog lock poisoned").tasks.values().cloned().collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .iterate()
            .iter()
            .map(Task::category)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        cats.sort();
        cats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_task_file(dir: &std::path::Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn reload_builds_parents_from_message_trigger_overlap() {
        let dir = tempdir();
        write_task_file(
            dir.path(),
            "a.yml",
            "- name: A\n  command: \"true\"\n  triggers: [t1]\n  messages: [m1]\n- name: B\n  command: \"true\"\n  triggers: [m1]\n",
        );

        let catalog = Catalog::load(format!("{}/*.yml", dir.path().display())).unwrap();
        let b = catalog.get_task_by_name("B").unwrap();
        assert_eq!(b.parents(), &std::collections::BTreeSet::from(["A".to_string()]));
    }

    #[test]
    fn duplicate_task_names_fail_reload_and_keep_previous_catalog() {
        let dir = tempdir();
        write_task_file(dir.path(), "a.yml", "- name: A\n  command: \"true\"\n");
        let catalog = Catalog::load(format!("{}/*.yml", dir.path().display())).unwrap();

        write_task_file(
            dir.path(),
            "b.yml",
            "- name: A\n  command: \"true\"\n",
        );
        let err = catalog.reload();
        assert!(err.is_err());
        // Previous snapshot (single task "A" from a.yml) is retained.
        assert_eq!(catalog.iterate().len(), 1);
    }

    #[test]
    fn get_tasks_by_trigger_is_memoized_until_reload() {
        let dir = tempdir();
        write_task_file(
            dir.path(),
            "a.yml",
            "- name: A\n  command: \"true\"\n  triggers: [t1]\n",
        );
        let catalog = Catalog::load(format!("{}/*.yml", dir.path().display())).unwrap();
        assert_eq!(catalog.get_tasks_by_trigger("t1").len(), 1);

        write_task_file(
            dir.path(),
            "b.yml",
            "- name: B\n  command: \"true\"\n  triggers: [t1]\n",
        );
        // Without reload, the memoized result is stale (still 1).
        assert_eq!(catalog.get_tasks_by_trigger("t1").len(), 1);

        catalog.reload().unwrap();
        assert_eq!(catalog.get_tasks_by_trigger("t1").len(), 2);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
