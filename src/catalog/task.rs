//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::catalog::expand;

/// The on-disk shape of one entry in a task-definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDocument {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub triggers: BTreeSet<String>,
    #[serde(default)]
    pub messages: BTreeSet<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub parent_success: bool,
    #[serde(default)]
    pub replay: Option<u32>,
}

/// A fully-resolved task: variable expansion has already run, and `parents`
/// has already been derived from the catalog's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, PartialEq)]
pub struct Task {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    command: String,

    #[getset(get = "pub")]
    triggers: BTreeSet<String>,

    #[getset(get = "pub")]
    messages: BTreeSet<String>,

    #[getset(get = "pub")]
    parameters: Vec<String>,

    #[getset(get = "pub")]
    log: Option<PathBuf>,

    #[getset(get = "pub")]
    parent_success: bool,

    #[getset(get = "pub")]
    replay: Option<u32>,

    #[getset(get = "pub")]
    config_source: String,

    /// Derived: one hop over the message→trigger relation.
    #[getset(get = "pub")]
    parents: BTreeSet<String>,
}

impl Task {
    pub fn from_document(doc: TaskDocument, config_source: String) -> Result<Self> {
        let command = expand::expand(&doc.command)?;
        let log = doc
            .log
            .map(|raw| expand::expand(&raw))
            .transpose()?
            .map(|expanded| expand::resolve_log_path(&expanded, &doc.name));

        Ok(Task {
            name: doc.name,
            command,
            triggers: doc.triggers,
            messages: doc.messages,
            parameters: doc.parameters,
            log,
            parent_success: doc.parent_success,
            replay: doc.replay,
            config_source,
            parents: BTreeSet::new(),
        })
    }

    pub fn set_parents(&mut self, parents: BTreeSet<String>) {
        self.parents = parents;
    }

    /// Overlay `parameters` with the payload of an incoming trigger message:
    /// the incoming payload becomes the task's runtime parameters. `params`
    /// is a JSON array of strings; anything else leaves `parameters` untouched.
    pub fn overlay_parameters(&mut self, params: &serde_json::Value) {
        if let Some(arr) = params.as_array() {
            self.parameters = arr
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
        }
    }

    pub fn decrement_replay(&self) -> Option<u32> {
        self.replay.map(|n| n.saturating_sub(1))
    }

    pub fn set_replay(&mut self, replay: Option<u32>) {
        self.replay = replay;
    }

    /// The UI category for this task: the basename of its originating file
    /// (minus extension), underscores turned into spaces, uppercased.
    pub fn category(&self) -> String {
        let stem = self
            .config_source
            .rsplit_once('.')
            .map(|(stem, _ext)| stem)
            .unwrap_or(&self.config_source);
        stem.replace('_', " ").to_uppercase()
    }

    pub fn as_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> TaskDocument {
        TaskDocument {
            name: name.to_string(),
            command: "true".to_string(),
            triggers: BTreeSet::new(),
            messages: BTreeSet::new(),
            parameters: vec![],
            log: None,
            parent_success: false,
            replay: None,
        }
    }

    #[test]
    fn category_uppercases_and_replaces_underscores() {
        let task = Task::from_document(doc("a"), "daily_jobs.yml".to_string()).unwrap();
        assert_eq!(task.category(), "DAILY JOBS");
    }

    #[test]
    fn decrement_replay_saturates_at_zero() {
        let mut t = Task::from_document(doc("a"), "x.yml".to_string()).unwrap();
        t.replay = Some(0);
        assert_eq!(t.decrement_replay(), Some(0));
    }

    #[test]
    fn overlay_parameters_replaces_with_string_array() {
        let mut t = Task::from_document(doc("a"), "x.yml".to_string()).unwrap();
        t.overlay_parameters(&serde_json::json!(["one", "two"]));
        assert_eq!(t.parameters, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn overlay_parameters_ignores_non_array_payload() {
        let mut t = Task::from_document(doc("a"), "x.yml".to_string()).unwrap();
        t.parameters = vec!["kept".to_string()];
        t.overlay_parameters(&serde_json::json!({"not": "an array"}));
        assert_eq!(t.parameters, vec!["kept".to_string()]);
    }
}
