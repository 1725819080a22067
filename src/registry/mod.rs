//! Task registry
//!
//! Tasks are registered by name before the engine starts. The store is then frozen
//! behind an `Arc` and only ever read, so lookups need no lock.

use crate::config::{Config, TaskConfig};
use crate::crawler::{RuleTree, Task, TaskProperty};
use crate::rules::{build_parse_func, build_root, builtin_rule_tree};
use crate::{RegistryError, WeftError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Task name → task
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<String, Arc<Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every task declared in a configuration
    pub fn from_config(config: &Config) -> Result<Self, WeftError> {
        let mut store = Self::new();
        for task_config in &config.tasks {
            let task = build_task(task_config)?;
            store.add(task)?;
        }
        Ok(store)
    }

    /// Registers a task under its own name
    pub fn add(&mut self, task: Task) -> Result<Arc<Task>, RegistryError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(RegistryError::DuplicateTask(name));
        }

        let task = Arc::new(task);
        self.tasks.insert(name, Arc::clone(&task));
        Ok(task)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Task>, RegistryError> {
        self.tasks
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builds a task from its configuration entry
///
/// A builtin rule set provides the starting tree; a `[task.root]` section replaces
/// its root and declarative rules are added on top, replacing builtin rules of the
/// same name.
fn build_task(config: &TaskConfig) -> Result<Task, WeftError> {
    let property = TaskProperty {
        name: config.name.clone(),
        url: config.url.clone(),
        cookie: config.cookie.clone(),
        wait_time: Duration::from_millis(config.wait_ms),
        max_depth: config.max_depth,
        reload: config.reload,
    };

    let mut tree = match &config.builtin {
        Some(builtin) => builtin_rule_tree(builtin, &property, config.keyword.as_deref())?,
        None => RuleTree::new(|_| Ok(Vec::new())),
    };

    if let Some(root) = &config.root {
        tree.root = build_root(root);
    }

    for rule in &config.rules {
        tree.insert(rule.name.as_str(), build_parse_func(rule)?);
    }

    tracing::debug!(
        "Built task '{}' with {} rules",
        property.name,
        tree.trunk.len()
    );

    Ok(Task::new(property, tree))
}
