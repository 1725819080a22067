use crate::config::types::{Config, EngineConfig, FetcherConfig, TaskConfig};
use crate::rules::{builtin_rule_names, RuleKind, RuleSpec};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_tasks(&config.tasks)?;
    validate_seeds(&config.engine.seeds, &config.tasks)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates every task entry
fn validate_tasks(tasks: &[TaskConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for task in tasks {
        if task.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "task name cannot be empty".to_string(),
            ));
        }

        if !names.insert(task.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate task name '{}'",
                task.name
            )));
        }

        validate_task(task)?;
    }

    Ok(())
}

fn validate_task(task: &TaskConfig) -> Result<(), ConfigError> {
    Url::parse(&task.url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid url '{}' for task '{}': {}", task.url, task.name, e))
    })?;

    let mut rule_names: HashSet<&str> = HashSet::new();
    if let Some(builtin) = &task.builtin {
        let builtin_rules = builtin_rule_names(builtin).ok_or_else(|| {
            ConfigError::Validation(format!(
                "Task '{}' uses unknown builtin rule set '{}'",
                task.name, builtin
            ))
        })?;
        rule_names.extend(builtin_rules.iter().copied());
    } else if task.root.is_none() {
        return Err(ConfigError::Validation(format!(
            "Task '{}' needs either a builtin rule set or a [task.root] section",
            task.name
        )));
    }

    for rule in &task.rules {
        validate_rule(&task.name, rule)?;
        rule_names.insert(rule.name.as_str());
    }

    if let Some(root) = &task.root {
        if !rule_names.contains(root.rule.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Root of task '{}' names unknown rule '{}'",
                task.name, root.rule
            )));
        }

        if root.urls.is_empty() && root.template.is_none() {
            return Err(ConfigError::Validation(format!(
                "Root of task '{}' needs urls or a template",
                task.name
            )));
        }

        if root.template.is_some() && root.pages > 0 && root.offset(root.pages - 1).is_none() {
            return Err(ConfigError::Validation(format!(
                "Root of task '{}' pages past the largest offset {}",
                task.name,
                u32::MAX
            )));
        }
    }

    for rule in &task.rules {
        if let Some(next) = &rule.next {
            if !rule_names.contains(next.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Rule '{}' of task '{}' links to unknown rule '{}'",
                    rule.name, task.name, next
                )));
            }
        }
    }

    Ok(())
}

/// Checks the fields each rule kind depends on
fn validate_rule(task: &str, rule: &RuleSpec) -> Result<(), ConfigError> {
    if rule.name.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "Task '{}' has a rule without a name",
            task
        )));
    }

    if rule.selector.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "Rule '{}' of task '{}' has an empty selector",
            rule.name, task
        )));
    }

    match rule.kind {
        RuleKind::Links if rule.next.is_none() => Err(ConfigError::Validation(format!(
            "Links rule '{}' of task '{}' needs `next`",
            rule.name, task
        ))),
        RuleKind::Match if rule.contains.is_none() => Err(ConfigError::Validation(format!(
            "Match rule '{}' of task '{}' needs `contains`",
            rule.name, task
        ))),
        _ => Ok(()),
    }
}

/// Every seed must name a configured task
fn validate_seeds(seeds: &[String], tasks: &[TaskConfig]) -> Result<(), ConfigError> {
    for seed in seeds {
        if !tasks.iter().any(|task| &task.name == seed) {
            return Err(ConfigError::Validation(format!(
                "Seed '{}' does not name a configured task",
                seed
            )));
        }
    }

    Ok(())
}
