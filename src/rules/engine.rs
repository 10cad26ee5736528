//! Rule registry and execution
//!
//! Architecture: Application Service - The engine owns rule enablement, execution and severity
//! - Each rule runs at most once per pass behind its own error boundary
//! - Emitted severity always comes from the configured level, never the rule default
//! - Rules run in parallel on rayon; a panicking rule is contained like a failing one

use super::{builtin_rules, Rule, RuleCategory, RuleContext, RuleResult};
use crate::config::{GuardianConfig, Level};
use crate::domain::{GuardianError, GuardianResult, Severity, Violation};
use crate::graph::DependencyGraph;
use crate::scanner::FileContents;
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Where a registered rule came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "plugin")]
pub enum RuleOrigin {
    Builtin,
    Plugin(String),
}

/// Listing entry for a registered rule
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: RuleCategory,
    pub default_severity: Severity,
    pub level: Level,
    pub enabled: bool,
    pub supports_incremental: bool,
    pub tags: Vec<String>,
    pub origin: RuleOrigin,
}

struct RegisteredRule {
    rule: Arc<dyn Rule>,
    level: Level,
    origin: RuleOrigin,
}

/// Registry of rules plus the enabled subset
pub struct RuleEngine {
    config: Arc<GuardianConfig>,
    rules: BTreeMap<String, RegisteredRule>,
    enabled: BTreeSet<String>,
    parallel: bool,
}

impl RuleEngine {
    /// Create an empty engine
    pub fn new(config: Arc<GuardianConfig>) -> Self {
        Self { config, rules: BTreeMap::new(), enabled: BTreeSet::new(), parallel: true }
    }

    /// Create an engine with every built-in rule registered
    pub fn with_builtin_rules(config: Arc<GuardianConfig>) -> Self {
        let mut engine = Self::new(config);
        for rule in builtin_rules() {
            if let Err(e) = engine.register_rule(rule) {
                tracing::warn!("Failed to register built-in rule: {}", e);
            }
        }
        engine
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Run rules one after another instead of on the rayon pool
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Register a built-in or host-provided rule
    pub fn register_rule(&mut self, rule: Box<dyn Rule>) -> GuardianResult<()> {
        self.register(rule, RuleOrigin::Builtin)
    }

    /// Register a rule contributed by a plugin
    pub fn register_plugin_rule(&mut self, plugin: &str, rule: Box<dyn Rule>) -> GuardianResult<()> {
        self.register(rule, RuleOrigin::Plugin(plugin.to_string()))
    }

    fn register(&mut self, mut rule: Box<dyn Rule>, origin: RuleOrigin) -> GuardianResult<()> {
        let id = rule.id().to_string();
        if id.trim().is_empty() {
            return Err(GuardianError::rule("<unnamed>", "Rule id must not be empty"));
        }
        if self.rules.contains_key(&id) {
            return Err(GuardianError::rule(&id, "A rule with this id is already registered"));
        }

        let configured = self.config.rule_level(&id);
        let level = configured
            .map(|setting| setting.level())
            .unwrap_or_else(|| Level::from_default_severity(rule.default_severity()));

        if let Some(options) = configured.and_then(|setting| setting.options()) {
            if let Err(e) = rule.configure(options) {
                tracing::warn!("Rule '{}' rejected its options, using defaults: {}", id, e);
            }
        }

        if level != Level::Off {
            self.enabled.insert(id.clone());
        }
        tracing::debug!("Registered rule '{}' at level {}", id, level.as_str());
        self.rules.insert(id, RegisteredRule { rule: Arc::from(rule), level, origin });
        Ok(())
    }

    /// Remove a rule; returns whether it was registered
    pub fn unregister_rule(&mut self, id: &str) -> bool {
        self.enabled.remove(id);
        self.rules.remove(id).is_some()
    }

    /// Replace the enabled set with the registered rules among `ids`
    pub fn filter_rules<S: AsRef<str>>(&mut self, ids: &[S]) {
        let mut enabled = BTreeSet::new();
        for id in ids.iter().map(AsRef::as_ref) {
            if self.rules.contains_key(id) {
                enabled.insert(id.to_string());
            } else {
                tracing::warn!("Ignoring unknown rule id '{}'", id);
            }
        }
        self.enabled = enabled;
    }

    /// Restore the enabled set implied by configured levels
    pub fn reset_filter(&mut self) {
        self.enabled = self
            .rules
            .iter()
            .filter(|(_, entry)| entry.level != Level::Off)
            .map(|(id, _)| id.clone())
            .collect();
    }

    /// Run every enabled rule against the whole project
    pub fn validate(&self, graph: &DependencyGraph, contents: &FileContents) -> Vec<Violation> {
        let ctx = RuleContext::new(graph, contents, &self.config);
        let start = Instant::now();
        let violations = self.run(|_| true, |rule| rule.check(&ctx));
        tracing::debug!(
            "Validated {} files with {} rules in {}ms",
            graph.node_count(),
            self.enabled.len(),
            start.elapsed().as_millis()
        );
        violations
    }

    /// Run the enabled incremental rules for one file
    pub fn validate_file(
        &self,
        path: &str,
        graph: &DependencyGraph,
        contents: &FileContents,
    ) -> Vec<Violation> {
        let ctx = RuleContext::new(graph, contents, &self.config);
        self.run(|rule| rule.supports_incremental(), |rule| rule.check_file(path, &ctx))
    }

    fn run<S, C>(&self, select: S, check: C) -> Vec<Violation>
    where
        S: Fn(&dyn Rule) -> bool,
        C: Fn(&dyn Rule) -> GuardianResult<RuleResult> + Sync,
    {
        let selected: Vec<(&String, &RegisteredRule)> = self
            .enabled
            .iter()
            .filter_map(|id| self.rules.get_key_value(id))
            .filter(|(_, entry)| select(entry.rule.as_ref()))
            .collect();

        let execute = |(id, entry): &(&String, &RegisteredRule)| -> Vec<Violation> {
            match execute_isolated(id, entry.rule.as_ref(), &check) {
                Ok(result) => result
                    .violations
                    .into_iter()
                    .map(|violation| attribute(violation, id, entry))
                    .collect(),
                Err(e) => {
                    tracing::warn!("{}", e);
                    Vec::new()
                }
            }
        };

        if self.parallel {
            selected.par_iter().flat_map_iter(execute).collect()
        } else {
            selected.iter().flat_map(execute).collect()
        }
    }

    /// Count violations that carry a fix descriptor. No edit is applied.
    pub fn auto_fix(&self, violations: &[Violation]) -> usize {
        let fixable = violations.iter().filter(|v| v.fix.is_some()).count();
        tracing::info!("{} of {} violations are fixable; fixes are not applied", fixable, violations.len());
        fixable
    }

    /// Metadata for every registered rule, ordered by id
    pub fn rules(&self) -> Vec<RuleInfo> {
        self.rules
            .iter()
            .map(|(id, entry)| RuleInfo {
                id: id.clone(),
                name: entry.rule.name().to_string(),
                description: entry.rule.description().to_string(),
                category: entry.rule.category(),
                default_severity: entry.rule.default_severity(),
                level: entry.level,
                enabled: self.enabled.contains(id),
                supports_incremental: entry.rule.supports_incremental(),
                tags: entry.rule.tags(),
                origin: entry.origin.clone(),
            })
            .collect()
    }

    pub fn enabled_rule_ids(&self) -> Vec<&str> {
        self.enabled.iter().map(String::as_str).collect()
    }

    pub fn level_for(&self, id: &str) -> Option<Level> {
        self.rules.get(id).map(|entry| entry.level)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Run one rule behind an error boundary that also contains panics
fn execute_isolated<C>(id: &str, rule: &dyn Rule, check: &C) -> GuardianResult<RuleResult>
where
    C: Fn(&dyn Rule) -> GuardianResult<RuleResult>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| check(rule))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(GuardianError::RuleExecution { message, .. })) => Err(GuardianError::rule(id, message)),
        Ok(Err(e)) => Err(GuardianError::rule(id, e.to_string())),
        Err(payload) => Err(GuardianError::rule(id, format!("panicked: {}", panic_message(payload.as_ref())))),
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Stamp the configured severity and rule identity onto a violation
fn attribute(mut violation: Violation, id: &str, entry: &RegisteredRule) -> Violation {
    violation.severity = entry.level.severity();
    if violation.rule_id.is_empty() {
        violation.rule_id = id.to_string();
    }
    if violation.rule_name.is_empty() {
        violation.rule_name = entry.rule.name().to_string();
    }
    violation
}
