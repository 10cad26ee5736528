//! Rule contract and built-in rules
//!
//! Architecture: Strategy Pattern - Each rule is an independent strategy run by the engine
//! - Rules read the graph and content snapshot through a shared, read-only context
//! - Full-project `check` is mandatory; per-file `check_file` is opt-in
//! - Built-in and plugin rules implement the same trait

pub mod circular;
pub mod engine;
pub mod layers;
pub mod unresolved;

pub use circular::CircularDependencyRule;
pub use engine::{RuleEngine, RuleInfo, RuleOrigin};
pub use layers::{LayerDependencyRule, LayerMap};
pub use unresolved::UnresolvedImportRule;

use crate::config::{GuardianConfig, LayerConfig};
use crate::domain::{Dependency, GuardianResult, ProjectFile, Severity, Violation};
use crate::graph::DependencyGraph;
use crate::scanner::FileContents;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad grouping used when listing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Architecture,
    Correctness,
    Maintainability,
    Style,
    Custom,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Architecture => "architecture",
            Self::Correctness => "correctness",
            Self::Maintainability => "maintainability",
            Self::Style => "style",
            Self::Custom => "custom",
        })
    }
}

/// Everything a rule may look at during one validation pass
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub graph: &'a DependencyGraph,
    pub file_contents: &'a FileContents,
    pub config: &'a GuardianConfig,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        file_contents: &'a FileContents,
        config: &'a GuardianConfig,
    ) -> Self {
        Self { graph, file_contents, config }
    }

    pub fn file(&self, id: &str) -> Option<&'a ProjectFile> {
        self.graph.node(id)
    }

    pub fn content(&self, id: &str) -> Option<&'a str> {
        self.file_contents.get(id)
    }

    pub fn dependencies_of(&self, id: &str) -> &'a [Dependency] {
        self.graph.out_edges(id)
    }

    pub fn dependents_of(&self, id: &'a str) -> Vec<&'a str> {
        self.graph.predecessors(id)
    }

    pub fn layers(&self) -> &'a [LayerConfig] {
        &self.config.layers
    }
}

/// Violations produced by one rule invocation
#[derive(Debug, Clone, Default)]
pub struct RuleResult {
    pub violations: Vec<Violation>,
}

impl RuleResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl From<Vec<Violation>> for RuleResult {
    fn from(violations: Vec<Violation>) -> Self {
        Self { violations }
    }
}

impl FromIterator<Violation> for RuleResult {
    fn from_iter<I: IntoIterator<Item = Violation>>(iter: I) -> Self {
        Self { violations: iter.into_iter().collect() }
    }
}

/// Contract every rule implements
pub trait Rule: Send + Sync {
    /// Unique identifier, used as the configuration key
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Severity used to pick the level when configuration does not mention the rule
    fn default_severity(&self) -> Severity;

    fn category(&self) -> RuleCategory;

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `check_file` gives meaningful per-file results
    fn supports_incremental(&self) -> bool {
        false
    }

    /// Apply rule-specific options from configuration
    fn configure(&mut self, _options: &serde_json::Value) -> GuardianResult<()> {
        Ok(())
    }

    /// Check the whole project
    fn check(&self, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult>;

    /// Check a single file; only called when `supports_incremental` is true
    fn check_file(&self, _path: &str, _ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(RuleResult::new())
    }
}

/// Fresh instances of every built-in rule
pub fn builtin_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(CircularDependencyRule::new()),
        Box::new(LayerDependencyRule::new()),
        Box::new(UnresolvedImportRule::new()),
    ]
}

/// Build a violation attributed to `rule` at the default severity; the engine
/// replaces the severity with the configured level
pub(crate) fn violation_for(
    rule: &dyn Rule,
    file: &str,
    message: impl Into<String>,
) -> Violation {
    Violation::new(rule.id(), rule.name(), rule.default_severity(), file, message)
}
