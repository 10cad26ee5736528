//! Layer dependency validation
//!
//! Architecture: Policy Enforcement - Files are classified into configured layers and every
//! cross-layer edge is checked against the source layer's allow-list
//! - Classification uses the longest matching directory prefix
//! - Prefixes compare case-insensitively with `\` and `/` treated alike
//! - `*` in an allow-list permits every layer

use super::{violation_for, Rule, RuleCategory, RuleContext, RuleResult};
use crate::config::LayerConfig;
use crate::domain::{Dependency, GuardianError, GuardianResult, Severity, Violation};
use serde::Deserialize;

pub const RULE_ID: &str = "layer-dependencies";

/// Maps file paths to layers by longest directory prefix
#[derive(Debug, Clone, Default)]
pub struct LayerMap {
    /// Normalized prefix and layer, longest prefix first
    entries: Vec<(String, LayerConfig)>,
}

impl LayerMap {
    pub fn new(layers: &[LayerConfig]) -> Self {
        let mut entries: Vec<(String, LayerConfig)> = layers
            .iter()
            .flat_map(|layer| {
                layer.directories.iter().map(move |dir| (normalize(dir), layer.clone()))
            })
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// Layer containing `path`, if any
    pub fn classify(&self, path: &str) -> Option<&LayerConfig> {
        let path = normalize(path);
        self.entries
            .iter()
            .find(|(prefix, _)| {
                prefix.is_empty()
                    || path == *prefix
                    || (path.starts_with(prefix.as_str())
                        && path.as_bytes().get(prefix.len()) == Some(&b'/'))
            })
            .map(|(_, layer)| layer)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/").to_lowercase();
    let path = path.trim_start_matches("./");
    path.trim_matches('/').to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Options {
    ignore_type_imports: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LayerDependencyRule {
    options: Options,
}

impl LayerDependencyRule {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_edge(&self, layers: &LayerMap, edge: &Dependency) -> Option<Violation> {
        if !edge.is_resolved() || (self.options.ignore_type_imports && edge.is_type_only) {
            return None;
        }

        let source = layers.classify(&edge.source)?;
        let target = layers.classify(&edge.target)?;
        if source.name == target.name || source.allows(&target.name) {
            return None;
        }

        let message = format!(
            "Layer '{}' must not depend on layer '{}' ({} imports {})",
            source.name, target.name, edge.source, edge.target
        );
        let allowed = if source.allowed_dependencies.is_empty() {
            "no other layers".to_string()
        } else {
            source.allowed_dependencies.join(", ")
        };

        Some(
            violation_for(self, &edge.source, message)
                .with_position(edge.line, edge.column)
                .with_suggestion(format!("Layer '{}' may only depend on {}", source.name, allowed))
                .with_metadata(serde_json::json!({
                    "sourceLayer": source.name,
                    "targetLayer": target.name,
                    "target": edge.target,
                    "specifier": edge.specifier,
                })),
        )
    }
}

impl Rule for LayerDependencyRule {
    fn id(&self) -> &str {
        RULE_ID
    }

    fn name(&self) -> &str {
        "Layer Dependencies"
    }

    fn description(&self) -> &str {
        "Enforces the allowed dependencies between architectural layers"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Architecture
    }

    fn tags(&self) -> Vec<String> {
        vec!["layers".to_string()]
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn configure(&mut self, options: &serde_json::Value) -> GuardianResult<()> {
        self.options = Options::deserialize(options)
            .map_err(|e| GuardianError::rule(RULE_ID, format!("Invalid options: {e}")))?;
        Ok(())
    }

    fn check(&self, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        let layers = LayerMap::new(ctx.layers());
        if layers.is_empty() {
            return Ok(RuleResult::new());
        }
        Ok(ctx.graph.edges().filter_map(|edge| self.check_edge(&layers, edge)).collect())
    }

    fn check_file(&self, path: &str, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        let layers = LayerMap::new(ctx.layers());
        Ok(ctx
            .dependencies_of(path)
            .iter()
            .filter_map(|edge| self.check_edge(&layers, edge))
            .collect())
    }
}
