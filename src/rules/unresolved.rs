//! Unresolved import detection
//!
//! Flags path-like imports that do not point at a file in the graph, including edges
//! left dangling after their target was removed.

use super::{violation_for, Rule, RuleCategory, RuleContext, RuleResult};
use crate::domain::{Dependency, DependencyKind, GuardianResult, Severity, Violation};
use crate::graph::DependencyGraph;

pub const RULE_ID: &str = "unresolved-imports";

#[derive(Debug, Clone, Default)]
pub struct UnresolvedImportRule;

impl UnresolvedImportRule {
    pub fn new() -> Self {
        Self
    }

    fn check_edge(&self, graph: &DependencyGraph, edge: &Dependency) -> Option<Violation> {
        let path_like = edge.is_relative() || edge.kind == DependencyKind::ModDecl;
        if !path_like || graph.contains(&edge.target) {
            return None;
        }

        let message = if edge.is_resolved() {
            format!("Import '{}' points at '{}', which no longer exists", edge.specifier, edge.target)
        } else {
            format!("Cannot resolve import '{}'", edge.specifier)
        };

        Some(
            violation_for(self, &edge.source, message)
                .with_position(edge.line, edge.column)
                .with_metadata(serde_json::json!({
                    "specifier": edge.specifier,
                    "dangling": edge.is_resolved(),
                })),
        )
    }
}

impl Rule for UnresolvedImportRule {
    fn id(&self) -> &str {
        RULE_ID
    }

    fn name(&self) -> &str {
        "Unresolved Imports"
    }

    fn description(&self) -> &str {
        "Reports relative imports that do not resolve to a project file"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Correctness
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn check(&self, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(ctx.graph.edges().filter_map(|edge| self.check_edge(ctx.graph, edge)).collect())
    }

    fn check_file(&self, path: &str, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(ctx
            .dependencies_of(path)
            .iter()
            .filter_map(|edge| self.check_edge(ctx.graph, edge))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardianConfig;
    use crate::graph::test_support::{file, graph};
    use crate::scanner::FileContents;

    #[test]
    fn test_flags_missing_and_dangling_targets() {
        let mut graph = graph(&[("a.ts", &["b.ts"]), ("b.ts", &[])]);
        graph.upsert_node(
            file("c.ts"),
            vec![
                Dependency::new("c.ts", "./missing", DependencyKind::Import, 2, 1),
                Dependency::new("c.ts", "react", DependencyKind::Import, 1, 1),
            ],
        );
        graph.remove_node("b.ts");

        let contents = FileContents::new();
        let config = GuardianConfig::default();
        let ctx = RuleContext::new(&graph, &contents, &config);
        let result = UnresolvedImportRule::new().check(&ctx).unwrap();

        assert_eq!(result.violations.len(), 2);
        assert!(result.violations.iter().any(|v| v.message.contains("no longer exists")));
        assert!(result.violations.iter().any(|v| v.message == "Cannot resolve import './missing'"));

        let for_c = UnresolvedImportRule::new().check_file("c.ts", &ctx).unwrap();
        assert_eq!(for_c.violations.len(), 1);
        assert_eq!(for_c.violations[0].line, Some(2));
    }
}
