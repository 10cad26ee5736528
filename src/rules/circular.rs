//! Circular dependency detection
//!
//! Depth-first search over the graph with an explicit recursion stack. A back edge to a
//! node still on the stack closes a cycle; cycles are keyed by their sorted node ids so
//! the same loop entered from different nodes is reported once.

use super::{violation_for, Rule, RuleCategory, RuleContext, RuleResult};
use crate::domain::{DependencyKind, GuardianError, GuardianResult, Severity};
use crate::graph::DependencyGraph;
use serde::Deserialize;
use std::collections::BTreeSet;

pub const RULE_ID: &str = "circular-dependencies";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Options {
    max_cycle_length: Option<usize>,
    include_module_declarations: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CircularDependencyRule {
    options: Options,
}

impl CircularDependencyRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop cycles with more than `max` nodes
    pub fn with_max_cycle_length(mut self, max: usize) -> Self {
        self.options.max_cycle_length = Some(max);
        self
    }

    fn successors<'g>(&self, graph: &'g DependencyGraph, id: &str) -> Vec<&'g str> {
        if self.options.include_module_declarations {
            return graph.successors(id);
        }
        // `mod foo;` edges mirror the module tree rather than a real import
        let targets: BTreeSet<&'g str> = graph
            .out_edges(id)
            .iter()
            .filter(|edge| edge.kind != DependencyKind::ModDecl)
            .map(|edge| edge.target.as_str())
            .filter(|target| graph.contains(target))
            .collect();
        targets.into_iter().collect()
    }

    /// Every distinct cycle, each as the path from its entry node around the loop
    pub fn find_cycles(&self, graph: &DependencyGraph) -> Vec<Vec<String>> {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut cycles = Vec::new();

        for start in graph.node_ids() {
            if visited.contains(start) {
                continue;
            }

            // Each frame holds a node and the successors not yet explored
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(start, self.successors(graph, start))];
            let mut on_stack: BTreeSet<&str> = BTreeSet::from([start]);
            let mut path: Vec<&str> = vec![start];
            visited.insert(start);

            while let Some((_, pending)) = stack.last_mut() {
                let Some(next) = pending.pop() else {
                    if let Some((node, _)) = stack.pop() {
                        on_stack.remove(node);
                        path.pop();
                    }
                    continue;
                };

                if on_stack.contains(next) {
                    let Some(pos) = path.iter().position(|n| *n == next) else {
                        continue;
                    };
                    let cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
                    let mut key = cycle.clone();
                    key.sort();
                    if seen.insert(key) {
                        cycles.push(cycle);
                    }
                } else if visited.insert(next) {
                    on_stack.insert(next);
                    path.push(next);
                    stack.push((next, self.successors(graph, next)));
                }
            }
        }

        if let Some(max) = self.options.max_cycle_length {
            cycles.retain(|cycle| cycle.len() <= max);
        }
        cycles
    }

    fn report(&self, graph: &DependencyGraph, cycle: &[String]) -> crate::domain::Violation {
        let mut chain = cycle.join(" -> ");
        chain.push_str(" -> ");
        chain.push_str(&cycle[0]);

        let next = cycle.get(1).unwrap_or(&cycle[0]);
        let edge = graph.out_edges(&cycle[0]).iter().find(|edge| edge.target == *next);

        let mut violation = violation_for(self, &cycle[0], format!("Circular dependency detected: {chain}"))
            .with_suggestion("Extract the shared code into a module that both sides can depend on")
            .with_metadata(serde_json::json!({ "cycle": cycle, "length": cycle.len() }));
        if let Some(edge) = edge {
            violation = violation.with_position(edge.line, edge.column);
        }
        violation
    }
}

impl Rule for CircularDependencyRule {
    fn id(&self) -> &str {
        RULE_ID
    }

    fn name(&self) -> &str {
        "Circular Dependencies"
    }

    fn description(&self) -> &str {
        "Detects import cycles between project files"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Architecture
    }

    fn tags(&self) -> Vec<String> {
        vec!["graph".to_string(), "cycles".to_string()]
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
        Ok(self.find_cycles(ctx.graph).iter().map(|cycle| self.report(ctx.graph, cycle)).collect())
    }

    fn check_file(&self, path: &str, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(self
            .find_cycles(ctx.graph)
            .iter()
            .filter(|cycle| cycle.iter().any(|node| node == path))
            .map(|cycle| self.report(ctx.graph, cycle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardianConfig;
    use crate::graph::test_support::{edge, file, graph};
    use crate::scanner::FileContents;

    fn sorted(cycle: &[String]) -> Vec<String> {
        let mut nodes = cycle.to_vec();
        nodes.sort();
        nodes
    }

    #[test]
    fn test_three_node_cycle_reported_once() {
        let graph = graph(&[("a.ts", &["b.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &["a.ts"])]);
        let cycles = CircularDependencyRule::new().find_cycles(&graph);

        assert_eq!(cycles.len(), 1);
        assert_eq!(sorted(&cycles[0]), vec!["a.ts", "b.ts", "c.ts"]);
    }

    #[test]
    fn test_check_produces_one_violation() {
        let graph = graph(&[("a.ts", &["b.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &["a.ts"])]);
        let contents = FileContents::new();
        let config = GuardianConfig::default();
        let ctx = RuleContext::new(&graph, &contents, &config);
        let rule = CircularDependencyRule::new();

        let result = rule.check(&ctx).unwrap();
        assert_eq!(result.violations.len(), 1);
        let violation = &result.violations[0];
        assert_eq!(violation.rule_id, RULE_ID);
        assert_eq!(violation.metadata.as_ref().unwrap()["length"], 3);
        assert!(violation.message.contains("a.ts -> b.ts -> c.ts -> a.ts"));

        // Any member of the cycle sees the same single violation incrementally
        for node in ["a.ts", "b.ts", "c.ts"] {
            assert_eq!(rule.check_file(node, &ctx).unwrap().violations.len(), 1);
        }
    }

    #[test]
    fn test_acyclic_graph() {
        let graph = graph(&[("a.ts", &["b.ts", "c.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &[])]);
        assert!(CircularDependencyRule::new().find_cycles(&graph).is_empty());
    }

    #[test]
    fn test_distinct_cycles_and_max_length() {
        let graph = graph(&[
            ("a.ts", &["b.ts"]),
            ("b.ts", &["a.ts"]),
            ("x.ts", &["y.ts"]),
            ("y.ts", &["z.ts"]),
            ("z.ts", &["w.ts"]),
            ("w.ts", &["x.ts"]),
        ]);

        assert_eq!(CircularDependencyRule::new().find_cycles(&graph).len(), 2);

        let limited = CircularDependencyRule::new().with_max_cycle_length(3).find_cycles(&graph);
        assert_eq!(limited.len(), 1);
        assert_eq!(sorted(&limited[0]), vec!["a.ts", "b.ts"]);

        let mut configured = CircularDependencyRule::new();
        configured.configure(&serde_json::json!({ "maxCycleLength": 2 })).unwrap();
        assert_eq!(configured.find_cycles(&graph).len(), 1);
    }

    #[test]
    fn test_module_declarations_are_ignored_by_default() {
        let mut graph = DependencyGraph::new();
        let mut decl = edge("src/lib.rs", "src/graph.rs");
        decl.kind = DependencyKind::ModDecl;
        graph.upsert_node(file("src/lib.rs"), vec![decl]);
        graph.upsert_node(file("src/graph.rs"), vec![edge("src/graph.rs", "src/lib.rs")]);

        assert!(CircularDependencyRule::new().find_cycles(&graph).is_empty());

        let mut strict = CircularDependencyRule::new();
        strict.configure(&serde_json::json!({ "includeModuleDeclarations": true })).unwrap();
        assert_eq!(strict.find_cycles(&graph).len(), 1);
    }

    #[test]
    fn test_dangling_edges_do_not_form_cycles() {
        let mut graph = graph(&[("a.ts", &["b.ts"]), ("b.ts", &["a.ts"])]);
        graph.remove_node("b.ts");
        assert!(CircularDependencyRule::new().find_cycles(&graph).is_empty());
    }

    #[test]
    fn test_invalid_options() {
        let mut rule = CircularDependencyRule::new();
        let result = rule.configure(&serde_json::json!({ "maxCycleLength": "long" }));
        assert!(matches!(result, Err(GuardianError::RuleExecution { .. })));
    }
}
