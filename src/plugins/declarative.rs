//! Declarative plugin bundles
//!
//! Architecture: Data-Driven Rules - A YAML or JSON document describes a plugin and its rules
//! - `forbidden-import` flags edges by source glob, target glob and specifier regex
//! - `content-pattern` flags regex matches in file contents
//! - Plugin options and per-rule options override rule parameters before compilation

use super::{LoadContext, Plugin, PluginMetadata};
use crate::domain::{Dependency, GuardianError, GuardianResult, Severity, Violation};
use crate::parser::line_col;
use crate::rules::{Rule, RuleCategory, RuleContext, RuleResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct Bundle {
    #[serde(default)]
    metadata: PluginMetadata,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

/// One rule as written in a bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_category")]
    pub category: RuleCategory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Message template; `{file}`, `{source}`, `{target}`, `{specifier}` and `{match}` are substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(flatten)]
    pub check: CheckSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CheckSpec {
    ForbiddenImport {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        specifier: Option<String>,
    },
    ContentPattern {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<String>,
    },
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_category() -> RuleCategory {
    RuleCategory::Custom
}

#[derive(Debug, Clone)]
enum Matcher {
    ForbiddenImport {
        from: Option<glob::Pattern>,
        to: Option<glob::Pattern>,
        specifier: Option<Regex>,
    },
    ContentPattern {
        regex: Regex,
        files: Option<glob::Pattern>,
    },
}

fn compile_glob(rule: &str, pattern: &str) -> GuardianResult<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| GuardianError::rule(rule, format!("Invalid glob '{pattern}': {e}")))
}

fn compile_regex(rule: &str, pattern: &str) -> GuardianResult<Regex> {
    Regex::new(pattern).map_err(|e| GuardianError::rule(rule, format!("Invalid regex '{pattern}': {e}")))
}

impl Matcher {
    fn compile(spec: &RuleSpec) -> GuardianResult<Self> {
        let id = spec.id.as_str();
        match &spec.check {
            CheckSpec::ForbiddenImport { from, to, specifier } => {
                if to.is_none() && specifier.is_none() {
                    return Err(GuardianError::rule(id, "forbidden-import needs `to` or `specifier`"));
                }
                Ok(Self::ForbiddenImport {
                    from: from.as_deref().map(|p| compile_glob(id, p)).transpose()?,
                    to: to.as_deref().map(|p| compile_glob(id, p)).transpose()?,
                    specifier: specifier.as_deref().map(|p| compile_regex(id, p)).transpose()?,
                })
            }
            CheckSpec::ContentPattern { pattern, files } => Ok(Self::ContentPattern {
                regex: compile_regex(id, pattern)?,
                files: files.as_deref().map(|p| compile_glob(id, p)).transpose()?,
            }),
        }
    }
}

/// A compiled bundle rule
#[derive(Debug, Clone)]
pub struct DeclarativeRule {
    spec: RuleSpec,
    matcher: Matcher,
}

impl DeclarativeRule {
    pub fn compile(spec: RuleSpec) -> GuardianResult<Self> {
        let matcher = Matcher::compile(&spec)?;
        Ok(Self { spec, matcher })
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Recompile with `overrides` merged over the current parameters; the id never changes
    fn with_overrides(&self, overrides: &serde_json::Value) -> GuardianResult<Self> {
        let Some(overrides) = overrides.as_object() else {
            return Err(GuardianError::rule(&self.spec.id, "Options must be an object"));
        };
        let mut merged = serde_json::to_value(&self.spec)
            .map_err(|e| GuardianError::rule(&self.spec.id, e.to_string()))?;
        if let Some(fields) = merged.as_object_mut() {
            for (key, value) in overrides.iter().filter(|(key, _)| key.as_str() != "id") {
                fields.insert(key.clone(), value.clone());
            }
        }
        let spec: RuleSpec = serde_json::from_value(merged)
            .map_err(|e| GuardianError::rule(&self.spec.id, format!("Invalid options: {e}")))?;
        Self::compile(spec)
    }

    fn render(&self, default: String, pairs: &[(&str, &str)]) -> String {
        let Some(template) = &self.spec.message else {
            return default;
        };
        pairs.iter().fold(template.clone(), |message, (key, value)| {
            message.replace(&format!("{{{key}}}"), value)
        })
    }

    fn violation(&self, file: &str, message: String) -> Violation {
        let violation = Violation::new(&self.spec.id, &self.spec.name, self.spec.severity, file, message);
        match &self.spec.suggestion {
            Some(suggestion) => violation.with_suggestion(suggestion.clone()),
            None => violation,
        }
    }

    fn check_edge(&self, edge: &Dependency) -> Option<Violation> {
        let Matcher::ForbiddenImport { from, to, specifier } = &self.matcher else {
            return None;
        };
        let source_ok = from.as_ref().map_or(true, |glob| glob.matches(&edge.source));
        let target_ok = to.as_ref().map_or(true, |glob| glob.matches(&edge.target));
        let specifier_ok = specifier.as_ref().map_or(true, |regex| regex.is_match(&edge.specifier));
        if !(source_ok && target_ok && specifier_ok) {
            return None;
        }

        let message = self.render(
            format!("Import of '{}' is forbidden in '{}'", edge.specifier, edge.source),
            &[
                ("file", edge.source.as_str()),
                ("source", edge.source.as_str()),
                ("target", edge.target.as_str()),
                ("specifier", edge.specifier.as_str()),
            ],
        );
        Some(
            self.violation(&edge.source, message)
                .with_position(edge.line, edge.column)
                .with_metadata(serde_json::json!({ "specifier": edge.specifier, "target": edge.target })),
        )
    }

    fn check_content(&self, file: &str, content: &str) -> Vec<Violation> {
        let Matcher::ContentPattern { regex, files } = &self.matcher else {
            return Vec::new();
        };
        if files.as_ref().is_some_and(|glob| !glob.matches(file)) {
            return Vec::new();
        }

        regex
            .find_iter(content)
            .map(|found| {
                let (line, column) = line_col(content, found.start());
                let (end_line, end_column) = line_col(content, found.end());
                let message = self.render(
                    format!("Content matches forbidden pattern '{}'", regex.as_str()),
                    &[("file", file), ("match", found.as_str())],
                );
                self.violation(file, message)
                    .with_position(line, column)
                    .with_end(end_line, end_column)
            })
            .collect()
    }
}

impl Rule for DeclarativeRule {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn default_severity(&self) -> Severity {
        self.spec.severity
    }

    fn category(&self) -> RuleCategory {
        self.spec.category
    }

    fn tags(&self) -> Vec<String> {
        self.spec.tags.clone()
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn configure(&mut self, options: &serde_json::Value) -> GuardianResult<()> {
        *self = self.with_overrides(options)?;
        Ok(())
    }

    fn check(&self, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(match self.matcher {
            Matcher::ForbiddenImport { .. } => {
                ctx.graph.edges().filter_map(|edge| self.check_edge(edge)).collect()
            }
            Matcher::ContentPattern { .. } => ctx
                .file_contents
                .iter()
                .flat_map(|(file, content)| self.check_content(file, content))
                .collect(),
        })
    }

    fn check_file(&self, path: &str, ctx: &RuleContext<'_>) -> GuardianResult<RuleResult> {
        Ok(match self.matcher {
            Matcher::ForbiddenImport { .. } => {
                ctx.dependencies_of(path).iter().filter_map(|edge| self.check_edge(edge)).collect()
            }
            Matcher::ContentPattern { .. } => ctx
                .content(path)
                .map(|content| self.check_content(path, content))
                .unwrap_or_default()
                .into(),
        })
    }
}

/// A plugin described by a bundle file
#[derive(Debug, Clone)]
pub struct DeclarativePlugin {
    metadata: PluginMetadata,
    rules: Vec<DeclarativeRule>,
    path: Option<PathBuf>,
}

impl DeclarativePlugin {
    /// Load a bundle; `.json` files are read as JSON, everything else as YAML
    pub fn from_file(path: &Path, options: &serde_json::Value) -> GuardianResult<Self> {
        let origin = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GuardianError::plugin(&origin, format!("Failed to read bundle: {e}")))?;
        let json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut plugin = Self::parse(&content, json, &origin, options)?;
        plugin.path = Some(path.to_path_buf());
        Ok(plugin)
    }

    /// Parse a bundle document; rule overrides come from `options.rules.<id>`
    pub fn parse(
        content: &str,
        json: bool,
        origin: &str,
        options: &serde_json::Value,
    ) -> GuardianResult<Self> {
        let bundle: Bundle = if json {
            serde_json::from_str(content)
                .map_err(|e| GuardianError::plugin(origin, format!("Invalid JSON bundle: {e}")))?
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| GuardianError::plugin(origin, format!("Invalid YAML bundle: {e}")))?
        };

        let overrides = options.get("rules");
        let name = if bundle.metadata.name.is_empty() { origin } else { bundle.metadata.name.as_str() };
        let rules = bundle
            .rules
            .into_iter()
            .map(|spec| {
                let rule = DeclarativeRule::compile(spec)?;
                match overrides.and_then(|all| all.get(rule.id())) {
                    Some(options) => rule.with_overrides(options),
                    None => Ok(rule),
                }
            })
            .collect::<GuardianResult<Vec<_>>>()
            .map_err(|e| GuardianError::plugin(name, e.to_string()))?;

        Ok(Self { metadata: bundle.metadata, rules, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Plugin for DeclarativePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn rules(&self) -> Vec<Box<dyn Rule>> {
        self.rules.iter().map(|rule| Box::new(rule.clone()) as Box<dyn Rule>).collect()
    }

    fn on_load(&mut self, ctx: &LoadContext) -> GuardianResult<()> {
        ctx.log.debug(&format!("{} declarative rules", self.rules.len()));
        Ok(())
    }
}
