//! Core domain models for architecture violations and validation results
//!
//! Architecture: Rich Domain Models - Violations are entities with behavior, not just data
//! - Violations carry their resolved severity, location and optional fix descriptor
//! - ValidationReport acts as an aggregate root managing collections of violations
//! - The error taxonomy separates contained failures (file, rule, plugin) from fatal ones

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Severity levels for architecture violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational messages and suggestions
    Info,
    /// Warnings that should be addressed but don't block builds
    Warning,
    /// Errors that block commits and fail CI/CD builds
    Error,
}

impl Severity {
    /// Whether this severity level should cause validation to fail
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Convert to string for display
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Describes how a violation could be fixed. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixDescriptor {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// An architecture or correctness violation reported by a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Unique identifier of this finding
    pub id: String,
    /// Identifier of the rule that produced it
    pub rule_id: String,
    /// Human-readable rule name
    pub rule_name: String,
    /// Resolved severity (the configured level, not the rule default)
    pub severity: Severity,
    pub message: String,
    /// Relative path of the file the violation is reported against
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Free-form, rule-specific data (cycle members, layer names, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixDescriptor>,
    /// When this violation was detected
    pub detected_at: DateTime<Utc>,
}

impl Violation {
    /// Create a new violation
    pub fn new(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        severity: Severity,
        file: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            severity,
            message: message.into(),
            file: file.into(),
            line: None,
            column: None,
            end_line: None,
            end_column: None,
            suggestion: None,
            metadata: None,
            fixable: false,
            fix: None,
            detected_at: Utc::now(),
        }
    }

    /// Set line and column position
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Set the end of the reported span
    pub fn with_end(mut self, line: u32, column: u32) -> Self {
        self.end_line = Some(line);
        self.end_column = Some(column);
        self
    }

    /// Add a suggested fix
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach a fix descriptor, marking the violation fixable
    pub fn with_fix(mut self, fix: FixDescriptor) -> Self {
        self.fixable = true;
        self.fix = Some(fix);
        self
    }

    /// Whether this violation is blocking (prevents commits/builds)
    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }

    /// Format violation for display
    pub fn format_display(&self) -> String {
        let location = match (self.line, self.column) {
            (Some(line), Some(col)) => format!(":{line}:{col}"),
            (Some(line), None) => format!(":{line}"),
            _ => String::new(),
        };

        format!(
            "{}{} [{}] {} ({})",
            self.file.display(),
            location,
            self.severity.as_str(),
            self.message,
            self.rule_id
        )
    }
}

/// Summary statistics for a validation report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Total number of files in the analyzed graph
    pub total_files: usize,
    /// Number of dependency edges in the analyzed graph
    pub total_dependencies: usize,
    /// Number of violations by severity level
    pub violations_by_severity: ViolationCounts,
    /// Total execution time in milliseconds
    pub execution_time_ms: u64,
    /// Timestamp when validation was performed
    pub validated_at: DateTime<Utc>,
}

/// Count of violations by severity level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl ViolationCounts {
    /// Total number of violations across all severities
    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }

    /// Whether there are any blocking violations
    pub fn has_blocking(&self) -> bool {
        self.error > 0
    }

    /// Add a violation to the counts
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Complete validation report containing all violations and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// All violations found during validation
    pub violations: Vec<Violation>,
    /// Summary statistics
    pub summary: ValidationSummary,
    /// Configuration used for this validation
    pub config_fingerprint: Option<String>,
}

impl ValidationReport {
    /// Create a new empty validation report
    pub fn new() -> Self {
        Self {
            violations: Vec::new(),
            summary: ValidationSummary { validated_at: Utc::now(), ..Default::default() },
            config_fingerprint: None,
        }
    }

    /// Build a report from a batch of violations
    pub fn from_violations(violations: impl IntoIterator<Item = Violation>) -> Self {
        let mut report = Self::new();
        for violation in violations {
            report.add_violation(violation);
        }
        report
    }

    /// Add a violation to the report
    pub fn add_violation(&mut self, violation: Violation) {
        self.summary.violations_by_severity.add(violation.severity);
        self.violations.push(violation);
    }

    /// Whether the report contains any violations
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Whether the report contains blocking violations (errors)
    pub fn has_errors(&self) -> bool {
        self.summary.violations_by_severity.has_blocking()
    }

    /// Get violations of a specific severity
    pub fn violations_by_severity(&self, severity: Severity) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.severity == severity)
    }

    /// Violations produced by one rule
    pub fn violations_for_rule<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations.iter().filter(move |v| v.rule_id == rule_id)
    }

    /// Set the size of the analyzed graph
    pub fn set_graph_size(&mut self, files: usize, dependencies: usize) {
        self.summary.total_files = files;
        self.summary.total_dependencies = dependencies;
    }

    /// Set the execution time
    pub fn set_execution_time(&mut self, duration_ms: u64) {
        self.summary.execution_time_ms = duration_ms;
    }

    /// Set the configuration fingerprint
    pub fn set_config_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.config_fingerprint = Some(fingerprint.into());
    }

    /// Sort violations by file path and line number for consistent output
    pub fn sort_violations(&mut self) {
        self.violations.sort_by(|a, b| {
            a.file
                .cmp(&b.file)
                .then_with(|| a.line.unwrap_or(0).cmp(&b.line.unwrap_or(0)))
                .then_with(|| b.severity.cmp(&a.severity))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types that can occur while scanning, loading plugins, or validating
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// Configuration is invalid; fatal before any scan or validation
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// File could not be read or accessed
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A single file could not be scanned
    #[error("Scan error in {file}: {message}")]
    Scan { file: String, message: String },

    /// A parser rejected a file's content
    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// A plugin failed to resolve, validate, or initialize
    #[error("Plugin '{plugin}' failed to load: {message}")]
    PluginLoad { plugin: String, message: String },

    /// A rule failed while checking the graph
    #[error("Rule '{rule}' failed: {message}")]
    RuleExecution { rule: String, message: String },

    /// Glob or regex compilation failed
    #[error("Pattern error: {message}")]
    Pattern { message: String },

    /// File watching could not be set up
    #[error("Watch error: {message}")]
    Watch { message: String },
}

impl GuardianError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a scan error for one file
    pub fn scan(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scan { file: file.into(), message: message.into() }
    }

    /// Create a parse error for one file
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse { file: file.into(), message: message.into() }
    }

    /// Create a plugin load error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginLoad { plugin: plugin.into(), message: message.into() }
    }

    /// Create a rule execution error
    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleExecution { rule: rule.into(), message: message.into() }
    }

    /// Create a pattern error
    pub fn pattern(message: impl Into<String>) -> Self {
        Self::Pattern { message: message.into() }
    }

    /// Create a watch error
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch { message: message.into() }
    }

    /// Whether this error must abort the run rather than be contained at its origin
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Io { .. } | Self::Watch { .. })
    }
}

/// Result type for Guardian operations
pub type GuardianResult<T> = Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_violation_creation() {
        let violation = Violation::new(
            "layer-dependencies",
            "Layer Dependencies",
            Severity::Error,
            "src/app/service.ts",
            "Test message",
        );

        assert_eq!(violation.rule_id, "layer-dependencies");
        assert_eq!(violation.rule_name, "Layer Dependencies");
        assert_eq!(violation.severity, Severity::Error);
        assert_eq!(violation.file, Path::new("src/app/service.ts"));
        assert!(violation.is_blocking());
        assert!(!violation.fixable);
        assert!(!violation.id.is_empty());
    }

    #[test]
    fn test_violation_builders() {
        let violation = Violation::new("r", "R", Severity::Warning, "a.ts", "msg")
            .with_position(42, 15)
            .with_end(42, 30)
            .with_suggestion("move it")
            .with_fix(FixDescriptor { description: "rewrite import".into(), replacement: None });

        assert_eq!(violation.line, Some(42));
        assert_eq!(violation.column, Some(15));
        assert_eq!(violation.end_column, Some(30));
        assert_eq!(violation.suggestion.as_deref(), Some("move it"));
        assert!(violation.fixable);
        assert!(!violation.is_blocking());
        assert_eq!(violation.format_display(), "a.ts:42:15 [warning] msg (r)");
    }

    #[test]
    fn test_violation_wire_shape_is_camel_case() {
        let violation = Violation::new("r", "R", Severity::Error, "a.ts", "msg").with_position(1, 2);
        let json = serde_json::to_value(&violation).unwrap();

        assert_eq!(json["ruleId"], "r");
        assert_eq!(json["ruleName"], "R");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["line"], 1);
        assert!(json.get("endLine").is_none());
    }

    #[test]
    fn test_validation_report() {
        let mut report = ValidationReport::new();
        report.add_violation(Violation::new("rule1", "Rule 1", Severity::Error, "b.ts", "Error"));
        report.add_violation(Violation::new("rule2", "Rule 2", Severity::Warning, "a.ts", "Warn"));

        assert!(report.has_violations());
        assert!(report.has_errors());
        assert_eq!(report.summary.violations_by_severity.total(), 2);
        assert_eq!(report.violations_for_rule("rule2").count(), 1);

        report.sort_violations();
        assert_eq!(report.violations[0].file, Path::new("a.ts"));
    }

    #[test]
    fn test_error_fatality() {
        assert!(GuardianError::config("bad").is_fatal());
        assert!(!GuardianError::scan("a.ts", "unreadable").is_fatal());
        assert!(!GuardianError::rule("r", "boom").is_fatal());
        assert!(!GuardianError::plugin("p", "missing").is_fatal());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Error.is_blocking());
        assert!(!Severity::Warning.is_blocking());
    }
}
