//! Report rendering
//!
//! CDD Principle: Anti-Corruption Layer - Formatters translate domain objects to external formats
//! - ValidationReport (domain) is converted to a terminal or JSON representation
//! - JSON output uses the violation wire shape unchanged
//! - Domain logic remains pure while supporting multiple presentation needs

use crate::domain::{GuardianError, GuardianResult, Severity, ValidationReport, Violation};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Supported output formats for validation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable, grouped by file
    Human,
    /// JSON for programmatic consumption
    Json,
}

impl OutputFormat {
    pub fn all_formats() -> &'static [&'static str] {
        &["human", "json"]
    }
}

impl FromStr for OutputFormat {
    type Err = GuardianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "text" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(GuardianError::config(format!(
                "Unknown output format '{other}', expected one of: {}",
                Self::all_formats().join(", ")
            ))),
        }
    }
}

/// Options for customizing report output
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Colored human output; ignored when built without the `colors` feature
    pub use_colors: bool,
    pub show_suggestions: bool,
    /// Maximum number of violations to include
    pub max_violations: Option<usize>,
    /// Minimum severity level to include
    pub min_severity: Option<Severity>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { use_colors: true, show_suggestions: true, max_violations: None, min_severity: None }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tone {
    Error,
    Warning,
    Info,
    Success,
    Dim,
}

impl From<Severity> for Tone {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Error,
            Severity::Warning => Self::Warning,
            Severity::Info => Self::Info,
        }
    }
}

pub struct ReportFormatter {
    options: ReportOptions,
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(ReportOptions::default())
    }
}

impl ReportFormatter {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn format_report(&self, report: &ValidationReport, format: OutputFormat) -> GuardianResult<String> {
        let violations = self.filter_violations(&report.violations);
        match format {
            OutputFormat::Human => Ok(self.format_human(report, &violations)),
            OutputFormat::Json => self.format_json(report, &violations),
        }
    }

    pub fn write_report<W: Write>(
        &self,
        report: &ValidationReport,
        format: OutputFormat,
        mut writer: W,
    ) -> GuardianResult<()> {
        let formatted = self.format_report(report, format)?;
        writer.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Render a single violation line, as the watch loop prints them
    pub fn format_violation(&self, violation: &Violation) -> String {
        let mut line = format!(
            "{} [{}] {} ({})",
            self.location(violation),
            self.paint(violation.severity.as_str(), violation.severity.into()),
            violation.message,
            self.paint(&violation.rule_id, Tone::Dim)
        );
        if self.options.show_suggestions {
            if let Some(suggestion) = &violation.suggestion {
                line.push_str(&format!("\n    {}", self.paint(&format!("hint: {suggestion}"), Tone::Success)));
            }
        }
        line
    }

    fn filter_violations<'a>(&self, violations: &'a [Violation]) -> Vec<&'a Violation> {
        let mut filtered: Vec<&Violation> = violations
            .iter()
            .filter(|v| self.options.min_severity.map_or(true, |min| v.severity >= min))
            .collect();
        if let Some(max) = self.options.max_violations {
            filtered.truncate(max);
        }
        filtered
    }

    fn format_human(&self, report: &ValidationReport, violations: &[&Violation]) -> String {
        let mut output = String::new();

        if violations.is_empty() {
            output.push_str(&self.paint("No architecture violations found", Tone::Success));
            output.push('\n');
        } else {
            let tone = if report.has_errors() { Tone::Error } else { Tone::Warning };
            output.push_str(&self.paint("Architecture violations found", tone));
            output.push_str("\n\n");

            let mut by_file: BTreeMap<&Path, Vec<&Violation>> = BTreeMap::new();
            for violation in violations {
                by_file.entry(violation.file.as_path()).or_default().push(violation);
            }

            for (file, file_violations) in by_file {
                output.push_str(&format!("{}\n", file.display()));
                for violation in file_violations {
                    let position = match (violation.line, violation.column) {
                        (Some(line), Some(col)) => format!("{line}:{col}"),
                        (Some(line), None) => line.to_string(),
                        _ => "-".to_string(),
                    };
                    output.push_str(&format!(
                        "  {} [{}] {} ({})\n",
                        self.paint(&position, Tone::Dim),
                        self.paint(violation.severity.as_str(), violation.severity.into()),
                        violation.message,
                        violation.rule_id
                    ));
                    if self.options.show_suggestions {
                        if let Some(suggestion) = &violation.suggestion {
                            output.push_str(&format!("    {}\n", self.paint(&format!("hint: {suggestion}"), Tone::Success)));
                        }
                    }
                }
                output.push('\n');
            }
        }

        output.push_str(&self.format_summary(report));
        output
    }

    fn format_json(&self, report: &ValidationReport, violations: &[&Violation]) -> GuardianResult<String> {
        let counts = &report.summary.violations_by_severity;
        let json = serde_json::json!({
            "violations": violations,
            "summary": {
                "totalFiles": report.summary.total_files,
                "totalDependencies": report.summary.total_dependencies,
                "violationsBySeverity": {
                    "error": counts.error,
                    "warning": counts.warning,
                    "info": counts.info,
                },
                "executionTimeMs": report.summary.execution_time_ms,
                "validatedAt": report.summary.validated_at.to_rfc3339(),
            },
            "configFingerprint": report.config_fingerprint,
        });

        serde_json::to_string_pretty(&json)
            .map_err(|e| GuardianError::config(format!("JSON serialization failed: {e}")))
    }

    /// One-line totals, as printed after a check or when a watch ends
    pub fn format_summary(&self, report: &ValidationReport) -> String {
        let counts = &report.summary.violations_by_severity;
        let seconds = report.summary.execution_time_ms as f64 / 1000.0;
        let scope = format!(
            "{} files, {} dependencies ({:.1}s)",
            report.summary.total_files, report.summary.total_dependencies, seconds
        );

        if counts.total() == 0 {
            return format!("Summary: clean, {scope}\n");
        }

        let plural = |n: usize| if n == 1 { "" } else { "s" };
        let mut parts = Vec::new();
        if counts.error > 0 {
            parts.push(self.paint(&format!("{} error{}", counts.error, plural(counts.error)), Tone::Error));
        }
        if counts.warning > 0 {
            parts.push(self.paint(&format!("{} warning{}", counts.warning, plural(counts.warning)), Tone::Warning));
        }
        if counts.info > 0 {
            parts.push(self.paint(&format!("{} info", counts.info), Tone::Info));
        }
        format!("Summary: {} in {scope}\n", parts.join(", "))
    }

    fn location(&self, violation: &Violation) -> String {
        match (violation.line, violation.column) {
            (Some(line), Some(col)) => format!("{}:{line}:{col}", violation.file.display()),
            (Some(line), None) => format!("{}:{line}", violation.file.display()),
            _ => violation.file.display().to_string(),
        }
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        #[cfg(feature = "colors")]
        {
            use colored::Colorize;
            if self.options.use_colors {
                return match tone {
                    Tone::Error => text.red().bold(),
                    Tone::Warning => text.yellow().bold(),
                    Tone::Info => text.cyan(),
                    Tone::Success => text.green(),
                    Tone::Dim => text.dimmed(),
                }
                .to_string();
            }
        }
        #[cfg(not(feature = "colors"))]
        let _ = tone;
        text.to_string()
    }
}
