//! Configuration loading and management for Arch Guardian
//!
//! Architecture: Anti-Corruption Layer - Configuration translates external YAML/JSON formats
//! - Raw documents are converted to typed settings consumed by scanner, engine and loader
//! - Defaults live here, not in the components that consume them
//! - Invalid configuration is rejected before any scan starts

use crate::domain::{GuardianError, GuardianResult, Language, Severity};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];
pub const DEFAULT_PLUGIN_DIR: &str = ".arch-guardian/plugins";
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Main configuration structure for Arch Guardian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Configuration format version
    pub version: String,
    /// Project root; relative to the config file's directory when loaded from disk
    pub root: PathBuf,
    /// Languages to scan; empty means every registered parser
    pub languages: Vec<Language>,
    pub layers: Vec<LayerConfig>,
    pub rules: RulesConfig,
    pub patterns: PatternsConfig,
    pub plugins: Vec<PluginEntry>,
    /// Directory searched for package-style plugin names
    pub plugin_dir: PathBuf,
    pub scanner: ScannerConfig,
    pub watch: WatchConfig,
}

/// A named group of directories with an allow-list of layers it may depend on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub directories: Vec<String>,
    #[serde(default, alias = "allowedDependencies")]
    pub allowed_dependencies: Vec<String>,
}

impl LayerConfig {
    pub fn new(
        name: impl Into<String>,
        directories: &[&str],
        allowed_dependencies: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            kind: None,
            directories: directories.iter().map(|d| d.to_string()).collect(),
            allowed_dependencies: allowed_dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Whether this layer may depend on `other`
    pub fn allows(&self, other: &str) -> bool {
        self.allowed_dependencies.iter().any(|allowed| allowed == "*" || allowed == other)
    }
}

/// Configured level of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Off,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl Level {
    /// Severity emitted for violations: error maps to error, anything else to warning
    pub fn severity(self) -> Severity {
        match self {
            Self::Error => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Level a rule runs at when configuration does not mention it
    pub fn from_default_severity(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Error,
            _ => Self::Warn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Per-rule setting: a bare level or a level with rule-specific options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleLevel {
    Level(Level),
    Detailed {
        level: Level,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl RuleLevel {
    pub fn level(&self) -> Level {
        match self {
            Self::Level(level) | Self::Detailed { level, .. } => *level,
        }
    }

    pub fn options(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Detailed { options, .. } if !options.is_null() => Some(options),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.level() != Level::Off
    }
}

impl From<Level> for RuleLevel {
    fn from(level: Level) -> Self {
        Self::Level(level)
    }
}

/// Rule levels keyed by rule id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub builtin: BTreeMap<String, RuleLevel>,
    pub plugin: BTreeMap<String, RuleLevel>,
}

impl RulesConfig {
    /// Configured level for a rule id, looking at built-in settings first
    pub fn level_for(&self, rule_id: &str) -> Option<&RuleLevel> {
        self.builtin.get(rule_id).or_else(|| self.plugin.get(rule_id))
    }
}

/// Include/exclude globs matched against POSIX relative paths
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// Empty means every file
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: vec![
                "**/node_modules/**".to_string(),
                "**/.git/**".to_string(),
                "target/**".to_string(),
                "**/dist/**".to_string(),
                "**/build/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/*.generated.*".to_string(),
            ],
        }
    }
}

/// A plugin reference: a bare name or `{name, enabled?, options?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl PluginEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::Name(_) => true,
            Self::Detailed { enabled, .. } => *enabled,
        }
    }

    pub fn options(&self) -> serde_json::Value {
        match self {
            Self::Name(_) => serde_json::Value::Null,
            Self::Detailed { options, .. } => options.clone(),
        }
    }
}

impl From<&str> for PluginEntry {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Parse workers during a full scan; 0 uses the rayon default
    pub max_workers: usize,
    pub follow_links: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: DEFAULT_DEBOUNCE_MS }
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            root: PathBuf::from("."),
            languages: Vec::new(),
            layers: Vec::new(),
            rules: RulesConfig::default(),
            patterns: PatternsConfig::default(),
            plugins: Vec::new(),
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            scanner: ScannerConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl GuardianConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> GuardianResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            GuardianError::config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let mut config: Self = if is_json {
            serde_json::from_str(&contents).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&contents).map_err(|e| e.to_string())
        }
        .map_err(|e| {
            GuardianError::config(format!("Failed to parse config file '{}': {}", path.display(), e))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if config.root.is_relative() {
            config.root = base.join(&config.root);
        }
        if config.plugin_dir.is_relative() {
            config.plugin_dir = config.root.join(&config.plugin_dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from YAML content
    pub fn load_from_str(content: &str) -> GuardianResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| GuardianError::config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> GuardianResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(GuardianError::config(format!(
                "Unsupported configuration version: {}. Supported versions: {}",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            )));
        }

        let mut names = BTreeSet::new();
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(GuardianError::config("Layer names must not be empty"));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(GuardianError::config(format!("Duplicate layer name '{}'", layer.name)));
            }
            if layer.directories.is_empty() {
                return Err(GuardianError::config(format!(
                    "Layer '{}' must list at least one directory",
                    layer.name
                )));
            }
        }

        for layer in &self.layers {
            if let Some(unknown) = layer
                .allowed_dependencies
                .iter()
                .find(|dep| dep.as_str() != "*" && !names.contains(dep.as_str()))
            {
                return Err(GuardianError::config(format!(
                    "Layer '{}' allows unknown layer '{}'",
                    layer.name, unknown
                )));
            }
        }

        for pattern in self.patterns.include.iter().chain(&self.patterns.exclude) {
            glob::Pattern::new(pattern).map_err(|e| {
                GuardianError::config(format!("Invalid path pattern '{pattern}': {e}"))
            })?;
        }

        if self.plugins.iter().any(|entry| entry.name().trim().is_empty()) {
            return Err(GuardianError::config("Plugin entries must have a non-empty name"));
        }

        Ok(())
    }

    /// Settings for a rule id, if configured
    pub fn rule_level(&self, rule_id: &str) -> Option<&RuleLevel> {
        self.rules.level_for(rule_id)
    }

    /// Plugin entries that are enabled
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins.iter().filter(|entry| entry.enabled())
    }

    /// Convert to JSON for serialization
    pub fn to_json(&self) -> GuardianResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GuardianError::config(format!("Failed to serialize config: {e}")))
    }

    /// Stable fingerprint of the configuration
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        // Ordered maps make the JSON form canonical
        match serde_json::to_string(self) {
            Ok(json) => json.hash(&mut hasher),
            Err(_) => self.version.hash(&mut hasher),
        }
        format!("{:x}", hasher.finish())
    }
}

fn default_true() -> bool {
    true
}

/// Configuration builder for programmatic construction
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: GuardianConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.config.languages.push(language);
        self
    }

    pub fn layer(mut self, layer: LayerConfig) -> Self {
        self.config.layers.push(layer);
        self
    }

    /// Set the level of a built-in rule
    pub fn rule(mut self, id: impl Into<String>, level: impl Into<RuleLevel>) -> Self {
        self.config.rules.builtin.insert(id.into(), level.into());
        self
    }

    /// Set the level of a plugin-provided rule
    pub fn plugin_rule(mut self, id: impl Into<String>, level: impl Into<RuleLevel>) -> Self {
        self.config.rules.plugin.insert(id.into(), level.into());
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.config.patterns.include.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.config.patterns.exclude.push(pattern.into());
        self
    }

    pub fn plugin(mut self, entry: impl Into<PluginEntry>) -> Self {
        self.config.plugins.push(entry.into());
        self
    }

    pub fn plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.plugin_dir = dir.into();
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.scanner.max_workers = workers;
        self
    }

    pub fn debounce_ms(mut self, millis: u64) -> Self {
        self.config.watch.debounce_ms = millis;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> GuardianResult<GuardianConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
