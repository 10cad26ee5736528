//! Plugin contract
//!
//! Architecture: Extension Point - Plugins contribute rules to the engine's registry at startup
//! - Every plugin is validated structurally once, when it is loaded
//! - A failing plugin is recorded on its own `LoadedPlugin` and never affects the others
//! - Plugins are either linked in-process or loaded from declarative bundle files

pub mod declarative;
pub mod loader;

pub use declarative::{DeclarativePlugin, DeclarativeRule};
pub use loader::PluginLoader;

use crate::domain::GuardianResult;
use crate::rules::Rule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Capabilities a plugin declares in `metadata.types`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Rules,
    Quickfixes,
    Parsers,
    Analyzers,
    Formatters,
}

impl PluginKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rules" | "rule" => Some(Self::Rules),
            "quickfixes" | "quickfix" => Some(Self::Quickfixes),
            "parsers" | "parser" => Some(Self::Parsers),
            "analyzers" | "analyzer" => Some(Self::Analyzers),
            "formatters" | "formatter" => Some(Self::Formatters),
            _ => None,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rules => "rules",
            Self::Quickfixes => "quickfixes",
            Self::Parsers => "parsers",
            Self::Analyzers => "analyzers",
            Self::Formatters => "formatters",
        })
    }
}

/// Identity of a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    /// Declared capability names, see `PluginKind`
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, types: &[PluginKind]) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            types: types.iter().map(ToString::to_string).collect(),
            description: None,
        }
    }

    /// Declared types that name a known capability
    pub fn kinds(&self) -> Vec<PluginKind> {
        self.types.iter().filter_map(|t| PluginKind::from_name(t)).collect()
    }
}

/// Logger handed to plugins; forwards to `tracing` tagged with the plugin name
#[derive(Debug, Clone)]
pub struct PluginLog {
    plugin: String,
}

impl PluginLog {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self { plugin: plugin.into() }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin, "{}", message);
    }
}

/// What a plugin sees when it is initialized
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// Version of the host
    pub version: &'static str,
    pub root_dir: PathBuf,
    /// Options from the plugin's configuration entry, `null` when none were given
    pub config: serde_json::Value,
    pub log: PluginLog,
}

/// Contract every plugin implements
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Fresh rule instances contributed by this plugin
    fn rules(&self) -> Vec<Box<dyn Rule>> {
        Vec::new()
    }

    fn on_load(&mut self, _ctx: &LoadContext) -> GuardianResult<()> {
        Ok(())
    }

    fn on_unload(&mut self) -> GuardianResult<()> {
        Ok(())
    }
}

/// Outcome of loading one configured plugin
pub struct LoadedPlugin {
    /// Configured name
    pub name: String,
    /// The instance, present whenever it could be constructed
    pub plugin: Option<Box<dyn Plugin>>,
    /// Resolved bundle file; `None` for linked plugins or failed resolution
    pub path: Option<PathBuf>,
    pub loaded: bool,
    pub error: Option<String>,
}

impl LoadedPlugin {
    pub(crate) fn failed(name: &str, path: Option<PathBuf>, error: impl fmt::Display) -> Self {
        Self { name: name.to_string(), plugin: None, path, loaded: false, error: Some(error.to_string()) }
    }

    pub fn metadata(&self) -> Option<&PluginMetadata> {
        self.plugin.as_ref().map(|plugin| plugin.metadata())
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.name)
            .field("metadata", &self.metadata())
            .field("path", &self.path)
            .field("loaded", &self.loaded)
            .field("error", &self.error)
            .finish()
    }
}
