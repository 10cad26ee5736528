//! Arch Guardian - dependency graph maintenance and incremental architecture validation
//!
//! Architecture: Clean Architecture - Library interface serves as the application layer
//! - Configuration is validated before anything touches the file system
//! - Plugins populate the rule registry before the first validation
//! - The scanner is the only writer of the graph; rules only read it

pub mod config;
pub mod domain;
pub mod graph;
pub mod parser;
pub mod plugins;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod watcher;

// Re-export main types for convenient access
pub use domain::{
    Dependency, DependencyKind, GuardianError, GuardianResult, ProjectFile, Severity, ValidationReport,
    ValidationSummary, Violation,
};

pub use config::{ConfigBuilder, GuardianConfig, LayerConfig, Level, PluginEntry, RuleLevel};

pub use graph::{DependencyGraph, GraphStats};

pub use plugins::{LoadedPlugin, Plugin, PluginLoader, PluginMetadata};

pub use report::{OutputFormat, ReportFormatter, ReportOptions};

pub use rules::{Rule, RuleContext, RuleEngine, RuleInfo, RuleResult};

pub use scanner::{ChangeKind, FileContents, ProjectScanner, ScanProgress};

pub use watcher::{FileChange, FileWatcher, SessionEvent, UpdateStatus, WatchSession};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Wires configuration, plugins, the rule engine and the scanner together
pub struct ArchGuardian {
    config: Arc<GuardianConfig>,
    plugins: PluginLoader,
    engine: Arc<RuleEngine>,
    scanner: Arc<Mutex<ProjectScanner>>,
}

/// A running watch: debounced OS events flowing through a `WatchSession`
pub struct WatchHandle {
    pub watcher: FileWatcher,
    pub session: WatchSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pump: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop observing, cancel pending debounce timers and wait for the pump to exit
    pub async fn stop(mut self) {
        self.watcher.stop();
        self.pump.abort();
        if let Err(e) = self.pump.await {
            if !e.is_cancelled() {
                tracing::warn!("Watch pump failed: {}", e);
            }
        }
    }
}

impl ArchGuardian {
    /// Create from configuration, loading the plugins it lists
    pub fn new(config: GuardianConfig) -> GuardianResult<Self> {
        let loader = PluginLoader::from_config(&config);
        Self::with_loader(config, loader)
    }

    /// Create with a caller-prepared loader, e.g. one with linked in-process plugins
    pub fn with_loader(config: GuardianConfig, mut loader: PluginLoader) -> GuardianResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        loader.load_plugins(&config.plugins);
        let mut engine = RuleEngine::with_builtin_rules(Arc::clone(&config));
        for (plugin, rule) in loader.all_rules() {
            let id = rule.id().to_string();
            if let Err(e) = engine.register_plugin_rule(&plugin, rule) {
                tracing::warn!("Skipping rule '{}' from plugin '{}': {}", id, plugin, e);
            }
        }

        let scanner = ProjectScanner::from_config(&config)?;
        tracing::info!(
            "Initialized with {} rules ({} plugins loaded, {} failed)",
            engine.len(),
            loader.loaded().count(),
            loader.failed().count()
        );

        Ok(Self { config, plugins: loader, engine: Arc::new(engine), scanner: Arc::new(Mutex::new(scanner)) })
    }

    /// Create loading configuration from a YAML or JSON file
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> GuardianResult<Self> {
        Self::new(GuardianConfig::load_from_file(path)?)
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn plugins(&self) -> &PluginLoader {
        &self.plugins
    }

    /// Restrict validation to the given rule ids
    pub fn filter_rules<S: AsRef<str>>(&mut self, ids: &[S]) -> GuardianResult<()> {
        self.engine_mut()?.filter_rules(ids);
        Ok(())
    }

    /// Run rules on the rayon pool (default) or one after another
    pub fn set_parallel(&mut self, parallel: bool) -> GuardianResult<()> {
        self.engine_mut()?.set_parallel(parallel);
        Ok(())
    }

    fn engine_mut(&mut self) -> GuardianResult<&mut RuleEngine> {
        Arc::get_mut(&mut self.engine)
            .ok_or_else(|| GuardianError::config("Rule engine cannot be reconfigured while a watch is running"))
    }

    /// Register a progress listener for full scans
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&ScanProgress) + Send + Sync + 'static,
    {
        self.lock_scanner().on_progress(callback);
    }

    /// Rescan the project
    pub fn scan(&self) -> GuardianResult<GraphStats> {
        let mut scanner = self.lock_scanner();
        Ok(scanner.scan()?.stats())
    }

    /// Rescan the project and run every enabled rule
    pub fn check(&self) -> GuardianResult<ValidationReport> {
        let start = Instant::now();
        let mut scanner = self.lock_scanner();
        scanner.scan()?;
        Ok(self.build_report(&scanner, start))
    }

    /// Run every enabled rule against the current graph without rescanning
    pub fn validate(&self) -> GuardianResult<ValidationReport> {
        let start = Instant::now();
        let scanner = self.lock_scanner();
        Ok(self.build_report(&scanner, start))
    }

    /// Apply one change and run incremental rules for the affected files.
    /// A removal revalidates the files that imported the removed one.
    pub fn update_file(&self, path: &Path, kind: ChangeKind) -> GuardianResult<Vec<Violation>> {
        let mut scanner = self.lock_scanner();
        let id = scanner
            .relative_id(path)
            .ok_or_else(|| GuardianError::scan(path.display().to_string(), "Path is outside the project root"))?;
        let affected = scanner.affected_by(&id, kind);
        scanner.update_file(path, kind)?;

        let (graph, contents) = (scanner.graph(), scanner.file_contents());
        Ok(affected.iter().flat_map(|file| self.engine.validate_file(file, graph, contents)).collect())
    }

    /// Count fixable violations; no edits are applied
    pub fn auto_fix(&self, report: &ValidationReport) -> usize {
        self.engine.auto_fix(&report.violations)
    }

    /// Snapshot of the current graph
    pub fn graph(&self) -> DependencyGraph {
        self.lock_scanner().graph().clone()
    }

    /// Start watching the project root; call `check` first so the session starts from a full graph
    pub async fn watch(&self) -> GuardianResult<WatchHandle> {
        let mut watcher = {
            let scanner = self.lock_scanner();
            FileWatcher::for_scanner(&scanner, &self.config)
        };
        let changes = watcher.start().await?;

        let (session, events) = WatchSession::new(Arc::clone(&self.scanner), Arc::clone(&self.engine));
        let runner = session.clone();
        let pump = tokio::spawn(async move { runner.run(changes).await });
        Ok(WatchHandle { watcher, session, events, pump })
    }

    /// Unload every plugin and release parser resources
    pub fn shutdown(&mut self) {
        self.plugins.unload_all();
        self.lock_scanner().parsers().dispose_all();
    }

    fn build_report(&self, scanner: &ProjectScanner, start: Instant) -> ValidationReport {
        let graph = scanner.graph();
        let mut report =
            ValidationReport::from_violations(self.engine.validate(graph, scanner.file_contents()));
        report.set_graph_size(graph.node_count(), graph.edge_count());
        report.set_execution_time(start.elapsed().as_millis() as u64);
        report.set_config_fingerprint(self.config.fingerprint());
        report.sort_violations();
        report
    }

    fn lock_scanner(&self) -> MutexGuard<'_, ProjectScanner> {
        self.scanner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
