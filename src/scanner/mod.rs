//! Project scanning: discovery, parsing and graph maintenance
//!
//! Architecture: Domain Service - The scanner is the single writer of the graph and content snapshot
//! - Full scans parse files in parallel and commit the results in one sequential merge
//! - Incremental updates replace exactly one node and its outgoing edges
//! - Unreadable or unparseable files are logged and left out; they never abort a scan

pub mod filter;
mod resolve;

pub use filter::PathFilter;

use crate::config::{GuardianConfig, ScannerConfig};
use crate::domain::{
    normalize_relative, Dependency, GuardianError, GuardianResult, ProjectFile,
};
use crate::graph::DependencyGraph;
use crate::parser::{LanguageParser, ParserRegistry};
use crate::rules::layers::LayerMap;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use resolve::Resolver;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

/// Stage of a full scan reported to progress listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPhase {
    Discovering,
    Parsing,
    BuildingGraph,
}

/// Progress notification emitted during `scan()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub current: usize,
    /// Zero while the total is not yet known
    pub total: usize,
    pub file: Option<String>,
}

/// Kind of file system change fed into `update_file`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        })
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ScanProgress) + Send + Sync>;

/// Current text of every file in the graph, keyed by node id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContents {
    files: BTreeMap<String, Arc<str>>,
}

impl FileContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.files.get(id).map(|content| &**content)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.files.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(id, content)| (id.as_str(), &**content))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn insert(&mut self, id: impl Into<String>, content: impl Into<Arc<str>>) {
        self.files.insert(id.into(), content.into());
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.files.remove(id).is_some()
    }
}

/// A discovered candidate file
#[derive(Debug, Clone)]
struct Discovered {
    path: PathBuf,
    id: String,
}

/// One file's self-contained contribution to the graph
struct ParsedUnit {
    file: ProjectFile,
    content: String,
    dependencies: Vec<Dependency>,
    parser: Arc<dyn LanguageParser>,
}

/// Builds and maintains the dependency graph for one project root
pub struct ProjectScanner {
    root: PathBuf,
    filter: PathFilter,
    parsers: ParserRegistry,
    layers: LayerMap,
    options: ScannerConfig,
    graph: DependencyGraph,
    contents: FileContents,
    progress: Option<ProgressCallback>,
}

impl ProjectScanner {
    pub fn new(
        root: impl Into<PathBuf>,
        filter: PathFilter,
        parsers: ParserRegistry,
        layers: LayerMap,
        options: ScannerConfig,
    ) -> Self {
        let root = root.into();
        let root = fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            filter,
            parsers,
            layers,
            options,
            graph: DependencyGraph::new(),
            contents: FileContents::new(),
            progress: None,
        }
    }

    /// Create a scanner from validated configuration
    pub fn from_config(config: &GuardianConfig) -> GuardianResult<Self> {
        let filter = PathFilter::from_config(&config.patterns)
            .map_err(|e| GuardianError::config(format!("Failed to create path filter: {e}")))?;
        Ok(Self::new(
            &config.root,
            filter,
            ParserRegistry::for_languages(&config.languages),
            LayerMap::new(&config.layers),
            config.scanner.clone(),
        ))
    }

    /// Register a progress listener; it is called synchronously on the scanning path
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(&ScanProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Content snapshot consistent with the most recent scan or update
    pub fn file_contents(&self) -> &FileContents {
        &self.contents
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Whether a root-relative path is a file the scanner would include
    pub fn accepts(&self, id: &str) -> bool {
        let extension = id.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        self.parsers.supports_extension(extension) && self.filter.matches(id)
    }

    /// Node id for a path, or `None` if it lies outside the root.
    /// Relative paths are taken as relative to the root.
    pub fn relative_id(&self, path: &Path) -> Option<String> {
        if path.is_relative() {
            let id = id_within_root(path)?;
            return (!id.is_empty()).then_some(id);
        }
        if let Ok(relative) = path.strip_prefix(&self.root) {
            return id_within_root(relative);
        }

        // The root is canonical; the incoming path may not be (symlinked temp dirs, removed files)
        let canonical = fs::canonicalize(path).ok().or_else(|| {
            let parent = fs::canonicalize(path.parent()?).ok()?;
            Some(parent.join(path.file_name()?))
        })?;
        canonical.strip_prefix(&self.root).ok().and_then(id_within_root)
    }

    /// Discover, parse and assemble the whole project into a fresh graph
    pub fn scan(&mut self) -> GuardianResult<&DependencyGraph> {
        let start = Instant::now();
        if !self.root.is_dir() {
            return Err(GuardianError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Project root '{}' is not a directory", self.root.display()),
                ),
            });
        }

        let discovered = self.discover();
        let total = discovered.len();
        tracing::debug!("Discovered {} files under {}", total, self.root.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_workers)
            .build()
            .map_err(|e| {
                GuardianError::scan(self.root.display().to_string(), format!("Thread pool: {e}"))
            })?;

        let parsed_count = AtomicUsize::new(0);
        let units: Vec<ParsedUnit> = pool.install(|| {
            discovered
                .par_iter()
                .filter_map(|entry| {
                    let current = parsed_count.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit(ScanPhase::Parsing, current, total, Some(&entry.id));
                    match self.read_and_parse(&entry.path, &entry.id) {
                        Ok(unit) => Some(unit),
                        Err(e) => {
                            tracing::warn!("Skipping {}: {}", entry.id, e);
                            None
                        }
                    }
                })
                .collect()
        });

        // Single-writer merge: order of parse completion does not matter
        let known: BTreeSet<String> = units.iter().map(|u| u.file.relative_path.clone()).collect();
        let mut graph = DependencyGraph::new();
        let mut contents = FileContents::new();
        let unit_count = units.len();

        for (index, mut unit) in units.into_iter().enumerate() {
            let id = unit.file.relative_path.clone();
            self.emit(ScanPhase::BuildingGraph, index + 1, unit_count, Some(&id));
            Resolver::new(&self.parsers, unit.parser.as_ref(), |p: &str| known.contains(p))
                .resolve_all(unit.parser.as_ref(), &mut unit.dependencies);
            graph.upsert_node(unit.file, unit.dependencies);
            contents.insert(id, unit.content);
        }

        self.graph = graph;
        self.contents = contents;

        tracing::info!(
            "Scan complete: {} files, {} dependencies in {}ms",
            self.graph.node_count(),
            self.graph.edge_count(),
            start.elapsed().as_millis()
        );
        Ok(&self.graph)
    }

    /// Files whose findings a change to `id` can alter, taken before the change is applied:
    /// the files importing it for a removal, the file itself otherwise
    pub fn affected_by(&self, id: &str, kind: ChangeKind) -> Vec<String> {
        match kind {
            ChangeKind::Unlink => self.graph.predecessors(id).into_iter().map(String::from).collect(),
            ChangeKind::Add | ChangeKind::Change => vec![id.to_string()],
        }
    }

    /// Apply one file change to the graph and content snapshot
    pub fn update_file(&mut self, path: &Path, kind: ChangeKind) -> GuardianResult<&DependencyGraph> {
        let id = self.relative_id(path).ok_or_else(|| {
            GuardianError::scan(path.display().to_string(), "Path is outside the project root")
        })?;

        match kind {
            ChangeKind::Unlink => {
                self.remove(&id);
            }
            ChangeKind::Add | ChangeKind::Change => {
                if !self.accepts(&id) {
                    tracing::debug!("Ignoring {} change for {}", kind, id);
                    return Ok(&self.graph);
                }

                let absolute = self.root.join(&id);
                match self.read_and_parse(&absolute, &id) {
                    Ok(mut unit) => {
                        // Same resolution universe as `scan`: the parsed files
                        let graph = &self.graph;
                        let exists = |p: &str| p == id || graph.contains(p);
                        Resolver::new(&self.parsers, unit.parser.as_ref(), exists)
                            .resolve_all(unit.parser.as_ref(), &mut unit.dependencies);

                        tracing::debug!(
                            "Updated {} ({} dependencies)",
                            id,
                            unit.dependencies.len()
                        );
                        self.graph.upsert_node(unit.file, unit.dependencies);
                        self.contents.insert(id, unit.content);
                    }
                    Err(e) => {
                        // A node must never outlive the content it was built from
                        tracing::warn!("Skipping {}: {}", id, e);
                        self.remove(&id);
                    }
                }
            }
        }

        Ok(&self.graph)
    }

    fn remove(&mut self, id: &str) {
        let had_node = self.graph.remove_node(id).is_some();
        let had_content = self.contents.remove(id);
        if had_node || had_content {
            tracing::debug!("Removed {} from graph", id);
        }
    }

    fn discover(&self) -> Vec<Discovered> {
        let root = self.root.as_path();
        let mut found = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.options.follow_links)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let id = entry.path().strip_prefix(root).map(normalize_relative).unwrap_or_default();
                !self.filter.prunes_dir(&id)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let id = normalize_relative(relative);
            if self.accepts(&id) {
                found.push(Discovered { path: entry.path().to_path_buf(), id });
                let current = found.len();
                self.emit(ScanPhase::Discovering, current, 0, found.last().map(|d| d.id.as_str()));
            }
        }

        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn read_and_parse(&self, path: &Path, id: &str) -> GuardianResult<ParsedUnit> {
        let content = fs::read_to_string(path)
            .map_err(|e| GuardianError::scan(id, format!("Failed to read file: {e}")))?;
        let metadata = fs::metadata(path)
            .map_err(|e| GuardianError::scan(id, format!("Failed to stat file: {e}")))?;

        let extension = id.rsplit_once('.').map(|(_, ext)| ext.to_string()).unwrap_or_default();
        let language = self
            .parsers
            .language_for_extension(&extension)
            .ok_or_else(|| GuardianError::scan(id, format!("No parser for '.{extension}'")))?;

        let mut file = ProjectFile {
            path: path.to_path_buf(),
            relative_path: id.to_string(),
            language,
            extension,
            layer: self.layers.classify(id).map(|layer| layer.name.clone()),
            last_modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            size: metadata.len(),
            content_hash: content_hash(&content),
            exports: Vec::new(),
        };

        let parser = self
            .parsers
            .for_file(&file)
            .cloned()
            .ok_or_else(|| GuardianError::scan(id, "No parser accepts this file"))?;

        let parsed = panic::catch_unwind(AssertUnwindSafe(|| parser.parse(&file, &content)))
            .map_err(|_| GuardianError::parse(id, format!("{} parser panicked", parser.language())))??;

        file.exports = parsed.exports;
        Ok(ParsedUnit { file, content, dependencies: parsed.dependencies, parser })
    }

    fn emit(&self, phase: ScanPhase, current: usize, total: usize, file: Option<&str>) {
        if let Some(callback) = &self.progress {
            callback(&ScanProgress { phase, current, total, file: file.map(str::to_string) });
        }
    }
}

/// Root-relative POSIX id, or `None` if `..` climbs above the root
fn id_within_root(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

/// Hex SHA-256 of file text
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, LayerConfig};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write(root: &Path, id: &str, content: &str) {
        let path = root.join(id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/app/service.ts", "import { helper } from '../shared/helper';\nimport axios from 'axios';\n");
        write(root, "src/shared/helper.ts", "export function helper() {}\n");
        write(root, "src/ui/Page.ts", "import { Service } from '../app/service';\nimport '../shared';\n");
        write(root, "src/shared/index.ts", "export * from './helper';\n");
        write(root, "node_modules/axios/index.js", "module.exports = {};\n");
        write(root, "README.md", "# docs\n");
        dir
    }

    fn scanner(root: &Path) -> ProjectScanner {
        let config = ConfigBuilder::new()
            .root(root)
            .layer(LayerConfig::new("application", &["src/app"], &[]))
            .build()
            .unwrap();
        ProjectScanner::from_config(&config).unwrap()
    }

    #[test]
    fn test_scan_builds_resolved_graph() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        let graph = scanner.scan().unwrap();

        let ids: Vec<_> = graph.node_ids().collect();
        assert_eq!(
            ids,
            vec!["src/app/service.ts", "src/shared/helper.ts", "src/shared/index.ts", "src/ui/Page.ts"]
        );

        let service_edges = graph.out_edges("src/app/service.ts");
        assert_eq!(service_edges.len(), 2);
        assert_eq!(service_edges[0].target, "src/shared/helper.ts");
        assert_eq!(service_edges[1].target, "axios");
        assert!(!service_edges[1].is_resolved());

        assert_eq!(graph.successors("src/ui/Page.ts"), vec!["src/app/service.ts", "src/shared/index.ts"]);

        let service = graph.node("src/app/service.ts").unwrap();
        assert_eq!(service.layer.as_deref(), Some("application"));
        assert_eq!(service.content_hash.len(), 64);
        assert!(graph.node("src/shared/helper.ts").unwrap().exports.iter().any(|e| e.name == "helper"));

        assert_eq!(scanner.file_contents().len(), 4);
        assert!(scanner.file_contents().get("src/shared/helper.ts").unwrap().contains("helper"));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = project();
        let mut first = scanner(dir.path());
        let mut second = scanner(dir.path());
        second.options.max_workers = 1;

        let a = first.scan().unwrap().clone();
        let b = second.scan().unwrap().clone();
        assert_eq!(a.node_ids().collect::<Vec<_>>(), b.node_ids().collect::<Vec<_>>());
        assert_eq!(a.edge_set(), b.edge_set());
    }

    #[test]
    fn test_update_change_replaces_only_that_node() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        let before = scanner.scan().unwrap().clone();

        write(dir.path(), "src/ui/Page.ts", "import '../shared';\n");
        let after = scanner
            .update_file(&dir.path().join("src/ui/Page.ts"), ChangeKind::Change)
            .unwrap();

        assert!(after.out_edges("src/ui/Page.ts").iter().all(|e| e.target != "src/app/service.ts"));
        assert_eq!(after.out_edges("src/ui/Page.ts").len(), 1);
        for id in before.node_ids().filter(|id| *id != "src/ui/Page.ts") {
            assert_eq!(before.out_edges(id), after.out_edges(id), "{id}");
            assert_eq!(before.node(id), after.node(id));
        }
        assert_eq!(scanner.file_contents().get("src/ui/Page.ts"), Some("import '../shared';\n"));
    }

    #[test]
    fn test_update_unlink_removes_node_and_content() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        scanner.scan().unwrap();

        fs::remove_file(dir.path().join("src/app/service.ts")).unwrap();
        let graph = scanner
            .update_file(&dir.path().join("src/app/service.ts"), ChangeKind::Unlink)
            .unwrap();

        assert!(!graph.contains("src/app/service.ts"));
        assert!(graph.out_edges("src/app/service.ts").is_empty());
        assert_eq!(graph.dangling_edges().count(), 1);
        assert!(!scanner.file_contents().contains("src/app/service.ts"));
    }

    #[test]
    fn test_update_add_resolves_against_disk() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        scanner.scan().unwrap();

        write(dir.path(), "src/app/new.ts", "import { helper } from '../shared/helper';\n");
        let graph = scanner.update_file(Path::new("src/app/new.ts"), ChangeKind::Add).unwrap();

        assert_eq!(graph.successors("src/app/new.ts"), vec!["src/shared/helper.ts"]);
        assert_eq!(graph.node("src/app/new.ts").unwrap().layer.as_deref(), Some("application"));
    }

    #[test]
    fn test_unparseable_file_is_skipped() {
        let dir = project();
        write(dir.path(), "src/broken.rs", "fn broken( {");
        write(dir.path(), "src/fine.rs", "use crate::broken;\n");
        let mut scanner = scanner(dir.path());
        let graph = scanner.scan().unwrap();

        assert!(!graph.contains("src/broken.rs"));
        assert!(graph.contains("src/fine.rs"));
        assert!(!scanner.file_contents().contains("src/broken.rs"));
    }

    #[test]
    fn test_unchanged_update_keeps_scan_edges() {
        let dir = project();
        write(dir.path(), "src/lib.rs", "pub mod broken;\npub mod fine;\n");
        write(dir.path(), "src/broken.rs", "fn broken( {");
        write(dir.path(), "src/fine.rs", "pub fn fine() {}\n");
        let mut scanner = scanner(dir.path());
        scanner.scan().unwrap();
        let scanned = scanner.graph().out_edges("src/lib.rs").to_vec();
        assert_eq!(scanned.len(), 2);
        assert!(!scanned.iter().any(|edge| edge.target == "src/broken.rs"));

        scanner.update_file(Path::new("src/lib.rs"), ChangeKind::Change).unwrap();
        assert_eq!(scanner.graph().out_edges("src/lib.rs"), scanned.as_slice());
        assert!(scanner.graph().predecessors("src/broken.rs").is_empty());
    }

    #[test]
    fn test_failed_update_drops_stale_node() {
        let dir = project();
        write(dir.path(), "src/lib.rs", "pub mod a;\n");
        let mut scanner = scanner(dir.path());
        scanner.scan().unwrap();
        assert!(scanner.graph().contains("src/lib.rs"));

        write(dir.path(), "src/lib.rs", "pub mod {");
        scanner.update_file(Path::new("src/lib.rs"), ChangeKind::Change).unwrap();
        assert!(!scanner.graph().contains("src/lib.rs"));
        assert!(!scanner.file_contents().contains("src/lib.rs"));
    }

    #[test]
    fn test_progress_reports_every_phase() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scanner.on_progress(move |progress| sink.lock().unwrap().push(progress.clone()));
        scanner.scan().unwrap();

        let seen = seen.lock().unwrap();
        for phase in [ScanPhase::Discovering, ScanPhase::Parsing, ScanPhase::BuildingGraph] {
            assert_eq!(seen.iter().filter(|p| p.phase == phase).count(), 4, "{phase:?}");
        }
        assert!(seen.iter().filter(|p| p.phase == ScanPhase::Parsing).all(|p| p.total == 4));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut scanner = scanner(&dir.path().join("missing"));
        assert!(matches!(scanner.scan(), Err(GuardianError::Io { .. })));
    }

    #[test]
    fn test_path_outside_root_is_rejected() {
        let dir = project();
        let other = TempDir::new().unwrap();
        let mut scanner = scanner(dir.path());
        let result = scanner.update_file(&other.path().join("x.ts"), ChangeKind::Add);
        assert!(matches!(result, Err(GuardianError::Scan { .. })));
    }

    #[test]
    fn test_parent_segments_cannot_leave_root() {
        let dir = project();
        let mut scanner = scanner(dir.path());
        scanner.scan().unwrap();

        assert_eq!(scanner.relative_id(Path::new("src/../src/app/./service.ts")).as_deref(), Some("src/app/service.ts"));
        assert_eq!(scanner.relative_id(Path::new("../x.ts")), None);
        assert_eq!(scanner.relative_id(Path::new("src/../../x.ts")), None);
        assert_eq!(scanner.relative_id(&scanner.root().join("../x.ts")), None);

        let result = scanner.update_file(Path::new("../src/app/service.ts"), ChangeKind::Unlink);
        assert!(matches!(result, Err(GuardianError::Scan { .. })));
        assert!(scanner.graph().contains("src/app/service.ts"));
    }
}
