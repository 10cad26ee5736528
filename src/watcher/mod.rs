//! File watching
//!
//! Architecture: Event Source - OS notifications become debounced, per-path `FileChange`s
//! - Raw notify events are mapped to add/change/unlink and filtered like the scanner filters
//! - Each path has its own debounce timer; the latest observed kind wins
//! - The watcher computes nothing; `WatchSession` drives scanner updates and validation

pub mod debounce;
pub mod session;

pub use debounce::Debouncer;
pub use session::{SessionEvent, UpdateStatus, WatchSession};

use crate::config::GuardianConfig;
use crate::domain::{normalize_relative, GuardianError, GuardianResult};
use crate::scanner::{filter::PathFilter, ChangeKind, ProjectScanner};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One debounced change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    /// Root-relative POSIX id
    pub relative: String,
    pub kind: ChangeKind,
}

/// Decides which relative ids are worth reporting
#[derive(Debug, Clone)]
struct Admission {
    filter: PathFilter,
    extensions: Vec<&'static str>,
}

impl Admission {
    fn admits(&self, relative: &str) -> bool {
        let extension = relative.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        self.extensions.iter().any(|ext| ext.eq_ignore_ascii_case(extension))
            && self.filter.matches(relative)
    }
}

/// Debounced watcher over one project root
pub struct FileWatcher {
    root: PathBuf,
    admission: Arc<Admission>,
    debouncer: Arc<Debouncer<String>>,
    watcher: Option<RecommendedWatcher>,
    pump: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        filter: PathFilter,
        extensions: Vec<&'static str>,
        window: Duration,
    ) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            admission: Arc::new(Admission { filter, extensions }),
            debouncer: Arc::new(Debouncer::new(window)),
            watcher: None,
            pump: None,
        }
    }

    /// Watch what `scanner` scans, with the configured debounce window
    pub fn for_scanner(scanner: &ProjectScanner, config: &GuardianConfig) -> Self {
        Self::new(
            scanner.root(),
            scanner.filter().clone(),
            scanner.parsers().extensions(),
            Duration::from_millis(config.watch.debounce_ms),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Begin watching; returns once the OS watch is registered.
    /// Debounced changes arrive on the returned channel until `stop`.
    pub async fn start(&mut self) -> GuardianResult<mpsc::UnboundedReceiver<FileChange>> {
        if self.is_running() {
            return Err(GuardianError::watch("Watcher is already running"));
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = raw_tx.send(result);
        })
        .map_err(|e| GuardianError::watch(format!("Failed to create file watcher: {e}")))?;
        watcher.watch(&self.root, RecursiveMode::Recursive).map_err(|e| {
            GuardianError::watch(format!("Failed to watch '{}': {e}", self.root.display()))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let root = self.root.clone();
        let admission = Arc::clone(&self.admission);
        let debouncer = Arc::clone(&self.debouncer);
        self.pump = Some(tokio::spawn(async move {
            while let Some(result) = raw_rx.recv().await {
                match result {
                    Ok(event) => {
                        for (path, kind) in classify(&event) {
                            submit(&root, &admission, &debouncer, &tx, path, kind);
                        }
                    }
                    Err(e) => tracing::warn!("Watch error: {}", e),
                }
            }
        }));
        self.watcher = Some(watcher);

        tracing::info!("Watching {}", self.root.display());
        Ok(rx)
    }

    /// Close the OS watch and cancel every pending timer
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::info!("Stopped watching {}", self.root.display());
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.debouncer.cancel_all();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn submit(
    root: &Path,
    admission: &Admission,
    debouncer: &Debouncer<String>,
    tx: &mpsc::UnboundedSender<FileChange>,
    path: PathBuf,
    kind: ChangeKind,
) {
    let Ok(relative) = path.strip_prefix(root) else {
        return;
    };
    let relative = normalize_relative(relative);
    if relative.is_empty() || !admission.admits(&relative) {
        return;
    }
    if kind != ChangeKind::Unlink && path.is_dir() {
        return;
    }

    tracing::debug!("Raw {} event for {}", kind, relative);
    let change = FileChange { path, relative: relative.clone(), kind };
    let tx = tx.clone();
    debouncer.schedule(relative, move || {
        let _ = tx.send(change);
    });
}

/// Map a notify event to the per-path changes it implies
pub(crate) fn classify(event: &Event) -> Vec<(PathBuf, ChangeKind)> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(_) => paths.map(|p| (p, ChangeKind::Add)).collect(),
        EventKind::Remove(_) => paths.map(|p| (p, ChangeKind::Unlink)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(|p| (p, ChangeKind::Unlink)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(|p| (p, ChangeKind::Add)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push((from.clone(), ChangeKind::Unlink));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((to.clone(), ChangeKind::Add));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|p| {
                let kind = if p.exists() { ChangeKind::Add } else { ChangeKind::Unlink };
                (p, kind)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.map(|p| (p, ChangeKind::Change)).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use rstest::rstest;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths.iter().fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[rstest]
    #[case(EventKind::Create(CreateKind::File), ChangeKind::Add)]
    #[case(EventKind::Modify(ModifyKind::Data(DataChange::Content)), ChangeKind::Change)]
    #[case(EventKind::Remove(RemoveKind::File), ChangeKind::Unlink)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::From)), ChangeKind::Unlink)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::To)), ChangeKind::Add)]
    fn test_event_kind_mapping(#[case] kind: EventKind, #[case] expected: ChangeKind) {
        let changes = classify(&event(kind, &["/p/src/a.ts"]));
        assert_eq!(changes, vec![(PathBuf::from("/p/src/a.ts"), expected)]);
    }

    #[test]
    fn test_rename_both_and_ignored_kinds() {
        let renamed = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/p/old.ts", "/p/new.ts"],
        ));
        assert_eq!(
            renamed,
            vec![
                (PathBuf::from("/p/old.ts"), ChangeKind::Unlink),
                (PathBuf::from("/p/new.ts"), ChangeKind::Add),
            ]
        );

        let metadata = event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)), &["/p/a.ts"]);
        assert!(classify(&metadata).is_empty());
        assert!(classify(&event(EventKind::Any, &["/p/a.ts"])).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_filters_and_debounces() {
        let root = PathBuf::from("/project");
        let admission = Admission {
            filter: PathFilter::new(&["src/**"], &["*.test.ts"]).unwrap(),
            extensions: vec!["ts"],
        };
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for kind in [ChangeKind::Add, ChangeKind::Change, ChangeKind::Change] {
            submit(&root, &admission, &debouncer, &tx, root.join("src/a.ts"), kind);
        }
        submit(&root, &admission, &debouncer, &tx, root.join("src/a.test.ts"), ChangeKind::Change);
        submit(&root, &admission, &debouncer, &tx, root.join("docs/readme.md"), ChangeKind::Change);
        submit(&root, &admission, &debouncer, &tx, PathBuf::from("/elsewhere/src/b.ts"), ChangeKind::Add);
        submit(&root, &admission, &debouncer, &tx, root.join("src/b.ts"), ChangeKind::Unlink);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push((change.relative, change.kind));
        }
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            changes,
            vec![("src/a.ts".to_string(), ChangeKind::Change), ("src/b.ts".to_string(), ChangeKind::Unlink)]
        );
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut watcher = FileWatcher::new(
            dir.path().join("missing"),
            PathFilter::default(),
            vec!["ts"],
            Duration::from_millis(50),
        );
        assert!(matches!(watcher.start().await, Err(GuardianError::Watch { .. })));
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut watcher =
            FileWatcher::new(dir.path(), PathFilter::default(), vec!["ts"], Duration::from_millis(50));
        let _changes = watcher.start().await.unwrap();
        assert!(watcher.is_running());
        assert!(watcher.start().await.is_err());

        watcher.stop();
        assert!(!watcher.is_running());
    }
}
