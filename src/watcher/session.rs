//! Incremental watch pipeline
//!
//! Architecture: Actor per Path - Each path has at most one update in flight
//! - A change arriving mid-update is parked and replayed once the running update finishes
//! - Several changes parked for one path coalesce into the latest
//! - Different paths proceed concurrently; the scanner lock keeps graph writes single-writer

use super::FileChange;
use crate::domain::Violation;
use crate::rules::RuleEngine;
use crate::scanner::{ChangeKind, ProjectScanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// What happened to one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The graph was updated and incremental rules ran
    Validated,
    /// Content hash did not change; validation was skipped
    Unchanged,
    /// The update could not be applied
    Failed(String),
}

/// Result of applying one change
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub path: String,
    pub kind: ChangeKind,
    pub status: UpdateStatus,
    pub violations: Vec<Violation>,
}

struct Inner {
    scanner: Arc<Mutex<ProjectScanner>>,
    engine: Arc<RuleEngine>,
    /// Paths with an update running, and the change parked behind it
    in_flight: Mutex<HashMap<String, Option<FileChange>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Feeds debounced changes through `update_file` and `validate_file`
#[derive(Clone)]
pub struct WatchSession {
    inner: Arc<Inner>,
}

impl WatchSession {
    pub fn new(
        scanner: Arc<Mutex<ProjectScanner>>,
        engine: Arc<RuleEngine>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner { scanner, engine, in_flight: Mutex::new(HashMap::new()), events };
        (Self { inner: Arc::new(inner) }, rx)
    }

    /// Consume changes until the channel closes
    pub async fn run(&self, mut changes: mpsc::UnboundedReceiver<FileChange>) {
        while let Some(change) = changes.recv().await {
            self.handle(change);
        }
    }

    /// Start or park an update for one change. Must be called within a tokio runtime.
    pub fn handle(&self, change: FileChange) {
        {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(parked) = in_flight.get_mut(&change.relative) {
                tracing::debug!("Coalescing {} change for {} behind running update", change.kind, change.relative);
                *parked = Some(change);
                return;
            }
            in_flight.insert(change.relative.clone(), None);
        }

        let session = self.clone();
        tokio::spawn(async move { session.drive(change).await });
    }

    /// Number of paths with an update running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn drive(self, first: FileChange) {
        let key = first.relative.clone();
        let mut next = Some(first);

        while let Some(change) = next {
            let event = self.apply(change).await;
            if self.inner.events.send(event).is_err() {
                tracing::debug!("Session listener is gone");
            }

            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            next = in_flight.get_mut(&key).and_then(Option::take);
            if next.is_none() {
                in_flight.remove(&key);
            }
        }
    }

    async fn apply(&self, change: FileChange) -> SessionEvent {
        let scanner = Arc::clone(&self.inner.scanner);
        let engine = Arc::clone(&self.inner.engine);
        let (path, kind) = (change.relative.clone(), change.kind);

        match tokio::task::spawn_blocking(move || update_and_validate(&scanner, &engine, &change)).await {
            Ok(event) => event,
            Err(e) => SessionEvent {
                path,
                kind,
                status: UpdateStatus::Failed(format!("update task failed: {e}")),
                violations: Vec::new(),
            },
        }
    }
}

fn update_and_validate(
    scanner: &Mutex<ProjectScanner>,
    engine: &RuleEngine,
    change: &FileChange,
) -> SessionEvent {
    let mut scanner = scanner.lock().unwrap_or_else(PoisonError::into_inner);
    let id = change.relative.as_str();
    let event = |status, violations| SessionEvent {
        path: change.relative.clone(),
        kind: change.kind,
        status,
        violations,
    };

    let before = scanner.graph().node(id).map(|file| file.content_hash.clone());
    let affected = scanner.affected_by(id, change.kind);

    if let Err(e) = scanner.update_file(&change.path, change.kind) {
        tracing::warn!("Failed to apply {} for {}: {}", change.kind, id, e);
        return event(UpdateStatus::Failed(e.to_string()), Vec::new());
    }

    let after = scanner.graph().node(id).map(|file| file.content_hash.clone());
    if change.kind != ChangeKind::Unlink && before.is_some() && before == after {
        tracing::debug!("{} is unchanged, skipping validation", id);
        return event(UpdateStatus::Unchanged, Vec::new());
    }

    let graph = scanner.graph();
    let contents = scanner.file_contents();
    let violations: Vec<_> =
        affected.iter().flat_map(|file| engine.validate_file(file, graph, contents)).collect();
    tracing::debug!("{} {}: {} violations", change.kind, id, violations.len());
    event(UpdateStatus::Validated, violations)
}
