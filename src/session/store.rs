use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{migrate_legacy, LegacyState, WorkspaceDoc};
use crate::workspace::WorkspaceData;

fn state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deskmux")
}

pub fn state_file_path() -> PathBuf {
    state_dir().join("workspace.json")
}

pub fn save(doc: &WorkspaceDoc) -> Result<()> {
    save_to(doc, &state_file_path())
}

pub fn load() -> Option<WorkspaceData> {
    load_from(&state_file_path())
}

// Path-parameterized variants for testability

/// Atomic write: serialize, write a sibling temp file, rename into place.
pub fn save_to(doc: &WorkspaceDoc, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let json = serde_json::to_string_pretty(doc).context("encode workspace document")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Load the current schema, falling back to the legacy sessions/views shape
/// migrated in memory. A document that decodes as neither is skipped; the
/// caller starts from an empty workspace rather than failing.
pub fn load_from(path: &Path) -> Option<WorkspaceData> {
    let json = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<WorkspaceDoc>(&json) {
        Ok(doc) => return Some(doc.into_data()),
        Err(err) => debug!(path = %path.display(), error = %err, "not a current-schema document"),
    }
    match serde_json::from_str::<LegacyState>(&json) {
        Ok(legacy) => {
            warn!(path = %path.display(), "migrating legacy sessions/views document");
            Some(migrate_legacy(legacy))
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable workspace document skipped");
            None
        }
    }
}

enum PersistMsg {
    Dirty(Box<WorkspaceDoc>),
    Cancel,
}

/// Debounced writer. Mutations schedule a snapshot; a coalesced atomic write
/// lands after the quiescence window, so a burst of mutations costs one disk
/// write. `flush` bypasses the window for guarded shutdown.
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistMsg>,
    path: PathBuf,
    dirty: Arc<AtomicBool>,
}

impl Persister {
    pub fn spawn(path: PathBuf, debounce: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dirty = Arc::new(AtomicBool::new(false));
        let task_dirty = dirty.clone();
        let task_path = path.clone();
        tokio::spawn(async move {
            let mut pending: Option<WorkspaceDoc> = None;
            loop {
                let msg = if pending.is_some() {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(msg) => msg,
                        Err(_) => {
                            // Quiescence window elapsed with no new mutation.
                            if let Some(doc) = pending.take() {
                                match save_to(&doc, &task_path) {
                                    Ok(()) => task_dirty.store(false, Ordering::SeqCst),
                                    Err(err) => {
                                        // Still dirty; the next mutation's cycle retries.
                                        warn!(error = %err, "debounced workspace write failed");
                                    }
                                }
                            }
                            continue;
                        }
                    }
                } else {
                    rx.recv().await
                };
                match msg {
                    Some(PersistMsg::Dirty(doc)) => pending = Some(*doc),
                    Some(PersistMsg::Cancel) => pending = None,
                    None => {
                        // Owner gone; write whatever is still pending.
                        if let Some(doc) = pending.take() {
                            if let Err(err) = save_to(&doc, &task_path) {
                                warn!(error = %err, "final workspace write failed");
                            }
                        }
                        break;
                    }
                }
            }
        });
        Self { tx, path, dirty }
    }

    /// (Re)schedule a coalesced write of this snapshot.
    pub fn schedule(&self, doc: WorkspaceDoc) {
        self.dirty.store(true, Ordering::SeqCst);
        let _ = self.tx.send(PersistMsg::Dirty(Box::new(doc)));
    }

    /// Cancel any pending debounce and write synchronously. Used before
    /// process termination; the suspend guard holds until this succeeds.
    pub fn flush(&self, doc: &WorkspaceDoc) -> Result<()> {
        let _ = self.tx.send(PersistMsg::Cancel);
        save_to(doc, &self.path)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// True while a scheduled write has not landed. Hosts use this as the
    /// suspend-termination guard condition.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
