use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layout::LayoutNode;
pub use crate::layout::PaneId;
use crate::repo::WorktreeId;

/// Upper bound on drawer children per parent pane.
pub const DRAWER_MAX_PANES: usize = 4;

/// What a pane shows. A closed sum so the coordinator and view factory can
/// statically enumerate the capabilities each variant needs. Persisted
/// documents with kinds this build does not know decode as `Unsupported`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaneContent {
    Terminal {
        command: Option<String>,
        working_directory: PathBuf,
    },
    Browser {
        url: String,
    },
    CodeViewer {
        path: PathBuf,
        language: Option<String>,
    },
    Diff {
        repo: PathBuf,
        base_ref: String,
        head_ref: String,
    },
    Unsupported {
        kind: String,
    },
}

impl PaneContent {
    pub fn label(&self) -> &str {
        match self {
            PaneContent::Terminal { .. } => "terminal",
            PaneContent::Browser { .. } => "browser",
            PaneContent::CodeViewer { .. } => "code",
            PaneContent::Diff { .. } => "diff",
            PaneContent::Unsupported { .. } => "unsupported",
        }
    }

    /// Whether this content needs a live surface from the collaborator.
    /// Unsupported panes render as a static placeholder.
    pub fn needs_surface(&self) -> bool {
        !matches!(self, PaneContent::Unsupported { .. })
    }
}

/// Which subsystem asked for the pane. Worktree-sourced panes are the ones
/// orphaned when their worktree disappears.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceKind {
    User,
    Agent,
    SessionRestore,
    Worktree { worktree_id: WorktreeId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaneMeta {
    pub title: String,
    pub working_directory: PathBuf,
    pub source_kind: SourceKind,
    pub agent_kind: Option<String>,
}

impl PaneMeta {
    pub fn user(title: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            working_directory: working_directory.into(),
            source_kind: SourceKind::User,
            agent_kind: None,
        }
    }

    pub fn worktree_id(&self) -> Option<WorktreeId> {
        match &self.source_kind {
            SourceKind::Worktree { worktree_id } => Some(*worktree_id),
            _ => None,
        }
    }
}

/// Pane lifecycle state. Transitions are validated by `can_enter`; the store
/// rejects anything else rather than panicking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Residency {
    /// In some tab's layout.
    Active,
    /// Removed from all layouts, resource kept alive.
    Backgrounded,
    /// Backing worktree or repo unavailable.
    Orphaned { reason: String },
    /// Closed, awaiting a possible undo restore.
    PendingUndo { expires_at: DateTime<Utc> },
    /// Removed from the store. Terminal.
    Purged,
}

impl Residency {
    pub fn can_enter(&self, next: &Residency) -> bool {
        use Residency::*;
        match (self, next) {
            (Active, Backgrounded)
            | (Active, Orphaned { .. })
            | (Active, PendingUndo { .. })
            | (Backgrounded, Active)
            | (Backgrounded, Orphaned { .. })
            | (Backgrounded, Purged)
            | (Orphaned { .. }, Active)
            | (Orphaned { .. }, Backgrounded)
            | (PendingUndo { .. }, Active)
            | (PendingUndo { .. }, Purged) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Residency::Purged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Residency::Active => "active",
            Residency::Backgrounded => "backgrounded",
            Residency::Orphaned { .. } => "orphaned",
            Residency::PendingUndo { .. } => "pending-undo",
            Residency::Purged => "purged",
        }
    }
}

/// Secondary bounded split tree of child panes owned by one parent pane.
/// At most one drawer across the whole store is expanded at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drawer {
    pub pane_ids: Vec<PaneId>,
    pub layout: LayoutNode,
    pub active_pane_id: Option<PaneId>,
    pub minimized_pane_ids: BTreeSet<PaneId>,
    pub is_expanded: bool,
}

impl Drawer {
    pub fn new(child: PaneId) -> Self {
        Self {
            pane_ids: vec![child],
            layout: LayoutNode::Leaf(child),
            active_pane_id: Some(child),
            minimized_pane_ids: BTreeSet::new(),
            is_expanded: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.pane_ids.len() >= DRAWER_MAX_PANES
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pane {
    pub id: PaneId,
    pub content: PaneContent,
    pub meta: PaneMeta,
    pub residency: Residency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawer: Option<Drawer>,
    /// Set on drawer children; cascade-deleted with the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pane_id: Option<PaneId>,
}

impl Pane {
    pub fn new(content: PaneContent, meta: PaneMeta) -> Self {
        Self {
            id: PaneId::new_v4(),
            content,
            meta,
            residency: Residency::Active,
            drawer: None,
            parent_pane_id: None,
        }
    }

    pub fn terminal(working_directory: impl Into<PathBuf>) -> Self {
        let wd: PathBuf = working_directory.into();
        let meta = PaneMeta::user("terminal", wd.clone());
        Self::new(
            PaneContent::Terminal {
                command: None,
                working_directory: wd,
            },
            meta,
        )
    }

    pub fn is_drawer_child(&self) -> bool {
        self.parent_pane_id.is_some()
    }

    pub fn drawer_children(&self) -> &[PaneId] {
        self.drawer.as_ref().map(|d| d.pane_ids.as_slice()).unwrap_or(&[])
    }
}
