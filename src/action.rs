use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::{InsertPosition, PaneId, SplitDirection, SplitId, MAX_SPLIT_RATIO, MIN_SPLIT_RATIO};
use crate::pane::{PaneContent, PaneMeta, Residency, DRAWER_MAX_PANES};
use crate::tab::{ArrangementId, TabId};

/// Typed rejection reasons. Validation failures log at warning level and
/// leave the store untouched.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ActionError {
    #[error("stale id: {0}")]
    StaleId(uuid::Uuid),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("not permitted: {0}")]
    NotPermitted(&'static str),
    #[error("invalid residency transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Where to place a new or reinserted pane within a layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertAnchor {
    pub anchor: PaneId,
    pub direction: SplitDirection,
    pub position: InsertPosition,
}

/// UI intent. The resolver turns one of these into a canonical action or a
/// typed rejection; the coordinator only ever sees canonical output.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    OpenTab {
        content: PaneContent,
        meta: PaneMeta,
    },
    OpenPane {
        tab_id: TabId,
        content: PaneContent,
        meta: PaneMeta,
        anchor: Option<InsertAnchor>,
    },
    ClosePane {
        pane_id: PaneId,
    },
    CloseTab {
        tab_id: TabId,
    },
    BackgroundPane {
        pane_id: PaneId,
    },
    ReactivatePane {
        pane_id: PaneId,
        tab_id: TabId,
        anchor: Option<InsertAnchor>,
    },
    SelectTab {
        tab_id: TabId,
    },
    SelectPane {
        pane_id: PaneId,
    },
    ResizeSplit {
        tab_id: TabId,
        split_id: SplitId,
        ratio: f64,
    },
    EqualizeLayout {
        tab_id: TabId,
    },
    ToggleZoom {
        pane_id: PaneId,
    },
    MinimizePane {
        pane_id: PaneId,
    },
    RestorePane {
        pane_id: PaneId,
    },
    CreateArrangement {
        tab_id: TabId,
        name: String,
        visible: Vec<PaneId>,
    },
    RenameArrangement {
        tab_id: TabId,
        arrangement_id: ArrangementId,
        name: String,
    },
    DeleteArrangement {
        tab_id: TabId,
        arrangement_id: ArrangementId,
    },
    SwitchArrangement {
        tab_id: TabId,
        arrangement_id: ArrangementId,
    },
    AddDrawerPane {
        parent_pane_id: PaneId,
        content: PaneContent,
        meta: PaneMeta,
    },
    ToggleDrawer {
        parent_pane_id: PaneId,
    },
    UpdatePaneMeta {
        pane_id: PaneId,
        title: Option<String>,
        working_directory: Option<PathBuf>,
    },
    Undo,
}

impl Action {
    /// Structural edits are gated while workspace-management mode is on;
    /// selection, arrangement switching, and undo stay available.
    fn structural(&self) -> bool {
        !matches!(
            self,
            Action::SelectTab { .. }
                | Action::SelectPane { .. }
                | Action::SwitchArrangement { .. }
                | Action::Undo
        )
    }
}

/// Canonical resolution. `Noop` is a validated do-nothing (undo on an empty
/// stack, selecting what is already selected), not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Execute(Action),
    Noop,
}

#[derive(Clone, Debug)]
pub struct TabSummary {
    pub id: TabId,
    /// Union over all arrangements.
    pub all_pane_ids: BTreeSet<PaneId>,
    /// Active arrangement, layout order.
    pub visible_pane_ids: Vec<PaneId>,
    pub split_ids: BTreeSet<SplitId>,
    pub arrangement_ids: Vec<ArrangementId>,
    pub active_arrangement_id: ArrangementId,
    pub default_arrangement_id: ArrangementId,
}

#[derive(Clone, Debug)]
pub struct PaneSummary {
    pub residency: Residency,
    pub parent_pane_id: Option<PaneId>,
    pub drawer_len: usize,
}

/// Immutable view of the store taken at validation time. The resolver never
/// touches the live store.
#[derive(Clone, Debug)]
pub struct ActionSnapshot {
    pub tabs: Vec<TabSummary>,
    pub panes: BTreeMap<PaneId, PaneSummary>,
    pub active_tab_id: Option<TabId>,
    pub active_pane_id: Option<PaneId>,
    pub management_mode: bool,
    pub undo_depth: usize,
}

impl ActionSnapshot {
    pub fn tab(&self, id: TabId) -> Option<&TabSummary> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn tab_of_pane(&self, pane: PaneId) -> Option<&TabSummary> {
        self.tabs.iter().find(|t| t.all_pane_ids.contains(&pane))
    }

    fn pane(&self, id: PaneId) -> Result<&PaneSummary, ActionError> {
        self.panes.get(&id).ok_or(ActionError::StaleId(id))
    }

    fn require_tab(&self, id: TabId) -> Result<&TabSummary, ActionError> {
        self.tab(id).ok_or(ActionError::StaleId(id))
    }
}

/// Validate a proposed action against the snapshot and canonicalize it.
/// Pure: inspects the snapshot, passes through, rewrites, or rejects.
pub fn resolve(snapshot: &ActionSnapshot, action: Action) -> Result<Resolved, ActionError> {
    if snapshot.management_mode && action.structural() {
        return Err(ActionError::NotPermitted(
            "structural edits are disabled in management mode",
        ));
    }

    let resolved = match action {
        Action::OpenTab { content, meta } => Resolved::Execute(Action::OpenTab { content, meta }),

        Action::OpenPane {
            tab_id,
            content,
            meta,
            anchor,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if let Some(anchor) = &anchor {
                if !tab.visible_pane_ids.contains(&anchor.anchor) {
                    return fail(ActionError::InvalidTarget(format!(
                        "anchor pane {} is not visible in tab {}",
                        anchor.anchor, tab_id
                    )));
                }
            }
            Resolved::Execute(Action::OpenPane {
                tab_id,
                content,
                meta,
                anchor,
            })
        }

        Action::ClosePane { pane_id } => {
            let pane = snapshot.pane(pane_id)?;
            if pane.parent_pane_id.is_some() {
                // Drawer children close without undo escalation.
                return Ok(Resolved::Execute(Action::ClosePane { pane_id }));
            }
            let tab = snapshot
                .tab_of_pane(pane_id)
                .ok_or(ActionError::StaleId(pane_id))?;
            // Closing the only pane in a tab is always tab-shaped so the
            // executor has one code path and one undo entry shape for the
            // degenerate case.
            if tab.all_pane_ids.len() == 1 {
                Resolved::Execute(Action::CloseTab { tab_id: tab.id })
            } else {
                Resolved::Execute(Action::ClosePane { pane_id })
            }
        }

        Action::CloseTab { tab_id } => {
            snapshot.require_tab(tab_id)?;
            Resolved::Execute(Action::CloseTab { tab_id })
        }

        Action::BackgroundPane { pane_id } => {
            let pane = snapshot.pane(pane_id)?;
            if pane.residency != Residency::Active {
                return fail(ActionError::InvalidTransition {
                    from: pane.residency.label().to_string(),
                    to: "backgrounded".to_string(),
                });
            }
            let tab = snapshot
                .tab_of_pane(pane_id)
                .ok_or(ActionError::StaleId(pane_id))?;
            if tab.all_pane_ids.len() == 1 {
                return fail(ActionError::InvalidTarget(
                    "cannot background the last pane of a tab".to_string(),
                ));
            }
            Resolved::Execute(Action::BackgroundPane { pane_id })
        }

        Action::ReactivatePane {
            pane_id,
            tab_id,
            anchor,
        } => {
            let pane = snapshot.pane(pane_id)?;
            if !matches!(pane.residency, Residency::Backgrounded) {
                return fail(ActionError::InvalidTransition {
                    from: pane.residency.label().to_string(),
                    to: "active".to_string(),
                });
            }
            let tab = snapshot.require_tab(tab_id)?;
            if let Some(anchor) = &anchor {
                if !tab.visible_pane_ids.contains(&anchor.anchor) {
                    return fail(ActionError::InvalidTarget(format!(
                        "anchor pane {} is not visible in tab {}",
                        anchor.anchor, tab_id
                    )));
                }
            }
            Resolved::Execute(Action::ReactivatePane {
                pane_id,
                tab_id,
                anchor,
            })
        }

        Action::SelectTab { tab_id } => {
            snapshot.require_tab(tab_id)?;
            if snapshot.active_tab_id == Some(tab_id) {
                Resolved::Noop
            } else {
                Resolved::Execute(Action::SelectTab { tab_id })
            }
        }

        Action::SelectPane { pane_id } => {
            let tab = snapshot
                .tab_of_pane(pane_id)
                .ok_or(ActionError::StaleId(pane_id))?;
            if !tab.visible_pane_ids.contains(&pane_id) {
                return fail(ActionError::InvalidTarget(format!(
                    "pane {} is not visible in the active arrangement",
                    pane_id
                )));
            }
            if snapshot.active_tab_id == Some(tab.id) && snapshot.active_pane_id == Some(pane_id)
            {
                Resolved::Noop
            } else {
                Resolved::Execute(Action::SelectPane { pane_id })
            }
        }

        Action::ResizeSplit {
            tab_id,
            split_id,
            ratio,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if !tab.split_ids.contains(&split_id) {
                return fail(ActionError::StaleId(split_id));
            }
            // Out-of-range ratios canonicalize by clamping.
            Resolved::Execute(Action::ResizeSplit {
                tab_id,
                split_id,
                ratio: ratio.clamp(MIN_SPLIT_RATIO, MAX_SPLIT_RATIO),
            })
        }

        Action::EqualizeLayout { tab_id } => {
            snapshot.require_tab(tab_id)?;
            Resolved::Execute(Action::EqualizeLayout { tab_id })
        }

        Action::ToggleZoom { pane_id } | Action::MinimizePane { pane_id }
            if !visible_somewhere(snapshot, pane_id) =>
        {
            return fail(ActionError::InvalidTarget(format!(
                "pane {} is not visible in its tab's active arrangement",
                pane_id
            )));
        }
        Action::ToggleZoom { pane_id } => Resolved::Execute(Action::ToggleZoom { pane_id }),
        Action::MinimizePane { pane_id } => Resolved::Execute(Action::MinimizePane { pane_id }),

        Action::RestorePane { pane_id } => {
            snapshot.pane(pane_id)?;
            Resolved::Execute(Action::RestorePane { pane_id })
        }

        Action::CreateArrangement {
            tab_id,
            name,
            visible,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if visible.is_empty() {
                return fail(ActionError::InvalidTarget(
                    "an arrangement needs at least one pane".to_string(),
                ));
            }
            for pane in &visible {
                if !tab.all_pane_ids.contains(pane) {
                    return fail(ActionError::InvalidTarget(format!(
                        "pane {} is not a member of tab {}",
                        pane, tab_id
                    )));
                }
            }
            Resolved::Execute(Action::CreateArrangement {
                tab_id,
                name,
                visible,
            })
        }

        Action::RenameArrangement {
            tab_id,
            arrangement_id,
            name,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if !tab.arrangement_ids.contains(&arrangement_id) {
                return fail(ActionError::StaleId(arrangement_id));
            }
            Resolved::Execute(Action::RenameArrangement {
                tab_id,
                arrangement_id,
                name,
            })
        }

        Action::DeleteArrangement {
            tab_id,
            arrangement_id,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if !tab.arrangement_ids.contains(&arrangement_id) {
                return fail(ActionError::StaleId(arrangement_id));
            }
            if tab.default_arrangement_id == arrangement_id {
                return fail(ActionError::NotPermitted(
                    "the default arrangement cannot be deleted",
                ));
            }
            Resolved::Execute(Action::DeleteArrangement {
                tab_id,
                arrangement_id,
            })
        }

        Action::SwitchArrangement {
            tab_id,
            arrangement_id,
        } => {
            let tab = snapshot.require_tab(tab_id)?;
            if !tab.arrangement_ids.contains(&arrangement_id) {
                return fail(ActionError::StaleId(arrangement_id));
            }
            if tab.active_arrangement_id == arrangement_id {
                Resolved::Noop
            } else {
                Resolved::Execute(Action::SwitchArrangement {
                    tab_id,
                    arrangement_id,
                })
            }
        }

        Action::AddDrawerPane {
            parent_pane_id,
            content,
            meta,
        } => {
            let parent = snapshot.pane(parent_pane_id)?;
            if parent.parent_pane_id.is_some() {
                return fail(ActionError::InvalidTarget(
                    "drawers do not nest".to_string(),
                ));
            }
            if parent.drawer_len >= DRAWER_MAX_PANES {
                return fail(ActionError::InvalidTarget(format!(
                    "drawer is full ({} panes)",
                    DRAWER_MAX_PANES
                )));
            }
            Resolved::Execute(Action::AddDrawerPane {
                parent_pane_id,
                content,
                meta,
            })
        }

        Action::ToggleDrawer { parent_pane_id } => {
            let parent = snapshot.pane(parent_pane_id)?;
            if parent.drawer_len == 0 {
                return fail(ActionError::InvalidTarget(
                    "pane has no drawer".to_string(),
                ));
            }
            Resolved::Execute(Action::ToggleDrawer { parent_pane_id })
        }

        Action::UpdatePaneMeta {
            pane_id,
            title,
            working_directory,
        } => {
            snapshot.pane(pane_id)?;
            Resolved::Execute(Action::UpdatePaneMeta {
                pane_id,
                title,
                working_directory,
            })
        }

        Action::Undo => {
            if snapshot.undo_depth == 0 {
                Resolved::Noop
            } else {
                Resolved::Execute(Action::Undo)
            }
        }
    };

    Ok(resolved)
}

fn visible_somewhere(snapshot: &ActionSnapshot, pane: PaneId) -> bool {
    snapshot
        .tab_of_pane(pane)
        .map(|tab| tab.visible_pane_ids.contains(&pane))
        .unwrap_or(false)
}

fn fail(err: ActionError) -> Result<Resolved, ActionError> {
    Err(err)
}
