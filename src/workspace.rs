use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::action::{ActionError, ActionSnapshot, InsertAnchor, PaneSummary, TabSummary};
use crate::event::StoreEvent;
use crate::layout::{LayoutNode, PaneId, SplitDirection, SplitId};
use crate::pane::{Drawer, Pane, Residency};
use crate::repo::{RepoEntry, TopologyEvent, WorktreeId};
use crate::tab::{
    switch_transitions, Arrangement, ArrangementId, SwitchTransitions, Tab, TabId,
};
use crate::undo::{ClosedPane, ClosedTab};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub const DEFAULT_SIDEBAR_WIDTH: f64 = 260.0;

/// The persistent content of a workspace, separated from runtime bookkeeping
/// so rollback snapshots and the on-disk document share one shape. Two
/// snapshots compare equal exactly when the stores are equivalent.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceData {
    pub id: uuid::Uuid,
    pub name: String,
    pub repos: Vec<RepoEntry>,
    pub panes: BTreeMap<PaneId, Pane>,
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
    pub sidebar_width: f64,
    pub window_frame: Option<WindowFrame>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root. All mutation goes through the methods here, one call at a
/// time from a single owner; there is no interior locking. Every committed
/// mutation bumps `version`, marks the store dirty, and notifies subscribers.
pub struct WorkspaceState {
    pub id: uuid::Uuid,
    pub name: String,
    pub repos: Vec<RepoEntry>,
    pub panes: BTreeMap<PaneId, Pane>,
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
    pub sidebar_width: f64,
    pub window_frame: Option<WindowFrame>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    version: u64,
    dirty: bool,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl WorkspaceState {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            repos: Vec::new(),
            panes: BTreeMap::new(),
            tabs: Vec::new(),
            active_tab_id: None,
            sidebar_width: DEFAULT_SIDEBAR_WIDTH,
            window_frame: None,
            created_at: now,
            updated_at: now,
            version: 0,
            dirty: false,
            subscribers: Vec::new(),
        }
    }

    pub fn from_data(data: WorkspaceData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            repos: data.repos,
            panes: data.panes,
            tabs: data.tabs,
            active_tab_id: data.active_tab_id,
            sidebar_width: data.sidebar_width,
            window_frame: data.window_frame,
            created_at: data.created_at,
            updated_at: data.updated_at,
            version: 0,
            dirty: false,
            subscribers: Vec::new(),
        }
    }

    pub fn data(&self) -> WorkspaceData {
        WorkspaceData {
            id: self.id,
            name: self.name.clone(),
            repos: self.repos.clone(),
            panes: self.panes.clone(),
            tabs: self.tabs.clone(),
            active_tab_id: self.active_tab_id,
            sidebar_width: self.sidebar_width,
            window_frame: self.window_frame,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Restore a rollback snapshot, committing it as a new mutation.
    pub fn restore_data(&mut self, data: WorkspaceData) {
        self.id = data.id;
        self.name = data.name;
        self.repos = data.repos;
        self.panes = data.panes;
        self.tabs = data.tabs;
        self.active_tab_id = data.active_tab_id;
        self.sidebar_width = data.sidebar_width;
        self.window_frame = data.window_frame;
        self.created_at = data.created_at;
        self.updated_at = data.updated_at;
        // Committed without re-stamping updated_at: a rollback must leave
        // the store identical by content to the snapshot.
        self.commit();
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.commit();
    }

    fn commit(&mut self) {
        self.version += 1;
        self.dirty = true;
        let event = StoreEvent::Changed {
            version: self.version,
        };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn pane(&self, id: PaneId) -> Option<&Pane> {
        self.panes.get(&id)
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn tab_mut(&mut self, id: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab_id.and_then(|id| self.tab(id))
    }

    pub fn tab_of_pane(&self, pane: PaneId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.contains(pane))
    }

    /// Immutable snapshot for the validator.
    pub fn action_snapshot(&self, management_mode: bool, undo_depth: usize) -> ActionSnapshot {
        let tabs = self
            .tabs
            .iter()
            .map(|tab| TabSummary {
                id: tab.id,
                all_pane_ids: tab.panes.clone(),
                visible_pane_ids: tab.pane_ids(),
                split_ids: tab
                    .active_arrangement()
                    .layout
                    .split_ids()
                    .into_iter()
                    .collect(),
                arrangement_ids: tab.arrangements.iter().map(|a| a.id).collect(),
                active_arrangement_id: tab.active_arrangement_id,
                default_arrangement_id: tab.default_arrangement().id,
            })
            .collect();
        let panes = self
            .panes
            .iter()
            .map(|(id, pane)| {
                (
                    *id,
                    PaneSummary {
                        residency: pane.residency.clone(),
                        parent_pane_id: pane.parent_pane_id,
                        drawer_len: pane.drawer_children().len(),
                    },
                )
            })
            .collect();
        ActionSnapshot {
            tabs,
            panes,
            active_tab_id: self.active_tab_id,
            active_pane_id: self.active_tab().and_then(|t| t.active_pane_id),
            management_mode,
            undo_depth,
        }
    }

    // ------------------------------------------------------------------
    // Pane and tab mutations
    // ------------------------------------------------------------------

    pub fn add_repo(&mut self, repo: RepoEntry) {
        self.repos.push(repo);
        self.touch();
    }

    pub fn set_sidebar_width(&mut self, width: f64) {
        self.sidebar_width = width;
        self.touch();
    }

    pub fn set_window_frame(&mut self, frame: WindowFrame) {
        self.window_frame = Some(frame);
        self.touch();
    }

    /// Register a pane. Panes are always created before any layout refers to
    /// them.
    pub fn insert_pane(&mut self, pane: Pane) -> Result<PaneId, ActionError> {
        if self.panes.contains_key(&pane.id) {
            return Err(ActionError::InvalidTarget(format!(
                "pane {} already exists",
                pane.id
            )));
        }
        let id = pane.id;
        self.panes.insert(id, pane);
        self.touch();
        Ok(id)
    }

    /// Create a tab whose default arrangement shows the given pane.
    pub fn create_tab_with_pane(&mut self, pane_id: PaneId) -> Result<TabId, ActionError> {
        if !self.panes.contains_key(&pane_id) {
            return Err(ActionError::StaleId(pane_id));
        }
        let tab = Tab::new(pane_id);
        let tab_id = tab.id;
        self.tabs.push(tab);
        self.active_tab_id = Some(tab_id);
        self.touch();
        Ok(tab_id)
    }

    /// Insert an existing pane into a tab's active arrangement. Without an
    /// anchor the pane lands after the arrangement's first leaf.
    pub fn insert_into_arrangement(
        &mut self,
        tab_id: TabId,
        pane_id: PaneId,
        anchor: Option<InsertAnchor>,
    ) -> Result<(), ActionError> {
        if !self.panes.contains_key(&pane_id) {
            return Err(ActionError::StaleId(pane_id));
        }
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = tab.active_arrangement_mut();
        let anchor = anchor.unwrap_or(InsertAnchor {
            anchor: arrangement.layout.first_leaf(),
            direction: SplitDirection::Horizontal,
            position: crate::layout::InsertPosition::After,
        });
        arrangement.layout = arrangement.layout.inserting(
            pane_id,
            anchor.anchor,
            anchor.direction,
            anchor.position,
        );
        arrangement.sync_visible();
        tab.recompute_panes();
        tab.active_pane_id = Some(pane_id);
        self.touch();
        Ok(())
    }

    /// Drop every reference a tab holds to a pane: all arrangements, the
    /// minimized set, zoom, and the member set. An emptied non-default
    /// arrangement is deleted; an emptied default arrangement hands the
    /// default role to the first surviving non-empty arrangement.
    fn remove_pane_refs(&mut self, tab_id: TabId, pane_id: PaneId) -> Result<(), ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;

        let mut emptied: Vec<ArrangementId> = Vec::new();
        for arrangement in &mut tab.arrangements {
            if !arrangement.layout.contains(pane_id) {
                continue;
            }
            match arrangement.layout.removing(pane_id) {
                Some(layout) => {
                    arrangement.layout = layout;
                    arrangement.sync_visible();
                }
                None => emptied.push(arrangement.id),
            }
        }

        for id in emptied {
            let was_default = tab.arrangement(id).map(|a| a.is_default).unwrap_or(false);
            tab.arrangements.retain(|a| a.id != id);
            if was_default {
                match tab.arrangements.iter_mut().find(|a| !a.visible_pane_ids.is_empty()) {
                    Some(survivor) => {
                        survivor.is_default = true;
                        debug!(tab = %tab_id, arrangement = %survivor.id, "default arrangement handed over");
                    }
                    None => {
                        return Err(ActionError::InvalidTarget(
                            "removing the pane would leave the tab empty".to_string(),
                        ))
                    }
                }
            }
            if tab.active_arrangement_id == id {
                tab.active_arrangement_id = tab.default_arrangement().id;
            }
        }

        tab.minimized_pane_ids.remove(&pane_id);
        if tab.zoomed_pane_id == Some(pane_id) {
            tab.zoomed_pane_id = None;
        }
        tab.recompute_panes();
        if tab.active_pane_id == Some(pane_id) {
            tab.active_pane_id = tab.pane_ids().first().copied();
        }
        Ok(())
    }

    fn set_residency(&mut self, pane_id: PaneId, next: Residency) -> Result<(), ActionError> {
        let pane = self
            .panes
            .get_mut(&pane_id)
            .ok_or(ActionError::StaleId(pane_id))?;
        if !pane.residency.can_enter(&next) {
            return Err(ActionError::InvalidTransition {
                from: pane.residency.label().to_string(),
                to: next.label().to_string(),
            });
        }
        pane.residency = next;
        Ok(())
    }

    /// Remove a pane from all layouts but keep its resource alive.
    pub fn background_pane(&mut self, pane_id: PaneId) -> Result<(), ActionError> {
        let tab_id = self
            .tab_of_pane(pane_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(pane_id))?;
        self.remove_pane_refs(tab_id, pane_id)?;
        self.set_residency(pane_id, Residency::Backgrounded)?;
        self.touch();
        Ok(())
    }

    pub fn reactivate_pane(
        &mut self,
        pane_id: PaneId,
        tab_id: TabId,
        anchor: Option<InsertAnchor>,
    ) -> Result<(), ActionError> {
        self.set_residency(pane_id, Residency::Active)?;
        self.insert_into_arrangement(tab_id, pane_id, anchor)
    }

    /// Detach a pane into the undo stack's shape. The pane and its drawer
    /// children stay in the pane map as pending-undo until purged.
    pub fn close_pane(
        &mut self,
        pane_id: PaneId,
        undo_ttl: Duration,
    ) -> Result<ClosedPane, ActionError> {
        let tab = self
            .tab_of_pane(pane_id)
            .ok_or(ActionError::StaleId(pane_id))?;
        let tab_id = tab.id;
        let anchor = tab
            .active_arrangement()
            .layout
            .sibling_anchor(pane_id)
            .map(|(anchor, direction, position)| InsertAnchor {
                anchor,
                direction,
                position,
            });

        self.remove_pane_refs(tab_id, pane_id)?;

        let expires_at = Utc::now() + undo_ttl;
        self.set_residency(pane_id, Residency::PendingUndo { expires_at })?;
        let pane = self.panes.get(&pane_id).cloned().expect("pane exists");
        let mut drawer_children = Vec::new();
        for child_id in pane.drawer_children().to_vec() {
            if self
                .set_residency(child_id, Residency::PendingUndo { expires_at })
                .is_ok()
            {
                if let Some(child) = self.panes.get(&child_id) {
                    drawer_children.push(child.clone());
                }
            }
        }

        self.touch();
        Ok(ClosedPane {
            pane,
            drawer_children,
            tab_id,
            anchor,
        })
    }

    /// Remove a tab, parking every pane it reached (including drawer
    /// children and panes hidden by non-default arrangements) as
    /// pending-undo.
    pub fn close_tab(
        &mut self,
        tab_id: TabId,
        undo_ttl: Duration,
    ) -> Result<ClosedTab, ActionError> {
        let index = self
            .tabs
            .iter()
            .position(|t| t.id == tab_id)
            .ok_or(ActionError::StaleId(tab_id))?;
        let tab = self.tabs.remove(index);

        let expires_at = Utc::now() + undo_ttl;
        let mut panes = Vec::new();
        for pane_id in reachable_panes(&tab, &self.panes) {
            if let Err(err) = self.set_residency(pane_id, Residency::PendingUndo { expires_at }) {
                debug!(pane = %pane_id, error = %err, "close-tab residency skip");
            }
            if let Some(pane) = self.panes.get(&pane_id) {
                panes.push(pane.clone());
            }
        }

        if self.active_tab_id == Some(tab_id) {
            self.active_tab_id = self
                .tabs
                .get(index.min(self.tabs.len().saturating_sub(1)))
                .map(|t| t.id);
        }
        self.touch();
        Ok(ClosedTab {
            tab,
            panes,
            original_index: index,
        })
    }

    /// Permanently drop a pane and its drawer children from the store.
    /// Only backgrounded or pending-undo panes can be purged; anything else
    /// is logged and skipped.
    pub fn purge_pane(&mut self, pane_id: PaneId) -> bool {
        let children = self
            .panes
            .get(&pane_id)
            .map(|p| p.drawer_children().to_vec())
            .unwrap_or_default();
        for child in children {
            self.purge_pane(child);
        }
        match self.set_residency(pane_id, Residency::Purged) {
            Ok(()) => {
                self.panes.remove(&pane_id);
                self.touch();
                true
            }
            Err(err) => {
                warn!(pane = %pane_id, error = %err, "purge skipped");
                false
            }
        }
    }

    /// Reinstate a closed pane from its undo snapshot.
    pub fn restore_pane(
        &mut self,
        mut pane: Pane,
        drawer_children: Vec<Pane>,
        tab_id: TabId,
        anchor: Option<InsertAnchor>,
    ) -> Result<(), ActionError> {
        if self.tab(tab_id).is_none() {
            return Err(ActionError::StaleId(tab_id));
        }
        pane.residency = Residency::Active;
        let pane_id = pane.id;
        self.panes.insert(pane_id, pane);
        for mut child in drawer_children {
            child.residency = Residency::Active;
            self.panes.insert(child.id, child);
        }
        // Fall back to the first leaf when the original anchor is gone.
        let anchor = anchor.filter(|a| {
            self.tab(tab_id)
                .map(|t| t.active_arrangement().layout.contains(a.anchor))
                .unwrap_or(false)
        });
        self.insert_into_arrangement(tab_id, pane_id, anchor)
    }

    /// Undo fallback when a closed pane's tab no longer exists: bring the
    /// pane back in a fresh tab of its own.
    pub fn restore_tab_for_pane(&mut self, mut pane: Pane, drawer_children: Vec<Pane>) -> TabId {
        pane.residency = Residency::Active;
        let pane_id = pane.id;
        self.panes.insert(pane_id, pane);
        for mut child in drawer_children {
            child.residency = Residency::Active;
            self.panes.insert(child.id, child);
        }
        let tab = Tab::new(pane_id);
        let tab_id = tab.id;
        self.tabs.push(tab);
        self.active_tab_id = Some(tab_id);
        self.touch();
        tab_id
    }

    /// Reinstate a closed tab from its undo snapshot at (or near) its old
    /// position. Pane residencies are re-marked active.
    pub fn restore_tab(&mut self, tab: Tab, panes: Vec<Pane>, original_index: usize) {
        for mut pane in panes {
            pane.residency = Residency::Active;
            self.panes.insert(pane.id, pane);
        }
        let index = original_index.min(self.tabs.len());
        let tab_id = tab.id;
        self.tabs.insert(index, tab);
        self.active_tab_id = Some(tab_id);
        self.touch();
    }

    // ------------------------------------------------------------------
    // Arrangements
    // ------------------------------------------------------------------

    pub fn create_arrangement(
        &mut self,
        tab_id: TabId,
        name: impl Into<String>,
        visible: &[PaneId],
    ) -> Result<ArrangementId, ActionError> {
        let layout = build_layout(visible).ok_or_else(|| {
            ActionError::InvalidTarget("an arrangement needs at least one pane".to_string())
        })?;
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = Arrangement::new(name, layout);
        let id = arrangement.id;
        tab.arrangements.push(arrangement);
        tab.recompute_panes();
        self.touch();
        Ok(id)
    }

    pub fn rename_arrangement(
        &mut self,
        tab_id: TabId,
        arrangement_id: ArrangementId,
        name: impl Into<String>,
    ) -> Result<(), ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = tab
            .arrangement_mut(arrangement_id)
            .ok_or(ActionError::StaleId(arrangement_id))?;
        arrangement.name = name.into();
        self.touch();
        Ok(())
    }

    pub fn duplicate_arrangement(
        &mut self,
        tab_id: TabId,
        arrangement_id: ArrangementId,
        name: impl Into<String>,
    ) -> Result<ArrangementId, ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let source = tab
            .arrangement(arrangement_id)
            .ok_or(ActionError::StaleId(arrangement_id))?;
        let mut copy = Arrangement::new(name, source.layout.clone());
        copy.is_default = false;
        let id = copy.id;
        tab.arrangements.push(copy);
        self.touch();
        Ok(id)
    }

    /// Delete a non-default arrangement. Returns the panes that no other
    /// arrangement references, now backgrounded, so the caller can detach
    /// their surfaces.
    pub fn delete_arrangement(
        &mut self,
        tab_id: TabId,
        arrangement_id: ArrangementId,
    ) -> Result<Vec<PaneId>, ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = tab
            .arrangement(arrangement_id)
            .ok_or(ActionError::StaleId(arrangement_id))?;
        if arrangement.is_default {
            return Err(ActionError::NotPermitted(
                "the default arrangement cannot be deleted",
            ));
        }
        let removed_visible = arrangement.visible_pane_ids.clone();
        let was_active = tab.active_arrangement_id == arrangement_id;
        tab.arrangements.retain(|a| a.id != arrangement_id);
        if was_active {
            tab.active_arrangement_id = tab.default_arrangement().id;
            tab.zoomed_pane_id = None;
            tab.minimized_pane_ids.clear();
        }
        tab.recompute_panes();
        let still_referenced = tab.panes.clone();
        if tab.active_pane_id.map(|p| !still_referenced.contains(&p)).unwrap_or(true) {
            tab.active_pane_id = tab.pane_ids().first().copied();
        }

        let mut unreferenced = Vec::new();
        for pane_id in removed_visible {
            if !still_referenced.contains(&pane_id) {
                if self.set_residency(pane_id, Residency::Backgrounded).is_ok() {
                    unreferenced.push(pane_id);
                }
            }
        }
        self.touch();
        Ok(unreferenced)
    }

    /// Make another arrangement active, returning the attach/detach work the
    /// coordinator owes the surface collaborator. Clears zoom and minimize
    /// and repoints the active pane into the new arrangement.
    pub fn switch_arrangement(
        &mut self,
        tab_id: TabId,
        arrangement_id: ArrangementId,
    ) -> Result<SwitchTransitions, ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        if tab.arrangement(arrangement_id).is_none() {
            return Err(ActionError::StaleId(arrangement_id));
        }
        let previous_visible = tab.active_arrangement().visible_pane_ids.clone();
        let previously_minimized = tab.minimized_pane_ids.clone();
        let new_visible = tab
            .arrangement(arrangement_id)
            .map(|a| a.visible_pane_ids.clone())
            .expect("checked above");

        tab.active_arrangement_id = arrangement_id;
        tab.zoomed_pane_id = None;
        tab.minimized_pane_ids.clear();
        if tab
            .active_pane_id
            .map(|p| !new_visible.contains(&p))
            .unwrap_or(true)
        {
            tab.active_pane_id = tab.pane_ids().first().copied();
        }
        self.touch();
        Ok(switch_transitions(
            &previous_visible,
            &previously_minimized,
            &new_visible,
        ))
    }

    // ------------------------------------------------------------------
    // Layout, selection, transient pane state
    // ------------------------------------------------------------------

    pub fn resize_split(
        &mut self,
        tab_id: TabId,
        split_id: SplitId,
        ratio: f64,
    ) -> Result<(), ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = tab.active_arrangement_mut();
        arrangement.layout = arrangement.layout.resizing(split_id, ratio);
        self.touch();
        Ok(())
    }

    pub fn equalize_layout(&mut self, tab_id: TabId) -> Result<(), ActionError> {
        let tab = self.tab_mut(tab_id).ok_or(ActionError::StaleId(tab_id))?;
        let arrangement = tab.active_arrangement_mut();
        arrangement.layout = arrangement.layout.equalized();
        self.touch();
        Ok(())
    }

    pub fn select_tab(&mut self, tab_id: TabId) -> Result<(), ActionError> {
        if self.tab(tab_id).is_none() {
            return Err(ActionError::StaleId(tab_id));
        }
        self.active_tab_id = Some(tab_id);
        self.touch();
        Ok(())
    }

    pub fn select_pane(&mut self, pane_id: PaneId) -> Result<(), ActionError> {
        let tab_id = self
            .tab_of_pane(pane_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(pane_id))?;
        self.active_tab_id = Some(tab_id);
        let tab = self.tab_mut(tab_id).expect("tab exists");
        tab.active_pane_id = Some(pane_id);
        self.touch();
        Ok(())
    }

    /// Returns true when the pane ends up zoomed.
    pub fn toggle_zoom(&mut self, pane_id: PaneId) -> Result<bool, ActionError> {
        let tab_id = self
            .tab_of_pane(pane_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(pane_id))?;
        let tab = self.tab_mut(tab_id).expect("tab exists");
        let zoomed = if tab.zoomed_pane_id == Some(pane_id) {
            tab.zoomed_pane_id = None;
            false
        } else {
            tab.zoomed_pane_id = Some(pane_id);
            true
        };
        self.touch();
        Ok(zoomed)
    }

    pub fn minimize_pane(&mut self, pane_id: PaneId) -> Result<(), ActionError> {
        let tab_id = self
            .tab_of_pane(pane_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(pane_id))?;
        let tab = self.tab_mut(tab_id).expect("tab exists");
        tab.minimized_pane_ids.insert(pane_id);
        if tab.zoomed_pane_id == Some(pane_id) {
            tab.zoomed_pane_id = None;
        }
        self.touch();
        Ok(())
    }

    pub fn restore_minimized(&mut self, pane_id: PaneId) -> Result<(), ActionError> {
        let tab_id = self
            .tab_of_pane(pane_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(pane_id))?;
        let tab = self.tab_mut(tab_id).expect("tab exists");
        tab.minimized_pane_ids.remove(&pane_id);
        self.touch();
        Ok(())
    }

    pub fn update_pane_meta(
        &mut self,
        pane_id: PaneId,
        title: Option<String>,
        working_directory: Option<std::path::PathBuf>,
    ) -> Result<(), ActionError> {
        let pane = self
            .panes
            .get_mut(&pane_id)
            .ok_or(ActionError::StaleId(pane_id))?;
        if let Some(title) = title {
            pane.meta.title = title;
        }
        if let Some(wd) = working_directory {
            pane.meta.working_directory = wd;
        }
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Drawers
    // ------------------------------------------------------------------

    /// Attach a child pane to a parent's drawer, creating the drawer on
    /// first use.
    pub fn add_drawer_child(
        &mut self,
        parent_pane_id: PaneId,
        mut child: Pane,
    ) -> Result<PaneId, ActionError> {
        if !self.panes.contains_key(&parent_pane_id) {
            return Err(ActionError::StaleId(parent_pane_id));
        }
        child.parent_pane_id = Some(parent_pane_id);
        child.residency = Residency::Active;
        let child_id = child.id;

        let parent = self.panes.get_mut(&parent_pane_id).expect("checked above");
        match &mut parent.drawer {
            None => {
                parent.drawer = Some(Drawer::new(child_id));
            }
            Some(drawer) => {
                if drawer.is_full() {
                    return Err(ActionError::InvalidTarget(format!(
                        "drawer is full ({} panes)",
                        crate::pane::DRAWER_MAX_PANES
                    )));
                }
                let anchor = drawer
                    .active_pane_id
                    .unwrap_or_else(|| drawer.layout.first_leaf());
                drawer.layout = drawer.layout.inserting(
                    child_id,
                    anchor,
                    SplitDirection::Horizontal,
                    crate::layout::InsertPosition::After,
                );
                drawer.pane_ids.push(child_id);
                drawer.active_pane_id = Some(child_id);
            }
        }
        self.panes.insert(child_id, child);
        self.touch();
        Ok(child_id)
    }

    /// Detach a drawer child into the undo stack's pane shape. The entry's
    /// tab is the parent's tab; the pane's `parent_pane_id` routes the undo
    /// restore back into the drawer.
    pub fn close_drawer_child(
        &mut self,
        child_id: PaneId,
        undo_ttl: Duration,
    ) -> Result<ClosedPane, ActionError> {
        let parent_id = self
            .panes
            .get(&child_id)
            .and_then(|p| p.parent_pane_id)
            .ok_or(ActionError::StaleId(child_id))?;
        let tab_id = self
            .tab_of_pane(parent_id)
            .map(|t| t.id)
            .ok_or(ActionError::StaleId(parent_id))?;

        let parent = self
            .panes
            .get_mut(&parent_id)
            .ok_or(ActionError::StaleId(parent_id))?;
        let drawer = parent.drawer.as_mut().ok_or_else(|| {
            ActionError::InvalidTarget(format!("pane {parent_id} has no drawer"))
        })?;
        drawer.pane_ids.retain(|id| *id != child_id);
        match drawer.layout.removing(child_id) {
            Some(layout) => {
                drawer.layout = layout;
                if drawer.active_pane_id == Some(child_id) {
                    drawer.active_pane_id = drawer.pane_ids.first().copied();
                }
                drawer.minimized_pane_ids.remove(&child_id);
            }
            None => parent.drawer = None,
        }

        let expires_at = Utc::now() + undo_ttl;
        self.set_residency(child_id, Residency::PendingUndo { expires_at })?;
        let pane = self.panes.get(&child_id).cloned().expect("pane exists");
        self.touch();
        Ok(ClosedPane {
            pane,
            drawer_children: Vec::new(),
            tab_id,
            anchor: None,
        })
    }

    /// Put a closed drawer child back into its parent's drawer.
    pub fn restore_drawer_child(&mut self, mut pane: Pane) -> Result<(), ActionError> {
        let parent_id = pane.parent_pane_id.ok_or_else(|| {
            ActionError::InvalidTarget(format!("pane {} is not a drawer child", pane.id))
        })?;
        if !self.panes.contains_key(&parent_id) {
            return Err(ActionError::StaleId(parent_id));
        }
        pane.residency = Residency::Active;
        let child_id = pane.id;
        self.panes.insert(child_id, pane);

        let parent = self.panes.get_mut(&parent_id).expect("checked above");
        match &mut parent.drawer {
            None => parent.drawer = Some(Drawer::new(child_id)),
            Some(drawer) => {
                if drawer.is_full() {
                    self.panes.remove(&child_id);
                    return Err(ActionError::InvalidTarget(format!(
                        "drawer is full ({} panes)",
                        crate::pane::DRAWER_MAX_PANES
                    )));
                }
                let anchor = drawer.layout.first_leaf();
                drawer.layout = drawer.layout.inserting(
                    child_id,
                    anchor,
                    SplitDirection::Horizontal,
                    crate::layout::InsertPosition::After,
                );
                drawer.pane_ids.push(child_id);
                drawer.active_pane_id = Some(child_id);
            }
        }
        self.touch();
        Ok(())
    }

    /// Expand or collapse a drawer. At most one drawer in the whole store is
    /// expanded; expanding one collapses the rest.
    pub fn set_drawer_expanded(
        &mut self,
        parent_pane_id: PaneId,
        expanded: bool,
    ) -> Result<(), ActionError> {
        if self
            .panes
            .get(&parent_pane_id)
            .and_then(|p| p.drawer.as_ref())
            .is_none()
        {
            return Err(ActionError::InvalidTarget(format!(
                "pane {} has no drawer",
                parent_pane_id
            )));
        }
        if expanded {
            for (id, pane) in self.panes.iter_mut() {
                if *id != parent_pane_id {
                    if let Some(drawer) = &mut pane.drawer {
                        drawer.is_expanded = false;
                    }
                }
            }
        }
        let parent = self.panes.get_mut(&parent_pane_id).expect("checked above");
        parent.drawer.as_mut().expect("checked above").is_expanded = expanded;
        self.touch();
        Ok(())
    }

    /// Returns the drawer's new expanded state.
    pub fn toggle_drawer(&mut self, parent_pane_id: PaneId) -> Result<bool, ActionError> {
        let expanded = self
            .panes
            .get(&parent_pane_id)
            .and_then(|p| p.drawer.as_ref())
            .map(|d| d.is_expanded)
            .ok_or_else(|| {
                ActionError::InvalidTarget(format!("pane {} has no drawer", parent_pane_id))
            })?;
        self.set_drawer_expanded(parent_pane_id, !expanded)?;
        Ok(!expanded)
    }

    // ------------------------------------------------------------------
    // Topology and repair
    // ------------------------------------------------------------------

    /// Merge an external topology report and re-run the repair pass. Repair
    /// is idempotent over the current snapshot, so events only need to be
    /// applied one at a time, in any order.
    pub fn apply_topology(&mut self, event: &TopologyEvent) -> Vec<String> {
        match event {
            TopologyEvent::WorktreeMissing { id, reason } => {
                for pane_id in self.panes_of_worktree(*id) {
                    let next = Residency::Orphaned {
                        reason: reason.clone(),
                    };
                    if let Err(err) = self.set_residency(pane_id, next) {
                        debug!(pane = %pane_id, error = %err, "orphan skip");
                    } else {
                        warn!(pane = %pane_id, worktree = %id, reason = %reason, "pane orphaned");
                    }
                }
            }
            TopologyEvent::WorktreeRestored { id } => {
                for pane_id in self.panes_of_worktree(*id) {
                    let referenced = self
                        .tabs
                        .iter()
                        .any(|t| t.arrangements.iter().any(|a| a.layout.contains(pane_id)));
                    let next = if referenced {
                        Residency::Active
                    } else {
                        Residency::Backgrounded
                    };
                    if let Err(err) = self.set_residency(pane_id, next) {
                        debug!(pane = %pane_id, error = %err, "re-associate skip");
                    }
                }
            }
            TopologyEvent::RepoMoved { id, new_root } => {
                if let Some(repo) = self.repos.iter_mut().find(|r| r.id == *id) {
                    repo.root = new_root.clone();
                }
            }
        }
        let repairs = self.repair();
        self.touch();
        repairs
    }

    fn panes_of_worktree(&self, worktree: WorktreeId) -> Vec<PaneId> {
        self.panes
            .values()
            .filter(|p| p.meta.worktree_id() == Some(worktree))
            .map(|p| p.id)
            .collect()
    }

    /// Repair structural invariants after load or an external topology
    /// change. Every fix is logged as a warning and reported back; repair
    /// never fails.
    pub fn repair(&mut self) -> Vec<String> {
        let mut log: Vec<String> = Vec::new();

        // Purged panes must not linger in the map.
        let purged: Vec<PaneId> = self
            .panes
            .values()
            .filter(|p| p.residency.is_terminal())
            .map(|p| p.id)
            .collect();
        for id in purged {
            self.panes.remove(&id);
            log.push(format!("dropped purged pane {id} from the pane map"));
        }

        // Drawer children whose parent is gone cannot render; drop them.
        let orphan_children: Vec<PaneId> = self
            .panes
            .values()
            .filter(|p| {
                p.parent_pane_id
                    .map(|parent| !self.panes.contains_key(&parent))
                    .unwrap_or(false)
            })
            .map(|p| p.id)
            .collect();
        for id in orphan_children {
            self.panes.remove(&id);
            log.push(format!("dropped drawer child {id} with missing parent"));
        }

        // Drawer membership must reference live child panes.
        let parents: Vec<PaneId> = self
            .panes
            .values()
            .filter(|p| p.drawer.is_some())
            .map(|p| p.id)
            .collect();
        for parent_id in parents {
            let live: BTreeSet<PaneId> = self.panes.keys().copied().collect();
            let parent = self.panes.get_mut(&parent_id).expect("parent listed");
            let drawer = parent.drawer.as_mut().expect("drawer listed");
            let before = drawer.pane_ids.len();
            drawer.pane_ids.retain(|id| live.contains(id));
            if drawer.pane_ids.len() != before {
                log.push(format!(
                    "pruned {} missing drawer children from pane {parent_id}",
                    before - drawer.pane_ids.len()
                ));
            }
            let mut layout = Some(drawer.layout.clone());
            for id in drawer.layout.pane_ids() {
                if !live.contains(&id) {
                    layout = layout.and_then(|l| l.removing(id));
                }
            }
            match layout {
                Some(l) => drawer.layout = l,
                None => {
                    parent.drawer = None;
                    log.push(format!("removed emptied drawer from pane {parent_id}"));
                    continue;
                }
            }
            let drawer = parent.drawer.as_mut().expect("still present");
            if drawer
                .active_pane_id
                .map(|id| !drawer.pane_ids.contains(&id))
                .unwrap_or(false)
            {
                drawer.active_pane_id = drawer.pane_ids.first().copied();
            }
        }

        // A pane may appear in one tab only; the first tab wins.
        let mut seen: BTreeSet<PaneId> = BTreeSet::new();
        let mut dedupe: Vec<(TabId, PaneId)> = Vec::new();
        for tab in &self.tabs {
            for pane in &tab.panes {
                if !seen.insert(*pane) {
                    dedupe.push((tab.id, *pane));
                }
            }
        }
        for (tab_id, pane_id) in dedupe {
            if self.remove_pane_refs(tab_id, pane_id).is_err() {
                // The duplicate was the tab's only content; drop the tab below.
                if let Some(tab) = self.tab_mut(tab_id) {
                    tab.arrangements.clear();
                }
            }
            log.push(format!(
                "pane {pane_id} appeared in more than one tab; removed from tab {tab_id}"
            ));
        }

        // Prune layout references to panes that are gone, then drop tabs
        // whose default arrangement emptied.
        let live: BTreeSet<PaneId> = self.panes.keys().copied().collect();
        let mut dead_tabs: Vec<TabId> = Vec::new();
        for tab in &mut self.tabs {
            let mut emptied: Vec<ArrangementId> = Vec::new();
            for arrangement in &mut tab.arrangements {
                let mut layout = Some(arrangement.layout.clone());
                let mut pruned = 0usize;
                for id in arrangement.layout.pane_ids() {
                    if !live.contains(&id) {
                        layout = layout.and_then(|l| l.removing(id));
                        pruned += 1;
                    }
                }
                if pruned > 0 {
                    log.push(format!(
                        "pruned {pruned} stale pane references from arrangement {} of tab {}",
                        arrangement.id, tab.id
                    ));
                }
                match layout {
                    Some(l) => {
                        arrangement.layout = l;
                        arrangement.sync_visible();
                    }
                    None => emptied.push(arrangement.id),
                }
            }
            let default_emptied = emptied
                .iter()
                .any(|id| tab.arrangement(*id).map(|a| a.is_default).unwrap_or(false));
            tab.arrangements.retain(|a| !emptied.contains(&a.id));
            if default_emptied || tab.arrangements.is_empty() {
                dead_tabs.push(tab.id);
                continue;
            }
            // Exactly one default arrangement.
            let defaults = tab.arrangements.iter().filter(|a| a.is_default).count();
            if defaults == 0 {
                tab.arrangements[0].is_default = true;
                log.push(format!("tab {} had no default arrangement", tab.id));
            } else if defaults > 1 {
                let mut found = false;
                for arrangement in &mut tab.arrangements {
                    if arrangement.is_default {
                        if found {
                            arrangement.is_default = false;
                        }
                        found = true;
                    }
                }
                log.push(format!("tab {} had multiple default arrangements", tab.id));
            }
            if tab.arrangement(tab.active_arrangement_id).is_none() {
                tab.active_arrangement_id = tab.default_arrangement().id;
                log.push(format!("tab {} active arrangement repointed", tab.id));
            }
            tab.recompute_panes();
            let visible = tab.active_arrangement().visible_pane_ids.clone();
            if tab
                .active_pane_id
                .map(|p| !visible.contains(&p))
                .unwrap_or(true)
            {
                tab.active_pane_id = tab.pane_ids().first().copied();
            }
            if tab
                .zoomed_pane_id
                .map(|p| !visible.contains(&p))
                .unwrap_or(false)
            {
                tab.zoomed_pane_id = None;
            }
            tab.minimized_pane_ids.retain(|p| visible.contains(p));
        }
        for tab_id in &dead_tabs {
            self.tabs.retain(|t| t.id != *tab_id);
            log.push(format!("removed tab {tab_id} with an empty default arrangement"));
        }

        // Residency must agree with layout membership.
        let referenced: BTreeSet<PaneId> = self
            .tabs
            .iter()
            .flat_map(|t| t.panes.iter().copied())
            .collect();
        let residency_fixes: Vec<(PaneId, Residency)> = self
            .panes
            .values()
            .filter_map(|pane| {
                if pane.parent_pane_id.is_some() {
                    return None;
                }
                let is_referenced = referenced.contains(&pane.id);
                match (&pane.residency, is_referenced) {
                    (Residency::Active, false) => Some((pane.id, Residency::Backgrounded)),
                    (Residency::Backgrounded, true) | (Residency::PendingUndo { .. }, true) => {
                        Some((pane.id, Residency::Active))
                    }
                    _ => None,
                }
            })
            .collect();
        for (pane_id, next) in residency_fixes {
            let label = next.label();
            if let Some(pane) = self.panes.get_mut(&pane_id) {
                pane.residency = next;
            }
            log.push(format!("pane {pane_id} residency corrected to {label}"));
        }

        // At most one expanded drawer in the whole store.
        let mut expanded_seen = false;
        for pane in self.panes.values_mut() {
            if let Some(drawer) = &mut pane.drawer {
                if drawer.is_expanded {
                    if expanded_seen {
                        drawer.is_expanded = false;
                        log.push(format!("collapsed extra expanded drawer on pane {}", pane.id));
                    }
                    expanded_seen = true;
                }
            }
        }

        // The active tab pointer must reference a live tab.
        if self
            .active_tab_id
            .map(|id| self.tab(id).is_none())
            .unwrap_or(false)
        {
            self.active_tab_id = self.tabs.first().map(|t| t.id);
            log.push("active tab repointed".to_string());
        }
        if self.active_tab_id.is_none() && !self.tabs.is_empty() {
            self.active_tab_id = self.tabs.first().map(|t| t.id);
        }

        for message in &log {
            warn!(repair = %message, "workspace repair");
        }
        if !log.is_empty() {
            let event = StoreEvent::Repaired { count: log.len() };
            self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        log
    }
}

/// Every pane a tab reaches: all arrangements' layouts plus drawer children.
pub fn reachable_panes(tab: &Tab, panes: &BTreeMap<PaneId, Pane>) -> Vec<PaneId> {
    let mut out: Vec<PaneId> = Vec::new();
    let mut seen: BTreeSet<PaneId> = BTreeSet::new();
    for arrangement in &tab.arrangements {
        for id in arrangement.layout.pane_ids() {
            if seen.insert(id) {
                out.push(id);
                if let Some(pane) = panes.get(&id) {
                    for child in pane.drawer_children() {
                        if seen.insert(*child) {
                            out.push(*child);
                        }
                    }
                }
            }
        }
    }
    out
}

/// Fold a pane list into a row of horizontal splits. `None` for an empty list.
pub fn build_layout(panes: &[PaneId]) -> Option<LayoutNode> {
    let (&first, rest) = panes.split_first()?;
    let mut layout = LayoutNode::Leaf(first);
    let mut anchor = first;
    for &pane in rest {
        layout = layout.inserting(
            pane,
            anchor,
            SplitDirection::Horizontal,
            crate::layout::InsertPosition::After,
        );
        anchor = pane;
    }
    Some(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::{PaneContent, PaneMeta, SourceKind};

    fn undo_ttl() -> Duration {
        Duration::seconds(300)
    }

    fn store_with_tab() -> (WorkspaceState, TabId, PaneId, PaneId) {
        let mut store = WorkspaceState::new("test");
        let a = store.insert_pane(Pane::terminal("/tmp")).unwrap();
        let tab_id = store.create_tab_with_pane(a).unwrap();
        let b = store.insert_pane(Pane::terminal("/tmp")).unwrap();
        store.insert_into_arrangement(tab_id, b, None).unwrap();
        (store, tab_id, a, b)
    }

    #[test]
    fn test_insert_pane_rejects_duplicates() {
        let mut store = WorkspaceState::new("test");
        let pane = Pane::terminal("/tmp");
        let dup = pane.clone();
        store.insert_pane(pane).unwrap();
        assert!(store.insert_pane(dup).is_err());
    }

    #[test]
    fn test_create_tab_sets_active() {
        let (store, tab_id, a, b) = store_with_tab();
        assert_eq!(store.active_tab_id, Some(tab_id));
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.pane_ids(), vec![a, b]);
        assert_eq!(tab.active_pane_id, Some(b));
    }

    #[test]
    fn test_version_bumps_on_mutation() {
        let (mut store, tab_id, ..) = store_with_tab();
        let v = store.version();
        store.equalize_layout(tab_id).unwrap();
        assert_eq!(store.version(), v + 1);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_subscriber_sees_changes() {
        let (mut store, tab_id, ..) = store_with_tab();
        let mut rx = store.subscribe();
        store.equalize_layout(tab_id).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            StoreEvent::Changed {
                version: store.version()
            }
        );
    }

    #[test]
    fn test_background_and_reactivate() {
        let (mut store, tab_id, a, b) = store_with_tab();
        store.background_pane(b).unwrap();
        assert_eq!(store.pane(b).unwrap().residency, Residency::Backgrounded);
        assert_eq!(store.tab(tab_id).unwrap().pane_ids(), vec![a]);

        store.reactivate_pane(b, tab_id, None).unwrap();
        assert_eq!(store.pane(b).unwrap().residency, Residency::Active);
        assert!(store.tab(tab_id).unwrap().contains(b));
    }

    #[test]
    fn test_close_pane_parks_pending_undo() {
        let (mut store, tab_id, a, b) = store_with_tab();
        let closed = store.close_pane(b, undo_ttl()).unwrap();
        assert_eq!(closed.pane.id, b);
        assert_eq!(closed.tab_id, tab_id);
        assert!(closed.anchor.is_some());
        assert_eq!(closed.anchor.unwrap().anchor, a);
        assert!(matches!(
            store.pane(b).unwrap().residency,
            Residency::PendingUndo { .. }
        ));
        assert_eq!(store.tab(tab_id).unwrap().pane_ids(), vec![a]);
    }

    #[test]
    fn test_close_tab_snapshots_all_panes() {
        let (mut store, tab_id, a, b) = store_with_tab();
        let closed = store.close_tab(tab_id, undo_ttl()).unwrap();
        assert_eq!(closed.original_index, 0);
        let ids: Vec<PaneId> = closed.panes.iter().map(|p| p.id).collect();
        assert!(ids.contains(&a) && ids.contains(&b));
        assert!(store.tabs.is_empty());
        assert_eq!(store.active_tab_id, None);
    }

    #[test]
    fn test_close_tab_reaches_hidden_arrangement_panes() {
        let (mut store, tab_id, a, b) = store_with_tab();
        // Make "solo" (only pane a) active so pane b is hidden.
        let solo = store.create_arrangement(tab_id, "solo", &[a]).unwrap();
        store.switch_arrangement(tab_id, solo).unwrap();
        let closed = store.close_tab(tab_id, undo_ttl()).unwrap();
        let ids: Vec<PaneId> = closed.panes.iter().map(|p| p.id).collect();
        assert!(ids.contains(&b), "hidden pane must be torn down too");
    }

    #[test]
    fn test_purge_pane_cascades_drawer_children() {
        let (mut store, _, a, _) = store_with_tab();
        let child = store
            .add_drawer_child(a, Pane::terminal("/tmp"))
            .unwrap();
        let _ = store.close_pane(a, undo_ttl()).unwrap();
        assert!(store.purge_pane(a));
        assert!(store.pane(a).is_none());
        assert!(store.pane(child).is_none());
    }

    #[test]
    fn test_purge_refuses_active_pane() {
        let (mut store, _, a, _) = store_with_tab();
        assert!(!store.purge_pane(a));
        assert!(store.pane(a).is_some());
    }

    #[test]
    fn test_restore_pane_uses_anchor() {
        let (mut store, tab_id, a, b) = store_with_tab();
        let closed = store.close_pane(b, undo_ttl()).unwrap();
        store
            .restore_pane(closed.pane, closed.drawer_children, tab_id, closed.anchor)
            .unwrap();
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.pane_ids(), vec![a, b]);
        assert_eq!(store.pane(b).unwrap().residency, Residency::Active);
    }

    #[test]
    fn test_restore_tab_at_original_index() {
        let (mut store, tab_id, ..) = store_with_tab();
        let c = store.insert_pane(Pane::terminal("/tmp")).unwrap();
        let second_tab = store.create_tab_with_pane(c).unwrap();
        let closed = store.close_tab(tab_id, undo_ttl()).unwrap();
        store.restore_tab(closed.tab, closed.panes, closed.original_index);
        assert_eq!(store.tabs[0].id, tab_id);
        assert_eq!(store.tabs[1].id, second_tab);
        assert_eq!(store.active_tab_id, Some(tab_id));
    }

    #[test]
    fn test_switch_arrangement_scenario() {
        // Tab with {A,B}; arrangement "solo" with only {A}.
        let (mut store, tab_id, a, b) = store_with_tab();
        let solo = store.create_arrangement(tab_id, "solo", &[a]).unwrap();
        let default_id = store.tab(tab_id).unwrap().default_arrangement().id;

        let transitions = store.switch_arrangement(tab_id, solo).unwrap();
        assert_eq!(transitions.hidden, BTreeSet::from([b]));
        assert!(transitions.reattach.is_empty());
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.pane_ids(), vec![a]);
        assert!(tab.panes.contains(&b), "B stays a member of the tab");

        let transitions = store.switch_arrangement(tab_id, default_id).unwrap();
        assert!(transitions.hidden.is_empty());
        assert_eq!(transitions.reattach, BTreeSet::from([b]));
        let visible: BTreeSet<PaneId> = store.tab(tab_id).unwrap().pane_ids().into_iter().collect();
        assert_eq!(visible, BTreeSet::from([a, b]));
    }

    #[test]
    fn test_switch_arrangement_clears_transient_state() {
        let (mut store, tab_id, a, b) = store_with_tab();
        store.toggle_zoom(b).unwrap();
        store.minimize_pane(b).unwrap();
        let solo = store.create_arrangement(tab_id, "solo", &[a]).unwrap();
        store.switch_arrangement(tab_id, solo).unwrap();
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.zoomed_pane_id, None);
        assert!(tab.minimized_pane_ids.is_empty());
        assert_eq!(tab.active_pane_id, Some(a));
    }

    #[test]
    fn test_switch_arrangement_minimized_reattaches() {
        let (mut store, tab_id, a, b) = store_with_tab();
        let both = store.create_arrangement(tab_id, "both", &[a, b]).unwrap();
        store.minimize_pane(b).unwrap();
        let transitions = store.switch_arrangement(tab_id, both).unwrap();
        // B stayed visible but was minimized, so it must reattach.
        assert_eq!(transitions.reattach, BTreeSet::from([b]));
        assert!(transitions.hidden.is_empty());
    }

    #[test]
    fn test_delete_arrangement_backgrounds_unreferenced() {
        let (mut store, tab_id, a, b) = store_with_tab();
        // Default shows {a,b}; make default "solo" shaped instead.
        let solo = store.create_arrangement(tab_id, "solo", &[a]).unwrap();
        store.switch_arrangement(tab_id, solo).unwrap();
        // Deleting the default arrangement is refused at store level too.
        let default_id = store.tab(tab_id).unwrap().default_arrangement().id;
        assert!(store.delete_arrangement(tab_id, default_id).is_err());

        // Delete "solo" (non-default, active): b is still in default, a too.
        let unreferenced = store.delete_arrangement(tab_id, solo).unwrap();
        assert!(unreferenced.is_empty());
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.active_arrangement_id, default_id);
    }

    #[test]
    fn test_delete_arrangement_with_exclusive_pane() {
        let (mut store, tab_id, a, b) = store_with_tab();
        // Shrink default to {a} by closing b out of it, then re-adding b
        // only to a side arrangement.
        let side = store.create_arrangement(tab_id, "side", &[a, b]).unwrap();
        store.switch_arrangement(tab_id, side).unwrap();
        // Remove b from the default arrangement.
        let default_id = store.tab(tab_id).unwrap().default_arrangement().id;
        {
            let tab = store.tab_mut(tab_id).unwrap();
            let default = tab.arrangement_mut(default_id).unwrap();
            default.layout = default.layout.removing(b).unwrap();
            default.sync_visible();
            tab.recompute_panes();
        }
        let unreferenced = store.delete_arrangement(tab_id, side).unwrap();
        assert_eq!(unreferenced, vec![b]);
        assert_eq!(store.pane(b).unwrap().residency, Residency::Backgrounded);
    }

    #[test]
    fn test_resize_split_clamps() {
        let (mut store, tab_id, ..) = store_with_tab();
        let split = store
            .tab(tab_id)
            .unwrap()
            .active_arrangement()
            .layout
            .split_ids()[0];
        store.resize_split(tab_id, split, 7.0).unwrap();
        let ratio = store
            .tab(tab_id)
            .unwrap()
            .active_arrangement()
            .layout
            .split_ratio(split)
            .unwrap();
        assert!((ratio - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_drawer_single_expansion() {
        let (mut store, _, a, b) = store_with_tab();
        store.add_drawer_child(a, Pane::terminal("/tmp")).unwrap();
        store.add_drawer_child(b, Pane::terminal("/tmp")).unwrap();
        store.set_drawer_expanded(a, true).unwrap();
        store.set_drawer_expanded(b, true).unwrap();
        let expanded: Vec<PaneId> = store
            .panes
            .values()
            .filter(|p| p.drawer.as_ref().map(|d| d.is_expanded).unwrap_or(false))
            .map(|p| p.id)
            .collect();
        assert_eq!(expanded, vec![b], "expanding b collapses a");
    }

    #[test]
    fn test_drawer_cap_enforced() {
        let (mut store, _, a, _) = store_with_tab();
        for _ in 0..crate::pane::DRAWER_MAX_PANES {
            store.add_drawer_child(a, Pane::terminal("/tmp")).unwrap();
        }
        assert!(store.add_drawer_child(a, Pane::terminal("/tmp")).is_err());
    }

    #[test]
    fn test_topology_orphans_and_reassociates() {
        let (mut store, tab_id, _, b) = store_with_tab();
        let worktree = WorktreeId::new_v4();
        if let Some(pane) = store.panes.get_mut(&b) {
            pane.meta.source_kind = SourceKind::Worktree {
                worktree_id: worktree,
            };
        }
        store.apply_topology(&TopologyEvent::WorktreeMissing {
            id: worktree,
            reason: "deleted".to_string(),
        });
        assert!(matches!(
            store.pane(b).unwrap().residency,
            Residency::Orphaned { .. }
        ));
        // Orphaned panes keep their layout slot.
        assert!(store.tab(tab_id).unwrap().contains(b));

        store.apply_topology(&TopologyEvent::WorktreeRestored { id: worktree });
        assert_eq!(store.pane(b).unwrap().residency, Residency::Active);
    }

    #[test]
    fn test_repair_prunes_stale_layout_refs() {
        let (mut store, tab_id, a, b) = store_with_tab();
        store.panes.remove(&b);
        let log = store.repair();
        assert!(!log.is_empty());
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.pane_ids(), vec![a]);
        assert!(!tab.panes.contains(&b));
    }

    #[test]
    fn test_repair_drops_tab_with_empty_default() {
        let (mut store, _, a, b) = store_with_tab();
        store.panes.remove(&a);
        store.panes.remove(&b);
        store.repair();
        assert!(store.tabs.is_empty());
        assert_eq!(store.active_tab_id, None);
    }

    #[test]
    fn test_repair_restores_single_default() {
        let (mut store, tab_id, a, ..) = store_with_tab();
        store.create_arrangement(tab_id, "extra", &[a]).unwrap();
        {
            let tab = store.tab_mut(tab_id).unwrap();
            for arrangement in &mut tab.arrangements {
                arrangement.is_default = true;
            }
        }
        store.repair();
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.arrangements.iter().filter(|a| a.is_default).count(), 1);
    }

    #[test]
    fn test_repair_dedupes_pane_across_tabs() {
        let (mut store, tab_id, a, ..) = store_with_tab();
        let c = store.insert_pane(Pane::terminal("/tmp")).unwrap();
        let other = store.create_tab_with_pane(c).unwrap();
        // Force the bug: a appears in both tabs.
        {
            let tab = store.tab_mut(other).unwrap();
            let arrangement = tab.active_arrangement_mut();
            arrangement.layout = arrangement.layout.inserting(
                a,
                c,
                SplitDirection::Horizontal,
                crate::layout::InsertPosition::After,
            );
            arrangement.sync_visible();
            tab.recompute_panes();
        }
        store.repair();
        let first = store.tab(tab_id).unwrap();
        let second = store.tab(other).unwrap();
        assert!(first.contains(a), "first tab keeps the pane");
        assert!(!second.contains(a), "later tab loses the duplicate");
    }

    #[test]
    fn test_repair_is_idempotent() {
        let (mut store, _, _, b) = store_with_tab();
        store.panes.remove(&b);
        store.repair();
        let log = store.repair();
        assert!(log.is_empty(), "second pass finds nothing: {log:?}");
    }

    #[test]
    fn test_repair_fixes_residency_drift() {
        let (mut store, _, _, b) = store_with_tab();
        store.panes.get_mut(&b).unwrap().residency = Residency::Backgrounded;
        store.repair();
        assert_eq!(store.pane(b).unwrap().residency, Residency::Active);
    }

    #[test]
    fn test_repair_collapses_extra_expanded_drawers() {
        let (mut store, _, a, b) = store_with_tab();
        store.add_drawer_child(a, Pane::terminal("/tmp")).unwrap();
        store.add_drawer_child(b, Pane::terminal("/tmp")).unwrap();
        for pane in store.panes.values_mut() {
            if let Some(drawer) = &mut pane.drawer {
                drawer.is_expanded = true;
            }
        }
        store.repair();
        let expanded = store
            .panes
            .values()
            .filter(|p| p.drawer.as_ref().map(|d| d.is_expanded).unwrap_or(false))
            .count();
        assert_eq!(expanded, 1);
    }

    #[test]
    fn test_data_snapshot_roundtrip() {
        let (mut store, tab_id, _, b) = store_with_tab();
        let snapshot = store.data();
        store.close_pane(b, undo_ttl()).unwrap();
        assert_ne!(store.data(), snapshot);
        store.restore_data(snapshot.clone());
        assert_eq!(store.data(), snapshot);
        assert!(store.tab(tab_id).unwrap().contains(b));
    }

    #[test]
    fn test_action_snapshot_shape() {
        let (store, tab_id, a, b) = store_with_tab();
        let snap = store.action_snapshot(false, 3);
        assert_eq!(snap.undo_depth, 3);
        assert_eq!(snap.active_tab_id, Some(tab_id));
        let tab = snap.tab(tab_id).unwrap();
        assert_eq!(tab.visible_pane_ids, vec![a, b]);
        assert_eq!(tab.all_pane_ids, BTreeSet::from([a, b]));
        assert_eq!(tab.split_ids.len(), 1);
    }

    #[test]
    fn test_build_layout_order() {
        let ids: Vec<PaneId> = (0..3).map(|_| PaneId::new_v4()).collect();
        let layout = build_layout(&ids).unwrap();
        assert_eq!(layout.pane_ids(), ids);
        assert_eq!(build_layout(&[]), None);
    }

    #[test]
    fn test_close_pane_promotes_default_to_survivor() {
        // Default shows only {a}; side arrangement shows {a,b}. Closing a
        // empties the default, which hands default to the side arrangement.
        let (mut store, tab_id, a, b) = store_with_tab();
        let default_id = store.tab(tab_id).unwrap().default_arrangement().id;
        {
            let tab = store.tab_mut(tab_id).unwrap();
            let default = tab.arrangement_mut(default_id).unwrap();
            default.layout = default.layout.removing(b).unwrap();
            default.sync_visible();
            tab.recompute_panes();
        }
        let side = store.create_arrangement(tab_id, "side", &[a, b]).unwrap();
        store.close_pane(a, undo_ttl()).unwrap();
        let tab = store.tab(tab_id).unwrap();
        assert_eq!(tab.default_arrangement().id, side);
        assert_eq!(tab.pane_ids(), vec![b]);
    }
}
