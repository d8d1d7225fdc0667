use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::action::{self, Action, ActionError, InsertAnchor, Resolved};
use crate::config::Config;
use crate::layout::PaneId;
use crate::pane::{Pane, PaneContent, PaneMeta};
use crate::registry::ViewRegistry;
use crate::repo::TopologyEvent;
use crate::session::store::Persister;
use crate::session::WorkspaceDoc;
use crate::surface::{DetachReason, ResourceId, SurfaceHost};
use crate::tab::TabId;
use crate::undo::{CloseEntry, ClosedPane, ClosedTab, UndoStack};
use crate::workspace::WorkspaceState;

/// What a dispatched action did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// A resource failure undid the mutation; the store matches its
    /// pre-action state.
    RolledBack,
    Noop,
}

/// Applies canonical actions to the store and drives the surface
/// collaborator. This is the single place that awaits the collaborator: an
/// action either completes or rolls back before control returns, so no pane
/// is ever referenced by a layout without a resource outcome.
pub struct Coordinator<S: SurfaceHost> {
    pub store: WorkspaceState,
    pub registry: ViewRegistry,
    surfaces: S,
    resources: HashMap<PaneId, ResourceId>,
    undo: UndoStack,
    persister: Option<Persister>,
    management_mode: bool,
    undo_ttl: Duration,
}

impl<S: SurfaceHost> Coordinator<S> {
    pub fn new(store: WorkspaceState, surfaces: S, config: &Config) -> Self {
        Self {
            store,
            registry: ViewRegistry::new(),
            surfaces,
            resources: HashMap::new(),
            undo: UndoStack::new(config.undo.stack_cap),
            persister: None,
            management_mode: false,
            undo_ttl: Duration::seconds(config.undo.ttl_secs),
        }
    }

    /// Attach the debounced writer. Without one the coordinator runs purely
    /// in memory (tests, ephemeral sessions).
    pub fn attach_persister(&mut self, persister: Persister) {
        self.persister = Some(persister);
    }

    pub fn set_management_mode(&mut self, on: bool) {
        self.management_mode = on;
    }

    pub fn management_mode(&self) -> bool {
        self.management_mode
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn resource_for(&self, pane: PaneId) -> Option<ResourceId> {
        self.resources.get(&pane).copied()
    }

    /// Suspend-termination guard: the host must not be killed while this is
    /// true; a flush (or the debounce firing) releases it.
    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
            || self
                .persister
                .as_ref()
                .map(|p| p.is_dirty())
                .unwrap_or(false)
    }

    /// Cancel any pending debounce and write synchronously.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(persister) = &self.persister {
            let doc = WorkspaceDoc::from_data(&self.store.data());
            persister.flush(&doc)?;
        }
        self.store.mark_clean();
        Ok(())
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            persister.schedule(WorkspaceDoc::from_data(&self.store.data()));
        }
    }

    /// Validate, canonicalize, and execute one action.
    pub async fn dispatch(&mut self, action: Action) -> Result<DispatchOutcome, ActionError> {
        let snapshot = self
            .store
            .action_snapshot(self.management_mode, self.undo.len());
        let action = match action::resolve(&snapshot, action) {
            Ok(Resolved::Noop) => return Ok(DispatchOutcome::Noop),
            Ok(Resolved::Execute(action)) => action,
            Err(err) => {
                warn!(error = %err, "action rejected");
                return Err(err);
            }
        };
        debug!(action = ?action, "executing");
        let outcome = self.execute(action).await?;
        if outcome != DispatchOutcome::Noop {
            self.persist();
        }
        Ok(outcome)
    }

    async fn execute(&mut self, action: Action) -> Result<DispatchOutcome, ActionError> {
        match action {
            Action::OpenTab { content, meta } => self.open_tab(content, meta).await,
            Action::OpenPane {
                tab_id,
                content,
                meta,
                anchor,
            } => self.open_pane(tab_id, content, meta, anchor).await,
            Action::ClosePane { pane_id } => self.close_pane(pane_id),
            Action::CloseTab { tab_id } => self.close_tab(tab_id),
            Action::BackgroundPane { pane_id } => self.background_pane(pane_id),
            Action::ReactivatePane {
                pane_id,
                tab_id,
                anchor,
            } => self.reactivate_pane(pane_id, tab_id, anchor).await,
            Action::SelectTab { tab_id } => {
                self.store.select_tab(tab_id)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::SelectPane { pane_id } => {
                self.store.select_pane(pane_id)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::ResizeSplit {
                tab_id,
                split_id,
                ratio,
            } => {
                self.store.resize_split(tab_id, split_id, ratio)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::EqualizeLayout { tab_id } => {
                self.store.equalize_layout(tab_id)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::ToggleZoom { pane_id } => {
                self.store.toggle_zoom(pane_id)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::MinimizePane { pane_id } => {
                self.store.minimize_pane(pane_id)?;
                if let Some(resource) = self.resources.get(&pane_id) {
                    self.surfaces.detach(*resource, DetachReason::Minimized);
                }
                Ok(DispatchOutcome::Applied)
            }
            Action::RestorePane { pane_id } => {
                self.store.restore_minimized(pane_id)?;
                self.attach_view(pane_id);
                Ok(DispatchOutcome::Applied)
            }
            Action::CreateArrangement {
                tab_id,
                name,
                visible,
            } => {
                self.store.create_arrangement(tab_id, name, &visible)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::RenameArrangement {
                tab_id,
                arrangement_id,
                name,
            } => {
                self.store.rename_arrangement(tab_id, arrangement_id, name)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::DeleteArrangement {
                tab_id,
                arrangement_id,
            } => {
                let unreferenced = self.store.delete_arrangement(tab_id, arrangement_id)?;
                for pane_id in unreferenced {
                    self.detach_pane(pane_id, DetachReason::Backgrounded);
                }
                Ok(DispatchOutcome::Applied)
            }
            Action::SwitchArrangement {
                tab_id,
                arrangement_id,
            } => self.switch_arrangement(tab_id, arrangement_id),
            Action::AddDrawerPane {
                parent_pane_id,
                content,
                meta,
            } => self.add_drawer_pane(parent_pane_id, content, meta).await,
            Action::ToggleDrawer { parent_pane_id } => {
                self.store.toggle_drawer(parent_pane_id)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::UpdatePaneMeta {
                pane_id,
                title,
                working_directory,
            } => {
                self.store
                    .update_pane_meta(pane_id, title, working_directory)?;
                Ok(DispatchOutcome::Applied)
            }
            Action::Undo => self.undo_close().await,
        }
    }

    // ------------------------------------------------------------------
    // Creation paths (optimistic mutation + rollback)
    // ------------------------------------------------------------------

    async fn open_tab(
        &mut self,
        content: PaneContent,
        meta: PaneMeta,
    ) -> Result<DispatchOutcome, ActionError> {
        let before = self.store.data();
        let pane = Pane::new(content, meta);
        let pane_id = pane.id;
        self.store.insert_pane(pane)?;
        self.store.create_tab_with_pane(pane_id)?;
        self.finish_creation(pane_id, before).await
    }

    async fn open_pane(
        &mut self,
        tab_id: TabId,
        content: PaneContent,
        meta: PaneMeta,
        anchor: Option<InsertAnchor>,
    ) -> Result<DispatchOutcome, ActionError> {
        let before = self.store.data();
        let pane = Pane::new(content, meta);
        let pane_id = pane.id;
        self.store.insert_pane(pane)?;
        self.store.insert_into_arrangement(tab_id, pane_id, anchor)?;
        self.finish_creation(pane_id, before).await
    }

    async fn add_drawer_pane(
        &mut self,
        parent_pane_id: PaneId,
        content: PaneContent,
        meta: PaneMeta,
    ) -> Result<DispatchOutcome, ActionError> {
        let before = self.store.data();
        let pane = Pane::new(content, meta);
        let pane_id = self.store.add_drawer_child(parent_pane_id, pane)?;
        self.finish_creation(pane_id, before).await
    }

    /// Shared tail of every pane-creation action: acquire the live resource,
    /// or put the store back exactly as it was.
    async fn finish_creation(
        &mut self,
        pane_id: PaneId,
        before: crate::workspace::WorkspaceData,
    ) -> Result<DispatchOutcome, ActionError> {
        let (content, meta) = {
            let pane = self.store.pane(pane_id).expect("just created");
            (pane.content.clone(), pane.meta.clone())
        };
        if !content.needs_surface() {
            return Ok(DispatchOutcome::Applied);
        }
        match self.surfaces.create_surface(&content, &meta).await {
            Ok(handle) => {
                self.resources.insert(pane_id, handle.resource_id);
                self.attach_view(pane_id);
                Ok(DispatchOutcome::Applied)
            }
            Err(err) => {
                warn!(pane = %pane_id, error = %err, "surface creation failed, rolling back");
                // Idempotent against a resource that raced the rollback.
                if let Some(resource) = self.resources.remove(&pane_id) {
                    self.surfaces.destroy(resource);
                }
                self.registry.unregister(pane_id);
                self.store.restore_data(before);
                Ok(DispatchOutcome::RolledBack)
            }
        }
    }

    fn attach_view(&mut self, pane_id: PaneId) {
        if let Some(resource) = self.resources.get(&pane_id).copied() {
            if let Some(view) = self.surfaces.attach(resource, pane_id) {
                self.registry.register(view, pane_id);
            }
        }
    }

    fn detach_pane(&mut self, pane_id: PaneId, reason: DetachReason) {
        if let Some(resource) = self.resources.get(&pane_id).copied() {
            self.surfaces.detach(resource, reason);
        }
        self.registry.unregister(pane_id);
    }

    // ------------------------------------------------------------------
    // Close, undo, garbage collection
    // ------------------------------------------------------------------

    fn close_pane(&mut self, pane_id: PaneId) -> Result<DispatchOutcome, ActionError> {
        let is_drawer_child = self
            .store
            .pane(pane_id)
            .ok_or(ActionError::StaleId(pane_id))?
            .is_drawer_child();
        let closed = if is_drawer_child {
            self.store.close_drawer_child(pane_id, self.undo_ttl)?
        } else {
            self.store.close_pane(pane_id, self.undo_ttl)?
        };
        self.detach_pane(pane_id, DetachReason::Closing);
        for child in &closed.drawer_children {
            self.detach_pane(child.id, DetachReason::Closing);
        }
        self.push_undo(CloseEntry::Pane(closed));
        Ok(DispatchOutcome::Applied)
    }

    /// Teardown reaches every pane of every arrangement, drawer children
    /// included, before the tab leaves the store.
    fn close_tab(&mut self, tab_id: TabId) -> Result<DispatchOutcome, ActionError> {
        let closed = self.store.close_tab(tab_id, self.undo_ttl)?;
        for pane in &closed.panes {
            self.detach_pane(pane.id, DetachReason::Closing);
        }
        self.push_undo(CloseEntry::Tab(closed));
        Ok(DispatchOutcome::Applied)
    }

    fn background_pane(&mut self, pane_id: PaneId) -> Result<DispatchOutcome, ActionError> {
        self.store.background_pane(pane_id)?;
        self.detach_pane(pane_id, DetachReason::Backgrounded);
        Ok(DispatchOutcome::Applied)
    }

    async fn reactivate_pane(
        &mut self,
        pane_id: PaneId,
        tab_id: TabId,
        anchor: Option<InsertAnchor>,
    ) -> Result<DispatchOutcome, ActionError> {
        let before = self.store.data();
        self.store.reactivate_pane(pane_id, tab_id, anchor)?;
        let (content, meta) = {
            let pane = self.store.pane(pane_id).expect("reactivated");
            (pane.content.clone(), pane.meta.clone())
        };
        match self.acquire_surface(pane_id, &content, &meta).await {
            Ok(()) => {
                self.attach_view(pane_id);
                Ok(DispatchOutcome::Applied)
            }
            Err(err) => {
                // Re-background rather than leave the pane half-attached.
                warn!(pane = %pane_id, error = %err, "reactivation failed, re-backgrounding");
                self.store.restore_data(before);
                Ok(DispatchOutcome::RolledBack)
            }
        }
    }

    fn switch_arrangement(
        &mut self,
        tab_id: TabId,
        arrangement_id: crate::tab::ArrangementId,
    ) -> Result<DispatchOutcome, ActionError> {
        let transitions = self.store.switch_arrangement(tab_id, arrangement_id)?;
        // Views stay registered across switches; only the live surfaces are
        // detached and reattached.
        for pane_id in &transitions.hidden {
            if let Some(resource) = self.resources.get(pane_id) {
                self.surfaces
                    .detach(*resource, DetachReason::ArrangementSwitch);
            }
        }
        for pane_id in &transitions.reattach {
            self.attach_view(*pane_id);
        }
        Ok(DispatchOutcome::Applied)
    }

    fn push_undo(&mut self, entry: CloseEntry) {
        if let Some(evicted) = self.undo.push(entry) {
            self.gc_entry(evicted);
        }
    }

    /// Destroy the panes an evicted entry referenced, unless a live tab or a
    /// remaining undo entry can still reach them.
    fn gc_entry(&mut self, entry: CloseEntry) {
        let shielded: BTreeSet<PaneId> = self.undo.referenced_panes();
        for pane_id in entry.pane_ids() {
            if shielded.contains(&pane_id) {
                continue;
            }
            if self.store.tab_of_pane(pane_id).is_some() {
                continue;
            }
            if let Some(resource) = self.resources.remove(&pane_id) {
                self.surfaces.destroy(resource);
            }
            self.registry.unregister(pane_id);
            self.store.purge_pane(pane_id);
            info!(pane = %pane_id, "pane garbage-collected from evicted undo entry");
        }
    }

    /// Drop undo entries whose restore window lapsed and reclaim their
    /// resources.
    pub fn expire_undo(&mut self, now: DateTime<Utc>) {
        let expired = self.undo.drain_expired(now);
        if expired.is_empty() {
            return;
        }
        for entry in expired {
            self.gc_entry(entry);
        }
        self.persist();
    }

    /// Reuse the resource kept from the close, ask the backend for its
    /// retained one, or create afresh, in that order.
    async fn acquire_surface(
        &mut self,
        pane_id: PaneId,
        content: &PaneContent,
        meta: &PaneMeta,
    ) -> Result<(), crate::surface::SurfaceError> {
        if !content.needs_surface() || self.resources.contains_key(&pane_id) {
            return Ok(());
        }
        if let Some(handle) = self.surfaces.undo_close() {
            self.resources.insert(pane_id, handle.resource_id);
            return Ok(());
        }
        let handle = self.surfaces.create_surface(content, meta).await?;
        self.resources.insert(pane_id, handle.resource_id);
        Ok(())
    }

    async fn undo_close(&mut self) -> Result<DispatchOutcome, ActionError> {
        let Some(entry) = self.undo.pop() else {
            return Ok(DispatchOutcome::Noop);
        };
        match entry {
            CloseEntry::Pane(closed) => self.undo_pane(closed).await,
            CloseEntry::Tab(closed) => self.undo_tab(closed).await,
        }
    }

    async fn undo_pane(&mut self, closed: ClosedPane) -> Result<DispatchOutcome, ActionError> {
        let ClosedPane {
            pane,
            drawer_children,
            tab_id,
            anchor,
        } = closed;
        let pane_id = pane.id;

        // A drawer child goes back into its parent's drawer; if the parent
        // is gone the snapshot is unrestorable.
        if let Some(parent) = pane.parent_pane_id {
            if self.store.pane(parent).is_none() {
                warn!(pane = %pane_id, parent = %parent, "undo dropped: drawer parent is gone");
                self.discard_closed_pane(pane_id);
                return Ok(DispatchOutcome::RolledBack);
            }
            return match self.acquire_surface(pane_id, &pane.content, &pane.meta).await {
                Ok(()) => {
                    self.store.restore_drawer_child(pane)?;
                    self.attach_view(pane_id);
                    Ok(DispatchOutcome::Applied)
                }
                Err(err) => {
                    warn!(pane = %pane_id, error = %err, "undo dropped: surface unavailable");
                    self.discard_closed_pane(pane_id);
                    Ok(DispatchOutcome::RolledBack)
                }
            };
        }

        if self.store.tab(tab_id).is_none() {
            // The tab went away after the close; park the pane in a new tab.
            return match self.acquire_surface(pane_id, &pane.content, &pane.meta).await {
                Ok(()) => {
                    self.store.restore_tab_for_pane(pane, drawer_children);
                    self.attach_view(pane_id);
                    Ok(DispatchOutcome::Applied)
                }
                Err(err) => {
                    warn!(pane = %pane_id, error = %err, "undo dropped: surface unavailable");
                    self.discard_closed_pane(pane_id);
                    Ok(DispatchOutcome::RolledBack)
                }
            };
        }

        match self.acquire_surface(pane_id, &pane.content, &pane.meta).await {
            Ok(()) => {
                self.store
                    .restore_pane(pane, drawer_children, tab_id, anchor)?;
                self.attach_view(pane_id);
                Ok(DispatchOutcome::Applied)
            }
            Err(err) => {
                warn!(pane = %pane_id, error = %err, "undo dropped: surface unavailable");
                self.discard_closed_pane(pane_id);
                Ok(DispatchOutcome::RolledBack)
            }
        }
    }

    fn discard_closed_pane(&mut self, pane_id: PaneId) {
        if let Some(resource) = self.resources.remove(&pane_id) {
            self.surfaces.destroy(resource);
        }
        self.registry.unregister(pane_id);
        self.store.purge_pane(pane_id);
    }

    /// Restore a closed tab pane by pane. Panes whose resource cannot be
    /// re-acquired are dropped from the restored tab; the tab itself is
    /// dropped only when nothing survives. If the snapshot's active
    /// arrangement emptied but another still has content, the tab survives
    /// with its active arrangement repointed.
    async fn undo_tab(&mut self, closed: ClosedTab) -> Result<DispatchOutcome, ActionError> {
        let ClosedTab {
            mut tab,
            panes,
            original_index,
        } = closed;

        let mut restored: Vec<Pane> = Vec::new();
        let mut failed: BTreeSet<PaneId> = BTreeSet::new();
        for pane in panes {
            if pane
                .parent_pane_id
                .map(|parent| failed.contains(&parent))
                .unwrap_or(false)
            {
                // A failed parent takes its drawer children with it.
                failed.insert(pane.id);
                continue;
            }
            match self.acquire_surface(pane.id, &pane.content, &pane.meta).await {
                Ok(()) => restored.push(pane),
                Err(err) => {
                    warn!(pane = %pane.id, error = %err, "restored tab drops pane");
                    failed.insert(pane.id);
                }
            }
        }

        // Prune failed panes out of the snapshot's arrangements and drawers.
        for pane in &mut restored {
            if let Some(drawer) = &mut pane.drawer {
                for failed_id in &failed {
                    if drawer.layout.contains(*failed_id) {
                        match drawer.layout.removing(*failed_id) {
                            Some(layout) => drawer.layout = layout,
                            None => {
                                pane.drawer = None;
                                break;
                            }
                        }
                    }
                }
                if let Some(drawer) = &mut pane.drawer {
                    drawer.pane_ids.retain(|id| !failed.contains(id));
                    if drawer
                        .active_pane_id
                        .map(|id| failed.contains(&id))
                        .unwrap_or(false)
                    {
                        drawer.active_pane_id = drawer.pane_ids.first().copied();
                    }
                }
            }
        }
        let mut emptied: Vec<crate::tab::ArrangementId> = Vec::new();
        for arrangement in &mut tab.arrangements {
            let mut layout = Some(arrangement.layout.clone());
            for failed_id in &failed {
                layout = layout.and_then(|l| l.removing(*failed_id));
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

        if tab.arrangements.is_empty() {
            // Every pane failed; the tab is not restored at all.
            for pane in restored {
                failed.insert(pane.id);
            }
            for pane_id in failed {
                self.discard_closed_pane(pane_id);
            }
            warn!(tab = %tab.id, "undo dropped: no pane could be restored");
            return Ok(DispatchOutcome::RolledBack);
        }

        if default_emptied {
            tab.arrangements[0].is_default = true;
        }
        if tab.arrangement(tab.active_arrangement_id).is_none() {
            tab.active_arrangement_id = tab.default_arrangement().id;
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
        tab.zoomed_pane_id = None;
        tab.minimized_pane_ids.clear();

        for pane_id in failed {
            self.discard_closed_pane(pane_id);
        }
        let restored_ids: Vec<PaneId> = restored.iter().map(|p| p.id).collect();
        self.store.restore_tab(tab, restored, original_index);
        for pane_id in restored_ids {
            self.attach_view(pane_id);
        }
        Ok(DispatchOutcome::Applied)
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Merge a watcher report. Orphaned panes keep their layout slots but
    /// give up their views; re-associated panes get their surfaces back.
    pub fn apply_topology(&mut self, event: &TopologyEvent) -> Vec<String> {
        let affected: Vec<PaneId> = match event {
            TopologyEvent::WorktreeMissing { id, .. }
            | TopologyEvent::WorktreeRestored { id } => self
                .store
                .panes
                .values()
                .filter(|p| p.meta.worktree_id() == Some(*id))
                .map(|p| p.id)
                .collect(),
            TopologyEvent::RepoMoved { .. } => Vec::new(),
        };
        let repairs = self.store.apply_topology(event);
        match event {
            TopologyEvent::WorktreeMissing { .. } => {
                for pane_id in affected {
                    self.detach_pane(pane_id, DetachReason::Orphaned);
                }
            }
            TopologyEvent::WorktreeRestored { .. } => {
                for pane_id in affected {
                    self.attach_view(pane_id);
                }
            }
            TopologyEvent::RepoMoved { .. } => {}
        }
        self.persist();
        repairs
    }
}
