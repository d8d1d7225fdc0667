pub mod store;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layout::{LayoutNode, PaneId, SplitDirection};
use crate::pane::{Pane, PaneContent, PaneMeta, Residency, SourceKind};
use crate::repo::RepoEntry;
use crate::tab::{Arrangement, Tab, TabId};
use crate::workspace::{WindowFrame, WorkspaceData, DEFAULT_SIDEBAR_WIDTH};

pub const SCHEMA_VERSION: u32 = 2;

/// The current on-disk document. Pretty-printed with struct field order, so
/// unchanged stores diff cleanly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceDoc {
    pub version: u32,
    pub id: uuid::Uuid,
    pub name: String,
    pub repos: Vec<RepoEntry>,
    pub panes: Vec<Pane>,
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<TabId>,
    pub sidebar_width: f64,
    pub window_frame: Option<WindowFrame>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceDoc {
    /// Snapshot the store for disk. Pending-undo panes are session-local
    /// (the undo stack does not survive a restart) and purged panes are
    /// gone by definition, so neither is written.
    pub fn from_data(data: &WorkspaceData) -> Self {
        let persisted = |pane: &&Pane| {
            matches!(
                pane.residency,
                Residency::Active | Residency::Backgrounded | Residency::Orphaned { .. }
            )
        };
        let keep: BTreeMap<PaneId, &Pane> = data
            .panes
            .values()
            .filter(persisted)
            .map(|p| (p.id, p))
            .collect();
        let panes = keep
            .values()
            .filter(|p| {
                p.parent_pane_id
                    .map(|parent| keep.contains_key(&parent))
                    .unwrap_or(true)
            })
            .map(|p| (*p).clone())
            .collect();
        Self {
            version: SCHEMA_VERSION,
            id: data.id,
            name: data.name.clone(),
            repos: data.repos.clone(),
            panes,
            tabs: data.tabs.clone(),
            active_tab_id: data.active_tab_id,
            sidebar_width: data.sidebar_width,
            window_frame: data.window_frame,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    pub fn into_data(self) -> WorkspaceData {
        WorkspaceData {
            id: self.id,
            name: self.name,
            repos: self.repos,
            panes: self.panes.into_iter().map(|p| (p.id, p)).collect(),
            tabs: self.tabs,
            active_tab_id: self.active_tab_id,
            sidebar_width: self.sidebar_width,
            window_frame: self.window_frame,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy "sessions/views" schema
// ---------------------------------------------------------------------------

/// The pre-arrangement document: sessions holding view groups of terminal
/// panes, with a layout over view ids. Migrated in memory on load; pane and
/// worktree ids survive so subsystems keyed by them stay valid.
#[derive(Clone, Debug, Deserialize)]
pub struct LegacyState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub sessions: Vec<LegacySession>,
    #[serde(default)]
    pub active_session: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacySession {
    pub name: String,
    pub layout: LegacyLayoutNode,
    pub views: Vec<LegacyView>,
    pub active_view: uuid::Uuid,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyView {
    pub id: uuid::Uuid,
    pub panes: Vec<LegacyPane>,
    #[serde(default)]
    pub active_pane: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LegacyPane {
    pub id: uuid::Uuid,
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub command: Option<String>,
    pub cwd: PathBuf,
}

/// Legacy split nodes carried no ids; migration mints fresh ones.
#[derive(Clone, Debug, Deserialize)]
pub enum LegacyLayoutNode {
    Leaf(uuid::Uuid),
    Split {
        direction: SplitDirection,
        ratio: f64,
        first: Box<LegacyLayoutNode>,
        second: Box<LegacyLayoutNode>,
    },
}

impl LegacyLayoutNode {
    /// Rebuild as a current-layout tree with leaves remapped through `map`.
    /// Leaves with no mapping (views that held no panes) are dropped.
    fn migrate(&self, map: &BTreeMap<uuid::Uuid, PaneId>) -> Option<LayoutNode> {
        match self {
            LegacyLayoutNode::Leaf(view) => map.get(view).map(|pane| LayoutNode::Leaf(*pane)),
            LegacyLayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            } => match (first.migrate(map), second.migrate(map)) {
                (Some(first), Some(second)) => {
                    Some(LayoutNode::split(*direction, *ratio, first, second))
                }
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            },
        }
    }
}

fn migrate_pane(legacy: &LegacyPane) -> Pane {
    let content = match legacy.kind.as_str() {
        "shell" | "agent" | "nvim" | "dev_server" => PaneContent::Terminal {
            command: legacy.command.clone(),
            working_directory: legacy.cwd.clone(),
        },
        "browser" => PaneContent::Browser {
            url: legacy.command.clone().unwrap_or_default(),
        },
        other => PaneContent::Unsupported {
            kind: other.to_string(),
        },
    };
    Pane {
        id: legacy.id,
        content,
        meta: PaneMeta {
            title: legacy.title.clone(),
            working_directory: legacy.cwd.clone(),
            source_kind: SourceKind::SessionRestore,
            agent_kind: (legacy.kind == "agent").then(|| legacy.kind.clone()),
        },
        residency: Residency::Active,
        drawer: None,
        parent_pane_id: None,
    }
}

/// Turn a legacy document into current-shape data. Each session becomes a
/// tab with one default arrangement. A view's first pane takes the view's
/// layout slot; the rest of the view's panes stay in the store backgrounded.
pub fn migrate_legacy(legacy: LegacyState) -> WorkspaceData {
    let mut panes: BTreeMap<PaneId, Pane> = BTreeMap::new();
    let mut tabs: Vec<Tab> = Vec::new();

    for session in &legacy.sessions {
        let mut view_to_pane: BTreeMap<uuid::Uuid, PaneId> = BTreeMap::new();
        for view in &session.views {
            for (index, legacy_pane) in view.panes.iter().enumerate() {
                let mut pane = migrate_pane(legacy_pane);
                if index == 0 {
                    view_to_pane.insert(view.id, pane.id);
                } else {
                    pane.residency = Residency::Backgrounded;
                    debug!(pane = %pane.id, view = %view.id, "legacy view tab backgrounded");
                }
                panes.insert(pane.id, pane);
            }
        }

        let Some(layout) = session.layout.migrate(&view_to_pane) else {
            continue;
        };
        let mut arrangement = Arrangement::new(crate::tab::DEFAULT_ARRANGEMENT_NAME, layout);
        arrangement.is_default = true;
        let active_pane_id = view_to_pane
            .get(&session.active_view)
            .copied()
            .or_else(|| arrangement.layout.pane_ids().first().copied());
        let mut tab = Tab {
            id: TabId::new_v4(),
            panes: arrangement.visible_pane_ids.clone(),
            active_arrangement_id: arrangement.id,
            arrangements: vec![arrangement],
            active_pane_id,
            zoomed_pane_id: None,
            minimized_pane_ids: Default::default(),
        };
        tab.recompute_panes();
        tabs.push(tab);
    }

    let active_tab_id = tabs
        .get(legacy.active_session)
        .or_else(|| tabs.first())
        .map(|t| t.id);
    let name = legacy
        .sessions
        .first()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| "workspace".to_string());
    WorkspaceData {
        id: uuid::Uuid::new_v4(),
        name,
        repos: Vec::new(),
        panes,
        tabs,
        active_tab_id,
        sidebar_width: DEFAULT_SIDEBAR_WIDTH,
        window_frame: None,
        created_at: legacy.updated_at,
        updated_at: legacy.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceState;

    fn make_data() -> WorkspaceData {
        let mut store = WorkspaceState::new("main");
        let a = store.insert_pane(Pane::terminal("/home/user")).unwrap();
        let tab = store.create_tab_with_pane(a).unwrap();
        let b = store.insert_pane(Pane::terminal("/home/user")).unwrap();
        store.insert_into_arrangement(tab, b, None).unwrap();
        store.data()
    }

    #[test]
    fn test_doc_roundtrip_preserves_identifiers() {
        let data = make_data();
        let doc = WorkspaceDoc::from_data(&data);
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: WorkspaceDoc = serde_json::from_str(&json).unwrap();
        let restored = back.into_data();
        assert_eq!(restored.id, data.id);
        assert_eq!(restored.tabs.len(), data.tabs.len());
        assert_eq!(restored.tabs[0].id, data.tabs[0].id);
        assert_eq!(
            restored.tabs[0].active_arrangement_id,
            data.tabs[0].active_arrangement_id
        );
        assert_eq!(
            restored.panes.keys().collect::<Vec<_>>(),
            data.panes.keys().collect::<Vec<_>>()
        );
        // Layout topology survives.
        assert_eq!(
            restored.tabs[0].arrangements[0].layout,
            data.tabs[0].arrangements[0].layout
        );
    }

    #[test]
    fn test_doc_skips_pending_undo_panes() {
        let mut store = WorkspaceState::from_data(make_data());
        let doomed = store.tabs[0].pane_ids()[1];
        store.close_pane(doomed, chrono::Duration::seconds(60)).unwrap();
        let doc = WorkspaceDoc::from_data(&store.data());
        assert!(doc.panes.iter().all(|p| p.id != doomed));
    }

    #[test]
    fn test_doc_version_stamp() {
        let doc = WorkspaceDoc::from_data(&make_data());
        assert_eq!(doc.version, SCHEMA_VERSION);
    }

    fn legacy_fixture() -> (LegacyState, uuid::Uuid, uuid::Uuid, uuid::Uuid) {
        let view1 = uuid::Uuid::new_v4();
        let view2 = uuid::Uuid::new_v4();
        let p1 = uuid::Uuid::new_v4();
        let p2 = uuid::Uuid::new_v4();
        let p3 = uuid::Uuid::new_v4();
        let state = LegacyState {
            version: 1,
            updated_at: Utc::now(),
            active_session: 0,
            sessions: vec![LegacySession {
                name: "proj".to_string(),
                layout: LegacyLayoutNode::Split {
                    direction: SplitDirection::Horizontal,
                    ratio: 0.6,
                    first: Box::new(LegacyLayoutNode::Leaf(view1)),
                    second: Box::new(LegacyLayoutNode::Leaf(view2)),
                },
                views: vec![
                    LegacyView {
                        id: view1,
                        active_pane: 0,
                        panes: vec![
                            LegacyPane {
                                id: p1,
                                kind: "shell".to_string(),
                                title: "shell".to_string(),
                                command: None,
                                cwd: PathBuf::from("/home/user"),
                            },
                            LegacyPane {
                                id: p2,
                                kind: "nvim".to_string(),
                                title: "nvim".to_string(),
                                command: None,
                                cwd: PathBuf::from("/home/user"),
                            },
                        ],
                    },
                    LegacyView {
                        id: view2,
                        active_pane: 0,
                        panes: vec![LegacyPane {
                            id: p3,
                            kind: "dev_server".to_string(),
                            title: "server".to_string(),
                            command: Some("npm run dev".to_string()),
                            cwd: PathBuf::from("/home/user/project"),
                        }],
                    },
                ],
                active_view: view1,
            }],
        };
        (state, p1, p2, p3)
    }

    #[test]
    fn test_legacy_migration_preserves_pane_ids() {
        let (legacy, p1, p2, p3) = legacy_fixture();
        let data = migrate_legacy(legacy);
        assert!(data.panes.contains_key(&p1));
        assert!(data.panes.contains_key(&p2));
        assert!(data.panes.contains_key(&p3));
    }

    #[test]
    fn test_legacy_migration_layout_topology() {
        let (legacy, p1, _, p3) = legacy_fixture();
        let data = migrate_legacy(legacy);
        assert_eq!(data.tabs.len(), 1);
        let tab = &data.tabs[0];
        // View slots are taken by each view's first pane, in layout order.
        assert_eq!(tab.pane_ids(), vec![p1, p3]);
        assert!(tab.arrangements[0].is_default);
        assert_eq!(tab.active_pane_id, Some(p1));
    }

    #[test]
    fn test_legacy_migration_backgrounds_extra_view_panes() {
        let (legacy, _, p2, _) = legacy_fixture();
        let data = migrate_legacy(legacy);
        assert_eq!(data.panes[&p2].residency, Residency::Backgrounded);
    }

    #[test]
    fn test_legacy_migration_maps_kinds() {
        let (legacy, p1, _, p3) = legacy_fixture();
        let data = migrate_legacy(legacy);
        assert!(matches!(
            data.panes[&p1].content,
            PaneContent::Terminal { .. }
        ));
        match &data.panes[&p3].content {
            PaneContent::Terminal { command, .. } => {
                assert_eq!(command.as_deref(), Some("npm run dev"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_legacy_unknown_kind_becomes_unsupported() {
        let (mut legacy, ..) = legacy_fixture();
        legacy.sessions[0].views[0].panes[0].kind = "whiteboard".to_string();
        let data = migrate_legacy(legacy);
        let unsupported = data
            .panes
            .values()
            .filter(|p| matches!(p.content, PaneContent::Unsupported { .. }))
            .count();
        assert_eq!(unsupported, 1);
    }

    #[test]
    fn test_legacy_empty_view_dropped_from_layout() {
        let (mut legacy, p1, ..) = legacy_fixture();
        legacy.sessions[0].views[1].panes.clear();
        let data = migrate_legacy(legacy);
        let tab = &data.tabs[0];
        assert_eq!(tab.pane_ids(), vec![p1]);
    }

    #[test]
    fn test_legacy_empty_state_yields_no_tabs() {
        let legacy = LegacyState {
            version: 1,
            updated_at: Utc::now(),
            sessions: vec![],
            active_session: 0,
        };
        let data = migrate_legacy(legacy);
        assert!(data.tabs.is_empty());
        assert_eq!(data.active_tab_id, None);
    }
}
