use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::layout::{LayoutNode, PaneId};

pub type TabId = uuid::Uuid;
pub type ArrangementId = uuid::Uuid;

pub const DEFAULT_ARRANGEMENT_NAME: &str = "default";

/// A named view over a subset of a tab's panes with its own layout.
/// `visible_pane_ids` always mirrors the layout's leaf set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub id: ArrangementId,
    pub name: String,
    pub is_default: bool,
    pub layout: LayoutNode,
    pub visible_pane_ids: BTreeSet<PaneId>,
}

impl Arrangement {
    pub fn new(name: impl Into<String>, layout: LayoutNode) -> Self {
        let visible_pane_ids = layout.pane_ids().into_iter().collect();
        Self {
            id: ArrangementId::new_v4(),
            name: name.into(),
            is_default: false,
            layout,
            visible_pane_ids,
        }
    }

    pub fn default_for(pane: PaneId) -> Self {
        let mut arr = Self::new(DEFAULT_ARRANGEMENT_NAME, LayoutNode::Leaf(pane));
        arr.is_default = true;
        arr
    }

    /// Re-derive the visible set from the layout after a structural edit.
    pub fn sync_visible(&mut self) {
        self.visible_pane_ids = self.layout.pane_ids().into_iter().collect();
    }

    pub fn contains(&self, pane: PaneId) -> bool {
        self.visible_pane_ids.contains(&pane)
    }
}

/// Pane sets that need resource work when the active arrangement changes.
/// Everything else keeps its live surface attached untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwitchTransitions {
    /// Visible before, not visible after: detach.
    pub hidden: BTreeSet<PaneId>,
    /// Newly visible, or visible-but-minimized before: attach.
    pub reattach: BTreeSet<PaneId>,
}

/// hidden   = previous_visible \ new_visible
/// reattach = new_visible \ (previous_visible \ previously_minimized)
///
/// A pane that stayed visible and was not minimized keeps its surface; a
/// minimized pane may have been detached, so it reattaches if it reappears.
pub fn switch_transitions(
    previous_visible: &BTreeSet<PaneId>,
    previously_minimized: &BTreeSet<PaneId>,
    new_visible: &BTreeSet<PaneId>,
) -> SwitchTransitions {
    let hidden = previous_visible
        .difference(new_visible)
        .copied()
        .collect();
    let kept_attached: BTreeSet<PaneId> = previous_visible
        .difference(previously_minimized)
        .copied()
        .collect();
    let reattach = new_visible
        .difference(&kept_attached)
        .copied()
        .collect();
    SwitchTransitions { hidden, reattach }
}

/// A container of panes viewed through one or more arrangements, exactly one
/// of which is the default. `panes` is the union of all arrangements'
/// layouts; zoom and minimize are transient, arrangement-local state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub panes: BTreeSet<PaneId>,
    pub arrangements: Vec<Arrangement>,
    pub active_arrangement_id: ArrangementId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pane_id: Option<PaneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoomed_pane_id: Option<PaneId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub minimized_pane_ids: BTreeSet<PaneId>,
}

impl Tab {
    pub fn new(pane: PaneId) -> Self {
        let arrangement = Arrangement::default_for(pane);
        let active_arrangement_id = arrangement.id;
        Self {
            id: TabId::new_v4(),
            panes: BTreeSet::from([pane]),
            arrangements: vec![arrangement],
            active_arrangement_id,
            active_pane_id: Some(pane),
            zoomed_pane_id: None,
            minimized_pane_ids: BTreeSet::new(),
        }
    }

    pub fn arrangement(&self, id: ArrangementId) -> Option<&Arrangement> {
        self.arrangements.iter().find(|a| a.id == id)
    }

    pub fn arrangement_mut(&mut self, id: ArrangementId) -> Option<&mut Arrangement> {
        self.arrangements.iter_mut().find(|a| a.id == id)
    }

    pub fn active_arrangement(&self) -> &Arrangement {
        self.arrangement(self.active_arrangement_id)
            .expect("active arrangement must exist")
    }

    pub fn active_arrangement_mut(&mut self) -> &mut Arrangement {
        let id = self.active_arrangement_id;
        self.arrangement_mut(id)
            .expect("active arrangement must exist")
    }

    pub fn default_arrangement(&self) -> &Arrangement {
        self.arrangements
            .iter()
            .find(|a| a.is_default)
            .expect("tab must keep a default arrangement")
    }

    /// Visible pane ids in the active arrangement's layout order.
    pub fn pane_ids(&self) -> Vec<PaneId> {
        self.active_arrangement().layout.pane_ids()
    }

    /// Restore the `panes == union of arrangement layouts` invariant.
    pub fn recompute_panes(&mut self) {
        self.panes = self
            .arrangements
            .iter()
            .flat_map(|a| a.visible_pane_ids.iter().copied())
            .collect();
    }

    pub fn contains(&self, pane: PaneId) -> bool {
        self.panes.contains(&pane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{InsertPosition, SplitDirection};

    fn set(ids: &[PaneId]) -> BTreeSet<PaneId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_new_tab_has_single_default_arrangement() {
        let pane = PaneId::new_v4();
        let tab = Tab::new(pane);
        assert_eq!(tab.arrangements.len(), 1);
        assert!(tab.arrangements[0].is_default);
        assert_eq!(tab.active_arrangement_id, tab.arrangements[0].id);
        assert_eq!(tab.active_pane_id, Some(pane));
        assert_eq!(tab.pane_ids(), vec![pane]);
    }

    #[test]
    fn test_arrangement_visible_mirrors_layout() {
        let p1 = PaneId::new_v4();
        let p2 = PaneId::new_v4();
        let layout = LayoutNode::Leaf(p1).inserting(
            p2,
            p1,
            SplitDirection::Horizontal,
            InsertPosition::After,
        );
        let arr = Arrangement::new("review", layout);
        assert_eq!(arr.visible_pane_ids, set(&[p1, p2]));
    }

    #[test]
    fn test_sync_visible_after_edit() {
        let p1 = PaneId::new_v4();
        let p2 = PaneId::new_v4();
        let mut arr = Arrangement::default_for(p1);
        arr.layout = arr.layout.inserting(
            p2,
            p1,
            SplitDirection::Vertical,
            InsertPosition::After,
        );
        arr.sync_visible();
        assert_eq!(arr.visible_pane_ids, set(&[p1, p2]));
    }

    #[test]
    fn test_recompute_panes_unions_arrangements() {
        let p1 = PaneId::new_v4();
        let p2 = PaneId::new_v4();
        let mut tab = Tab::new(p1);
        let solo = Arrangement::new("solo", LayoutNode::Leaf(p2));
        tab.arrangements.push(solo);
        tab.recompute_panes();
        assert_eq!(tab.panes, set(&[p1, p2]));
    }

    #[test]
    fn test_switch_transitions_minimized_pane_reattaches() {
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        let c = PaneId::new_v4();
        // previousVisible={A,B}, previouslyMinimized={B}, newVisible={B,C}
        let t = switch_transitions(&set(&[a, b]), &set(&[b]), &set(&[b, c]));
        assert_eq!(t.hidden, set(&[a]));
        assert_eq!(t.reattach, set(&[b, c]));
    }

    #[test]
    fn test_switch_transitions_without_minimized() {
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        let c = PaneId::new_v4();
        let t = switch_transitions(&set(&[a, b]), &BTreeSet::new(), &set(&[b, c]));
        assert_eq!(t.hidden, set(&[a]));
        assert_eq!(t.reattach, set(&[c]));
    }

    #[test]
    fn test_switch_transitions_identity_is_empty() {
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        let t = switch_transitions(&set(&[a, b]), &BTreeSet::new(), &set(&[a, b]));
        assert!(t.hidden.is_empty());
        assert!(t.reattach.is_empty());
    }

    #[test]
    fn test_switch_transitions_disjoint_sets() {
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        let t = switch_transitions(&set(&[a]), &BTreeSet::new(), &set(&[b]));
        assert_eq!(t.hidden, set(&[a]));
        assert_eq!(t.reattach, set(&[b]));
    }

    #[test]
    fn test_tab_serialization_roundtrip() {
        let tab = Tab::new(PaneId::new_v4());
        let json = serde_json::to_string_pretty(&tab).unwrap();
        let back: Tab = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tab);
    }
}
