use ratatui::layout::{Constraint, Layout, Rect};
use serde::{Deserialize, Serialize};

pub type PaneId = uuid::Uuid;
pub type SplitId = uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

/// Where a newly inserted leaf lands relative to its anchor along the split axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertPosition {
    Before,
    After,
}

pub const MIN_SPLIT_RATIO: f64 = 0.1;
pub const MAX_SPLIT_RATIO: f64 = 0.9;

/// Binary split tree over pane identifiers. A value type: every edit returns
/// a new tree, so snapshots taken for undo never alias live nodes. Split
/// nodes carry stable ids that survive structural edits elsewhere in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayoutNode {
    Leaf(PaneId),
    Split {
        id: SplitId,
        direction: SplitDirection,
        ratio: f64,
        first: Box<LayoutNode>,
        second: Box<LayoutNode>,
    },
}

impl LayoutNode {
    pub fn leaf(pane: PaneId) -> Self {
        LayoutNode::Leaf(pane)
    }

    pub fn split(
        direction: SplitDirection,
        ratio: f64,
        first: LayoutNode,
        second: LayoutNode,
    ) -> Self {
        LayoutNode::Split {
            id: SplitId::new_v4(),
            direction,
            ratio,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Replace the anchor leaf with a split holding the anchor and the new
    /// leaf, ordered by `position` along `direction`. The new split starts at
    /// ratio 0.5. Returns an unchanged tree when the anchor is not found;
    /// callers are expected to pre-validate the anchor.
    pub fn inserting(
        &self,
        new_pane: PaneId,
        at: PaneId,
        direction: SplitDirection,
        position: InsertPosition,
    ) -> LayoutNode {
        match self {
            LayoutNode::Leaf(id) if *id == at => {
                let anchor = LayoutNode::Leaf(*id);
                let fresh = LayoutNode::Leaf(new_pane);
                let (first, second) = match position {
                    InsertPosition::After => (anchor, fresh),
                    InsertPosition::Before => (fresh, anchor),
                };
                LayoutNode::split(direction, 0.5, first, second)
            }
            LayoutNode::Leaf(_) => self.clone(),
            LayoutNode::Split {
                id,
                direction: dir,
                ratio,
                first,
                second,
            } => LayoutNode::Split {
                id: *id,
                direction: *dir,
                ratio: *ratio,
                first: Box::new(first.inserting(new_pane, at, direction, position)),
                second: Box::new(second.inserting(new_pane, at, direction, position)),
            },
        }
    }

    /// Remove a leaf, promoting its sibling into the parent's place. Returns
    /// `None` when the removed leaf was the sole remaining one (the layout is
    /// now empty). Removing a pane that is not present returns the tree
    /// unchanged.
    pub fn removing(&self, pane: PaneId) -> Option<LayoutNode> {
        match self {
            LayoutNode::Leaf(id) if *id == pane => None,
            LayoutNode::Leaf(_) => Some(self.clone()),
            LayoutNode::Split {
                id,
                direction,
                ratio,
                first,
                second,
            } => {
                if first.contains(pane) {
                    match first.removing(pane) {
                        None => Some((**second).clone()),
                        Some(kept) => Some(LayoutNode::Split {
                            id: *id,
                            direction: *direction,
                            ratio: *ratio,
                            first: Box::new(kept),
                            second: second.clone(),
                        }),
                    }
                } else if second.contains(pane) {
                    match second.removing(pane) {
                        None => Some((**first).clone()),
                        Some(kept) => Some(LayoutNode::Split {
                            id: *id,
                            direction: *direction,
                            ratio: *ratio,
                            first: first.clone(),
                            second: Box::new(kept),
                        }),
                    }
                } else {
                    Some(self.clone())
                }
            }
        }
    }

    /// Replace the ratio of the split with the given id, clamped to
    /// `[MIN_SPLIT_RATIO, MAX_SPLIT_RATIO]`.
    pub fn resizing(&self, split: SplitId, ratio: f64) -> LayoutNode {
        match self {
            LayoutNode::Leaf(_) => self.clone(),
            LayoutNode::Split {
                id,
                direction,
                ratio: current,
                first,
                second,
            } => {
                let next = if *id == split {
                    ratio.clamp(MIN_SPLIT_RATIO, MAX_SPLIT_RATIO)
                } else {
                    *current
                };
                LayoutNode::Split {
                    id: *id,
                    direction: *direction,
                    ratio: next,
                    first: Box::new(first.resizing(split, ratio)),
                    second: Box::new(second.resizing(split, ratio)),
                }
            }
        }
    }

    /// Reset every split ratio to 0.5.
    pub fn equalized(&self) -> LayoutNode {
        match self {
            LayoutNode::Leaf(_) => self.clone(),
            LayoutNode::Split {
                id,
                direction,
                first,
                second,
                ..
            } => LayoutNode::Split {
                id: *id,
                direction: *direction,
                ratio: 0.5,
                first: Box::new(first.equalized()),
                second: Box::new(second.equalized()),
            },
        }
    }

    /// Find the nearest ancestor split of `pane` whose axis matches
    /// `direction`. Returns the split id and whether growing the ratio grows
    /// the pane (true when the pane sits on the first side). `None` when the
    /// pane has no ancestor on that axis.
    pub fn resize_target(
        &self,
        pane: PaneId,
        direction: SplitDirection,
    ) -> Option<(SplitId, bool)> {
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split {
                id,
                direction: dir,
                first,
                second,
                ..
            } => {
                if first.contains(pane) {
                    first
                        .resize_target(pane, direction)
                        .or_else(|| (*dir == direction).then_some((*id, true)))
                } else if second.contains(pane) {
                    second
                        .resize_target(pane, direction)
                        .or_else(|| (*dir == direction).then_some((*id, false)))
                } else {
                    None
                }
            }
        }
    }

    /// Reinsertion anchor for a leaf about to be removed: its sibling's first
    /// leaf plus the direction and side that put the leaf back where it was.
    pub fn sibling_anchor(
        &self,
        pane: PaneId,
    ) -> Option<(PaneId, SplitDirection, InsertPosition)> {
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split {
                direction,
                first,
                second,
                ..
            } => {
                if matches!(first.as_ref(), LayoutNode::Leaf(id) if *id == pane) {
                    Some((second.first_leaf(), *direction, InsertPosition::Before))
                } else if matches!(second.as_ref(), LayoutNode::Leaf(id) if *id == pane) {
                    Some((first.first_leaf(), *direction, InsertPosition::After))
                } else if first.contains(pane) {
                    first.sibling_anchor(pane)
                } else if second.contains(pane) {
                    second.sibling_anchor(pane)
                } else {
                    None
                }
            }
        }
    }

    /// All pane ids in left-to-right, top-to-bottom order. This ordering is
    /// the rendering and default tab ordering order.
    pub fn pane_ids(&self) -> Vec<PaneId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<PaneId>) {
        match self {
            LayoutNode::Leaf(id) => ids.push(*id),
            LayoutNode::Split { first, second, .. } => {
                first.collect_ids(ids);
                second.collect_ids(ids);
            }
        }
    }

    pub fn contains(&self, pane: PaneId) -> bool {
        match self {
            LayoutNode::Leaf(id) => *id == pane,
            LayoutNode::Split { first, second, .. } => {
                first.contains(pane) || second.contains(pane)
            }
        }
    }

    pub fn first_leaf(&self) -> PaneId {
        match self {
            LayoutNode::Leaf(id) => *id,
            LayoutNode::Split { first, .. } => first.first_leaf(),
        }
    }

    pub fn split_ids(&self) -> Vec<SplitId> {
        let mut ids = Vec::new();
        self.collect_split_ids(&mut ids);
        ids
    }

    fn collect_split_ids(&self, ids: &mut Vec<SplitId>) {
        if let LayoutNode::Split {
            id, first, second, ..
        } = self
        {
            ids.push(*id);
            first.collect_split_ids(ids);
            second.collect_split_ids(ids);
        }
    }

    /// Ratio of the split with the given id, if present.
    pub fn split_ratio(&self, split: SplitId) -> Option<f64> {
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split {
                id,
                ratio,
                first,
                second,
                ..
            } => {
                if *id == split {
                    Some(*ratio)
                } else {
                    first
                        .split_ratio(split)
                        .or_else(|| second.split_ratio(split))
                }
            }
        }
    }

    /// Resolve the layout tree into a flat list of (PaneId, Rect) pairs.
    pub fn resolve(&self, area: Rect) -> Vec<(PaneId, Rect)> {
        let mut result = Vec::new();
        self.resolve_inner(area, &mut result);
        result
    }

    fn resolve_inner(&self, area: Rect, result: &mut Vec<(PaneId, Rect)>) {
        match self {
            LayoutNode::Leaf(id) => {
                result.push((*id, area));
            }
            LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
                ..
            } => {
                let ratio_pct = (*ratio * 100.0) as u32;
                let remainder = 100 - ratio_pct;
                let chunks = match direction {
                    SplitDirection::Horizontal => Layout::horizontal([
                        Constraint::Percentage(ratio_pct as u16),
                        Constraint::Percentage(remainder as u16),
                    ])
                    .split(area),
                    SplitDirection::Vertical => Layout::vertical([
                        Constraint::Percentage(ratio_pct as u16),
                        Constraint::Percentage(remainder as u16),
                    ])
                    .split(area),
                };
                first.resolve_inner(chunks[0], result);
                second.resolve_inner(chunks[1], result);
            }
        }
    }
}
