use std::collections::HashMap;

use ratatui::layout::Rect;

use crate::layout::{LayoutNode, PaneId, SplitDirection};
use crate::surface::ViewHandle;

/// Runtime-only map from panes to their attached views. Never persisted;
/// rebuilt as surfaces attach after load.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: HashMap<PaneId, ViewHandle>,
}

/// The on-screen split tree for an arrangement, holding only panes that have
/// a registered view.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderNode {
    View {
        pane_id: PaneId,
        view: ViewHandle,
    },
    Split {
        direction: SplitDirection,
        ratio: f64,
        first: Box<RenderNode>,
        second: Box<RenderNode>,
    },
}

impl RenderNode {
    pub fn pane_ids(&self) -> Vec<PaneId> {
        match self {
            RenderNode::View { pane_id, .. } => vec![*pane_id],
            RenderNode::Split { first, second, .. } => {
                let mut ids = first.pane_ids();
                ids.extend(second.pane_ids());
                ids
            }
        }
    }
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, view: ViewHandle, pane: PaneId) {
        self.views.insert(pane, view);
    }

    pub fn unregister(&mut self, pane: PaneId) -> Option<ViewHandle> {
        self.views.remove(&pane)
    }

    pub fn view(&self, pane: PaneId) -> Option<ViewHandle> {
        self.views.get(&pane).copied()
    }

    pub fn is_registered(&self, pane: PaneId) -> bool {
        self.views.contains_key(&pane)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Project a layout onto the registered views. A split with one missing
    /// branch promotes the surviving branch; `None` only when every leaf is
    /// missing.
    pub fn render_tree(&self, layout: &LayoutNode) -> Option<RenderNode> {
        match layout {
            LayoutNode::Leaf(pane) => self.view(*pane).map(|view| RenderNode::View {
                pane_id: *pane,
                view,
            }),
            LayoutNode::Split {
                direction,
                ratio,
                first,
                second,
                ..
            } => match (self.render_tree(first), self.render_tree(second)) {
                (Some(first), Some(second)) => Some(RenderNode::Split {
                    direction: *direction,
                    ratio: *ratio,
                    first: Box::new(first),
                    second: Box::new(second),
                }),
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            },
        }
    }

    /// Geometry for hosts that place views themselves: the layout resolved
    /// against an on-screen area, restricted to panes with registered views.
    pub fn resolve_rects(&self, layout: &LayoutNode, area: Rect) -> Vec<(PaneId, Rect)> {
        layout
            .resolve(area)
            .into_iter()
            .filter(|(pane, _)| self.is_registered(*pane))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ViewRegistry::new();
        let pane = PaneId::new_v4();
        let view = ViewHandle::new();
        registry.register(view, pane);
        assert_eq!(registry.view(pane), Some(view));
        assert!(registry.is_registered(pane));
        assert_eq!(registry.unregister(pane), Some(view));
        assert!(!registry.is_registered(pane));
    }

    #[test]
    fn test_render_tree_full() {
        let mut registry = ViewRegistry::new();
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        registry.register(ViewHandle::new(), a);
        registry.register(ViewHandle::new(), b);
        let layout = LayoutNode::split(
            SplitDirection::Horizontal,
            0.6,
            LayoutNode::Leaf(a),
            LayoutNode::Leaf(b),
        );
        let tree = registry.render_tree(&layout).unwrap();
        assert_eq!(tree.pane_ids(), vec![a, b]);
        if let RenderNode::Split { ratio, .. } = tree {
            assert!((ratio - 0.6).abs() < f64::EPSILON);
        } else {
            panic!("expected split");
        }
    }

    #[test]
    fn test_render_tree_promotes_surviving_branch() {
        // Split(A, Split(B, C)) with only A and C registered → Split(A, C).
        let mut registry = ViewRegistry::new();
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        let c = PaneId::new_v4();
        registry.register(ViewHandle::new(), a);
        registry.register(ViewHandle::new(), c);
        let layout = LayoutNode::split(
            SplitDirection::Horizontal,
            0.5,
            LayoutNode::Leaf(a),
            LayoutNode::split(
                SplitDirection::Vertical,
                0.5,
                LayoutNode::Leaf(b),
                LayoutNode::Leaf(c),
            ),
        );
        let tree = registry.render_tree(&layout).unwrap();
        assert_eq!(tree.pane_ids(), vec![a, c]);
        match tree {
            RenderNode::Split { first, second, .. } => {
                assert!(matches!(*first, RenderNode::View { pane_id, .. } if pane_id == a));
                assert!(matches!(*second, RenderNode::View { pane_id, .. } if pane_id == c));
            }
            RenderNode::View { .. } => panic!("expected split"),
        }
    }

    #[test]
    fn test_render_tree_single_survivor_is_leaf() {
        let mut registry = ViewRegistry::new();
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        registry.register(ViewHandle::new(), b);
        let layout = LayoutNode::split(
            SplitDirection::Vertical,
            0.5,
            LayoutNode::Leaf(a),
            LayoutNode::Leaf(b),
        );
        let tree = registry.render_tree(&layout).unwrap();
        assert!(matches!(tree, RenderNode::View { pane_id, .. } if pane_id == b));
    }

    #[test]
    fn test_render_tree_empty_when_all_missing() {
        let registry = ViewRegistry::new();
        let layout = LayoutNode::split(
            SplitDirection::Horizontal,
            0.5,
            LayoutNode::Leaf(PaneId::new_v4()),
            LayoutNode::Leaf(PaneId::new_v4()),
        );
        assert_eq!(registry.render_tree(&layout), None);
    }

    #[test]
    fn test_resolve_rects_skips_unregistered() {
        let mut registry = ViewRegistry::new();
        let a = PaneId::new_v4();
        let b = PaneId::new_v4();
        registry.register(ViewHandle::new(), a);
        let layout = LayoutNode::split(
            SplitDirection::Horizontal,
            0.5,
            LayoutNode::Leaf(a),
            LayoutNode::Leaf(b),
        );
        let rects = registry.resolve_rects(&layout, Rect::new(0, 0, 100, 40));
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].0, a);
    }
}
