use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::action::InsertAnchor;
use crate::layout::PaneId;
use crate::pane::{Pane, Residency};
use crate::tab::{Tab, TabId};

/// Snapshot of a closed pane: enough to put it back where it was.
#[derive(Clone, Debug)]
pub struct ClosedPane {
    pub pane: Pane,
    pub drawer_children: Vec<Pane>,
    pub tab_id: TabId,
    pub anchor: Option<InsertAnchor>,
}

/// Snapshot of a closed tab, drawer children included.
#[derive(Clone, Debug)]
pub struct ClosedTab {
    pub tab: Tab,
    pub panes: Vec<Pane>,
    pub original_index: usize,
}

#[derive(Clone, Debug)]
pub enum CloseEntry {
    Tab(ClosedTab),
    Pane(ClosedPane),
}

impl CloseEntry {
    /// Every pane id the entry references.
    pub fn pane_ids(&self) -> Vec<PaneId> {
        match self {
            CloseEntry::Tab(closed) => closed.panes.iter().map(|p| p.id).collect(),
            CloseEntry::Pane(closed) => {
                let mut ids = vec![closed.pane.id];
                ids.extend(closed.drawer_children.iter().map(|p| p.id));
                ids
            }
        }
    }

    /// True when every referenced pane's undo window has lapsed.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        let lapsed = |pane: &Pane| match pane.residency {
            Residency::PendingUndo { expires_at } => expires_at <= now,
            _ => true,
        };
        match self {
            CloseEntry::Tab(closed) => closed.panes.iter().all(lapsed),
            CloseEntry::Pane(closed) => {
                lapsed(&closed.pane) && closed.drawer_children.iter().all(lapsed)
            }
        }
    }
}

/// Bounded LIFO of close snapshots. Pushing past the cap evicts the oldest
/// entry, which the coordinator then garbage-collects.
#[derive(Debug)]
pub struct UndoStack {
    entries: VecDeque<CloseEntry>,
    cap: usize,
}

impl UndoStack {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Push a close snapshot; returns the evicted oldest entry when the
    /// stack was full.
    pub fn push(&mut self, entry: CloseEntry) -> Option<CloseEntry> {
        self.entries.push_back(entry);
        if self.entries.len() > self.cap {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn pop(&mut self) -> Option<CloseEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pane ids referenced by any remaining entry. Used to keep eviction GC
    /// from destroying panes a later undo could still restore.
    pub fn referenced_panes(&self) -> BTreeSet<PaneId> {
        self.entries
            .iter()
            .flat_map(|e| e.pane_ids())
            .collect()
    }

    /// Remove entries whose undo window fully lapsed, oldest first.
    pub fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<CloseEntry> {
        let mut expired = Vec::new();
        while let Some(front) = self.entries.front() {
            if front.expired(now) {
                expired.push(self.entries.pop_front().expect("front exists"));
            } else {
                break;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pane_entry(expires_at: DateTime<Utc>) -> CloseEntry {
        let mut pane = Pane::terminal("/tmp");
        pane.residency = Residency::PendingUndo { expires_at };
        CloseEntry::Pane(ClosedPane {
            pane,
            drawer_children: Vec::new(),
            tab_id: TabId::new_v4(),
            anchor: None,
        })
    }

    #[test]
    fn test_push_under_cap_evicts_nothing() {
        let mut stack = UndoStack::new(3);
        let far = Utc::now() + Duration::seconds(300);
        assert!(stack.push(pane_entry(far)).is_none());
        assert!(stack.push(pane_entry(far)).is_none());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_push_past_cap_evicts_oldest() {
        let mut stack = UndoStack::new(2);
        let far = Utc::now() + Duration::seconds(300);
        let first = pane_entry(far);
        let first_id = first.pane_ids()[0];
        stack.push(first);
        stack.push(pane_entry(far));
        let evicted = stack.push(pane_entry(far)).expect("oldest evicted");
        assert_eq!(evicted.pane_ids()[0], first_id);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pop_is_lifo() {
        let mut stack = UndoStack::new(4);
        let far = Utc::now() + Duration::seconds(300);
        let a = pane_entry(far);
        let b = pane_entry(far);
        let b_id = b.pane_ids()[0];
        stack.push(a);
        stack.push(b);
        assert_eq!(stack.pop().unwrap().pane_ids()[0], b_id);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_pop_empty_is_none() {
        let mut stack = UndoStack::new(2);
        assert!(stack.pop().is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_referenced_panes_spans_entries() {
        let mut stack = UndoStack::new(4);
        let far = Utc::now() + Duration::seconds(300);
        let a = pane_entry(far);
        let b = pane_entry(far);
        let ids: BTreeSet<PaneId> = a.pane_ids().into_iter().chain(b.pane_ids()).collect();
        stack.push(a);
        stack.push(b);
        assert_eq!(stack.referenced_panes(), ids);
    }

    #[test]
    fn test_drain_expired_stops_at_live_entry() {
        let mut stack = UndoStack::new(4);
        let past = Utc::now() - Duration::seconds(10);
        let far = Utc::now() + Duration::seconds(300);
        stack.push(pane_entry(past));
        stack.push(pane_entry(far));
        stack.push(pane_entry(past));
        let drained = stack.drain_expired(Utc::now());
        // Only the oldest expired run drains; the live second entry shields
        // the third (LIFO order would otherwise reorder restores).
        assert_eq!(drained.len(), 1);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_cap_of_zero_is_clamped() {
        let mut stack = UndoStack::new(0);
        let far = Utc::now() + Duration::seconds(300);
        assert!(stack.push(pane_entry(far)).is_none());
        assert_eq!(stack.len(), 1);
    }
}
