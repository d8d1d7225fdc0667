use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type RepoId = uuid::Uuid;
pub type WorktreeId = uuid::Uuid;

/// A checked-out worktree of a repository. Panes reference worktrees by id,
/// so entries keep their ids across moves and renames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorktreeEntry {
    pub id: WorktreeId,
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub id: RepoId,
    pub name: String,
    pub root: PathBuf,
    pub worktrees: Vec<WorktreeEntry>,
}

impl RepoEntry {
    pub fn worktree(&self, id: WorktreeId) -> Option<&WorktreeEntry> {
        self.worktrees.iter().find(|wt| wt.id == id)
    }
}

/// External filesystem/git watcher reports. These bypass action validation
/// and feed the store's repair pass directly.
#[derive(Clone, Debug, PartialEq)]
pub enum TopologyEvent {
    WorktreeMissing { id: WorktreeId, reason: String },
    WorktreeRestored { id: WorktreeId },
    RepoMoved { id: RepoId, new_root: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worktree_lookup() {
        let wt = WorktreeEntry {
            id: WorktreeId::new_v4(),
            name: "feature".to_string(),
            path: PathBuf::from("/work/repo-feature"),
        };
        let repo = RepoEntry {
            id: RepoId::new_v4(),
            name: "repo".to_string(),
            root: PathBuf::from("/work/repo"),
            worktrees: vec![wt.clone()],
        };
        assert_eq!(repo.worktree(wt.id), Some(&wt));
        assert_eq!(repo.worktree(WorktreeId::new_v4()), None);
    }

    #[test]
    fn test_repo_serialization_roundtrip() {
        let repo = RepoEntry {
            id: RepoId::new_v4(),
            name: "repo".to_string(),
            root: PathBuf::from("/work/repo"),
            worktrees: vec![WorktreeEntry {
                id: WorktreeId::new_v4(),
                name: "main".to_string(),
                path: PathBuf::from("/work/repo"),
            }],
        };
        let json = serde_json::to_string(&repo).unwrap();
        let back: RepoEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
    }
}
