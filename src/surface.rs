use thiserror::Error;

use crate::layout::PaneId;
use crate::pane::{PaneContent, PaneMeta};

pub type ResourceId = uuid::Uuid;

/// Handle to a live backend resource (a spawned terminal, a browser page).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub resource_id: ResourceId,
}

/// Opaque handle to an on-screen view produced by attaching a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewHandle {
    pub id: uuid::Uuid,
}

impl ViewHandle {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
        }
    }
}

impl Default for ViewHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a surface is being detached from its pane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachReason {
    /// Hidden by an arrangement switch; the resource stays warm.
    ArrangementSwitch,
    /// The pane was minimized.
    Minimized,
    /// The pane left all layouts but stays alive.
    Backgrounded,
    /// The pane is closing; the backend may retain the resource briefly so
    /// `undo_close` can hand it back.
    Closing,
    /// The backing worktree or repo disappeared.
    Orphaned,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SurfaceError {
    #[error("failed to spawn backend process: {0}")]
    SpawnFailed(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported content kind: {0}")]
    Unsupported(String),
}

/// The external subsystem that owns live resources. The coordinator is the
/// only caller and the only place that awaits `create_surface`; every other
/// method is synchronous bookkeeping on the backend's side.
#[allow(async_fn_in_trait)]
pub trait SurfaceHost {
    /// Spawn the backend resource for a pane. Fallible: the coordinator
    /// rolls back the store mutation when this errs.
    async fn create_surface(
        &mut self,
        content: &PaneContent,
        meta: &PaneMeta,
    ) -> Result<SurfaceHandle, SurfaceError>;

    /// Attach a live resource to a pane, yielding a view when the backend
    /// can produce one.
    fn attach(&mut self, resource: ResourceId, pane: PaneId) -> Option<ViewHandle>;

    fn detach(&mut self, resource: ResourceId, reason: DetachReason);

    /// Permanently release a resource. Must be idempotent: rollback paths
    /// may race a resource that arrives after its pane was removed.
    fn destroy(&mut self, resource: ResourceId);

    /// The most recently detached-for-close resource, if the backend kept
    /// one. Lets undo skip a fresh creation.
    fn undo_close(&mut self) -> Option<SurfaceHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_handles_are_distinct() {
        assert_ne!(ViewHandle::new(), ViewHandle::new());
    }

    #[test]
    fn test_surface_error_messages() {
        let err = SurfaceError::SpawnFailed("exec failed".to_string());
        assert_eq!(err.to_string(), "failed to spawn backend process: exec failed");
    }
}
