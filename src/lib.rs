//! Workspace state engine: panes, tabs, split layouts, and named
//! arrangements, with a validated action pipeline, transactional rollback
//! around surface creation, a bounded undo stack, and self-repairing
//! persistence.
//!
//! The store is single-owner by construction: a [`coordinator::Coordinator`]
//! holds the [`workspace::WorkspaceState`] and is the only place that awaits
//! the external surface collaborator. Rendering and process backends plug in
//! through [`surface::SurfaceHost`] and [`registry::ViewRegistry`].

pub mod action;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod layout;
pub mod pane;
pub mod registry;
pub mod repo;
pub mod session;
pub mod surface;
pub mod tab;
pub mod undo;
pub mod workspace;

pub use action::{Action, ActionError};
pub use coordinator::{Coordinator, DispatchOutcome};
pub use layout::{InsertPosition, LayoutNode, PaneId, SplitDirection, SplitId};
pub use pane::{Pane, PaneContent, PaneMeta, Residency};
pub use tab::{Arrangement, ArrangementId, Tab, TabId};
pub use workspace::{WorkspaceState, WindowFrame};
