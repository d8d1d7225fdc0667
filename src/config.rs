use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    /// Quiescence window before a coalesced write, in milliseconds.
    pub debounce_ms: u64,
    /// Override for the workspace document path.
    pub state_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            state_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Undo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct UndoConfig {
    /// Maximum retained close snapshots; the oldest is evicted and
    /// garbage-collected past this.
    pub stack_cap: usize,
    /// Seconds a closed pane stays restorable before expiry.
    pub ttl_secs: i64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            stack_cap: 10,
            ttl_secs: 600,
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace defaults
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct WorkspaceConfig {
    pub name: String,
    pub sidebar_width: f64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            name: "workspace".to_string(),
            sidebar_width: crate::workspace::DEFAULT_SIDEBAR_WIDTH,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub persistence: PersistenceConfig,
    pub undo: UndoConfig,
    pub workspace: WorkspaceConfig,
}

impl Config {
    pub fn load() -> Self {
        let path = dirs::config_dir()
            .map(|d| d.join("deskmux").join("config.toml"))
            .unwrap_or_default();

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };

        let raw: RawConfig = match toml::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                return Self::default();
            }
        };

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Self {
        let mut config = Self::default();

        if let Some(p) = raw.persistence {
            if let Some(ms) = p.debounce_ms {
                config.persistence.debounce_ms = ms;
            }
            if let Some(path) = p.state_path {
                config.persistence.state_path = Some(path);
            }
        }
        if let Some(u) = raw.undo {
            if let Some(cap) = u.stack_cap {
                config.undo.stack_cap = cap.max(1);
            }
            if let Some(ttl) = u.ttl_secs {
                config.undo.ttl_secs = ttl.max(1);
            }
        }
        if let Some(w) = raw.workspace {
            if let Some(name) = w.name {
                config.workspace.name = name;
            }
            if let Some(width) = w.sidebar_width {
                config.workspace.sidebar_width = width;
            }
        }

        config
    }
}

// ---------------------------------------------------------------------------
// Raw TOML structs (all-optional for merge)
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct RawConfig {
    persistence: Option<RawPersistence>,
    undo: Option<RawUndo>,
    workspace: Option<RawWorkspace>,
}

#[derive(Deserialize, Default)]
struct RawPersistence {
    debounce_ms: Option<u64>,
    state_path: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct RawUndo {
    stack_cap: Option<usize>,
    ttl_secs: Option<i64>,
}

#[derive(Deserialize, Default)]
struct RawWorkspace {
    name: Option<String>,
    sidebar_width: Option<f64>,
}
