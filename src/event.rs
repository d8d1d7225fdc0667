use serde::Serialize;

/// Store-change notification. UI subscribers react synchronously; the
/// persister coalesces `Changed` bursts behind its debounce window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum StoreEvent {
    /// A mutation committed; `version` is the store's monotonic counter.
    Changed { version: u64 },
    /// A repair pass fixed `count` invariant violations.
    Repaired { count: usize },
}
