//! Best-effort projections of session state.
//!
//! The session publishes a snapshot after every navigation or stream
//! completion. Mirrors are derived views, never sources of truth, and
//! their failures are logged and dropped rather than propagated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// A point-in-time view of where the reader is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub story_id: Uuid,
    pub chapter: u32,
    pub page: u32,
    pub previous_choice: Option<String>,
    pub is_loading: bool,
}

/// Receives snapshots after each state change. Fire-and-forget.
pub trait StateMirror: Send + Sync {
    fn record(&self, snapshot: &SessionSnapshot);
}

/// Projects the session position as a route string of the form
/// `/story/{id}/chapter/{n}/page/{m}`, readable from any clone.
#[derive(Debug, Clone, Default)]
pub struct RouteMirror {
    route: Arc<Mutex<String>>,
}

impl RouteMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently recorded route, empty before the first snapshot.
    pub fn current(&self) -> String {
        match self.route.lock() {
            Ok(route) => route.clone(),
            Err(_) => String::new(),
        }
    }
}

impl StateMirror for RouteMirror {
    fn record(&self, snapshot: &SessionSnapshot) {
        let route = format!(
            "/story/{}/chapter/{}/page/{}",
            snapshot.story_id, snapshot.chapter, snapshot.page
        );

        match self.route.lock() {
            Ok(mut current) => *current = route,
            Err(_) => warn!("route mirror lock poisoned, dropping update"),
        }
    }
}

/// Writes each snapshot to a JSON file so an interrupted session can be
/// resumed at the same position.
#[derive(Debug, Clone)]
pub struct AutosaveMirror {
    path: PathBuf,
}

impl AutosaveMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read back the last recorded snapshot, if one exists.
    pub fn load(&self) -> Option<SessionSnapshot> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl StateMirror for AutosaveMirror {
    fn record(&self, snapshot: &SessionSnapshot) {
        let json = match serde_json::to_string_pretty(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "autosave mirror serialization failed");
                return;
            }
        };

        if let Err(e) = std::fs::write(&self.path, json) {
            warn!(error = %e, path = %self.path.display(), "autosave mirror write failed");
        }
    }
}
