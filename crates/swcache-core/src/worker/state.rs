use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one cache manager version.
///
/// `Unregistered → Installing → Installed → Activating → Active`; a manager
/// whose install failed or that has been replaced ends in `Redundant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Unregistered,
    Installing,
    /// Installed and waiting for activation.
    Installed,
    Activating,
    Active,
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Unregistered => "unregistered",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
