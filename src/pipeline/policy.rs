//! policy.rs
//! Tunables of the executive traversal.

use serde::{Deserialize, Serialize};

/// How a broadcast treats a stage reached twice in one pass (diamonds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisitPolicy {
    /// Every path reaching the stage processes it again.
    #[default]
    Reentrant,
    /// A stage is processed at most once per pass.
    OncePerPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutivePolicy {
    pub revisit: RevisitPolicy,
}

impl ExecutivePolicy {
    pub fn once_per_pass() -> Self {
        Self { revisit: RevisitPolicy::OncePerPass }
    }
}
