//! Error types for the debug-session orchestration core.
//!
//! Every failure is fatal to the current operation: there is no retry and no
//! compensating rollback of an already-mutated workload resource.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the orchestration engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected owner kind: {kind}")]
    UnknownOwnerKind { kind: String },

    #[error("ownership cycle detected at {kind}/{name}")]
    OwnershipCycle { kind: String, name: String },

    #[error("{kind} {namespace}/{name} not found")]
    ResourceNotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("container {container} not found in pod template")]
    MissingContainer { container: String },

    #[error("{kind} {name} has no pod template spec")]
    MissingPodTemplate { kind: String, name: String },

    #[error("malformed process listing line: {line:?}")]
    ProcessListing { line: String },

    #[error("rollout of {kind} {name} not ready after {waited:?}")]
    RolloutTimeout {
        kind: String,
        name: String,
        waited: Duration,
    },

    #[error("remote stream failed: {0}")]
    Stream(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
