//! Error types for the reactive runtime.
//!
//! User code signals failure by panicking, so most of these errors are built
//! from a caught panic payload.

use std::any::Any;

use thiserror::Error;

use crate::graph::{NodeId, NodeKind};

/// A computed, effect or cleanup panicked while it was evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {node} panicked: {message}")]
pub struct EvaluationError {
    pub node: NodeId,
    pub kind: NodeKind,
    pub message: String,
}

impl EvaluationError {
    pub(crate) fn from_panic(node: NodeId, kind: NodeKind, payload: &(dyn Any + Send)) -> Self {
        Self {
            node,
            kind,
            message: panic_message(payload),
        }
    }
}

/// Cleanups that panicked during a disposal pass.
///
/// The pass itself always runs to completion; this only reports what failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} cleanup(s) panicked during disposal: {}", .failures.len(), .failures.join("; "))]
pub struct DisposalError {
    pub failures: Vec<String>,
}

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("{} effect(s) failed during flush", .0.len())]
    EffectsFailed(Vec<EvaluationError>),

    #[error(transparent)]
    Disposal(#[from] DisposalError),

    #[error("maximum update depth of {limit} flush passes exceeded; an effect keeps invalidating its own inputs")]
    UpdateDepthExceeded { limit: usize },

    #[error("circular dependency: computed {0} read itself while evaluating")]
    CircularDependency(NodeId),

    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Best-effort extraction of the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
