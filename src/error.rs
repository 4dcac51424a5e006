//! Failure taxonomy for a pipeline run
//!
//! None of these abort a run on their own: each is caught at the pass
//! boundary and recorded on the pass outcome. Only [`PipelineError::Timeout`]
//! and [`PipelineError::Cancelled`] stop the remaining passes.

use crate::conflict::{ConflictType, Severity};
use crate::syntax::ParseError;
use serde::Serialize;
use thiserror::Error;

/// Which side of a pass a contract rule guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractPhase {
    Precondition,
    Postcondition,
}

impl std::fmt::Display for ContractPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractPhase::Precondition => write!(f, "precondition"),
            ContractPhase::Postcondition => write!(f, "postcondition"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineError {
    /// The parser could not build a tree. Recoverable via textual fallback.
    #[error("parse failure: {source}")]
    ParseFailure {
        #[serde(rename = "cause")]
        source: ParseError,
    },

    /// A contract rule failed. Recoverable via rollback.
    #[error("{phase} violated: {}", .rules.join(", "))]
    ContractViolation {
        phase: ContractPhase,
        rules: Vec<String>,
        messages: Vec<String>,
    },

    /// Cross-pass interference.
    #[error("{count} conflict(s) detected ({severity:?}): {}", types_label(.kinds))]
    ConflictDetected {
        count: usize,
        severity: Severity,
        kinds: Vec<ConflictType>,
    },

    /// The quality gate rejected the pass output as structurally broken.
    #[error("integrity failure: {reason}")]
    IntegrityFailure {
        reason: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// The pass body returned an error or panicked.
    #[error("execution error: {message}")]
    ExecutionError { message: String },

    #[error("run timed out before this pass")]
    Timeout,

    #[error("run cancelled before this pass")]
    Cancelled,
}

fn types_label(kinds: &[ConflictType]) -> String {
    kinds
        .iter()
        .map(|k| k.label())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ParseError> for PipelineError {
    fn from(source: ParseError) -> Self {
        PipelineError::ParseFailure { source }
    }
}

impl PipelineError {
    pub fn execution(message: impl Into<String>) -> Self {
        PipelineError::ExecutionError {
            message: message.into(),
        }
    }

    /// Short machine-friendly tag, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::ParseFailure { .. } => "parse_failure",
            PipelineError::ContractViolation { .. } => "contract_violation",
            PipelineError::ConflictDetected { .. } => "conflict_detected",
            PipelineError::IntegrityFailure { .. } => "integrity_failure",
            PipelineError::ExecutionError { .. } => "execution_error",
            PipelineError::Timeout => "timeout",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
