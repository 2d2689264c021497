//! The error taxonomy shared by every part of a session.

use crate::common::{TaskKind, TaskState};
use std::path::PathBuf;

/// Result type for tracelab operations.
pub type Result<T, E = TracelabError> = std::result::Result<T, E>;

/// Errors that can occur while configuring or running a session.
#[derive(Debug, thiserror::Error)]
pub enum TracelabError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} '{label}' does not implement run()")]
    Unimplemented { kind: TaskKind, label: String },

    #[error("{kind} '{label}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        kind: TaskKind,
        label: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("row has {got} fields but the header declares {expected}")]
    RowWidth { expected: usize, got: usize },

    #[error("path '{0}' contains no points")]
    EmptyPath(String),

    #[error("no paths starting with '{prefix}' in {}", dir.display())]
    NoPaths { prefix: String, dir: PathBuf },

    #[error("invalid speed distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),

    #[error("malformed recording {}: {reason}", path.display())]
    MalformedRecording { path: PathBuf, reason: String },

    #[error("{0} is not ready: setup has not run")]
    NotReady(String),

    #[error("key input channel closed")]
    InputClosed,
}

impl TracelabError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TracelabError::Io {
            path: path.into(),
            source,
        }
    }
}
