use std::{io, path::PathBuf};

use thiserror::Error;

use crate::command::{ReportKind, Step, ToolFlavor};

/// Failure to launch a coverage tool invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("program not found: {program}")]
    NotFound { program: PathBuf },
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{kind} reports are not supported by the {flavor} tool flavor")]
    UnsupportedReport { flavor: ToolFlavor, kind: ReportKind },
    #[error("source pattern {pattern:?} contains a comma, which the {flavor} tool flavor cannot pass")]
    CommaInSource { flavor: ToolFlavor, pattern: String },
    #[error("{step} step failed with exit code {code}")]
    StepFailed { step: Step, code: i32 },
}

pub type RunnerResult<T> = Result<T, RunnerError>;

impl RunnerError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl InvokeError {
    /// Shell-style exit code for a command that never ran.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 127,
            Self::Spawn { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => 126,
            Self::Spawn { .. } => 127,
        }
    }
}
