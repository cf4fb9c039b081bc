//! Process invocation seam.
//!
//! The runner never spawns processes directly; it goes through [`Invoker`] so
//! that tests can record the exact command sequence instead of running a real
//! coverage tool.

use std::env;
use std::ffi::OsString;
use std::path::{self, Path, PathBuf};
use std::process::{Command, ExitStatus};

use serde::Serialize;
use tracing::debug;

use crate::error::InvokeError;

/// Exit status of a finished invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvocationStatus {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
}

impl InvocationStatus {
    pub const SUCCESS: Self = Self { code: Some(0) };

    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for InvocationStatus {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

pub trait Invoker {
    /// Run `program` with `args` from `working_dir`, blocking until it exits.
    fn invoke(
        &mut self,
        program: &Path,
        args: &[OsString],
        working_dir: &Path,
    ) -> Result<InvocationStatus, InvokeError>;
}

/// Spawns real child processes with inherited stdio.
#[derive(Debug, Default, Clone)]
pub struct SystemInvoker;

impl SystemInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `program` against PATH, or against `working_dir` when it
    /// contains a path separator.
    ///
    /// The result is absolute, so it stays valid once the child is started
    /// from `working_dir`.
    pub fn resolve(program: &Path, working_dir: &Path) -> Result<PathBuf, InvokeError> {
        let not_found = || InvokeError::NotFound {
            program: program.to_path_buf(),
        };
        let working_dir = path::absolute(working_dir).map_err(|_| not_found())?;
        let resolved =
            which::which_in(program, env::var_os("PATH"), &working_dir).map_err(|_| not_found())?;
        // Relative PATH entries resolve against our own cwd.
        path::absolute(&resolved).map_err(|_| not_found())
    }
}

impl Invoker for SystemInvoker {
    fn invoke(
        &mut self,
        program: &Path,
        args: &[OsString],
        working_dir: &Path,
    ) -> Result<InvocationStatus, InvokeError> {
        let resolved = Self::resolve(program, working_dir)?;
        debug!(program = %resolved.display(), "Resolved coverage tool");

        let status = Command::new(&resolved)
            .args(args)
            .current_dir(working_dir)
            .status()
            .map_err(|source| InvokeError::Spawn {
                program: resolved.clone(),
                source,
            })?;

        Ok(status.into())
    }
}
