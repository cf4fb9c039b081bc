//! # Coverage Runner
//!
//! Runs a test suite under an external coverage tool and leaves a fresh
//! report behind:
//!
//! 1. remove the previous output directory (`./coverage`)
//! 2. `coverage -e` to erase recorded counters
//! 3. `coverage -x <entry point>` to run the tests under instrumentation
//! 4. `coverage -a -d coverage` to write annotated sources
//!
//! Steps are attempted in that order even when an earlier one fails, so a
//! report is always generated from whatever data was recorded. Pass
//! `--fail-fast` to stop at the first failure instead.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Same as the classic shell wrapper
//! coverage_runner
//!
//! # coverage.py 3+ with an HTML report limited to one package
//! coverage_runner --flavor modern --report html --source 'xpathrecord/*'
//!
//! # Show what would run
//! coverage_runner --dry-run
//! ```
//!
//! ## Environment Variables
//!
//! - `COVERAGE_RUNNER_TOOL`, `COVERAGE_RUNNER_FLAVOR`, `COVERAGE_RUNNER_ENTRY_POINT`,
//!   `COVERAGE_RUNNER_OUTPUT_DIR`, `COVERAGE_RUNNER_REPORT`, `COVERAGE_RUNNER_WORKING_DIR`,
//!   `COVERAGE_RUNNER_FAIL_FAST`: defaults for the matching flags
//! - `RUST_LOG`: log filter (defaults to `info`)

pub mod command;
pub mod config;
pub mod error;
pub mod invoker;
pub mod report;
pub mod runner;

use tracing_subscriber::EnvFilter;

pub use command::{CoverageCommand, ReportKind, Step, ToolFlavor};
pub use config::{Args, FailurePolicy, RunnerConfig, SummaryFormat};
pub use error::{InvokeError, RunnerError, RunnerResult};
pub use invoker::{InvocationStatus, Invoker, SystemInvoker};
pub use runner::{CoverageRunner, RunSummary, StepOutcome, StepStatus};

/// Install the stderr log subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
