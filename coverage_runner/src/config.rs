use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::command::{ReportKind, ToolFlavor};
use crate::error::{RunnerError, RunnerResult};

pub const DEFAULT_TOOL: &str = "coverage";
pub const DEFAULT_ENTRY_POINT: &str = "test/test_simple.py";
pub const DEFAULT_OUTPUT_DIR: &str = "coverage";

/// What happens after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Attempt every remaining step regardless.
    #[default]
    Continue,
    /// End the run at the first failing step.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "coverage_runner",
    author,
    version,
    about = "Erase, execute and report a test suite under a coverage tool",
    long_about = None
)]
pub struct Args {
    /// Coverage tool to invoke (PATH lookup, or relative to the working directory)
    #[arg(long, value_name = "PATH", env = "COVERAGE_RUNNER_TOOL", default_value = DEFAULT_TOOL)]
    pub tool: PathBuf,

    /// Command-line dialect of the coverage tool
    #[arg(long, value_enum, env = "COVERAGE_RUNNER_FLAVOR", default_value_t = ToolFlavor::Legacy)]
    pub flavor: ToolFlavor,

    /// File that runs the test suite
    #[arg(long, value_name = "FILE", env = "COVERAGE_RUNNER_ENTRY_POINT", default_value = DEFAULT_ENTRY_POINT)]
    pub entry_point: PathBuf,

    /// Report output directory, cleared before every run
    #[arg(long, value_name = "DIR", env = "COVERAGE_RUNNER_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Kind of report to generate
    #[arg(long, value_enum, env = "COVERAGE_RUNNER_REPORT", default_value_t = ReportKind::Annotate)]
    pub report: ReportKind,

    /// Source files to report on (glob patterns, repeatable). The modern
    /// flavor joins them into one comma-separated `--include`, so patterns
    /// must not contain commas there.
    #[arg(long = "source", value_name = "PATTERN")]
    pub sources: Vec<String>,

    /// Directory to run from
    #[arg(long, value_name = "DIR", env = "COVERAGE_RUNNER_WORKING_DIR", default_value = ".")]
    pub working_dir: PathBuf,

    /// Stop at the first failing step instead of attempting the rest
    #[arg(long, env = "COVERAGE_RUNNER_FAIL_FAST")]
    pub fail_fast: bool,

    /// Print a run summary after the report step
    #[arg(long, value_enum)]
    pub summary: Option<SummaryFormat>,

    /// Print the planned commands without touching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub tool: PathBuf,
    pub flavor: ToolFlavor,
    pub entry_point: PathBuf,
    pub output_dir: PathBuf,
    pub report: ReportKind,
    pub sources: Vec<String>,
    pub working_dir: PathBuf,
    pub failure_policy: FailurePolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from(DEFAULT_TOOL),
            flavor: ToolFlavor::default(),
            entry_point: PathBuf::from(DEFAULT_ENTRY_POINT),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            report: ReportKind::default(),
            sources: Vec::new(),
            working_dir: PathBuf::from("."),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RunnerConfig {
    /// Reject combinations the selected tool flavor cannot run.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.flavor == ToolFlavor::Legacy && self.report == ReportKind::Html {
            return Err(RunnerError::UnsupportedReport {
                flavor: self.flavor,
                kind: self.report,
            });
        }
        if self.flavor == ToolFlavor::Modern {
            if let Some(pattern) = self.sources.iter().find(|p| p.contains(',')) {
                return Err(RunnerError::CommaInSource {
                    flavor: self.flavor,
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }

    /// Output directory as seen from the runner's own process.
    pub fn resolved_output_dir(&self) -> PathBuf {
        resolve(&self.working_dir, &self.output_dir)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl TryFrom<Args> for RunnerConfig {
    type Error = RunnerError;

    fn try_from(value: Args) -> Result<Self, Self::Error> {
        let config = Self {
            tool: value.tool,
            flavor: value.flavor,
            entry_point: value.entry_point,
            output_dir: value.output_dir,
            report: value.report,
            sources: value.sources,
            working_dir: value.working_dir,
            failure_policy: if value.fail_fast {
                FailurePolicy::Stop
            } else {
                FailurePolicy::Continue
            },
        };
        config.validate()?;
        Ok(config)
    }
}
