//! The erase / execute / report sequence.
//!
//! A run clears the output directory, then issues the three coverage tool
//! commands strictly in order. Under [`FailurePolicy::Continue`] a failing
//! step never prevents the next one from being attempted, so a report is
//! produced even from partial data.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{display_command, CoverageCommand, Step, ToolFlavor};
use crate::config::{FailurePolicy, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::invoker::{InvocationStatus, Invoker};
use crate::report::{collect_report_files, expand_sources};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Exited(InvocationStatus),
    /// The tool could not be started at all.
    NotLaunched { reason: String, code: i32 },
}

impl StepStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }

    /// Shell-style exit code; signal termination reports 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(status) => status.code.unwrap_or(1),
            Self::NotLaunched { code, .. } => *code,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: Step,
    pub command: String,
    #[serde(flatten)]
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub steps: Vec<StepOutcome>,
    pub output_dir_removed: bool,
    pub output_dir: PathBuf,
    pub report_files: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Exit code of the last attempted step, or 0 when nothing ran.
    pub fn exit_code(&self) -> i32 {
        self.steps.last().map_or(0, |s| s.status.exit_code())
    }

    pub fn failed_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|s| !s.status.success())
            .map(|s| s.step)
            .collect()
    }

    /// Turn the first failed step into an error.
    pub fn into_result(self) -> RunnerResult<Self> {
        if let Some(failed) = self.steps.iter().find(|s| !s.status.success()) {
            return Err(RunnerError::StepFailed {
                step: failed.step,
                code: failed.status.exit_code(),
            });
        }
        Ok(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Coverage Run")?;
        writeln!(f, "============")?;
        for outcome in &self.steps {
            let mark = if outcome.status.success() {
                '\u{2713}'
            } else {
                '\u{2717}'
            };
            match &outcome.status {
                StepStatus::Exited(_) => writeln!(
                    f,
                    "  {} {:<8} exit {} ({:.2}s)",
                    mark,
                    outcome.step,
                    outcome.status.exit_code(),
                    outcome.elapsed_ms as f64 / 1000.0
                )?,
                StepStatus::NotLaunched { reason, .. } => {
                    writeln!(f, "  {} {:<8} not launched: {}", mark, outcome.step, reason)?
                }
            }
        }
        writeln!(
            f,
            "Report: {} file{} in {}",
            self.report_files.len(),
            if self.report_files.len() == 1 { "" } else { "s" },
            self.output_dir.display()
        )?;
        write!(f, "Exit code: {}", self.exit_code())
    }
}

pub struct CoverageRunner<I> {
    config: RunnerConfig,
    invoker: I,
}

impl<I: Invoker> CoverageRunner<I> {
    pub fn new(config: RunnerConfig, invoker: I) -> Self {
        Self { config, invoker }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// The three commands of a run, in execution order.
    pub fn commands(&self) -> Vec<CoverageCommand> {
        let sources = match self.config.flavor {
            ToolFlavor::Legacy => expand_sources(&self.config.sources, &self.config.working_dir),
            ToolFlavor::Modern => self.config.sources.iter().map(OsString::from).collect(),
        };

        vec![
            CoverageCommand::Erase,
            CoverageCommand::Execute {
                entry_point: self.config.entry_point.clone(),
            },
            CoverageCommand::Report {
                kind: self.config.report,
                output_dir: self.config.output_dir.clone(),
                sources,
            },
        ]
    }

    /// Command lines a run would issue, without running anything.
    pub fn planned_invocations(&self) -> RunnerResult<Vec<String>> {
        self.config.validate()?;
        self.commands()
            .iter()
            .map(|cmd| {
                let args = cmd.to_args(self.config.flavor)?;
                Ok(display_command(&self.config.tool, &args))
            })
            .collect()
    }

    /// Remove the output directory and everything in it.
    ///
    /// Returns whether anything was removed.
    pub fn reset_output_dir(&self) -> RunnerResult<bool> {
        let path = self.config.resolved_output_dir();

        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No previous coverage output");
                return Ok(false);
            }
            Err(err) => return Err(RunnerError::io(path, err)),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&path).map_err(|err| RunnerError::io(&path, err))?;
        } else {
            fs::remove_file(&path).map_err(|err| RunnerError::io(&path, err))?;
        }

        info!(path = %path.display(), "Removed previous coverage output");
        Ok(true)
    }

    pub fn run(&mut self) -> RunnerResult<RunSummary> {
        self.config.validate()?;

        let start = Instant::now();
        let flavor = self.config.flavor;
        let plan = self
            .commands()
            .into_iter()
            .map(|cmd| Ok((cmd.step(), cmd.to_args(flavor)?)))
            .collect::<RunnerResult<Vec<(Step, Vec<OsString>)>>>()?;

        let mut summary = RunSummary {
            output_dir_removed: self.reset_output_dir()?,
            output_dir: self.config.resolved_output_dir(),
            ..RunSummary::default()
        };

        for (step, args) in plan {
            let outcome = self.invoke_step(step, &args);
            let failed = !outcome.status.success();
            summary.steps.push(outcome);

            if failed && self.config.failure_policy == FailurePolicy::Stop {
                warn!(step = %step, "Stopping after failed step");
                break;
            }
        }

        summary.report_files = collect_report_files(&summary.output_dir);
        summary.elapsed_ms = millis(start.elapsed());

        info!(
            exit_code = summary.exit_code(),
            report_files = summary.report_files.len(),
            elapsed_secs = start.elapsed().as_secs_f32(),
            "Coverage run finished",
        );
        Ok(summary)
    }

    fn invoke_step(&mut self, step: Step, args: &[OsString]) -> StepOutcome {
        let command = display_command(&self.config.tool, args);
        info!(step = %step, command = %command, "Running coverage step");

        let start = Instant::now();
        let status = match self
            .invoker
            .invoke(&self.config.tool, args, &self.config.working_dir)
        {
            Ok(status) => StepStatus::Exited(status),
            Err(err) => StepStatus::NotLaunched {
                code: err.exit_code(),
                reason: err.to_string(),
            },
        };
        let elapsed = start.elapsed();

        match &status {
            StepStatus::Exited(s) if s.success() => {
                info!(step = %step, elapsed_secs = elapsed.as_secs_f32(), "Step completed");
            }
            StepStatus::Exited(s) => {
                warn!(step = %step, code = ?s.code, elapsed_secs = elapsed.as_secs_f32(), "Step failed");
            }
            StepStatus::NotLaunched { reason, .. } => {
                warn!(step = %step, error = %reason, "Step could not be launched");
            }
        }

        StepOutcome {
            step,
            command,
            status,
            elapsed_ms: millis(elapsed),
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::command::ReportKind;
    use crate::error::InvokeError;
    use std::collections::VecDeque;
    use std::path::Path;

    /// Records every invocation and replays scripted results.
    #[derive(Default)]
    struct RecordingInvoker {
        calls: Vec<Vec<String>>,
        results: VecDeque<Result<InvocationStatus, InvokeError>>,
        on_report: Option<Box<dyn FnMut(&Path)>>,
    }

    impl RecordingInvoker {
        fn with_results(results: Vec<Result<InvocationStatus, InvokeError>>) -> Self {
            Self {
                results: results.into(),
                ..Self::default()
            }
        }
    }

    impl Invoker for RecordingInvoker {
        fn invoke(
            &mut self,
            program: &Path,
            args: &[OsString],
            working_dir: &Path,
        ) -> Result<InvocationStatus, InvokeError> {
            let mut call = vec![program.display().to_string()];
            call.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
            let is_report = args.first().map_or(false, |a| a == "-a");
            self.calls.push(call);
            if is_report {
                if let Some(hook) = self.on_report.as_mut() {
                    hook(working_dir);
                }
            }
            self.results
                .pop_front()
                .unwrap_or(Ok(InvocationStatus::SUCCESS))
        }
    }

    fn config_in(dir: &Path) -> RunnerConfig {
        RunnerConfig {
            working_dir: dir.to_path_buf(),
            ..RunnerConfig::default()
        }
    }

    fn not_found() -> InvokeError {
        InvokeError::NotFound {
            program: PathBuf::from("coverage"),
        }
    }

    /// Writes `<dir>/coverage/<name>` when the report step runs.
    fn writes_report(name: &'static str) -> Option<Box<dyn FnMut(&Path)>> {
        let hook: Box<dyn FnMut(&Path)> = Box::new(move |working_dir: &Path| {
            let out = working_dir.join("coverage");
            fs::create_dir_all(&out).unwrap();
            fs::write(out.join(name), "report").unwrap();
        });
        Some(hook)
    }

    #[test]
    fn coverage_runner__default_config__then_erase_execute_report_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = CoverageRunner::new(config_in(dir.path()), RecordingInvoker::default());

        let summary = runner.run().unwrap();

        assert_eq!(
            runner.invoker().calls,
            vec![
                vec!["coverage", "-e"],
                vec!["coverage", "-x", "test/test_simple.py"],
                vec!["coverage", "-a", "-d", "coverage"],
            ]
        );
        let steps: Vec<Step> = summary.steps.iter().map(|s| s.step).collect();
        assert_eq!(steps, [Step::Erase, Step::Execute, Step::Report]);
        assert_eq!(summary.exit_code(), 0);
        assert!(summary.failed_steps().is_empty());
    }

    #[test]
    fn coverage_runner__missing_output_dir__then_nothing_removed_and_report_recreates_it() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = RecordingInvoker {
            on_report: writes_report("xpathrecord.py,cover"),
            ..RecordingInvoker::default()
        };
        let mut runner = CoverageRunner::new(config_in(dir.path()), invoker);

        let summary = runner.run().unwrap();

        assert!(!summary.output_dir_removed);
        assert_eq!(
            summary.report_files,
            vec![dir.path().join("coverage").join("xpathrecord.py,cover")]
        );
    }

    #[test]
    fn coverage_runner__stale_report__then_removed_before_new_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("coverage");
        fs::create_dir_all(out.join("nested")).unwrap();
        fs::write(out.join("old.html"), "stale").unwrap();
        fs::write(out.join("nested").join("older.html"), "stale").unwrap();

        let invoker = RecordingInvoker {
            on_report: writes_report("fresh.html"),
            ..RecordingInvoker::default()
        };
        let mut runner = CoverageRunner::new(config_in(dir.path()), invoker);

        let summary = runner.run().unwrap();

        assert!(summary.output_dir_removed);
        assert!(!out.join("old.html").exists());
        assert!(!out.join("nested").exists());
        assert_eq!(summary.report_files, vec![out.join("fresh.html")]);
    }

    #[test]
    fn coverage_runner__two_runs__then_only_second_output_survives() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("coverage");

        let first = RecordingInvoker {
            on_report: writes_report("first.html"),
            ..RecordingInvoker::default()
        };
        CoverageRunner::new(config_in(dir.path()), first).run().unwrap();
        assert!(out.join("first.html").exists());

        let second = RecordingInvoker {
            on_report: writes_report("second.html"),
            ..RecordingInvoker::default()
        };
        let summary = CoverageRunner::new(config_in(dir.path()), second)
            .run()
            .unwrap();

        assert_eq!(summary.report_files, vec![out.join("second.html")]);
    }

    #[test]
    fn coverage_runner__every_step_fails__then_all_attempted_and_last_code_wins() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = RecordingInvoker::with_results(vec![
            Ok(InvocationStatus::from_code(1)),
            Ok(InvocationStatus::from_code(2)),
            Ok(InvocationStatus::from_code(3)),
        ]);
        let mut runner = CoverageRunner::new(config_in(dir.path()), invoker);

        let summary = runner.run().unwrap();

        assert_eq!(runner.invoker().calls.len(), 3);
        assert_eq!(summary.exit_code(), 3);
        assert_eq!(
            summary.failed_steps(),
            [Step::Erase, Step::Execute, Step::Report]
        );
    }

    #[test]
    fn coverage_runner__execute_fails_then_report_succeeds__then_exit_code_zero() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = RecordingInvoker::with_results(vec![
            Ok(InvocationStatus::SUCCESS),
            Ok(InvocationStatus::from_code(1)),
            Ok(InvocationStatus::SUCCESS),
        ]);
        let mut runner = CoverageRunner::new(config_in(dir.path()), invoker);

        let summary = runner.run().unwrap();

        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.failed_steps(), [Step::Execute]);
        let err = summary.into_result().unwrap_err();
        assert!(matches!(
            err,
            RunnerError::StepFailed {
                step: Step::Execute,
                code: 1
            }
        ));
    }

    #[test]
    fn coverage_runner__tool_missing__then_every_step_not_launched_with_127() {
        let dir = tempfile::tempdir().unwrap();
        let invoker =
            RecordingInvoker::with_results(vec![Err(not_found()), Err(not_found()), Err(not_found())]);
        let mut runner = CoverageRunner::new(config_in(dir.path()), invoker);

        let summary = runner.run().unwrap();

        assert_eq!(summary.steps.len(), 3);
        assert!(summary
            .steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::NotLaunched { code: 127, .. })));
        assert_eq!(summary.exit_code(), 127);
    }

    #[test]
    fn coverage_runner__stop_policy__then_halts_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            failure_policy: FailurePolicy::Stop,
            ..config_in(dir.path())
        };
        let invoker = RecordingInvoker::with_results(vec![
            Ok(InvocationStatus::SUCCESS),
            Ok(InvocationStatus::from_code(5)),
        ]);
        let mut runner = CoverageRunner::new(config, invoker);

        let summary = runner.run().unwrap();

        assert_eq!(runner.invoker().calls.len(), 2);
        assert_eq!(summary.exit_code(), 5);
    }

    #[test]
    fn coverage_runner__legacy_html__then_rejected_before_touching_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("coverage");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("keep.html"), "").unwrap();
        let config = RunnerConfig {
            report: ReportKind::Html,
            ..config_in(dir.path())
        };
        let mut runner = CoverageRunner::new(config, RecordingInvoker::default());

        let err = runner.run().unwrap_err();

        assert!(matches!(err, RunnerError::UnsupportedReport { .. }));
        assert!(out.join("keep.html").exists());
        assert!(runner.invoker().calls.is_empty());
    }

    #[test]
    fn coverage_runner__output_dir_cannot_be_inspected__then_io_error_and_no_invocations() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blocker"), "regular file").unwrap();
        let config = RunnerConfig {
            output_dir: PathBuf::from("blocker/coverage"),
            ..config_in(dir.path())
        };
        let mut runner = CoverageRunner::new(config, RecordingInvoker::default());

        let err = runner.run().unwrap_err();

        match err {
            RunnerError::Io { path, .. } => {
                assert_eq!(path, dir.path().join("blocker").join("coverage"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.invoker().calls.is_empty());
        assert!(dir.path().join("blocker").is_file());
    }

    #[test]
    fn coverage_runner__output_path_is_file__then_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("coverage"), "not a dir").unwrap();
        let runner = CoverageRunner::new(config_in(dir.path()), RecordingInvoker::default());

        assert!(runner.reset_output_dir().unwrap());
        assert!(!dir.path().join("coverage").exists());
        assert!(!runner.reset_output_dir().unwrap());
    }

    #[test]
    fn coverage_runner__modern_flavor_with_sources__then_include_flag_passed_raw() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            flavor: ToolFlavor::Modern,
            report: ReportKind::Html,
            sources: vec!["xpathrecord/*".to_string()],
            ..config_in(dir.path())
        };
        let runner = CoverageRunner::new(config, RecordingInvoker::default());

        assert_eq!(
            runner.planned_invocations().unwrap(),
            vec![
                "coverage erase",
                "coverage run test/test_simple.py",
                "coverage html -d coverage --include=xpathrecord/*",
            ]
        );
    }

    #[test]
    fn coverage_runner__legacy_sources__then_expanded_like_a_shell() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("xpathrecord")).unwrap();
        fs::write(dir.path().join("xpathrecord").join("__init__.py"), "").unwrap();
        let config = RunnerConfig {
            sources: vec!["xpathrecord/*.py".to_string()],
            ..config_in(dir.path())
        };
        let runner = CoverageRunner::new(config, RecordingInvoker::default());

        let report = runner.commands().pop().unwrap();

        assert_eq!(
            report,
            CoverageCommand::Report {
                kind: ReportKind::Annotate,
                output_dir: PathBuf::from("coverage"),
                sources: vec![PathBuf::from("xpathrecord")
                    .join("__init__.py")
                    .into_os_string()],
            }
        );
    }

    #[test]
    fn run_summary__no_steps__then_exit_code_zero() {
        assert_eq!(RunSummary::default().exit_code(), 0);
    }

    #[test]
    fn run_summary__signal_termination__then_exit_code_one() {
        assert_eq!(StepStatus::Exited(InvocationStatus { code: None }).exit_code(), 1);
    }

    #[test]
    fn run_summary__json__then_flattened_status() {
        let summary = RunSummary {
            steps: vec![StepOutcome {
                step: Step::Report,
                command: "coverage -a -d coverage".to_string(),
                status: StepStatus::NotLaunched {
                    reason: "program not found: coverage".to_string(),
                    code: 127,
                },
                elapsed_ms: 0,
            }],
            ..RunSummary::default()
        };

        let json = serde_json::to_value(&summary).unwrap();
        let step = &json["steps"][0];
        assert_eq!(step["step"], "report");
        assert_eq!(step["status"], "not_launched");
        assert_eq!(step["code"], 127);
    }

    #[test]
    fn run_summary__text__then_lists_steps_and_exit_code() {
        let summary = RunSummary {
            steps: vec![StepOutcome {
                step: Step::Erase,
                command: "coverage -e".to_string(),
                status: StepStatus::Exited(InvocationStatus::from_code(2)),
                elapsed_ms: 1500,
            }],
            output_dir: PathBuf::from("coverage"),
            ..RunSummary::default()
        };

        let text = summary.to_string();
        assert!(text.contains("\u{2717} erase"));
        assert!(text.contains("exit 2 (1.50s)"));
        assert!(text.contains("Report: 0 files in coverage"));
        assert!(text.ends_with("Exit code: 2"));
    }
}
