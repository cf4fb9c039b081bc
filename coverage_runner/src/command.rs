//! Coverage tool command surface.
//!
//! Every invocation the runner issues is one of the three [`CoverageCommand`]
//! variants. The argument vector for a variant depends on the command-line
//! dialect the installed tool speaks:
//!
//! | command | legacy (`coverage.py` 2.x) | modern (`coverage.py` 3+) |
//! |---------|----------------------------|---------------------------|
//! | erase   | `-e`                       | `erase`                   |
//! | execute | `-x <entry>`               | `run <entry>`             |
//! | report  | `-a -d <dir> [sources..]`  | `annotate\|html -d <dir> [--include=..]` |

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::error::{RunnerError, RunnerResult};

/// Position of a command in the fixed run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Erase,
    Execute,
    Report,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::Execute => write!(f, "execute"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// Command-line dialect of the coverage tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ToolFlavor {
    /// Single-letter operation selectors (`-e`, `-x`, `-a`)
    #[default]
    Legacy,
    /// Subcommands (`erase`, `run`, `annotate`, `html`)
    Modern,
}

impl fmt::Display for ToolFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "modern"),
        }
    }
}

/// Kind of report written into the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportKind {
    /// Annotated source listings
    #[default]
    Annotate,
    /// HTML pages
    Html,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Annotate => write!(f, "annotate"),
            Self::Html => write!(f, "html"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageCommand {
    /// Reset persisted execution counts.
    Erase,
    /// Run the test entry point under instrumentation.
    Execute { entry_point: PathBuf },
    /// Write a report into `output_dir`.
    Report {
        kind: ReportKind,
        output_dir: PathBuf,
        sources: Vec<OsString>,
    },
}

impl CoverageCommand {
    pub fn step(&self) -> Step {
        match self {
            Self::Erase => Step::Erase,
            Self::Execute { .. } => Step::Execute,
            Self::Report { .. } => Step::Report,
        }
    }

    /// Argument vector for this command in the given dialect.
    pub fn to_args(&self, flavor: ToolFlavor) -> RunnerResult<Vec<OsString>> {
        let args = match (self, flavor) {
            (Self::Erase, ToolFlavor::Legacy) => vec![OsString::from("-e")],
            (Self::Erase, ToolFlavor::Modern) => vec![OsString::from("erase")],
            (Self::Execute { entry_point }, ToolFlavor::Legacy) => {
                vec![OsString::from("-x"), entry_point.as_os_str().to_owned()]
            }
            (Self::Execute { entry_point }, ToolFlavor::Modern) => {
                vec![OsString::from("run"), entry_point.as_os_str().to_owned()]
            }
            (Self::Report { kind: ReportKind::Html, .. }, ToolFlavor::Legacy) => {
                return Err(RunnerError::UnsupportedReport {
                    flavor,
                    kind: ReportKind::Html,
                });
            }
            (
                Self::Report {
                    output_dir,
                    sources,
                    ..
                },
                ToolFlavor::Legacy,
            ) => {
                let mut args = vec![
                    OsString::from("-a"),
                    OsString::from("-d"),
                    output_dir.as_os_str().to_owned(),
                ];
                args.extend(sources.iter().cloned());
                args
            }
            (
                Self::Report {
                    kind,
                    output_dir,
                    sources,
                },
                ToolFlavor::Modern,
            ) => {
                let mut args = vec![
                    OsString::from(kind.to_string()),
                    OsString::from("-d"),
                    output_dir.as_os_str().to_owned(),
                ];
                if !sources.is_empty() {
                    args.push(include_flag(sources));
                }
                args
            }
        };
        Ok(args)
    }
}

fn include_flag(sources: &[OsString]) -> OsString {
    let mut flag = OsString::from("--include=");
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            flag.push(",");
        }
        flag.push(source);
    }
    flag
}

/// Render a program and its arguments as a single line for logs and dry runs.
pub fn display_command(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
