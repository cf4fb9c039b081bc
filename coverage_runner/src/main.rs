use anyhow::{Context, Result};
use clap::Parser;
use coverage_runner::{
    init_tracing, Args, CoverageRunner, RunnerConfig, SummaryFormat, SystemInvoker,
};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let summary_format = args.summary;
    let dry_run = args.dry_run;
    let config = RunnerConfig::try_from(args).context("Invalid coverage runner configuration")?;
    let mut runner = CoverageRunner::new(config, SystemInvoker::new());

    if dry_run {
        for line in runner.planned_invocations()? {
            println!("{line}");
        }
        return Ok(());
    }

    let summary = runner.run().context("Coverage run failed")?;

    match summary_format {
        Some(SummaryFormat::Text) => println!("{summary}"),
        Some(SummaryFormat::Json) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => {}
    }

    std::process::exit(summary.exit_code());
}
