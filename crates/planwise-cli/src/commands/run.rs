use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use planwise_engine::{
    run_simulation, CancellationToken, ExecutionOptions, RunOutcome, RunOverrides, RunSummary,
};
use planwise_types::run::{RunId, YearStatus};

use crate::RunArgs;

/// Exit code for runs stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

/// Execute the `run` command: parse, validate, and run a simulation.
pub async fn execute(config_path: &Path, args: &RunArgs) -> Result<ExitCode> {
    let config = super::load_config(config_path)?;

    let overrides = RunOverrides {
        run_id: args.run_id.clone().map(RunId::new),
        start_year: args.start_year,
        end_year: args.end_year,
        fail_fast: args.fail_fast_override(),
    };
    let options = ExecutionOptions {
        resume: !args.no_resume,
        mode_override: args.mode,
        cancellation: CancellationToken::new(),
    };

    tracing::info!(
        scenario = config.scenario,
        start_year = overrides.start_year.unwrap_or(config.simulation.start_year),
        end_year = overrides.end_year.unwrap_or(config.simulation.end_year),
        mode = options
            .mode_override
            .unwrap_or(config.event_generation.mode)
            .as_str(),
        "Simulation validated"
    );

    let token = options.cancellation.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current stage");
            token.cancel();
        }
    });

    let result = run_simulation(&config, &overrides, &options).await;
    signal_task.abort();
    let summary = result?;

    print_summary(&summary);
    println!("@@RUN_SUMMARY@@{}", serde_json::to_string(&summary)?);

    Ok(exit_code(summary.outcome))
}

fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Success => ExitCode::SUCCESS,
        RunOutcome::PartialSuccess => ExitCode::from(2),
        RunOutcome::Failure => ExitCode::FAILURE,
        RunOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Run '{}' {} ({}..={}).",
        summary.run_id,
        summary.outcome,
        summary.start_year,
        summary.end_year
    );
    if summary.restarted_stale {
        println!("  Configuration changed since last run; restarted from the first year.");
    }
    for year in &summary.years {
        let mode = year.event_mode.map_or("-", |m| m.as_str());
        let mut line = format!(
            "  {}  {:9}  mode={:9}  events={:>9}  {:.2}s",
            year.year,
            year.status.as_str(),
            mode,
            year.total_events,
            year.duration_secs
        );
        if year.fallback_used() {
            line.push_str("  (fallback)");
        }
        if let Some(stage) = year.resumed_from {
            line.push_str(&format!("  resumed after {stage}"));
        }
        println!("{line}");

        match year.status {
            YearStatus::Failed => {
                let stage = year.failed_stage.map_or("?", |s| s.as_str());
                println!(
                    "      failed at {stage}: {}",
                    year.error.as_deref().unwrap_or("unknown error")
                );
            }
            YearStatus::Skipped => {
                if let Some(reason) = year.skip_reason {
                    println!("      skipped: {reason}");
                }
            }
            _ => {}
        }
    }
    println!("  Total events:    {}", summary.total_events);
    println!("  Fallbacks:       {}", summary.fallback_count);
    println!("  Duration:        {:.2}s", summary.duration_secs);
    println!("  Fingerprint:     {}", summary.config_fingerprint.short());
}
