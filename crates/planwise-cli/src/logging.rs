use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Initialize structured logging on stderr.
///
/// Stdout is reserved for the run report and its `@@RUN_SUMMARY@@` line, so
/// log output never interleaves with what scripts parse. `RUST_LOG` wins over
/// `--log-level` when set.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter directive.
pub fn init(log_level: &str) -> Result<()> {
    let filter = build_filter(log_level, std::env::var("RUST_LOG").ok().as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_filter(log_level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives)
            .with_context(|| format!("Invalid RUST_LOG filter '{directives}'"));
    }
    EnvFilter::try_new(log_level).with_context(|| format!("Invalid --log-level '{log_level}'"))
}
