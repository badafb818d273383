//! Runs the relabelling churn against one engine and checks that the
//! population survives it.
//!
//! Configuration comes from `LOCKSTEP_*` variables, optionally loaded from a
//! `.env` file; log verbosity from `RUST_LOG`.

use anyhow::{Context, bail};
use dotenv::dotenv;
use lockstep_core::churn::{self, ChurnConfig};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ChurnConfig::from_env().context("reading churn configuration")?;
    info!(
        engine = %config.engine,
        population = config.population,
        iterations = config.iterations,
        pause_ms = config.pause.as_millis() as u64,
        "configuration loaded"
    );

    let report = churn::run_configured(&config).context("running churn")?;
    debug!(
        size = report.initial,
        members = ?report.members_before,
        "set before churn"
    );
    debug!(
        size = report.final_len,
        members = ?report.members_after,
        "set after churn"
    );
    if !report.passed() {
        bail!(
            "population changed under churn: started with {}, ended with {}",
            report.initial,
            report.final_len
        );
    }

    info!(
        size = report.final_len,
        relabels = report.relabels,
        "population preserved"
    );
    Ok(())
}
