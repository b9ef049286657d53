//! stampede - scripted HTTP/2 load generator
//!
//! Main entry point: wires the script, statistics, client session, and
//! dispatcher together and waits for the run to drain.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stampede::cli::Cli;
use stampede::{Http2Client, Params, Result, Script, Sender, Stats};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse_args();

    if cli.show_schema {
        println!("{}", stampede::script::SCHEMA);
        return Ok(());
    }

    stampede::o11y::init_metrics_exporter();

    // Script load failures are fatal to startup
    let script = Script::from_path(&cli.script).with_context(|| {
        format!(
            "error in traffic script '{}'; check it against the schema shown by --show-schema",
            cli.script.display()
        )
    })?;

    let params = Params::new(cli.rate, cli.duration);
    tracing::info!(
        rate = cli.rate,
        duration_s = cli.duration,
        "sending a request every {} us",
        params.wait_time_us
    );

    let stats = Arc::new(Stats::new(cli.period, &cli.output, &script.message_names())?);
    let flusher = tokio::spawn(Arc::clone(&stats).run_flusher());

    let client = Http2Client::connect(Arc::clone(&stats), script)
        .await
        .context("terminating application, error connecting to server")?;

    // The sender's completion is the run's completion
    Sender::new(Arc::new(client), params).run().await;

    stats.end();
    flusher.await?;
    stampede::o11y::shutdown_metrics_exporter();
    Ok(())
}

/// Initialize tracing subscriber with environment filter
///
/// Diagnostics go to stderr so the statistics tables own stdout.
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampede=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
