//! lg-loadgen: a load-generation client for the LG stream protocol
//!
//! Opens several concurrent connections to one LG server. Each connection
//! sends a random number of randomly sized DATA streams and then hangs up.
//! Once every connection is done, one more connection tells the server to
//! shut down.
//!
//! Features:
//! - Fixed 26-byte little-endian frame headers
//! - Payloads written in 4 KiB pages
//! - Reproducible runs from a seed
//! - Configuration via CLI arguments or TOML file

mod config;
mod driver;
mod payload;
mod protocol;
mod session;
#[cfg(test)]
mod testing;

use config::Config;
use driver::LoadDriver;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        endpoint = %config.endpoint,
        workers = config.workers,
        id_stride = config.id_stride,
        max_streams = config.limits.max_streams,
        max_stream_length = config.limits.max_stream_length,
        ack_timeout = ?config.ack_timeout,
        "Starting lg-loadgen"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let report = runtime.block_on(LoadDriver::new(config).run())?;

    if !report.is_success() {
        return Err(format!(
            "{} of {} workers failed",
            report.failed(),
            report.outcomes.len() + report.aborted
        )
        .into());
    }

    info!("done");
    Ok(())
}
