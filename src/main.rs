//! EnvTrack station ingestion server.
//!
//! Completed station payloads are written to stdout as JSON lines; logs go
//! to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use envtrack_ingest::config::{self, CliOverrides};
use envtrack_ingest::handler::spawn_sink_task;
use envtrack_ingest::logging::init_logging;
use envtrack_ingest::{registry, Acceptor};

/// How long pending payload records get to drain on shutdown.
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "envtrack-ingest", version, about = "TCP ingestion server for EnvTrack stations")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Registered station GUID (repeatable)
    #[arg(long = "station", value_name = "GUID")]
    stations: Vec<String>,

    /// JSON station registry file
    #[arg(long)]
    stations_file: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            stations: self.stations.clone(),
            stations_file: self.stations_file.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply_environment_overrides()?;
    config.apply_cli_overrides(&cli.overrides())?;
    config.validate()?;

    init_logging(&config.logging)?;

    let stations = registry::from_config(&config.stations);
    let (sink, sink_task) = spawn_sink_task(tokio::io::stdout(), config.sink.channel_capacity);

    let acceptor = Acceptor::builder()
        .station_registry(stations)
        .payload_handler(Arc::new(sink))
        .session_config(config.session.to_session_config())
        .max_connections(config.listener.max_connections)
        .bind(config.listener.bind_addr())
        .await?;

    acceptor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    match tokio::time::timeout(SINK_DRAIN_TIMEOUT, sink_task).await {
        Ok(Ok(Err(e))) => tracing::error!("Payload sink failed: {}", e),
        Ok(Err(e)) => tracing::error!("Payload sink task panicked: {}", e),
        Ok(Ok(Ok(()))) => {}
        Err(_) => tracing::warn!("Payload sink did not drain in time"),
    }

    Ok(())
}
