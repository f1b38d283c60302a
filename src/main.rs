//! # Campus Gateway
//!
//! API gateway in front of the campus platform services (auth, users,
//! courses, planning, news, statistics, ...).
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration
//! campus-gateway
//!
//! # Start with a config file
//! campus-gateway --config /etc/campus-gateway/gateway.yaml
//!
//! # Start with environment overrides
//! GATEWAY_PORT=9000 campus-gateway
//! ```

use anyhow::Context;
use clap::Parser;
use gateway_config::ConfigLoader;
use gateway_server::{AppState, Server};
use gateway_telemetry::{init_logging, LoggingConfig};
use std::path::PathBuf;
use tracing::{error, info};

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "campus-gateway", version, about = "API gateway for the campus platform")]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host, overrides the configuration
    #[arg(long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Bind port, overrides the configuration
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,

    /// Log level filter, overrides the configuration
    #[arg(long, env = "GATEWAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "GATEWAY_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!(error = %e, "Gateway failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new().with_env_overrides(true);
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().await.context("Failed to load configuration")?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_logging(&LoggingConfig::new(&config.logging.level).with_json(config.logging.json))
        .context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.server.bind_address(),
        routes = config.routes.len(),
        "Starting campus gateway"
    );

    let state = AppState::builder()
        .config(config)
        .build()
        .context("Failed to build gateway state")?;

    Server::new(state).run().await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_every_flag_reads_environment() {
        let command = Args::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .and_then(|env| env.to_str())
                .map(str::to_string)
        };
        assert_eq!(env_of("config").as_deref(), Some("GATEWAY_CONFIG"));
        assert_eq!(env_of("host").as_deref(), Some("GATEWAY_HOST"));
        assert_eq!(env_of("port").as_deref(), Some("GATEWAY_PORT"));
        assert_eq!(env_of("log_level").as_deref(), Some("GATEWAY_LOG_LEVEL"));
        assert_eq!(env_of("json_logs").as_deref(), Some("GATEWAY_JSON_LOGS"));
    }

    #[test]
    fn test_flags_parse() {
        let args = Args::try_parse_from([
            "campus-gateway",
            "--host",
            "0.0.0.0",
            "-p",
            "9000",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.port, Some(9000));
        assert!(args.json_logs);
    }
}
