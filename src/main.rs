//! Units Gateway - read-only proxy for the CRM unit inventory

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use units_gateway::{
    cache::TtlCache,
    cli::{Cli, Command, QueryTarget},
    config::Config,
    crm::CrmClient,
    gateway::Gateway,
    setup_tracing,
    units::{UnitsService, error_envelope},
};

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Query { target, refresh }) => run_query(config, target, refresh).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> units_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Run one query handler and print its envelope
async fn run_query(config: Config, target: QueryTarget, refresh: bool) -> ExitCode {
    let client = match CrmClient::new(&config.crm) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create CRM client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let units = UnitsService::new(
        Arc::new(client),
        Arc::new(TtlCache::new()),
        &config.cache,
        config.crm.api_version.clone(),
    );

    info!(target = %target, refresh = refresh, "Running query");
    let result = match target {
        QueryTarget::Units => units.list_units(refresh).await,
        QueryTarget::Describe => units.describe_units(refresh).await,
    };

    let (envelope, code) = match result {
        Ok(envelope) => (envelope, ExitCode::SUCCESS),
        Err(e) => {
            error!("Query failed: {e}");
            (error_envelope(&e), ExitCode::FAILURE)
        }
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize envelope: {e}");
            return ExitCode::FAILURE;
        }
    }
    code
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting Units Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
