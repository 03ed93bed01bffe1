//! Actions OIDC Gateway - identity-token-authorized CONNECT tunnels

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use oidc_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config, ExitCode> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            Err(ExitCode::FAILURE)
        }
    }
}

/// Validate configuration and probe the issuer's key set
async fn run_check_config(config: Config) -> ExitCode {
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("✅ Configuration is valid");
    println!("   Issuer:     {}", gateway.config().oidc.issuer);
    println!("   Repository: {}", gateway.config().policy.repository);
    println!("   Audience:   {}", gateway.config().policy.audience);

    match gateway.probe_issuer().await {
        Ok(keys) => {
            println!("✅ Issuer reachable, {keys} signing key(s) published");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Issuer probe failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        issuer = %config.oidc.issuer,
        "Starting OIDC Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
