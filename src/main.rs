use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use verifier_core::config::VerifierConfig;
use verifier_core::driver::{exit_code_for, Driver, EXIT_CONFIG_INVALID};

/// Verify, benchmark and score LLM providers for coding usability.
#[derive(Parser, Debug)]
#[command(name = "verifier", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "verifier.toml")]
    config: PathBuf,

    /// Keep running and fire configured schedules instead of a single pass.
    #[arg(long)]
    serve: bool,

    /// Process secret for the encrypted stores.
    #[arg(long, env = "VERIFIER_SECRET", hide_env_values = true)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let Some(secret) = cli.secret else {
        eprintln!("error: no store secret; set VERIFIER_SECRET or pass --secret");
        std::process::exit(EXIT_CONFIG_INVALID);
    };

    let config = match VerifierConfig::from_path(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };

    let driver = match Driver::build(config, &secret) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(exit_code_for(&e));
        }
    };

    let code = if cli.serve {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        match driver.serve(shutdown_rx).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {}", e);
                exit_code_for(&e)
            }
        }
    } else {
        match driver.run_once().await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {}", e);
                exit_code_for(&e)
            }
        }
    };

    std::process::exit(code);
}
