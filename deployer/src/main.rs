//! Deployer - Entry Point
//!
//! Receives deploy webhooks and replaces the named container with one running
//! the requested image.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use deployer::app::options::AppOptions;
use deployer::app::run::run;
use deployer::authn::gate::AuthGate;
use deployer::engine::docker::DockerEngine;
use deployer::logs::{init_logging, LogOptions};
use deployer::storage::settings::Settings;
use deployer::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings, file first then environment
    let mut settings = match cli_args.get("config") {
        Some(path) => match Settings::load(Path::new(path)).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };
    if let Err(e) = settings.apply_env() {
        eprintln!("Invalid settings: {e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // The shared secret is required before anything is served
    let gate = match AuthGate::from_env() {
        Ok(gate) => gate,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match DockerEngine::connect() {
        Ok(engine) => engine,
        Err(e) => {
            error!("Unable to connect to the Docker daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = engine.ping().await {
        error!("Docker daemon is not reachable: {}", e);
        return ExitCode::FAILURE;
    }

    let options = AppOptions::from(&settings);
    info!("Running deployer {} with options: {:?}", version.version, options);

    match run(options, Arc::new(engine), gate, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the deployer: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
