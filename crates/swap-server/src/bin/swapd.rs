//! swapd binary

use clap::{Arg, ArgMatches, Command};
use std::process;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swap_core::Config;
use swap_server::{bootstrap, server::shutdown_signal, HttpServer};

fn command() -> Command {
    Command::new("swapd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serve LLM queries from a memory-budgeted pool of local and remote models")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("HTTP server port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level for vramswap crates")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["text", "json"]),
        )
        .arg(
            Arg::new("disable-cors")
                .long("disable-cors")
                .help("Disable CORS support")
                .action(clap::ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = command().get_matches();

    // Logging is not up yet, so configuration errors go to stderr
    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("swapd: configuration error: {}", e);
            process::exit(1);
        }
    };

    init_tracing(&config);

    info!("Starting swapd with configuration:");
    info!("  Listen: {}:{}", config.server.bind_address, config.server.port);
    info!("  Devices: {}", config.devices.len());
    info!("  Models: {}", config.models.len());
    info!("  Remote fallback: {}", config.remote.is_some());
    info!("  Eviction policy: {:?}", config.orchestrator.eviction_policy);
    info!("  Response cache: {}", config.orchestrator.cache_responses);

    let runtime = match bootstrap::build(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start orchestrator: {}", e);
            process::exit(1);
        }
    };

    let server = HttpServer::new(config.server.clone(), runtime.state());
    let served = server.serve(shutdown_signal()).await;

    // Release device memory and stop managed runtimes either way
    runtime.orchestrator.shutdown().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        process::exit(1);
    }
    info!("swapd shutdown complete");
}

/// Load the config file (or the default search path), then apply flags
fn build_config(matches: &ArgMatches) -> Result<Config, String> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from_file(path).map_err(|e| format!("{}: {}", path, e))?,
        None => Config::load().map_err(|e| e.to_string())?,
    };

    if let Some(bind) = matches.get_one::<String>("bind") {
        config.server.bind_address = bind.clone();
    }
    if let Some(&port) = matches.get_one::<u16>("port") {
        config.server.port = port;
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    if matches.get_flag("disable-cors") {
        config.server.enable_cors = false;
    }

    config.server.bind_addr().map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn default_filter(level: &str) -> String {
    format!(
        "swapd={0},swap_server={0},swap_orchestrator={0},swap_adapter_runtime={0},swap_adapter_gpu={0},tower_http=debug",
        level
    )
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
