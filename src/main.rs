use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use treequery_service::config::{ConfigManager, Profile, QueryConfig};
use treequery_service::http::{router, spawn_housekeeping, spawn_memory_sampler};
use treequery_service::logging::init_logger;
use treequery_service::service::Coordinator;

// Server configuration struct
#[derive(Debug)]
struct ServerConfig {
    log_level: String,
    no_color: bool,
    port: u16,
    profile: Profile,
}

impl ServerConfig {
    fn from_args() -> io::Result<Self> {
        #[derive(Parser, Debug)]
        #[command(
            version = "1.0",
            about = "Tree-query service",
            long_about = "HTTP service that parses source code with Tree-sitter and evaluates a tree-query language against the resulting syntax tree."
        )]
        struct Args {
            #[arg(
                long,
                default_value = "info",
                help = "Set the logging level for the server",
                value_parser = ["error", "warn", "info", "debug", "trace"]
            )]
            log_level: String,
            #[arg(long, help = "Disable ANSI color output")]
            no_color: bool,
            #[arg(long, default_value_t = 8080, help = "Port to bind the HTTP server to")]
            port: u16,
            #[arg(
                long,
                help = "Configuration profile to run with. Can be set via APP_ENV environment variable.",
                value_parser = ["production", "development", "test"]
            )]
            profile: Option<String>,
        }

        let args = Args::parse();

        let profile = std::env::var("APP_ENV")
            .ok()
            .or(args.profile)
            .and_then(|v| v.parse::<Profile>().ok())
            .unwrap_or(Profile::Development);

        Ok(Self {
            log_level: args.log_level,
            no_color: args.no_color,
            port: args.port,
            profile,
        })
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = ServerConfig::from_args()?;
    init_logger(config.no_color, Some(&config.log_level))?;

    info!(profile = ?config.profile, port = config.port, "starting tree-query service");

    let query_config = QueryConfig::from_env(config.profile);
    let config_manager = ConfigManager::new(query_config);
    let coordinator = Arc::new(Coordinator::new(config_manager));

    coordinator
        .grammar()
        .preload_all()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    tokio::spawn(spawn_housekeeping(coordinator.clone(), Duration::from_secs(30)));
    tokio::spawn(spawn_memory_sampler(coordinator.clone(), Duration::from_secs(10)));

    let app = router(coordinator);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "tree-query service listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}
