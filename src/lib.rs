pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod entities;
pub mod services;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{
    Cli, Commands, UserCommands, cmd_user_add, cmd_user_list, cmd_user_remove,
    cmd_user_set_active, cmd_user_show,
};
pub use config::Config;
use db::Store;

pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    init_tracing(&config);

    match &config.source {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    if config.uses_default_secret() {
        warn!("security.secret_key is the built-in placeholder; set SECRET_KEY before exposing this service");
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,

        Commands::Init => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("config.toml already exists; leaving it untouched.");
            }
            Ok(())
        }

        Commands::User { command } => match command {
            UserCommands::Add { username, password } => {
                cmd_user_add(&config, &username, password.as_deref()).await
            }
            UserCommands::List { json } => cmd_user_list(&config, json).await,
            UserCommands::Show { username } => cmd_user_show(&config, &username).await,
            UserCommands::Activate { username } => {
                cmd_user_set_active(&config, &username, true).await
            }
            UserCommands::Deactivate { username } => {
                cmd_user_set_active(&config, &username, false).await
            }
            UserCommands::Remove { id } => cmd_user_remove(&config, id).await,
        },
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.general.log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    info!("authd v{} starting...", env!("CARGO_PKG_VERSION"));

    if !config.server.enabled {
        warn!("server.enabled is false; nothing to serve");
        return Ok(());
    }

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    let store = Store::with_pool_options(
        &config.general.database_url,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;

    let port = config.server.port;
    let state = api::create_app_state(config, store, prometheus_handle)?;
    let app = api::router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Web API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => tracing::error!("Error listening for shutdown: {}", e),
    }
}
