#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use gate_config::Config;
use gate_entities::Migrator;
use gate_providers::OracleClient;
use gate_web::{AppState, HttpTelegramApi};
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "psycheos-gateway")]
#[command(about = "Multi-tenant Telegram webhook gateway for PsycheOS tool bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook dispatcher and REST API
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

fn connect_options(url: &str, max: u32, min: u32) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url.to_owned());
    opts.max_connections(max).min_connections(min);
    opts
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("configuration loaded from environment");

    match cli.command {
        Commands::Migrate => {
            let migrate_db = Database::connect(connect_options(&config.database_url_migrate, 1, 1)).await?;
            Migrator::up(&migrate_db, None).await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            let migrate_db = Database::connect(connect_options(&config.database_url_migrate, 1, 1)).await?;
            Migrator::up(&migrate_db, None).await?;

            let db = Database::connect(connect_options(
                &config.database_url,
                config.db_pool_max,
                config.db_pool_min,
            ))
            .await?;

            let oracle: Arc<dyn gate_core::Oracle> = Arc::new(OracleClient::new(
                config.ai_oracle_api_key.clone(),
                config.ai_oracle_base_url.clone(),
            ));
            let telegram: Arc<dyn gate_web::TelegramApi> = Arc::new(HttpTelegramApi::default());

            let bind_addr = config.bind_addr.clone();
            let state = AppState::new(config, db, oracle, telegram);
            let app = gate_web::router(state);

            info!(%bind_addr, "listening");
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
