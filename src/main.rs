use std::sync::Arc;

use clap::Parser;

mod app;
mod cli;
mod config;
mod db;
mod error;
mod lifecycle;
mod state;
mod users;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env()?);

    let sqlx_level = if config.database.query_logging { "info" } else { "warn" };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "rds_crud={},axum=info,tower_http=info,sqlx={}",
            config.app.log_level, sqlx_level
        )
    });

    if config.app.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(environment = %config.app.environment, "starting rds-crud");
            lifecycle::run(config).await
        }
        Command::Migrate { direction } => lifecycle::migrate(&config, direction).await,
    }
}
