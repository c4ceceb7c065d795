use crate::app::App;
use crate::cli::Args;
use crate::config::Config;
use crate::logging::setup_logging;
use clap::Parser;
use figment::Figment;
use figment::providers::Env;
use std::process::ExitCode;
use tracing::{error, info};

mod app;
mod cli;
mod config;
mod data;
mod logging;
mod ranking;
mod refresh;
mod state;
mod web;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let config: Config = Figment::new()
        .merge(Env::raw())
        .extract()
        .expect("Failed to load config");
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting icetrack"
    );

    let app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    app.run().await
}
