mod app;
mod cli;
mod config;
mod models;
mod providers;
mod services;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::App;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    App::bootstrap(cli)?.run().await
}
