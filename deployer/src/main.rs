use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use whaleray_deployer::{start, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,whaleray_deployer=debug"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .init();

    start(args).await;
}
