//! Extent service daemon.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use extfs::extent::ExtentServer;
use extfs::rpc;

#[derive(Parser)]
#[command(name = "extentd", about = "extfs extent service")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3770")]
    listen: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).await.expect("bind extent service listener");
    info!(listen = %args.listen, "extent service up");

    let server = Arc::new(ExtentServer::new());
    if let Err(err) = rpc::serve(listener, server).await {
        error!(%err, "extent service exited");
    }
}
