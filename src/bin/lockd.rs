//! Lock service daemon.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use extfs::lock::LockServer;
use extfs::rpc;

#[derive(Parser)]
#[command(name = "lockd", about = "extfs cache-coherent lock service")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3772")]
    listen: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).await.expect("bind lock service listener");
    info!(listen = %args.listen, "lock service up");

    let server = LockServer::spawn();
    if let Err(err) = rpc::serve(listener, server).await {
        error!(%err, "lock service exited");
    }
}
