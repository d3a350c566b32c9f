#![allow(dead_code)]
//! In-process cluster fixture: both services on ephemeral ports, plus
//! helpers shared by the integration suites.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use extfs::extent::ExtentServer;
use extfs::lock::{LockCache, LockServer};
use extfs::rpc;
use extfs::Config;

pub struct Cluster {
    pub extent_addr: String,
    pub lock_addr: String,
    pub lock_server: Arc<LockServer>,
    pub extent_server: Arc<ExtentServer>,
}

impl Cluster {
    /// Boots an extent service and a lock service in this process.
    pub async fn start() -> Self {
        let extent_listener =
            TcpListener::bind("127.0.0.1:0").await.expect("bind extent listener");
        let extent_addr = extent_listener.local_addr().expect("extent addr").to_string();
        let extent_server = Arc::new(ExtentServer::new());
        tokio::spawn(rpc::serve(extent_listener, extent_server.clone()));

        let lock_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind lock listener");
        let lock_addr = lock_listener.local_addr().expect("lock addr").to_string();
        let lock_server = LockServer::spawn();
        tokio::spawn(rpc::serve(lock_listener, lock_server.clone()));

        Self { extent_addr, lock_addr, lock_server, extent_server }
    }

    pub fn config(&self) -> Config {
        Config::new(self.extent_addr.clone(), self.lock_addr.clone())
    }

    pub async fn lock_client(&self) -> Arc<LockCache> {
        LockCache::spawn(&self.lock_addr).await.expect("spawn lock cache")
    }
}

/// Polls `probe` every 10ms until it holds, for up to five seconds.
pub async fn eventually<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
