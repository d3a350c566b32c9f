//! Releaser task: hands evicted locks back to the server.

use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;

use super::cache::{CachedLock, LockCache};

pub(super) fn spawn(
    cache: Arc<LockCache>,
    release_recv: Receiver<Arc<CachedLock>>,
) -> JoinHandle<()> {
    tokio::spawn(run(cache, release_recv))
}

/// Consumes the release queue. Each entry was already evicted from the cache
/// table in RELEASING state; the server release goes out here so that user
/// tasks and callback handlers never block on the network for it, and the
/// record itself dies with its last reference.
async fn run(cache: Arc<LockCache>, release_recv: Receiver<Arc<CachedLock>>) {
    while let Ok(lock) = release_recv.recv().await {
        cache.release_remote(lock.lock_id).await;
    }
}
