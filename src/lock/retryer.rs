//! Retry dispatcher task: tells waiting clients that their lock is free.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::proto::lock::CallbackArgs;
use crate::proto::Procedure;
use crate::rpc::ClientPool;

use super::server::LockServer;

pub(super) fn spawn(server: Arc<LockServer>, pool: ClientPool) -> JoinHandle<()> {
    tokio::spawn(run(server, pool))
}

/// Parks until a release, then sweeps the retry-pending set. The candidate
/// list is rebuilt from scratch on every pass, and at most one retry goes out
/// per lock per pass; the awakened client performs the actual free-to-held
/// transition by re-issuing its acquire.
async fn run(server: Arc<LockServer>, pool: ClientPool) {
    loop {
        server.released().await;

        let candidates = server.pending_locks().await;
        if candidates.is_empty() {
            continue;
        }

        for (client, lock_id, seq) in server.take_retry_targets(&candidates).await {
            let handle = pool.handle(&client);
            let args = CallbackArgs { lock_id, seq };
            match handle.call(Procedure::Retry, &args).await {
                Ok((status, _)) => debug!(%client, lock_id, seq, ?status, "retry delivered"),
                Err(err) => warn!(%client, lock_id, seq, %err, "retry dropped"),
            }
        }
    }
}
