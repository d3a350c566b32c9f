//! Revoker task: asks lock holders to give cached locks back.

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::proto::lock::{CallbackArgs, LockId};
use crate::proto::Procedure;
use crate::rpc::ClientPool;

/// One revoke to deliver: tell `holder` that some other client wants
/// `lock_id`. `seq` echoes the waiter's acquire, for the holder's logs and
/// staleness checks.
pub(super) struct RevokeTask {
    pub holder: String,
    pub lock_id: LockId,
    pub seq: u32,
}

pub(super) fn spawn(revoke_recv: Receiver<RevokeTask>, pool: ClientPool) -> JoinHandle<()> {
    tokio::spawn(run(revoke_recv, pool))
}

/// Drains the revoke queue. Revokes are fire-and-forget: the holder's
/// eventual release is what completes the transfer, so an unreachable holder
/// only costs a log line.
async fn run(revoke_recv: Receiver<RevokeTask>, pool: ClientPool) {
    while let Ok(task) = revoke_recv.recv().await {
        let handle = pool.handle(&task.holder);
        let args = CallbackArgs { lock_id: task.lock_id, seq: task.seq };
        match handle.call(Procedure::Revoke, &args).await {
            Ok((status, _)) => {
                debug!(holder = %task.holder, lock_id = task.lock_id, ?status, "revoke delivered");
            }
            Err(err) => {
                warn!(holder = %task.holder, lock_id = task.lock_id, %err, "revoke dropped");
            }
        }
    }
}
