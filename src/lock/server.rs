//! The lock server: owner directory, grant logic, and the queues feeding the
//! revoker and retry dispatcher tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::proto::lock::{AcquireArgs, LockId, ReleaseArgs, StatArgs, StatReply};
use crate::proto::{Procedure, Status};
use crate::rpc::{ClientPool, Reply, Service};
use crate::wire::Wire;

use super::retryer;
use super::revoker::{self, RevokeTask};

/// Ownership half of a lock record.
enum Owner {
    Free,
    Held { holder: String },
}

/// One known lock. Created on first acquire, lives for the life of the
/// server.
struct LockRecord {
    owner: Owner,
    /// Waiters in arrival order. Non-empty implies a revoke has been queued
    /// for the current holder.
    queue: VecDeque<(String, u32)>,
    /// Acquire RPCs observed; reported by `stat`.
    acquires: u32,
}

impl LockRecord {
    fn new() -> Self {
        Self { owner: Owner::Free, queue: VecDeque::new(), acquires: 0 }
    }
}

/// The cache-coherent lock server.
///
/// The catalog mutex is the outermost lock: nothing else is acquired while
/// it is held, and the revoke channel and retry notify are only touched after
/// the catalog guard drops.
pub struct LockServer {
    table: Mutex<HashMap<LockId, LockRecord>>,
    /// Locks with queued waiters that the retry dispatcher should examine on
    /// its next pass.
    pending: Mutex<HashSet<LockId>>,
    revoke_send: async_channel::Sender<RevokeTask>,
    /// Signalled by `release`; wakes the retry dispatcher.
    freed: Notify,
}

impl LockServer {
    /// Creates the server and starts its revoker and retry dispatcher tasks.
    /// Must run inside a tokio runtime.
    pub fn spawn() -> Arc<Self> {
        let (server, revoke_recv) = Self::new();
        let pool = ClientPool::new();
        revoker::spawn(revoke_recv, pool.clone());
        retryer::spawn(server.clone(), pool);
        server
    }

    /// Builds the server and hands back the revoke queue, leaving the
    /// background tasks to the caller.
    fn new() -> (Arc<Self>, async_channel::Receiver<RevokeTask>) {
        let (revoke_send, revoke_recv) = async_channel::bounded(1024);
        let server = Arc::new(Self {
            table: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            revoke_send,
            freed: Notify::new(),
        });
        (server, revoke_recv)
    }

    /// Grants the lock, or queues the caller and schedules a revoke of the
    /// current holder.
    ///
    /// `Ok` lets the client cache the lock after its local release; `NoCache`
    /// means waiters already exist, so the first local release must hand the
    /// lock straight back.
    pub async fn acquire(&self, client_id: &str, seq: u32, lock_id: LockId) -> Status {
        let mut revoke = None;
        let status;
        {
            let mut table = self.table.lock().await;
            let record = table.entry(lock_id).or_insert_with(LockRecord::new);
            record.acquires += 1;
            match &record.owner {
                Owner::Free => {
                    status =
                        if record.queue.is_empty() { Status::Ok } else { Status::NoCache };
                    record.owner = Owner::Held { holder: client_id.to_owned() };
                }
                Owner::Held { holder } => {
                    record.queue.push_back((client_id.to_owned(), seq));
                    revoke = Some(RevokeTask {
                        holder: holder.clone(),
                        lock_id,
                        seq,
                    });
                    status = Status::Retry;
                    // The pending insert must happen before the catalog guard
                    // drops, or a concurrent release could sweep past this
                    // waiter and never come back.
                    self.pending.lock().await.insert(lock_id);
                }
            }
        }

        if let Some(task) = revoke {
            if self.revoke_send.send(task).await.is_err() {
                warn!(lock_id, "revoker is gone; dropping revoke");
            }
        }

        debug!(client_id, seq, lock_id, ?status, "acquire");
        status
    }

    /// Marks the lock free and wakes the retry dispatcher. Waiters are not
    /// dequeued here; the dispatcher owns that transition.
    pub async fn release(&self, client_id: &str, lock_id: LockId) -> Status {
        {
            let mut table = self.table.lock().await;
            match table.get_mut(&lock_id) {
                Some(record) => match &record.owner {
                    Owner::Held { holder } if holder == client_id => {
                        record.owner = Owner::Free;
                        debug!(client_id, lock_id, "release");
                    }
                    _ => {
                        warn!(client_id, lock_id, "release for a lock this client does not hold");
                        return Status::Ok;
                    }
                },
                None => {
                    warn!(client_id, lock_id, "release for an unknown lock");
                    return Status::Ok;
                }
            }
        }
        self.freed.notify_one();
        Status::Ok
    }

    /// Acquire RPCs observed for the lock; 0 if it was never requested.
    pub async fn stat(&self, lock_id: LockId) -> u32 {
        self.table.lock().await.get(&lock_id).map(|record| record.acquires).unwrap_or(0)
    }

    /// Current holder, for admin tooling and tests.
    pub async fn holder(&self, lock_id: LockId) -> Option<String> {
        match self.table.lock().await.get(&lock_id).map(|record| &record.owner) {
            Some(Owner::Held { holder }) => Some(holder.clone()),
            _ => None,
        }
    }

    /// Snapshot of the retry-pending set.
    pub(super) async fn pending_locks(&self) -> Vec<LockId> {
        self.pending.lock().await.iter().copied().collect()
    }

    /// One dispatcher pass over `candidates`: pops the head waiter of every
    /// free, contended lock. Locks whose queue drained (or that vanished)
    /// leave the pending set; membership changes under the catalog guard so
    /// a concurrent contended acquire cannot be swept away.
    pub(super) async fn take_retry_targets(
        &self,
        candidates: &[LockId],
    ) -> Vec<(String, LockId, u32)> {
        let mut targets = Vec::new();
        let mut table = self.table.lock().await;
        let mut pending = self.pending.lock().await;
        for &lock_id in candidates {
            match table.get_mut(&lock_id) {
                Some(record) if matches!(record.owner, Owner::Free) => {
                    match record.queue.pop_front() {
                        Some((client, seq)) => {
                            targets.push((client, lock_id, seq));
                            if record.queue.is_empty() {
                                pending.remove(&lock_id);
                            }
                        }
                        None => {
                            pending.remove(&lock_id);
                        }
                    }
                }
                Some(_) => {} // still held; revisit after the next release
                None => {
                    pending.remove(&lock_id);
                }
            }
        }
        targets
    }

    /// Parks the dispatcher until the next release.
    pub(super) async fn released(&self) {
        self.freed.notified().await;
    }
}

#[async_trait]
impl Service for LockServer {
    async fn call(&self, procedure: Procedure, body: Vec<u8>) -> Reply {
        let mut src = Cursor::new(body);
        match procedure {
            Procedure::LockAcquire => match AcquireArgs::decode(&mut src) {
                Ok(args) => {
                    let status = self.acquire(&args.client_id, args.seq, args.lock_id).await;
                    Reply::status(status)
                }
                Err(err) => malformed("acquire", &err),
            },
            Procedure::LockRelease => match ReleaseArgs::decode(&mut src) {
                Ok(args) => Reply::status(self.release(&args.client_id, args.lock_id).await),
                Err(err) => malformed("release", &err),
            },
            Procedure::LockStat => match StatArgs::decode(&mut src) {
                Ok(args) => {
                    let count = self.stat(args.lock_id).await;
                    Reply::ok_with(&StatReply { count })
                }
                Err(err) => malformed("stat", &err),
            },
            other => {
                warn!(?other, "procedure not served here");
                Reply::status(Status::Garbage)
            }
        }
    }
}

fn malformed(op: &str, err: &crate::wire::Error) -> Reply {
    warn!(op, %err, "malformed lock call");
    Reply::status(Status::Garbage)
}
