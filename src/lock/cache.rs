//! Client-side lock cache.
//!
//! A granted lock stays in the local table across acquire/release cycles, so
//! repeat acquires cost no RPC. The server claws a lock back by calling
//! `revoke` on the client's callback listener; the lock then leaves the cache
//! as soon as the local users drain, via the releaser task. `retry` tells a
//! parked acquire that its moment has come.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::proto::lock::{AcquireArgs, CallbackArgs, LockId, ReleaseArgs};
use crate::proto::{Procedure, Status};
use crate::rpc::{self, Reply, RpcClient, Service};
use crate::wire::Wire;

use super::releaser;

/// Local lifecycle of a cached lock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LockState {
    /// An acquire is out to the server; nothing granted yet.
    Acquiring,
    /// Granted and idle in the cache.
    Free,
    /// Held by a local task.
    Locked,
    /// Evicted; queued for the releaser to hand back.
    Releasing,
}

struct LockInner {
    state: LockState,
    /// The server has asked for this lock back.
    revoke_requested: bool,
    /// Local tasks parked on this lock, the ACQUIRING requester included.
    waiters: u32,
    owner: Option<tokio::task::Id>,
    /// Sequence number of the outstanding or most recent acquire.
    last_seq: u32,
}

/// One cached lock. Owns its synchronization primitives: the state mutex and
/// the notify that wakes parked acquirers on a FREE transition.
pub(super) struct CachedLock {
    pub(super) lock_id: LockId,
    inner: Mutex<LockInner>,
    freed: Notify,
}

impl CachedLock {
    fn new(lock_id: LockId, seq: u32) -> Self {
        Self {
            lock_id,
            inner: Mutex::new(LockInner {
                state: LockState::Acquiring,
                revoke_requested: false,
                waiters: 1,
                owner: None,
                last_seq: seq,
            }),
            freed: Notify::new(),
        }
    }
}

/// Errors surfaced by lock cache calls.
#[derive(Debug)]
pub enum LockError {
    /// The lock is not in the cache (release without a matching acquire).
    NoEnt,
    /// The transport to the lock server failed.
    Transport(rpc::Error),
    /// The server answered with a status that does not fit the call.
    Unexpected(Status),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::NoEnt => write!(f, "lock is not cached here"),
            LockError::Transport(err) => write!(f, "lock call failed: {err}"),
            LockError::Unexpected(status) => write!(f, "unexpected lock status {status:?}"),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// The per-process lock cache.
///
/// Lock ordering: the cache table mutex comes before any per-lock mutex. The
/// miss path drops the table lock before calling the server; the retry
/// handler intentionally does not, serializing itself against the other
/// handlers the way the protocol expects.
pub struct LockCache {
    /// `host:port` of the callback listener; the name the server knows us by.
    id: String,
    port: u32,
    server: RpcClient,
    table: Mutex<HashMap<LockId, Arc<CachedLock>>>,
    seq: AtomicU32,
    release_send: async_channel::Sender<Arc<CachedLock>>,
}

impl LockCache {
    /// Binds the callback listener on an ephemeral port and starts the
    /// releaser and callback reactor tasks.
    pub async fn spawn(lock_dst: &str) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (release_send, release_recv) = async_channel::bounded(256);

        let cache = Arc::new(Self {
            id: addr.to_string(),
            port: u32::from(addr.port()),
            server: RpcClient::new(lock_dst),
            table: Mutex::new(HashMap::new()),
            seq: AtomicU32::new(1),
            release_send,
        });

        releaser::spawn(cache.clone(), release_recv);
        let callbacks = cache.clone();
        tokio::spawn(async move {
            if let Err(err) = rpc::serve(listener, callbacks).await {
                warn!(%err, "callback listener exited");
            }
        });

        debug!(id = %cache.id, "lock cache up");
        Ok(cache)
    }

    /// The `host:port` identity the server calls back on.
    pub fn client_id(&self) -> &str {
        &self.id
    }

    /// Whether the lock currently has a record in the cache.
    pub async fn is_cached(&self, lock_id: LockId) -> bool {
        self.table.lock().await.contains_key(&lock_id)
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Blocks until the calling task holds `lock_id`.
    pub async fn acquire(&self, lock_id: LockId) -> Result<(), LockError> {
        let lock = self.lookup_or_request(lock_id).await?;
        loop {
            {
                let mut inner = lock.inner.lock().await;
                if inner.state == LockState::Free {
                    inner.state = LockState::Locked;
                    inner.owner = tokio::task::try_id();
                    inner.waiters -= 1;
                    debug!(id = %self.id, lock_id, "acquired");
                    return Ok(());
                }
            }
            lock.freed.notified().await;
        }
    }

    /// Cache hit: join the local waiters, no RPC. Miss: create the record
    /// pinned in ACQUIRING and ask the server.
    async fn lookup_or_request(&self, lock_id: LockId) -> Result<Arc<CachedLock>, LockError> {
        let (lock, seq) = {
            let mut table = self.table.lock().await;
            if let Some(lock) = table.get(&lock_id) {
                let lock = lock.clone();
                lock.inner.lock().await.waiters += 1;
                debug!(id = %self.id, lock_id, "cache hit");
                return Ok(lock);
            }
            let seq = self.next_seq();
            let lock = Arc::new(CachedLock::new(lock_id, seq));
            table.insert(lock_id, lock.clone());
            (lock, seq)
        };

        debug!(id = %self.id, lock_id, seq, "cache miss; asking the server");
        let args =
            AcquireArgs { client_id: self.id.clone(), port: self.port, seq, lock_id };
        let status = match self.server.call(Procedure::LockAcquire, &args).await {
            Ok((status, _)) => status,
            Err(err) => {
                self.abandon(&lock).await;
                return Err(LockError::Transport(err));
            }
        };

        let mut inner = lock.inner.lock().await;
        match status {
            // A revoke for this very grant may already have landed; the flag
            // is only ever set here, never cleared.
            Status::Ok => inner.state = LockState::Free,
            Status::NoCache => {
                inner.state = LockState::Free;
                inner.revoke_requested = true;
            }
            Status::Retry => {} // stay ACQUIRING; the retry callback finishes this
            other => {
                drop(inner);
                self.abandon(&lock).await;
                return Err(LockError::Unexpected(other));
            }
        }
        debug!(id = %self.id, lock_id, seq, ?status, "server answered");
        drop(inner);
        Ok(lock)
    }

    /// Backs out of a remote acquire that failed outright.
    async fn abandon(&self, lock: &Arc<CachedLock>) {
        let mut table = self.table.lock().await;
        let mut inner = lock.inner.lock().await;
        inner.waiters -= 1;
        if inner.waiters == 0 {
            table.remove(&lock.lock_id);
        }
    }

    /// Releases a lock held by the calling task.
    ///
    /// Hands it to a local waiter if one is parked; otherwise, if the server
    /// has revoked it, evicts the record and queues the hand-back.
    pub async fn release(&self, lock_id: LockId) -> Result<(), LockError> {
        let mut table = self.table.lock().await;
        let Some(lock) = table.get(&lock_id).cloned() else {
            warn!(id = %self.id, lock_id, "release of a lock that is not cached");
            return Err(LockError::NoEnt);
        };

        let mut inner = lock.inner.lock().await;
        debug_assert_eq!(inner.state, LockState::Locked, "release of an unlocked lock");
        if let (Some(owner), Some(caller)) = (inner.owner, tokio::task::try_id()) {
            debug_assert_eq!(owner, caller, "release by a task that does not hold the lock");
        }
        inner.state = LockState::Free;
        inner.owner = None;

        if inner.waiters == 0 && inner.revoke_requested {
            inner.state = LockState::Releasing;
            table.remove(&lock_id);
            drop(inner);
            drop(table);
            debug!(id = %self.id, lock_id, "drained and revoked; handing back");
            self.enqueue_release(lock).await;
        } else {
            drop(inner);
            drop(table);
            // Local waiters run before a revoke takes effect.
            lock.freed.notify_one();
        }
        Ok(())
    }

    /// Serves a `revoke` callback.
    ///
    /// Marks the lock wanted and, if it is idle, starts the hand-back right
    /// away. The echoed `seq` belongs to the waiting client's acquire; it is
    /// logged but not compared, and the handler stays idempotent.
    async fn handle_revoke(&self, lock_id: LockId, seq: u32) -> Status {
        let mut table = self.table.lock().await;
        let Some(lock) = table.get(&lock_id).cloned() else {
            debug!(id = %self.id, lock_id, seq, "revoke for a lock that is already gone");
            return Status::NoEnt;
        };

        let mut inner = lock.inner.lock().await;
        debug!(id = %self.id, lock_id, seq, state = ?inner.state, "revoke received");
        inner.revoke_requested = true;
        if inner.state == LockState::Free && inner.waiters == 0 {
            inner.state = LockState::Releasing;
            table.remove(&lock_id);
            drop(inner);
            drop(table);
            self.enqueue_release(lock).await;
        }
        Status::Ok
    }

    /// Serves a `retry` callback: re-issues the acquire that was turned away
    /// with RETRY. Stale deliveries (the record is no longer ACQUIRING, or
    /// the echo does not match the outstanding request) are no-ops.
    async fn handle_retry(&self, lock_id: LockId, seq: u32) -> Status {
        let table = self.table.lock().await;
        let Some(lock) = table.get(&lock_id).cloned() else {
            debug!(id = %self.id, lock_id, seq, "retry for a lock that is already gone");
            return Status::NoEnt;
        };

        let mut inner = lock.inner.lock().await;
        if inner.state != LockState::Acquiring || inner.last_seq != seq {
            debug!(id = %self.id, lock_id, seq, state = ?inner.state, "stale retry ignored");
            return Status::Ok;
        }
        let next = self.next_seq();
        inner.last_seq = next;
        drop(inner);

        debug!(id = %self.id, lock_id, seq = next, "retrying acquire");
        let args =
            AcquireArgs { client_id: self.id.clone(), port: self.port, seq: next, lock_id };
        let status = match self.server.call(Procedure::LockAcquire, &args).await {
            Ok((status, _)) => status,
            Err(err) => {
                warn!(id = %self.id, lock_id, %err, "retried acquire failed; waiting for another retry");
                return Status::Ok;
            }
        };

        let mut inner = lock.inner.lock().await;
        match status {
            Status::Ok => {
                inner.state = LockState::Free;
                lock.freed.notify_one();
            }
            Status::NoCache => {
                inner.state = LockState::Free;
                inner.revoke_requested = true;
                lock.freed.notify_one();
            }
            Status::Retry => {} // lost a race to another client; the server will call again
            other => {
                warn!(id = %self.id, lock_id, ?other, "unexpected status on retried acquire");
            }
        }
        Status::Ok
    }

    async fn enqueue_release(&self, lock: Arc<CachedLock>) {
        if self.release_send.send(lock).await.is_err() {
            warn!(id = %self.id, "releaser is gone; dropping hand-back");
        }
    }

    /// Sends the server-side release for an evicted lock. Runs on the
    /// releaser task so neither a local `release` nor the revoke handler does
    /// network I/O.
    pub(super) async fn release_remote(&self, lock_id: LockId) {
        let args = ReleaseArgs {
            client_id: self.id.clone(),
            port: self.port,
            seq: 0,
            lock_id,
        };
        match self.server.call(Procedure::LockRelease, &args).await {
            Ok((status, _)) => debug!(id = %self.id, lock_id, ?status, "released back to server"),
            Err(err) => warn!(id = %self.id, lock_id, %err, "release back to server failed"),
        }
    }
}

#[async_trait]
impl Service for LockCache {
    async fn call(&self, procedure: Procedure, body: Vec<u8>) -> Reply {
        let mut src = Cursor::new(body);
        match procedure {
            Procedure::Retry => match CallbackArgs::decode(&mut src) {
                Ok(args) => Reply::status(self.handle_retry(args.lock_id, args.seq).await),
                Err(err) => malformed("retry", &err),
            },
            Procedure::Revoke => match CallbackArgs::decode(&mut src) {
                Ok(args) => Reply::status(self.handle_revoke(args.lock_id, args.seq).await),
                Err(err) => malformed("revoke", &err),
            },
            other => {
                warn!(?other, "procedure not served here");
                Reply::status(Status::Garbage)
            }
        }
    }
}

fn malformed(op: &str, err: &crate::wire::Error) -> Reply {
    warn!(op, %err, "malformed callback");
    Reply::status(Status::Garbage)
}
