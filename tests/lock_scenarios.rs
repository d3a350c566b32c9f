//! End-to-end lock protocol scenarios: cache reuse, revocation-driven
//! hand-off, FIFO ordering among waiters, and callback idempotence.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use extfs::extent::ExtentClient;
use extfs::lock::LockCache;
use extfs::proto::lock::CallbackArgs;
use extfs::proto::{Procedure, Status};
use extfs::rpc::Service;
use extfs::wire::to_vec;

use common::{eventually, Cluster};

#[tokio::test]
async fn s1_repeat_acquires_hit_the_cache() {
    let cluster = Cluster::start().await;
    let a = cluster.lock_client().await;

    a.acquire(7).await.expect("acquire");
    a.release(7).await.expect("release");
    a.acquire(7).await.expect("acquire");
    a.release(7).await.expect("release");

    // One acquire RPC ever reached the server, and no release did: it still
    // considers this client the holder.
    assert_eq!(cluster.lock_server.stat(7).await, 1);
    assert_eq!(cluster.lock_server.holder(7).await.as_deref(), Some(a.client_id()));
    assert!(a.is_cached(7).await);
}

#[tokio::test]
async fn s2_contended_lock_hands_off_between_clients() {
    let cluster = Cluster::start().await;
    let a = cluster.lock_client().await;
    let b = cluster.lock_client().await;

    a.acquire(7).await.expect("acquire");

    let b_task = {
        let b = b.clone();
        tokio::spawn(async move { b.acquire(7).await.expect("acquire") })
    };
    // Let B queue up behind A; A now has a revoke pending against it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b_task.is_finished());

    a.release(7).await.expect("release");
    timeout(Duration::from_secs(5), b_task).await.expect("b acquires in time").expect("join");

    assert_eq!(cluster.lock_server.holder(7).await.as_deref(), Some(b.client_id()));
    // A's record is torn down once its hand-back completes.
    eventually("a to evict lock 7", || {
        let a = a.clone();
        async move { !a.is_cached(7).await }
    })
    .await;

    b.release(7).await.expect("release");
}

#[tokio::test]
async fn s3_s4_waiters_are_served_in_fifo_order() {
    let cluster = Cluster::start().await;
    let a = cluster.lock_client().await;
    let b = cluster.lock_client().await;
    let c = cluster.lock_client().await;
    let d = cluster.lock_client().await;

    a.acquire(7).await.expect("acquire");

    let (done_send, mut done_recv) = tokio::sync::mpsc::unbounded_channel::<&'static str>();
    let spawn_holder = |cache: Arc<LockCache>, tag: &'static str, hold: Duration| {
        let done = done_send.clone();
        tokio::spawn(async move {
            cache.acquire(7).await.expect("acquire");
            tokio::time::sleep(hold).await;
            cache.release(7).await.expect("release");
            done.send(tag).expect("report");
        })
    };

    let b_task = spawn_holder(b.clone(), "b", Duration::from_millis(200));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let c_task = spawn_holder(c.clone(), "c", Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // B and C are queued. Once A lets go, B holds under a no-cache grant;
    // D then arrives while B still holds and is queued behind C.
    a.release(7).await.expect("release");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let d_task = spawn_holder(d.clone(), "d", Duration::ZERO);

    for task in [b_task, c_task, d_task] {
        timeout(Duration::from_secs(10), task).await.expect("lock makes the rounds").expect("join");
    }

    let mut order = Vec::new();
    while let Ok(tag) = done_recv.try_recv() {
        order.push(tag);
    }
    assert_eq!(order, ["b", "c", "d"]);
}

#[tokio::test]
async fn duplicated_revoke_delivery_is_idempotent() {
    let cluster = Cluster::start().await;
    let a = cluster.lock_client().await;

    a.acquire(9).await.expect("acquire");
    a.release(9).await.expect("release");
    assert!(a.is_cached(9).await);

    // Deliver a revoke by hand, then repeat it, as a duplicating transport
    // would. The first pries the idle lock out of the cache.
    let body = to_vec(&CallbackArgs { lock_id: 9, seq: 1 });
    let reply = Service::call(a.as_ref(), Procedure::Revoke, body.clone()).await;
    assert_eq!(reply.status, Status::Ok);

    eventually("lock 9 to go home", || {
        let (server, a) = (cluster.lock_server.clone(), a.clone());
        async move { server.holder(9).await.is_none() && !a.is_cached(9).await }
    })
    .await;

    // The duplicate finds nothing and says so.
    let reply = Service::call(a.as_ref(), Procedure::Revoke, body).await;
    assert_eq!(reply.status, Status::NoEnt);

    // State stayed coherent: another client takes the lock cleanly.
    let b = cluster.lock_client().await;
    b.acquire(9).await.expect("acquire");
    assert_eq!(cluster.lock_server.holder(9).await.as_deref(), Some(b.client_id()));
}

#[tokio::test]
async fn stale_retry_is_a_no_op() {
    let cluster = Cluster::start().await;
    let a = cluster.lock_client().await;

    a.acquire(5).await.expect("acquire");

    // A retry with no outstanding acquire behind it: acknowledged, ignored.
    let reply =
        Service::call(a.as_ref(), Procedure::Retry, to_vec(&CallbackArgs { lock_id: 5, seq: 1 }))
            .await;
    assert_eq!(reply.status, Status::Ok);

    // A retry for a lock this client never saw.
    let reply =
        Service::call(a.as_ref(), Procedure::Retry, to_vec(&CallbackArgs { lock_id: 6, seq: 1 }))
            .await;
    assert_eq!(reply.status, Status::NoEnt);

    a.release(5).await.expect("release");
    // Neither callback produced an extra acquire at the server.
    assert_eq!(cluster.lock_server.stat(5).await, 1);
}

#[tokio::test]
async fn mutual_exclusion_under_contention() {
    let cluster = Cluster::start().await;

    // Four clients bump a shared counter in the extent service, serialized
    // only by lock 1. Lost updates would show as a short final count.
    let extent = ExtentClient::new(cluster.extent_addr.clone());
    extent.put(100, b"0").await.expect("seed counter");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let cache = cluster.lock_client().await;
        let extent = ExtentClient::new(cluster.extent_addr.clone());
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                cache.acquire(1).await.expect("acquire");
                let raw = extent.get(100).await.expect("get counter");
                let value: u64 =
                    String::from_utf8(raw).expect("utf8").parse().expect("number");
                extent.put(100, (value + 1).to_string().as_bytes()).await.expect("put counter");
                cache.release(1).await.expect("release");
            }
        }));
    }
    for task in tasks {
        timeout(Duration::from_secs(30), task).await.expect("workers finish").expect("join");
    }

    let raw = extent.get(100).await.expect("get counter");
    assert_eq!(String::from_utf8(raw).expect("utf8"), "40");
}
