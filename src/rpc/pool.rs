//! Memoized RPC handles.

use std::sync::Arc;

use moka::sync::Cache;

use super::RpcClient;

/// Caches one [`RpcClient`] per peer address, so callback senders reuse
/// connections instead of dialing the same client for every message.
#[derive(Clone)]
pub struct ClientPool {
    handles: Cache<String, Arc<RpcClient>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self { handles: Cache::builder().max_capacity(1024).build() }
    }

    /// Returns the memoized handle for `dest`, creating it on first use.
    pub fn handle(&self, dest: &str) -> Arc<RpcClient> {
        self.handles.get_with(dest.to_owned(), || Arc::new(RpcClient::new(dest)))
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_memoized_per_destination() {
        let pool = ClientPool::new();
        let a = pool.handle("127.0.0.1:9001");
        let b = pool.handle("127.0.0.1:9001");
        let c = pool.handle("127.0.0.1:9002");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
