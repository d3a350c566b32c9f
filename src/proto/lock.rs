//! Lock service and lock callback message bodies.

use crate::wire_struct;

/// Name of a lock. Agreed between clients out of band; the filesystem client
/// uses inode numbers.
pub type LockId = u64;

/// `acquire(client_id, port, seq, lock_id)`.
///
/// `client_id` is the `host:port` of the caller's callback listener; the
/// server uses it both as the lock holder's identity and as the address for
/// revoke and retry callbacks. `seq` correlates those callbacks with this
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireArgs {
    pub client_id: String,
    pub port: u32,
    pub seq: u32,
    pub lock_id: LockId,
}

wire_struct!(AcquireArgs, client_id, port, seq, lock_id);

/// `release(client_id, port, seq, lock_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArgs {
    pub client_id: String,
    pub port: u32,
    pub seq: u32,
    pub lock_id: LockId,
}

wire_struct!(ReleaseArgs, client_id, port, seq, lock_id);

/// `stat(lock_id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatArgs {
    pub lock_id: LockId,
}

wire_struct!(StatArgs, lock_id);

/// Reply body of `stat`: acquire calls observed for the lock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatReply {
    pub count: u32,
}

wire_struct!(StatReply, count);

/// Body of the `retry` and `revoke` callbacks. `seq` echoes the sequence
/// number of the acquire the callback refers to, so the client can ignore
/// deliveries that outlived their grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallbackArgs {
    pub lock_id: LockId,
    pub seq: u32,
}

wire_struct!(CallbackArgs, lock_id, seq);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{to_vec, Wire};
    use std::io::Cursor;

    #[test]
    fn acquire_args_roundtrip() {
        let args = AcquireArgs {
            client_id: "127.0.0.1:40123".into(),
            port: 40123,
            seq: 9,
            lock_id: 7,
        };
        let buf = to_vec(&args);
        assert_eq!(AcquireArgs::decode(&mut Cursor::new(buf)).expect("decode"), args);
    }

    #[test]
    fn callback_args_roundtrip() {
        let args = CallbackArgs { lock_id: u64::MAX, seq: 1 };
        let buf = to_vec(&args);
        assert_eq!(CallbackArgs::decode(&mut Cursor::new(buf)).expect("decode"), args);
    }
}
