//! RPC transport: a calling client, a memoized handle pool, and the
//! per-connection server reactor.

mod client;
mod pool;
mod server;

pub use client::RpcClient;
pub use pool::ClientPool;
pub use server::{serve, Reply, Service};

use std::fmt;

use crate::wire;

/// Transport-level errors surfaced to RPC callers.
#[derive(Debug)]
pub enum Error {
    /// Connecting, writing, or reading the socket failed.
    Io(std::io::Error),
    /// The peer's reply could not be decoded.
    Wire(wire::Error),
    /// The reply did not belong to the outstanding call.
    BadXid { sent: u32, got: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "rpc transport failed: {err}"),
            Error::Wire(err) => write!(f, "rpc reply malformed: {err}"),
            Error::BadXid { sent, got } => {
                write!(f, "rpc reply for xid {got} does not match call xid {sent}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Wire(err) => Some(err),
            Error::BadXid { .. } => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<wire::Error> for Error {
    fn from(err: wire::Error) -> Self {
        Error::Wire(err)
    }
}

/// Result of RPC calls.
pub type Result<T> = std::result::Result<T, Error>;
