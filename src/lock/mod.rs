//! Cache-coherent lock service.
//!
//! The [`LockServer`] is the authoritative owner directory for a universe of
//! locks named by 64-bit ids. Clients hold a [`LockCache`]: once granted a
//! lock, they keep it locally across acquire/release cycles until the server
//! revokes it on behalf of another client. Transfer is a three-step
//! handshake: the server revokes the holder, the holder releases once its
//! local users drain, and the server then tells the head waiter to retry its
//! acquire.

mod cache;
mod releaser;
mod retryer;
mod revoker;
mod server;

pub use cache::{LockCache, LockError};
pub use server::LockServer;

pub use crate::proto::lock::LockId;
