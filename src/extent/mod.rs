//! Extent service: a keyed blob store with an attribute side table, and the
//! RPC client stub the filesystem layer drives it through.

mod client;
mod server;

pub use client::{ExtentClient, ExtentError};
pub use server::ExtentServer;

pub use crate::proto::extent::{Attr, ExtentId};
