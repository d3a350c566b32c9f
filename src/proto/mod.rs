//! RPC message definitions shared by the lock and extent services.
//!
//! Every call body starts with a [`CallHeader`], every reply with a
//! [`ReplyHeader`]. Procedure-specific arguments and results follow the
//! header, encoded with the [`crate::wire`] codec.

pub mod extent;
pub mod lock;

use std::io::{Read, Write};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::wire::{self, Wire};
use crate::wire_struct;

/// Procedure numbers. One namespace covers all three surfaces: the lock
/// service, the callback path back into lock clients, and the extent service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Procedure {
    /// Lock service: request ownership of a lock.
    LockAcquire = 0x11,
    /// Lock service: hand a cached lock back.
    LockRelease = 0x12,
    /// Lock service: administrative per-lock acquire count.
    LockStat = 0x13,
    /// Server to client: the lock you queued for is free, ask again.
    Retry = 0x21,
    /// Server to client: another client wants your cached lock.
    Revoke = 0x22,
    /// Extent service: store a blob.
    ExtentPut = 0x31,
    /// Extent service: fetch a blob.
    ExtentGet = 0x32,
    /// Extent service: fetch blob attributes.
    ExtentGetAttr = 0x33,
    /// Extent service: overwrite the recorded size.
    ExtentSetAttr = 0x34,
    /// Extent service: erase a blob and its attributes.
    ExtentRemove = 0x35,
}

/// Reply status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// Lock is held elsewhere; wait for an asynchronous retry callback.
    Retry = 1,
    /// Lock granted, but must go back to the server on the next local release.
    NoCache = 2,
    /// The named entity does not exist.
    NoEnt = 3,
    /// Transport or service failure.
    IoErr = 4,
    /// The peer could not decode the request.
    Garbage = 5,
}

impl Wire for Procedure {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        (*self as u32).encode(dest)
    }

    fn decode(src: &mut impl Read) -> wire::Result<Self> {
        let raw = u32::decode(src)?;
        Self::from_u32(raw).ok_or(wire::Error::BadDiscriminant(raw))
    }
}

impl Wire for Status {
    fn encode(&self, dest: &mut impl Write) -> std::io::Result<()> {
        (*self as u32).encode(dest)
    }

    fn decode(src: &mut impl Read) -> wire::Result<Self> {
        let raw = u32::decode(src)?;
        Self::from_u32(raw).ok_or(wire::Error::BadDiscriminant(raw))
    }
}

/// Leading fields of every call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallHeader {
    /// Transaction id; echoed verbatim in the reply.
    pub xid: u32,
    pub procedure: Procedure,
}

wire_struct!(CallHeader, xid, procedure);

/// Leading fields of every reply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: u32,
    pub status: Status,
}

wire_struct!(ReplyHeader, xid, status);
