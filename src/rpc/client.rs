//! Calling side of the transport.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::proto::{CallHeader, Procedure, ReplyHeader, Status};
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::{to_vec, Wire};

use super::{Error, Result};

/// A connection to one RPC peer.
///
/// The stream is opened lazily on the first call and reopened after a
/// transport error. Calls are serialized: each writes one frame and reads the
/// matching reply before the next call may start, which pairs replies to
/// calls without a dispatch table.
pub struct RpcClient {
    dest: String,
    stream: Mutex<Option<TcpStream>>,
    xid: AtomicU32,
}

impl RpcClient {
    pub fn new(dest: impl Into<String>) -> Self {
        Self { dest: dest.into(), stream: Mutex::new(None), xid: AtomicU32::new(1) }
    }

    /// Address of the peer this handle talks to.
    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Issues one call and returns the reply status plus any result bytes
    /// following the reply header.
    pub async fn call<A: Wire>(&self, procedure: Procedure, args: &A) -> Result<(Status, Vec<u8>)> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            debug!(dest = %self.dest, "connecting");
            *guard = Some(TcpStream::connect(&self.dest).await?);
        }
        let stream = guard.as_mut().expect("stream populated above");

        let xid = self.xid.fetch_add(1, Ordering::Relaxed);
        let mut body = to_vec(&CallHeader { xid, procedure });
        args.encode(&mut body).expect("Vec writes are infallible");

        let outcome = Self::exchange(stream, xid, &body).await;
        if outcome.is_err() {
            // Drop the stream so the next call starts from a clean connect.
            *guard = None;
        }
        outcome
    }

    async fn exchange(stream: &mut TcpStream, xid: u32, body: &[u8]) -> Result<(Status, Vec<u8>)> {
        write_frame(stream, body).await?;
        let reply = read_frame(stream).await?;

        let mut src = Cursor::new(reply);
        let header = ReplyHeader::decode(&mut src)?;
        if header.xid != xid {
            return Err(Error::BadXid { sent: xid, got: header.xid });
        }
        let offset = src.position() as usize;
        let mut rest = src.into_inner();
        rest.drain(..offset);
        Ok((header.status, rest))
    }

    /// Like [`call`](Self::call), decoding the result bytes as `R` when the
    /// status is [`Status::Ok`].
    pub async fn call_decode<A: Wire, R: Wire>(
        &self,
        procedure: Procedure,
        args: &A,
    ) -> Result<(Status, Option<R>)> {
        let (status, rest) = self.call(procedure, args).await?;
        match status {
            Status::Ok => {
                let value = R::decode(&mut Cursor::new(rest))?;
                Ok((status, Some(value)))
            }
            _ => Ok((status, None)),
        }
    }
}
