//! Serving side of the transport.
//!
//! [`serve`] accepts connections forever. Each connection runs three tasks
//! joined by channels: a [`ReadTask`] that parses frames into calls, a
//! [`DispatchTask`] that hands them to the [`Service`], and a [`WriteTask`]
//! that serializes replies back onto the socket. Frames whose header decodes
//! but whose call does not are answered early with [`Status::Garbage`];
//! anything less intelligible drops the connection.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::proto::{CallHeader, Procedure, ReplyHeader, Status};
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::{self, to_vec, Wire};

/// A reply produced by a [`Service`]: status plus the encoded result bytes
/// that follow the reply header on the wire.
pub struct Reply {
    pub status: Status,
    pub body: Vec<u8>,
}

impl Reply {
    /// A bare status with no result body.
    pub fn status(status: Status) -> Self {
        Self { status, body: Vec::new() }
    }

    /// An [`Status::Ok`] reply carrying an encoded result.
    pub fn ok_with<T: Wire>(value: &T) -> Self {
        Self { status: Status::Ok, body: to_vec(value) }
    }
}

/// One decoded call pulled off the wire.
struct Call {
    xid: u32,
    procedure: Procedure,
    body: Vec<u8>,
}

/// A reply paired with the transaction it answers.
struct Outgoing {
    xid: u32,
    reply: Reply,
}

/// Implemented by each RPC endpoint: both services and the lock client's
/// callback surface.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handles one decoded call. `body` holds the argument bytes that follow
    /// the call header.
    async fn call(&self, procedure: Procedure, body: Vec<u8>) -> Reply;
}

/// Accepts connections and spawns a reactor per connection. Runs until the
/// listener fails.
pub async fn serve<S: Service>(listener: TcpListener, service: Arc<S>) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        spawn_connection(socket, service.clone());
    }
}

fn spawn_connection<S: Service>(socket: TcpStream, service: Arc<S>) {
    let (readhalf, writehalf) = socket.into_split();

    let (call_send, call_recv) = mpsc::channel::<Call>(64);
    let (reply_send, reply_recv) = mpsc::channel::<Outgoing>(64);
    let (early_send, early_recv) = mpsc::channel::<Outgoing>(8);

    ReadTask::spawn(readhalf, call_send, early_send);
    DispatchTask::spawn(service, call_recv, reply_send);
    WriteTask::spawn(writehalf, reply_recv, early_recv);
}

/// Reads frames from a connection, decodes call headers, and forwards calls
/// to the [`DispatchTask`].
struct ReadTask {
    readhalf: OwnedReadHalf,
    call_send: Sender<Call>,
    early_send: Sender<Outgoing>,
}

impl ReadTask {
    fn spawn(
        readhalf: OwnedReadHalf,
        call_send: Sender<Call>,
        early_send: Sender<Outgoing>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { readhalf, call_send, early_send }.run())
    }

    async fn run(mut self) {
        loop {
            let frame = match read_frame(&mut self.readhalf).await {
                Ok(frame) => frame,
                Err(wire::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("peer closed connection");
                    return;
                }
                Err(err) => {
                    warn!(%err, "dropping connection: unreadable frame");
                    return;
                }
            };

            let mut src = Cursor::new(frame);
            match CallHeader::decode(&mut src) {
                Ok(header) => {
                    let offset = src.position() as usize;
                    let mut body = src.into_inner();
                    body.drain(..offset);
                    let call = Call { xid: header.xid, procedure: header.procedure, body };
                    if self.call_send.send(call).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    // Salvage the xid if it decoded, so the peer is not left
                    // waiting on a reply that will never come.
                    let mut src = Cursor::new(src.into_inner());
                    match u32::decode(&mut src) {
                        Ok(xid) => {
                            warn!(xid, %err, "unparseable call");
                            let out = Outgoing { xid, reply: Reply::status(Status::Garbage) };
                            if self.early_send.send(out).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => {
                            warn!(%err, "dropping connection: frame without header");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Pulls calls off the read channel and runs them through the service, one
/// at a time per connection.
struct DispatchTask<S> {
    service: Arc<S>,
    call_recv: Receiver<Call>,
    reply_send: Sender<Outgoing>,
}

impl<S: Service> DispatchTask<S> {
    fn spawn(
        service: Arc<S>,
        call_recv: Receiver<Call>,
        reply_send: Sender<Outgoing>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { service, call_recv, reply_send }.run())
    }

    async fn run(mut self) {
        while let Some(call) = self.call_recv.recv().await {
            let reply = self.service.call(call.procedure, call.body).await;
            let out = Outgoing { xid: call.xid, reply };
            if self.reply_send.send(out).await.is_err() {
                return;
            }
        }
    }
}

/// Writes service replies and early error replies back to the connection.
struct WriteTask {
    writehalf: OwnedWriteHalf,
    reply_recv: Receiver<Outgoing>,
    early_recv: Receiver<Outgoing>,
}

impl WriteTask {
    fn spawn(
        writehalf: OwnedWriteHalf,
        reply_recv: Receiver<Outgoing>,
        early_recv: Receiver<Outgoing>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { writehalf, reply_recv, early_recv }.run())
    }

    async fn run(mut self) {
        loop {
            let out = tokio::select! {
                Some(out) = self.early_recv.recv() => out,
                Some(out) = self.reply_recv.recv() => out,
                else => return,
            };

            let mut body = to_vec(&ReplyHeader { xid: out.xid, status: out.reply.status });
            body.extend_from_slice(&out.reply.body);
            if let Err(err) = write_frame(&mut self.writehalf, &body).await {
                warn!(%err, "dropping connection: write failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::lock::StatReply;
    use crate::rpc::RpcClient;

    /// Echoes the argument bytes back on any lock procedure.
    struct EchoService;

    #[async_trait]
    impl Service for EchoService {
        async fn call(&self, procedure: Procedure, body: Vec<u8>) -> Reply {
            match procedure {
                Procedure::LockStat => Reply { status: Status::Ok, body },
                _ => Reply::status(Status::NoEnt),
            }
        }
    }

    #[tokio::test]
    async fn round_trips_a_call_through_the_reactor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(serve(listener, Arc::new(EchoService)));

        let client = RpcClient::new(addr.to_string());
        let (status, reply) = client
            .call_decode::<StatReply, StatReply>(Procedure::LockStat, &StatReply { count: 3 })
            .await
            .expect("call");
        assert_eq!(status, Status::Ok);
        assert_eq!(reply, Some(StatReply { count: 3 }));
    }

    #[tokio::test]
    async fn unknown_procedures_get_a_garbage_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(serve(listener, Arc::new(EchoService)));

        // A frame with a valid xid but an unassigned procedure number.
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut body = to_vec(&77u32);
        body.extend_from_slice(&to_vec(&0xeeeeu32));
        write_frame(&mut stream, &body).await.expect("write");

        let reply = read_frame(&mut stream).await.expect("read");
        let header =
            ReplyHeader::decode(&mut Cursor::new(reply)).expect("decode");
        assert_eq!(header.xid, 77);
        assert_eq!(header.status, Status::Garbage);
    }

    #[tokio::test]
    async fn consecutive_calls_share_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(serve(listener, Arc::new(EchoService)));

        let client = RpcClient::new(addr.to_string());
        for count in 0..4u32 {
            let (status, reply) = client
                .call_decode::<StatReply, StatReply>(Procedure::LockStat, &StatReply { count })
                .await
                .expect("call");
            assert_eq!(status, Status::Ok);
            assert_eq!(reply, Some(StatReply { count }));
        }
    }
}
