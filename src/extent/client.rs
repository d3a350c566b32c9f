//! RPC stub for the extent service.

use std::fmt;

use crate::proto::extent::{
    Attr, ExtentId, GetArgs, GetAttrArgs, GetAttrReply, GetReply, PutArgs, RemoveArgs, SetAttrArgs,
};
use crate::proto::{Procedure, Status};
use crate::rpc::{self, RpcClient};

/// Errors surfaced by extent calls.
#[derive(Debug)]
pub enum ExtentError {
    /// The extent does not exist.
    NoEnt,
    /// The transport failed or the reply was malformed.
    Transport(rpc::Error),
    /// The service answered with a status that does not fit the call.
    Unexpected(Status),
}

impl fmt::Display for ExtentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtentError::NoEnt => write!(f, "no such extent"),
            ExtentError::Transport(err) => write!(f, "extent call failed: {err}"),
            ExtentError::Unexpected(status) => write!(f, "unexpected extent status {status:?}"),
        }
    }
}

impl std::error::Error for ExtentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtentError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rpc::Error> for ExtentError {
    fn from(err: rpc::Error) -> Self {
        ExtentError::Transport(err)
    }
}

/// Typed client handle for one extent service.
pub struct ExtentClient {
    server: RpcClient,
}

impl ExtentClient {
    pub fn new(dest: impl Into<String>) -> Self {
        Self { server: RpcClient::new(dest) }
    }

    pub async fn put(&self, id: ExtentId, bytes: &[u8]) -> Result<(), ExtentError> {
        let args = PutArgs { id, bytes: bytes.to_vec() };
        let (status, _) = self.server.call(Procedure::ExtentPut, &args).await?;
        expect_ok(status)
    }

    pub async fn get(&self, id: ExtentId) -> Result<Vec<u8>, ExtentError> {
        let (status, reply) =
            self.server.call_decode::<_, GetReply>(Procedure::ExtentGet, &GetArgs { id }).await?;
        match (status, reply) {
            (Status::Ok, Some(reply)) => Ok(reply.bytes),
            (Status::NoEnt, _) => Err(ExtentError::NoEnt),
            (other, _) => Err(ExtentError::Unexpected(other)),
        }
    }

    pub async fn getattr(&self, id: ExtentId) -> Result<Attr, ExtentError> {
        let (status, reply) = self
            .server
            .call_decode::<_, GetAttrReply>(Procedure::ExtentGetAttr, &GetAttrArgs { id })
            .await?;
        match (status, reply) {
            (Status::Ok, Some(reply)) => Ok(reply.attr),
            (Status::NoEnt, _) => Err(ExtentError::NoEnt),
            (other, _) => Err(ExtentError::Unexpected(other)),
        }
    }

    pub async fn setattr(&self, id: ExtentId, attr: Attr) -> Result<(), ExtentError> {
        let args = SetAttrArgs { id, attr };
        let (status, _) = self.server.call(Procedure::ExtentSetAttr, &args).await?;
        match status {
            Status::Ok => Ok(()),
            Status::NoEnt => Err(ExtentError::NoEnt),
            other => Err(ExtentError::Unexpected(other)),
        }
    }

    pub async fn remove(&self, id: ExtentId) -> Result<(), ExtentError> {
        let (status, _) = self.server.call(Procedure::ExtentRemove, &RemoveArgs { id }).await?;
        expect_ok(status)
    }
}

fn expect_ok(status: Status) -> Result<(), ExtentError> {
    match status {
        Status::Ok => Ok(()),
        other => Err(ExtentError::Unexpected(other)),
    }
}
