//! In-memory extent store.

use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::proto::extent::{
    Attr, ExtentId, GetArgs, GetAttrArgs, GetAttrReply, GetReply, PutArgs, RemoveArgs, SetAttrArgs,
};
use crate::proto::{Procedure, Status};
use crate::rpc::{Reply, Service};
use crate::wire::Wire;

/// One stored extent: blob and attributes live under a single map entry, so
/// every operation on a key is atomic.
struct Extent {
    bytes: Vec<u8>,
    attr: Attr,
}

/// The extent service. Single node, memory only; a restart loses everything.
pub struct ExtentServer {
    store: DashMap<ExtentId, Extent>,
}

impl ExtentServer {
    pub fn new() -> Self {
        Self { store: DashMap::new() }
    }

    fn now() -> u32 {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        elapsed.as_secs() as u32
    }

    /// Overwrites the blob. Creation stamps `ctime`; every put refreshes
    /// `size`, `atime`, and `mtime`.
    pub fn put(&self, id: ExtentId, bytes: Vec<u8>) {
        let now = Self::now();
        let size = bytes.len() as u32;
        debug!(id, size, "put");
        match self.store.entry(id) {
            Entry::Occupied(mut occupied) => {
                let extent = occupied.get_mut();
                extent.bytes = bytes;
                extent.attr.size = size;
                extent.attr.atime = now;
                extent.attr.mtime = now;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Extent {
                    bytes,
                    attr: Attr { size, atime: now, mtime: now, ctime: now },
                });
            }
        }
    }

    pub fn get(&self, id: ExtentId) -> Option<Vec<u8>> {
        self.store.get(&id).map(|extent| extent.bytes.clone())
    }

    pub fn getattr(&self, id: ExtentId) -> Option<Attr> {
        self.store.get(&id).map(|extent| extent.attr)
    }

    /// Overwrites the recorded size. The stored bytes are left alone; the
    /// filesystem client uses this to stamp metadata, not to truncate.
    pub fn setattr(&self, id: ExtentId, attr: Attr) -> bool {
        match self.store.get_mut(&id) {
            Some(mut extent) => {
                debug!(id, old = extent.attr.size, new = attr.size, "setattr");
                extent.attr.size = attr.size;
                true
            }
            None => false,
        }
    }

    /// Erases the blob and its attributes. Removing an absent key is fine.
    pub fn remove(&self, id: ExtentId) {
        debug!(id, "remove");
        self.store.remove(&id);
    }
}

impl Default for ExtentServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for ExtentServer {
    async fn call(&self, procedure: Procedure, body: Vec<u8>) -> Reply {
        let mut src = Cursor::new(body);
        match procedure {
            Procedure::ExtentPut => match PutArgs::decode(&mut src) {
                Ok(args) => {
                    self.put(args.id, args.bytes);
                    Reply::status(Status::Ok)
                }
                Err(err) => malformed("put", &err),
            },
            Procedure::ExtentGet => match GetArgs::decode(&mut src) {
                Ok(args) => match self.get(args.id) {
                    Some(bytes) => Reply::ok_with(&GetReply { bytes }),
                    None => Reply::status(Status::NoEnt),
                },
                Err(err) => malformed("get", &err),
            },
            Procedure::ExtentGetAttr => match GetAttrArgs::decode(&mut src) {
                Ok(args) => match self.getattr(args.id) {
                    Some(attr) => Reply::ok_with(&GetAttrReply { attr }),
                    None => Reply::status(Status::NoEnt),
                },
                Err(err) => malformed("getattr", &err),
            },
            Procedure::ExtentSetAttr => match SetAttrArgs::decode(&mut src) {
                Ok(args) => {
                    if self.setattr(args.id, args.attr) {
                        Reply::status(Status::Ok)
                    } else {
                        Reply::status(Status::NoEnt)
                    }
                }
                Err(err) => malformed("setattr", &err),
            },
            Procedure::ExtentRemove => match RemoveArgs::decode(&mut src) {
                Ok(args) => {
                    self.remove(args.id);
                    Reply::status(Status::Ok)
                }
                Err(err) => malformed("remove", &err),
            },
            other => {
                warn!(?other, "procedure not served here");
                Reply::status(Status::Garbage)
            }
        }
    }
}

fn malformed(op: &str, err: &crate::wire::Error) -> Reply {
    warn!(op, %err, "malformed extent call");
    Reply::status(Status::Garbage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_the_bytes() {
        let server = ExtentServer::new();
        server.put(7, b"hello".to_vec());
        assert_eq!(server.get(7), Some(b"hello".to_vec()));
    }

    #[test]
    fn put_records_size_and_creation_time() {
        let server = ExtentServer::new();
        server.put(7, vec![0u8; 1024]);
        let attr = server.getattr(7).expect("attr");
        assert_eq!(attr.size, 1024);
        assert!(attr.ctime > 0);

        // Overwrite keeps ctime but tracks the new size.
        let ctime = attr.ctime;
        server.put(7, vec![0u8; 10]);
        let attr = server.getattr(7).expect("attr");
        assert_eq!(attr.size, 10);
        assert_eq!(attr.ctime, ctime);
    }

    #[test]
    fn get_of_missing_extent_is_none() {
        let server = ExtentServer::new();
        assert_eq!(server.get(404), None);
        assert_eq!(server.getattr(404), None);
    }

    #[test]
    fn setattr_changes_only_the_recorded_size() {
        let server = ExtentServer::new();
        server.put(7, b"twelve bytes".to_vec());
        assert!(server.setattr(7, Attr { size: 5, ..Attr::default() }));
        assert_eq!(server.getattr(7).expect("attr").size, 5);
        // The blob itself is untouched.
        assert_eq!(server.get(7), Some(b"twelve bytes".to_vec()));
        assert!(!server.setattr(404, Attr::default()));
    }

    #[test]
    fn remove_erases_blob_and_attributes_and_is_idempotent() {
        let server = ExtentServer::new();
        server.put(7, b"x".to_vec());
        server.remove(7);
        assert_eq!(server.get(7), None);
        assert_eq!(server.getattr(7), None);
        server.remove(7);
    }
}
