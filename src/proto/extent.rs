//! Extent service message bodies.

use crate::wire_struct;

/// Key of an extent. The filesystem client packs a block number into the high
/// half and an inode number into the low half.
pub type ExtentId = u64;

/// Extent attributes: recorded size and POSIX-style timestamps in seconds
/// since the epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Attr {
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

wire_struct!(Attr, size, atime, mtime, ctime);

/// `put(id, bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutArgs {
    pub id: ExtentId,
    pub bytes: Vec<u8>,
}

wire_struct!(PutArgs, id, bytes);

/// `get(id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GetArgs {
    pub id: ExtentId,
}

wire_struct!(GetArgs, id);

/// Reply body of `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetReply {
    pub bytes: Vec<u8>,
}

wire_struct!(GetReply, bytes);

/// `getattr(id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GetAttrArgs {
    pub id: ExtentId,
}

wire_struct!(GetAttrArgs, id);

/// Reply body of `getattr`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GetAttrReply {
    pub attr: Attr,
}

wire_struct!(GetAttrReply, attr);

/// `setattr(id, attr)`. The full attribute record travels on the wire, but
/// the service applies only the size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetAttrArgs {
    pub id: ExtentId,
    pub attr: Attr,
}

wire_struct!(SetAttrArgs, id, attr);

/// `remove(id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RemoveArgs {
    pub id: ExtentId,
}

wire_struct!(RemoveArgs, id);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{to_vec, Wire};
    use std::io::Cursor;

    #[test]
    fn put_args_roundtrip() {
        let args = PutArgs { id: (3u64 << 32) | 0x8000_0001, bytes: vec![0xab; 1024] };
        let buf = to_vec(&args);
        assert_eq!(PutArgs::decode(&mut Cursor::new(buf)).expect("decode"), args);
    }

    #[test]
    fn attr_roundtrip() {
        let attr = Attr { size: 1024, atime: 1, mtime: 2, ctime: 3 };
        let buf = to_vec(&attr);
        assert_eq!(Attr::decode(&mut Cursor::new(buf)).expect("decode"), attr);
    }
}
