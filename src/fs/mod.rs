//! Filesystem client.
//!
//! Presents a POSIX-like hierarchy by composing the two remote services:
//! directory entries and file blocks persist in the extent service, and every
//! mutation runs under the relevant inode's lock from the lock cache. Inode
//! numbers double as lock ids.

mod block;
mod dir;

pub use dir::DirEntry;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::extent::{ExtentClient, ExtentError, ExtentId};
use crate::lock::{LockCache, LockError};

use dir::DirRecord;

/// Inode number. Bit 31 set means a file; clear means a directory.
pub type Inum = u64;

/// The root directory, created lazily by the first client.
pub const ROOT_INUM: Inum = 1;

/// Unit of file storage in the extent service.
pub const BLOCK_SIZE: usize = 1024;

const FILE_BIT: u32 = 0x8000_0000;

pub fn is_file(inum: Inum) -> bool {
    inum & u64::from(FILE_BIT) != 0
}

pub fn is_dir(inum: Inum) -> bool {
    !is_file(inum)
}

/// Extent key of block `block_no` of inode `inum`.
pub(crate) fn block_key(inum: Inum, block_no: u32) -> ExtentId {
    (u64::from(block_no) << 32) | inum
}

/// Errors returned by filesystem operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Named entity does not exist.
    NoEnt,
    /// Extent service failure, or a record that would not parse.
    IoErr,
    /// The operation would push a block number past the addressable range.
    FBig,
    /// The name already exists in the target directory.
    Exist,
    /// The lock service could not be reached.
    Rpc,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FsError::NoEnt => "no such entry",
            FsError::IoErr => "i/o error",
            FsError::FBig => "file too big",
            FsError::Exist => "entry already exists",
            FsError::Rpc => "rpc failure",
        };
        f.write_str(text)
    }
}

impl std::error::Error for FsError {}

impl From<ExtentError> for FsError {
    fn from(err: ExtentError) -> Self {
        match err {
            ExtentError::NoEnt => FsError::NoEnt,
            _ => FsError::IoErr,
        }
    }
}

impl From<LockError> for FsError {
    fn from(_: LockError) -> Self {
        FsError::Rpc
    }
}

/// Size and timestamps of a file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Timestamps of a directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DirInfo {
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Handle on the distributed filesystem.
pub struct FsClient {
    extent: ExtentClient,
    lock: Arc<LockCache>,
}

impl FsClient {
    /// Connects to both services and lazily creates the root directory.
    pub async fn connect(config: &Config) -> Result<Self, FsError> {
        let lock = LockCache::spawn(&config.lock_addr).await.map_err(|_| FsError::Rpc)?;
        let client = Self { extent: ExtentClient::new(config.extent_addr.clone()), lock };
        client.ensure_root().await?;
        Ok(client)
    }

    async fn ensure_root(&self) -> Result<(), FsError> {
        self.lock.acquire(ROOT_INUM).await?;
        let result = self.ensure_root_locked().await;
        self.unlock(ROOT_INUM).await;
        result
    }

    async fn ensure_root_locked(&self) -> Result<(), FsError> {
        match self.extent.get(ROOT_INUM).await {
            Ok(_) => Ok(()),
            Err(ExtentError::NoEnt) => {
                debug!("creating root directory");
                let record = DirRecord::new(ROOT_INUM, "root");
                self.extent.put(ROOT_INUM, &record.encode()).await.map_err(|_| FsError::IoErr)
            }
            Err(_) => Err(FsError::IoErr),
        }
    }

    /// Releases an inode lock, logging rather than masking the caller's
    /// result if the release itself fails.
    async fn unlock(&self, inum: Inum) {
        if let Err(err) = self.lock.release(inum).await {
            warn!(inum, %err, "inode unlock failed");
        }
    }

    pub fn is_file(&self, inum: Inum) -> bool {
        is_file(inum)
    }

    pub fn is_dir(&self, inum: Inum) -> bool {
        is_dir(inum)
    }

    /// Attributes of a file, with the size summed across its blocks.
    pub async fn getfile(&self, inum: Inum) -> Result<FileInfo, FsError> {
        let attr = self.extent.getattr(inum).await?;
        let size = self.size_of(inum).await?;
        Ok(FileInfo { size, atime: attr.atime, mtime: attr.mtime, ctime: attr.ctime })
    }

    /// Attributes of a directory.
    pub async fn getdir(&self, inum: Inum) -> Result<DirInfo, FsError> {
        let attr = self.extent.getattr(inum).await?;
        Ok(DirInfo { atime: attr.atime, mtime: attr.mtime, ctime: attr.ctime })
    }

    /// Every entry of the directory, in record order.
    pub async fn getdircontents(&self, dir: Inum) -> Result<Vec<DirEntry>, FsError> {
        Ok(self.read_dir_record(dir).await?.entries)
    }

    /// Resolves `name` inside `parent`. A missing name is `NoEnt`; an
    /// unreadable parent is `IoErr`.
    pub async fn lookup(&self, parent: Inum, name: &str) -> Result<Inum, FsError> {
        let record = self.read_dir_record(parent).await.map_err(|_| FsError::IoErr)?;
        record.find(name).ok_or(FsError::NoEnt)
    }

    /// Creates an empty subdirectory under `parent`.
    pub async fn createdir(&self, parent: Inum, name: &str) -> Result<Inum, FsError> {
        self.create_entry(parent, name, false).await
    }

    /// Creates an empty file under `parent`.
    pub async fn createnode(&self, parent: Inum, name: &str) -> Result<Inum, FsError> {
        self.create_entry(parent, name, true).await
    }

    async fn create_entry(&self, parent: Inum, name: &str, file: bool) -> Result<Inum, FsError> {
        if !dir::valid_name(name) {
            return Err(FsError::IoErr);
        }
        self.lock.acquire(parent).await?;
        let result = self.create_entry_locked(parent, name, file).await;
        self.unlock(parent).await;
        result
    }

    async fn create_entry_locked(
        &self,
        parent: Inum,
        name: &str,
        file: bool,
    ) -> Result<Inum, FsError> {
        let mut record = self.read_dir_record(parent).await?;
        if record.find(name).is_some() {
            return Err(FsError::Exist);
        }

        let inum = self.fresh_inum(file).await?;
        if file {
            self.extent.put(inum, b"").await.map_err(|_| FsError::IoErr)?;
        } else {
            let child = DirRecord::new(inum, name);
            self.extent.put(inum, &child.encode()).await.map_err(|_| FsError::IoErr)?;
        }

        record.entries.push(DirEntry { inum, name: name.to_owned() });
        self.write_dir_record(parent, &record).await?;
        debug!(parent, inum, name, file, "created");
        Ok(inum)
    }

    /// Draws an unused inode number with the file bit forced set or clear.
    /// Redraws on the off chance the number is already taken.
    async fn fresh_inum(&self, file: bool) -> Result<Inum, FsError> {
        loop {
            let draw: u32 = rand::random();
            let low = if file { draw | FILE_BIT } else { draw & !FILE_BIT };
            let inum = Inum::from(low);
            if inum <= ROOT_INUM {
                continue;
            }
            match self.extent.getattr(inum).await {
                Err(ExtentError::NoEnt) => return Ok(inum),
                Ok(_) => continue,
                Err(_) => return Err(FsError::IoErr),
            }
        }
    }

    /// Re-stamps an inode's metadata.
    pub async fn updatetime(&self, inum: Inum) -> Result<(), FsError> {
        self.lock.acquire(inum).await?;
        let result = self.updatetime_locked(inum).await;
        self.unlock(inum).await;
        result
    }

    async fn updatetime_locked(&self, inum: Inum) -> Result<(), FsError> {
        let attr = self.extent.getattr(inum).await?;
        self.extent.setattr(inum, attr).await?;
        Ok(())
    }

    /// Removes `name` from `parent`. Directories are unlinked recursively;
    /// every inode involved is locked for the duration of its removal, and
    /// locks come off in reverse acquisition order on every path.
    pub async fn unlink(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        self.lock.acquire(parent).await?;
        let result = self.unlink_locked(parent, name).await;
        self.unlock(parent).await;
        result
    }

    async fn unlink_locked(&self, parent: Inum, name: &str) -> Result<(), FsError> {
        let mut record = self.read_dir_record(parent).await?;
        let Some(target) = record.find(name) else {
            return Err(FsError::NoEnt);
        };

        self.lock.acquire(target).await?;
        let removed = self.remove_tree(target).await;
        self.unlock(target).await;
        removed?;

        record.entries.retain(|entry| entry.name != name);
        self.write_dir_record(parent, &record).await?;
        debug!(parent, target, name, "unlinked");
        Ok(())
    }

    /// Removes `inum` and everything under it from the extent service. The
    /// caller already holds `inum`'s lock; children are locked here, each
    /// released before its parent.
    fn remove_tree<'a>(
        &'a self,
        inum: Inum,
    ) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + Send + 'a>> {
        Box::pin(async move {
            if is_dir(inum) {
                let record = self.read_dir_record(inum).await?;
                for entry in &record.entries {
                    self.lock.acquire(entry.inum).await?;
                    let removed = self.remove_tree(entry.inum).await;
                    self.unlock(entry.inum).await;
                    removed?;
                }
                self.extent.remove(inum).await.map_err(|_| FsError::IoErr)
            } else {
                let mut block = 1u32;
                loop {
                    let key = block_key(inum, block);
                    match self.extent.getattr(key).await {
                        Ok(_) => {
                            self.extent.remove(key).await.map_err(|_| FsError::IoErr)?;
                            block = block.checked_add(1).ok_or(FsError::IoErr)?;
                        }
                        Err(ExtentError::NoEnt) => break,
                        Err(_) => return Err(FsError::IoErr),
                    }
                }
                self.extent.remove(inum).await.map_err(|_| FsError::IoErr)
            }
        })
    }

    async fn read_dir_record(&self, dir: Inum) -> Result<DirRecord, FsError> {
        let raw = self.extent.get(dir).await?;
        DirRecord::parse(&raw).map_err(|_| FsError::IoErr)
    }

    async fn write_dir_record(&self, dir: Inum, record: &DirRecord) -> Result<(), FsError> {
        self.extent.put(dir, &record.encode()).await.map_err(|_| FsError::IoErr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_kind_comes_from_the_high_bit() {
        assert!(is_dir(ROOT_INUM));
        assert!(is_file(0x8000_0001));
        assert!(is_dir(0x7fff_ffff));
        assert!(is_file(0xffff_ffff));
    }

    #[test]
    fn block_keys_pack_block_number_above_the_inode() {
        assert_eq!(block_key(0x8000_0001, 0), 0x8000_0001);
        assert_eq!(block_key(0x8000_0001, 1), 0x1_8000_0001);
        assert_eq!(block_key(0x8000_0001, 3), 0x3_8000_0001);
        assert_eq!(block_key(1, 2), 0x2_0000_0001);
    }
}
