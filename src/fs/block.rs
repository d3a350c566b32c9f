//! Block-granular file I/O.
//!
//! A write lands in `ceil(len / BLOCK_SIZE)` consecutive blocks starting at
//! `offset / BLOCK_SIZE`: the first block fills up to the next block
//! boundary, interior blocks take a full block each, and the final block
//! absorbs whatever is left. Partially covered blocks are read, overlaid,
//! and written back, so surrounding bytes survive.

use tracing::debug;

use crate::extent::ExtentError;

use super::{block_key, FsClient, FsError, Inum, BLOCK_SIZE};

/// First byte position that no block number can address.
const MAX_FILE_END: u64 = (u32::MAX as u64 + 1) * BLOCK_SIZE as u64;

impl FsClient {
    /// File size: block 0 plus contiguous following blocks, until the first
    /// gap.
    pub(super) async fn size_of(&self, inum: Inum) -> Result<u64, FsError> {
        let head = self.extent.getattr(inum).await?;
        let mut size = u64::from(head.size);
        let mut block = 1u32;
        loop {
            match self.extent.getattr(block_key(inum, block)).await {
                Ok(attr) => {
                    size += u64::from(attr.size);
                    block = match block.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Err(ExtentError::NoEnt) => break,
                Err(_) => return Err(FsError::IoErr),
            }
        }
        Ok(size)
    }

    /// Reads up to `count` bytes at `offset`, clipped to the end of the
    /// stored data.
    pub async fn read(&self, inum: Inum, count: usize, offset: u64) -> Result<Vec<u8>, FsError> {
        if count == 0 || offset >= MAX_FILE_END {
            return Ok(Vec::new());
        }
        let mut block = (offset / BLOCK_SIZE as u64) as u32;
        let mut skip = (offset % BLOCK_SIZE as u64) as usize;
        let mut out = Vec::new();
        loop {
            match self.extent.get(block_key(inum, block)).await {
                Ok(bytes) => {
                    if skip >= bytes.len() {
                        break;
                    }
                    let avail = &bytes[skip..];
                    let take = avail.len().min(count - out.len());
                    out.extend_from_slice(&avail[..take]);
                    if out.len() == count {
                        break;
                    }
                    skip = 0;
                    block = match block.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Err(ExtentError::NoEnt) => break,
                Err(_) => return Err(FsError::IoErr),
            }
        }
        debug!(inum, offset, count, got = out.len(), "read");
        Ok(out)
    }

    /// Writes `data` at `offset` under the inode's lock.
    pub async fn write(&self, inum: Inum, data: &[u8], offset: u64) -> Result<(), FsError> {
        self.lock.acquire(inum).await?;
        let result = self.write_locked(inum, data, offset).await;
        self.unlock(inum).await;
        result
    }

    async fn write_locked(&self, inum: Inum, data: &[u8], offset: u64) -> Result<(), FsError> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(data.len() as u64).ok_or(FsError::FBig)?;
        if end > MAX_FILE_END {
            return Err(FsError::FBig);
        }

        let total_blocks = data.len().div_ceil(BLOCK_SIZE);
        let start_block = (offset / BLOCK_SIZE as u64) as u32;
        let first_offset = (offset % BLOCK_SIZE as u64) as usize;

        let mut consumed = 0usize;
        for i in 0..total_blocks {
            let remaining = data.len() - consumed;
            let take = if i == 0 {
                remaining.min(BLOCK_SIZE - first_offset)
            } else if i + 1 == total_blocks {
                remaining
            } else {
                remaining.min(BLOCK_SIZE)
            };
            let lo = if i == 0 { first_offset } else { 0 };

            let block_no = start_block.checked_add(i as u32).ok_or(FsError::FBig)?;
            let key = block_key(inum, block_no);
            let mut blob = match self.extent.get(key).await {
                Ok(bytes) => bytes,
                Err(ExtentError::NoEnt) => Vec::new(),
                Err(_) => return Err(FsError::IoErr),
            };
            if blob.len() < lo + take {
                blob.resize(lo + take, 0);
            }
            blob[lo..lo + take].copy_from_slice(&data[consumed..consumed + take]);
            self.extent.put(key, &blob).await.map_err(|_| FsError::IoErr)?;
            consumed += take;
        }
        debug!(inum, offset, len = data.len(), blocks = total_blocks, "wrote");
        Ok(())
    }

    /// Resizes the file to `target` bytes under the inode's lock, zero
    /// filling on growth.
    pub async fn setsize(&self, inum: Inum, target: u64) -> Result<(), FsError> {
        self.lock.acquire(inum).await?;
        let result = self.setsize_locked(inum, target).await;
        self.unlock(inum).await;
        result
    }

    async fn setsize_locked(&self, inum: Inum, target: u64) -> Result<(), FsError> {
        if target > MAX_FILE_END {
            return Err(FsError::FBig);
        }

        // Recorded size of every contiguous block, head first.
        let head = self.extent.getattr(inum).await?;
        let mut sizes = vec![u64::from(head.size)];
        let mut block = 1u32;
        loop {
            match self.extent.getattr(block_key(inum, block)).await {
                Ok(attr) => {
                    sizes.push(u64::from(attr.size));
                    block = match block.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Err(ExtentError::NoEnt) => break,
                Err(_) => return Err(FsError::IoErr),
            }
        }

        let current: u64 = sizes.iter().sum();
        debug!(inum, current, target, "setsize");
        if target == current {
            Ok(())
        } else if target > current {
            self.extend(inum, &sizes, target - current).await
        } else {
            self.truncate(inum, &sizes, target).await
        }
    }

    /// Appends zeros: tops up the tail block to a block boundary, then writes
    /// fresh zero blocks.
    async fn extend(&self, inum: Inum, sizes: &[u64], mut remaining: u64) -> Result<(), FsError> {
        let tail = sizes.len() - 1;
        let tail_size = sizes[tail] as usize;
        let mut next_block = sizes.len() as u64;

        if tail_size < BLOCK_SIZE {
            let key = block_key(inum, tail as u32);
            let mut blob = match self.extent.get(key).await {
                Ok(bytes) => bytes,
                Err(ExtentError::NoEnt) => Vec::new(),
                Err(_) => return Err(FsError::IoErr),
            };
            let add = remaining.min((BLOCK_SIZE - tail_size) as u64) as usize;
            blob.resize(tail_size + add, 0);
            self.extent.put(key, &blob).await.map_err(|_| FsError::IoErr)?;
            remaining -= add as u64;
        }

        while remaining > 0 {
            let block_no = u32::try_from(next_block).map_err(|_| FsError::FBig)?;
            let fill = remaining.min(BLOCK_SIZE as u64) as usize;
            self.extent
                .put(block_key(inum, block_no), &vec![0u8; fill])
                .await
                .map_err(|_| FsError::IoErr)?;
            remaining -= fill as u64;
            next_block += 1;
        }
        Ok(())
    }

    /// Cuts the file to `target` bytes: rewrites the block the cut lands in
    /// and removes every block past it. Block 0 always survives, possibly
    /// empty, so the inode keeps existing.
    async fn truncate(&self, inum: Inum, sizes: &[u64], target: u64) -> Result<(), FsError> {
        let mut cum = 0u64;
        let mut cut_block = 0usize;
        let mut cut_at = 0u64;
        for (i, &size) in sizes.iter().enumerate() {
            if target < cum + size {
                cut_block = i;
                cut_at = target - cum;
                break;
            }
            cum += size;
        }

        let rewrite = cut_at > 0 || cut_block == 0;
        if rewrite {
            let key = block_key(inum, cut_block as u32);
            let mut blob = self.extent.get(key).await.map_err(|_| FsError::IoErr)?;
            blob.truncate(cut_at as usize);
            self.extent.put(key, &blob).await.map_err(|_| FsError::IoErr)?;
        }

        let first_removed = if rewrite { cut_block + 1 } else { cut_block };
        for block in first_removed..sizes.len() {
            self.extent.remove(block_key(inum, block as u32)).await.map_err(|_| FsError::IoErr)?;
        }
        Ok(())
    }
}
