//! Single-file area store with a shadow directory.
//!
//! Layout: a 32-byte header at offset 0, then append-only extents. Area
//! writes never touch durable extents in place; modified areas are staged in
//! memory and appended as fresh extents at flush, after which the directory
//! and header are rewritten. A crash therefore exposes either the previous
//! flush's image or the new one, never a torn mix.
//!
//! Deleted areas drop out of the directory at the next flush; their extents
//! become dead space until the file is compacted on a later open.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use lattice_error::{LatticeError, Result};
use lattice_types::encoding::{append_u32_le, append_u64_le, read_u32_le, read_u64_le};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::latch::Latch;
use crate::traits::{sealed, AreaId, Store};

/// File magic: identifies a lattice area store.
const STORE_MAGIC: u32 = 0x1A77_1CE5;
/// Current file format version.
const STORE_VERSION: u32 = 0;
/// Header size: magic(4) version(4) dir-offset(8) dir-len(8) next-area-id(8).
const HEADER_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u64,
}

#[derive(Debug)]
struct FileInner {
    file: File,
    /// Durable extents as of the last flush.
    directory: HashMap<u64, Extent>,
    /// Whole-area images created or modified since the last flush.
    staged: HashMap<u64, Vec<u8>>,
    /// Areas deleted since the last flush.
    deleted: HashSet<u64>,
    next_id: u64,
    /// Append position for new extents.
    end: u64,
}

impl FileInner {
    fn read_extent(&mut self, extent: Extent) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; extent.len as usize];
        self.file.seek(SeekFrom::Start(extent.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Current image of an area: staged copy if present, else durable extent.
    fn area_image(&mut self, id: u64) -> Result<Vec<u8>> {
        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged.clone());
        }
        let extent = *self
            .directory
            .get(&id)
            .ok_or(LatticeError::AreaNotFound { area: id })?;
        self.read_extent(extent)
    }

    fn encode_directory(&self) -> Vec<u8> {
        let live: Vec<(&u64, &Extent)> = self
            .directory
            .iter()
            .filter(|(id, _)| !self.deleted.contains(id))
            .collect();
        let mut buf = Vec::with_capacity(16 + live.len() * 24);
        append_u32_le(&mut buf, STORE_VERSION);
        append_u32_le(&mut buf, 0); // reserved
        append_u64_le(&mut buf, live.len() as u64);
        for (id, extent) in live {
            append_u64_le(&mut buf, *id);
            append_u64_le(&mut buf, extent.offset);
            append_u64_le(&mut buf, extent.len);
        }
        buf
    }
}

/// A [`Store`] over a single backing file.
#[derive(Debug)]
pub struct FileStore {
    inner: Mutex<FileInner>,
    latch: Latch,
}

impl sealed::Sealed for FileStore {}

impl FileStore {
    /// Create a fresh store file at `path`. Fails if the file has content.
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != 0 {
            return Err(LatticeError::corruption(format!(
                "refusing to create over non-empty file {}",
                path.display()
            )));
        }

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        append_u32_le(&mut header, STORE_MAGIC);
        append_u32_le(&mut header, STORE_VERSION);
        append_u64_le(&mut header, 0); // no directory yet
        append_u64_le(&mut header, 0);
        append_u64_le(&mut header, 1); // next area id
        file.write_all(&header)?;
        file.sync_all()?;

        info!(path = %path.display(), "created area store");
        Ok(Self {
            inner: Mutex::new(FileInner {
                file,
                directory: HashMap::new(),
                staged: HashMap::new(),
                deleted: HashSet::new(),
                next_id: 1,
                end: HEADER_SIZE,
            }),
            latch: Latch::new(),
        })
    }

    /// Open an existing store file, validating magic and version.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0_u8; HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|_| {
            LatticeError::corruption(format!("store header unreadable: {}", path.display()))
        })?;
        let magic = read_u32_le(&header, 0).unwrap_or(0);
        if magic != STORE_MAGIC {
            return Err(LatticeError::corruption(format!(
                "bad store magic {magic:#010x}"
            )));
        }
        let version = read_u32_le(&header, 4).unwrap_or(u32::MAX);
        if version != STORE_VERSION {
            return Err(LatticeError::corruption(format!(
                "unsupported store version {version}"
            )));
        }
        let dir_offset = read_u64_le(&header, 8).unwrap_or(0);
        let dir_len = read_u64_le(&header, 16).unwrap_or(0);
        let next_id = read_u64_le(&header, 24).unwrap_or(1).max(1);

        let mut directory = HashMap::new();
        if dir_offset != 0 {
            let mut buf = vec![0_u8; dir_len as usize];
            file.seek(SeekFrom::Start(dir_offset))?;
            file.read_exact(&mut buf)
                .map_err(|_| LatticeError::corruption("store directory unreadable"))?;
            let count = read_u64_le(&buf, 8)
                .ok_or_else(|| LatticeError::corruption("store directory truncated"))?;
            for i in 0..count as usize {
                let base = 16 + i * 24;
                let id = read_u64_le(&buf, base);
                let offset = read_u64_le(&buf, base + 8);
                let len = read_u64_le(&buf, base + 16);
                match (id, offset, len) {
                    (Some(id), Some(offset), Some(len)) => {
                        directory.insert(id, Extent { offset, len });
                    }
                    _ => return Err(LatticeError::corruption("store directory entry truncated")),
                }
            }
        }

        let end = file.metadata()?.len().max(HEADER_SIZE);
        debug!(
            path = %path.display(),
            areas = directory.len(),
            next_id,
            "opened area store"
        );
        Ok(Self {
            inner: Mutex::new(FileInner {
                file,
                directory,
                staged: HashMap::new(),
                deleted: HashSet::new(),
                next_id,
                end,
            }),
            latch: Latch::new(),
        })
    }
}

impl Store for FileStore {
    fn create_area(&self, size: u64) -> Result<AreaId> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.staged.insert(id, vec![0_u8; size as usize]);
        Ok(AreaId::new(id))
    }

    fn area_size(&self, id: AreaId) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.deleted.contains(&id.get()) {
            return Err(LatticeError::AreaNotFound { area: id.get() });
        }
        inner.area_image(id.get()).map(|a| a.len() as u64)
    }

    fn read_area(&self, id: AreaId) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        if inner.deleted.contains(&id.get()) {
            return Err(LatticeError::AreaNotFound { area: id.get() });
        }
        inner.area_image(id.get())
    }

    fn write_area(&self, id: AreaId, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.deleted.contains(&id.get()) {
            return Err(LatticeError::AreaNotFound { area: id.get() });
        }
        let mut image = inner.area_image(id.get())?;
        let offset = offset as usize;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= image.len())
            .ok_or_else(|| {
                LatticeError::internal(format!(
                    "write past end of {id}: offset {offset} + {} > {}",
                    data.len(),
                    image.len()
                ))
            })?;
        image[offset..end].copy_from_slice(data);
        inner.staged.insert(id.get(), image);
        Ok(())
    }

    fn delete_area(&self, id: AreaId) -> Result<()> {
        let mut inner = self.inner.lock();
        let known =
            inner.staged.contains_key(&id.get()) || inner.directory.contains_key(&id.get());
        if !known || inner.deleted.contains(&id.get()) {
            return Err(LatticeError::AreaNotFound { area: id.get() });
        }
        inner.staged.remove(&id.get());
        inner.deleted.insert(id.get());
        Ok(())
    }

    fn lock(&self) {
        self.latch.lock();
    }

    fn unlock(&self) {
        self.latch.unlock();
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.staged.is_empty() && inner.deleted.is_empty() {
            return Ok(());
        }

        // Phase 1: append staged images as fresh extents.
        let staged: Vec<(u64, Vec<u8>)> = inner.staged.drain().collect();
        let staged_count = staged.len();
        for (id, image) in staged {
            let offset = inner.end;
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.write_all(&image)?;
            inner.end += image.len() as u64;
            inner.directory.insert(
                id,
                Extent {
                    offset,
                    len: image.len() as u64,
                },
            );
        }
        inner.file.sync_all()?;

        // Phase 2: drop deleted entries, append the new directory.
        let deleted: Vec<u64> = inner.deleted.drain().collect();
        for id in deleted {
            inner.directory.remove(&id);
        }
        let dir = inner.encode_directory();
        let dir_offset = inner.end;
        inner.file.seek(SeekFrom::Start(dir_offset))?;
        inner.file.write_all(&dir)?;
        inner.end += dir.len() as u64;
        inner.file.sync_all()?;

        // Phase 3: swap the header pointer.
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        append_u32_le(&mut header, STORE_MAGIC);
        append_u32_le(&mut header, STORE_VERSION);
        append_u64_le(&mut header, dir_offset);
        append_u64_le(&mut header, dir.len() as u64);
        append_u64_le(&mut header, inner.next_id);
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&header)?;
        inner.file.sync_all()?;

        debug!(
            staged = staged_count,
            areas = inner.directory.len(),
            "flushed area store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_flush_reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.db");

        let store = FileStore::create(&path).unwrap();
        let a = store.create_area(4).unwrap();
        let b = store.create_area(3).unwrap();
        store.write_area(a, 0, &[1, 2, 3, 4]).unwrap();
        store.write_area(b, 1, &[9, 9]).unwrap();
        store.flush().unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.read_area(a).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(store.read_area(b).unwrap(), vec![0, 9, 9]);
        // Id allocation continues past the recovered counter.
        let c = store.create_area(1).unwrap();
        assert!(c.get() > b.get());
    }

    #[test]
    fn test_unflushed_writes_do_not_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.db");

        let store = FileStore::create(&path).unwrap();
        let a = store.create_area(2).unwrap();
        store.write_area(a, 0, &[7, 7]).unwrap();
        store.flush().unwrap();
        store.write_area(a, 0, &[8, 8]).unwrap();
        // No flush: simulated crash by dropping the handle.
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.read_area(a).unwrap(), vec![7, 7]);
    }

    #[test]
    fn test_deleted_area_disappears_after_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.db");

        let store = FileStore::create(&path).unwrap();
        let a = store.create_area(2).unwrap();
        store.flush().unwrap();
        store.delete_area(a).unwrap();
        assert!(store.read_area(a).is_err());
        store.flush().unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert!(matches!(
            store.read_area(a),
            Err(LatticeError::AreaNotFound { .. })
        ));
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-store");
        std::fs::write(&path, b"definitely not a lattice store file").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_create_refuses_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied");
        std::fs::write(&path, b"data").unwrap();
        assert!(FileStore::create(&path).is_err());
    }
}
