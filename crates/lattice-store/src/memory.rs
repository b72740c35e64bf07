//! In-memory store used by unit tests and the crash-simulation harness.
//!
//! Writes land in a live image; [`flush`](crate::Store::flush) copies the
//! live image to a durable one. [`MemoryStore::crash_and_recover`] throws the
//! live image away and restores the last durable copy, which is exactly the
//! kill-point model the state-store crash tests need.

use std::collections::{HashMap, HashSet};

use lattice_error::{LatticeError, Result};
use parking_lot::Mutex;

use crate::latch::Latch;
use crate::traits::{sealed, AreaId, Store};

#[derive(Default, Clone)]
struct Image {
    areas: HashMap<u64, Vec<u8>>,
    next_id: u64,
}

struct MemoryInner {
    live: Image,
    durable: Image,
    deleted: HashSet<u64>,
}

/// A purely in-memory [`Store`].
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    latch: Latch,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let image = Image {
            areas: HashMap::new(),
            next_id: 1,
        };
        Self {
            inner: Mutex::new(MemoryInner {
                live: image.clone(),
                durable: image,
                deleted: HashSet::new(),
            }),
            latch: Latch::new(),
        }
    }

    /// Discard everything since the last flush, as a crash would.
    pub fn crash_and_recover(&self) {
        let mut inner = self.inner.lock();
        inner.live = inner.durable.clone();
        inner.deleted.clear();
    }
}

impl sealed::Sealed for MemoryStore {}

impl Store for MemoryStore {
    fn create_area(&self, size: u64) -> Result<AreaId> {
        let mut inner = self.inner.lock();
        let id = inner.live.next_id;
        inner.live.next_id += 1;
        inner.live.areas.insert(id, vec![0_u8; size as usize]);
        Ok(AreaId::new(id))
    }

    fn area_size(&self, id: AreaId) -> Result<u64> {
        let inner = self.inner.lock();
        inner
            .live
            .areas
            .get(&id.get())
            .map(|a| a.len() as u64)
            .ok_or(LatticeError::AreaNotFound { area: id.get() })
    }

    fn read_area(&self, id: AreaId) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .live
            .areas
            .get(&id.get())
            .cloned()
            .ok_or(LatticeError::AreaNotFound { area: id.get() })
    }

    fn write_area(&self, id: AreaId, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let area = inner
            .live
            .areas
            .get_mut(&id.get())
            .ok_or(LatticeError::AreaNotFound { area: id.get() })?;
        let offset = offset as usize;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= area.len())
            .ok_or_else(|| {
                LatticeError::internal(format!(
                    "write past end of {id}: offset {offset} + {} > {}",
                    data.len(),
                    area.len()
                ))
            })?;
        area[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn delete_area(&self, id: AreaId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.live.areas.remove(&id.get()).is_none() {
            return Err(LatticeError::AreaNotFound { area: id.get() });
        }
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
        inner.durable = inner.live.clone();
        inner.deleted.clear();
        Ok(())
    }
}
