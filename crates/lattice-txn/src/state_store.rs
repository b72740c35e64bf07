//! The table state store: visible sources, pending-delete sources, and the
//! table-id counter, persisted over the paged store.
//!
//! Layout (little-endian):
//!
//! - Header area, 32 bytes: magic `0x0BAC8001` (4) · version `0` (4) ·
//!   next-table-id (8) · visible-list area id (8) · delete-list area id (8).
//! - List area: version (4) · count (8) · `count` entries of
//!   table-id (8) · UTF-16 name (code-unit count (4) · units (2 each)).
//!
//! List flushes are shadowed: the new list is written to a fresh area and the
//! header pointer is swapped under the store latch, so a crash exposes either
//! the old list or the new one. The id counter flushes independently of the
//! lists; a crash between the two leaves the counter advanced and the lists
//! unchanged, which is safe because table ids are never recycled.

use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_store::{AreaId, Store, StoreLatch};
use lattice_types::encoding::{append_u32_le, append_u64_le, read_u32_le, read_u64_le};
use lattice_types::{ObjectKind, TableId};
use tracing::debug;

/// Magic identifying a table state header area.
const STATE_MAGIC: u32 = 0x0BAC_8001;
/// Current header/list format version.
const STATE_VERSION: u32 = 0;
/// Header area size in bytes.
const HEADER_SIZE: u64 = 32;

/// One table source entry: its id and the name of its backing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub table_id: TableId,
    pub source_name: String,
}

impl TableState {
    pub fn new(table_id: TableId, source_name: impl Into<String>) -> Self {
        Self {
            table_id,
            source_name: source_name.into(),
        }
    }
}

fn encode_list(entries: &[TableState]) -> Vec<u8> {
    let mut buf = Vec::new();
    append_u32_le(&mut buf, STATE_VERSION);
    append_u64_le(&mut buf, entries.len() as u64);
    for entry in entries {
        append_u64_le(&mut buf, entry.table_id.get());
        let units: Vec<u16> = entry.source_name.encode_utf16().collect();
        append_u32_le(&mut buf, units.len() as u32);
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
    }
    buf
}

fn decode_list(buf: &[u8]) -> Result<Vec<TableState>> {
    let version = read_u32_le(buf, 0)
        .ok_or_else(|| LatticeError::corruption("state list truncated"))?;
    if version != STATE_VERSION {
        return Err(LatticeError::corruption(format!(
            "unsupported state list version {version}"
        )));
    }
    let count = read_u64_le(buf, 4)
        .ok_or_else(|| LatticeError::corruption("state list truncated"))?;

    let mut entries = Vec::with_capacity(count as usize);
    let mut offset = 12_usize;
    for _ in 0..count {
        let table_id = read_u64_le(buf, offset)
            .ok_or_else(|| LatticeError::corruption("state list entry truncated"))?;
        let unit_count = read_u32_le(buf, offset + 8)
            .ok_or_else(|| LatticeError::corruption("state list entry truncated"))?
            as usize;
        offset += 12;

        let mut units = Vec::with_capacity(unit_count);
        for _ in 0..unit_count {
            let unit = buf
                .get(offset..offset + 2)
                .and_then(|b| b.try_into().ok())
                .map(u16::from_le_bytes)
                .ok_or_else(|| LatticeError::corruption("state list name truncated"))?;
            units.push(unit);
            offset += 2;
        }
        let source_name = String::from_utf16(&units)
            .map_err(|_| LatticeError::corruption("state list name is not valid UTF-16"))?;
        entries.push(TableState::new(TableId::new(table_id), source_name));
    }
    Ok(entries)
}

/// Persistent visible/pending-delete lists plus the table-id counter.
pub struct TableStateStore {
    store: Arc<dyn Store>,
    header: AreaId,
    next_table_id: u64,
    visible: Vec<TableState>,
    pending_delete: Vec<TableState>,
    visible_area: AreaId,
    delete_area: AreaId,
    visible_dirty: bool,
    delete_dirty: bool,
}

impl std::fmt::Debug for TableStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStateStore")
            .field("header", &self.header)
            .field("next_table_id", &self.next_table_id)
            .field("visible", &self.visible)
            .field("pending_delete", &self.pending_delete)
            .field("visible_area", &self.visible_area)
            .field("delete_area", &self.delete_area)
            .field("visible_dirty", &self.visible_dirty)
            .field("delete_dirty", &self.delete_dirty)
            .finish()
    }
}

impl TableStateStore {
    /// Allocate the two list areas and the header; returns the new store.
    ///
    /// The header area id is the database's boot pointer to this structure.
    pub fn create(store: Arc<dyn Store>) -> Result<Self> {
        let _latch = StoreLatch::acquire(store.as_ref());

        let empty = encode_list(&[]);
        let visible_area = store.create_area(empty.len() as u64)?;
        store.write_area(visible_area, 0, &empty)?;
        let delete_area = store.create_area(empty.len() as u64)?;
        store.write_area(delete_area, 0, &empty)?;

        let header = store.create_area(HEADER_SIZE)?;
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        append_u32_le(&mut buf, STATE_MAGIC);
        append_u32_le(&mut buf, STATE_VERSION);
        append_u64_le(&mut buf, 1); // first table id
        append_u64_le(&mut buf, visible_area.get());
        append_u64_le(&mut buf, delete_area.get());
        store.write_area(header, 0, &buf)?;
        store.flush()?;

        debug!(%header, "created table state store");
        drop(_latch);
        Ok(Self {
            store,
            header,
            next_table_id: 1,
            visible: Vec::new(),
            pending_delete: Vec::new(),
            visible_area,
            delete_area,
            visible_dirty: false,
            delete_dirty: false,
        })
    }

    /// Open an existing state store by its header area id.
    pub fn open(store: Arc<dyn Store>, header: AreaId) -> Result<Self> {
        let buf = store.read_area(header)?;
        let magic = read_u32_le(&buf, 0).unwrap_or(0);
        if magic != STATE_MAGIC {
            return Err(LatticeError::corruption(format!(
                "bad table state magic {magic:#010x}"
            )));
        }
        let version = read_u32_le(&buf, 4).unwrap_or(u32::MAX);
        if version != STATE_VERSION {
            return Err(LatticeError::corruption(format!(
                "unsupported table state version {version}"
            )));
        }
        let next_table_id = read_u64_le(&buf, 8)
            .ok_or_else(|| LatticeError::corruption("table state header truncated"))?;
        let visible_area = AreaId::new(
            read_u64_le(&buf, 16)
                .ok_or_else(|| LatticeError::corruption("table state header truncated"))?,
        );
        let delete_area = AreaId::new(
            read_u64_le(&buf, 24)
                .ok_or_else(|| LatticeError::corruption("table state header truncated"))?,
        );

        let visible = decode_list(&store.read_area(visible_area)?)?;
        let pending_delete = decode_list(&store.read_area(delete_area)?)?;
        debug!(
            %header,
            visible = visible.len(),
            pending_delete = pending_delete.len(),
            next_table_id,
            "opened table state store"
        );
        Ok(Self {
            store,
            header,
            next_table_id,
            visible,
            pending_delete,
            visible_area,
            delete_area,
            visible_dirty: false,
            delete_dirty: false,
        })
    }

    #[inline]
    #[must_use]
    pub fn header_area(&self) -> AreaId {
        self.header
    }

    #[inline]
    #[must_use]
    pub fn visible(&self) -> &[TableState] {
        &self.visible
    }

    #[inline]
    #[must_use]
    pub fn pending_delete(&self) -> &[TableState] {
        &self.pending_delete
    }

    /// The id the next [`next_table_id`](Self::next_table_id) call returns.
    #[inline]
    #[must_use]
    pub fn peek_next_table_id(&self) -> u64 {
        self.next_table_id
    }

    /// Allocate the next table id.
    ///
    /// The bump is written through and flushed immediately, under the store
    /// latch, so the id is burned even if the caller's DDL never commits.
    pub fn next_table_id(&mut self) -> Result<TableId> {
        let id = self.next_table_id;
        self.next_table_id += 1;

        let _latch = StoreLatch::acquire(self.store.as_ref());
        self.store
            .write_area(self.header, 8, &self.next_table_id.to_le_bytes())?;
        self.store.flush()?;
        Ok(TableId::new(id))
    }

    pub fn add_visible(&mut self, state: TableState) {
        self.visible.push(state);
        self.visible_dirty = true;
    }

    pub fn add_delete(&mut self, state: TableState) {
        self.pending_delete.push(state);
        self.delete_dirty = true;
    }

    /// Remove a visible entry by source name. `NotFound` if absent.
    pub fn remove_visible(&mut self, name: &str) -> Result<TableState> {
        match self.visible.iter().position(|s| s.source_name == name) {
            Some(pos) => {
                self.visible_dirty = true;
                Ok(self.visible.remove(pos))
            }
            None => Err(LatticeError::NotFound {
                kind: ObjectKind::Table,
                name: name.to_owned(),
            }),
        }
    }

    /// Remove a pending-delete entry by source name. `NotFound` if absent.
    pub fn remove_delete(&mut self, name: &str) -> Result<TableState> {
        match self
            .pending_delete
            .iter()
            .position(|s| s.source_name == name)
        {
            Some(pos) => {
                self.delete_dirty = true;
                Ok(self.pending_delete.remove(pos))
            }
            None => Err(LatticeError::NotFound {
                kind: ObjectKind::Table,
                name: name.to_owned(),
            }),
        }
    }

    /// Serialize dirty lists to fresh areas and swap the header pointers.
    pub fn flush(&mut self) -> Result<()> {
        if !self.visible_dirty && !self.delete_dirty {
            return Ok(());
        }

        let _latch = StoreLatch::acquire(self.store.as_ref());

        if self.visible_dirty {
            let old = self.visible_area;
            self.visible_area = Self::write_list(self.store.as_ref(), &self.visible)?;
            self.store
                .write_area(self.header, 16, &self.visible_area.get().to_le_bytes())?;
            self.store.delete_area(old)?;
        }
        if self.delete_dirty {
            let old = self.delete_area;
            self.delete_area = Self::write_list(self.store.as_ref(), &self.pending_delete)?;
            self.store
                .write_area(self.header, 24, &self.delete_area.get().to_le_bytes())?;
            self.store.delete_area(old)?;
        }
        self.store.flush()?;
        self.visible_dirty = false;
        self.delete_dirty = false;

        debug!(
            visible = self.visible.len(),
            pending_delete = self.pending_delete.len(),
            "flushed table state"
        );
        Ok(())
    }

    fn write_list(store: &dyn Store, entries: &[TableState]) -> Result<AreaId> {
        let buf = encode_list(entries);
        let area = store.create_area(buf.len() as u64)?;
        store.write_area(area, 0, &buf)?;
        Ok(area)
    }
}
