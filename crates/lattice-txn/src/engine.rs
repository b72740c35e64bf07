//! The storage engine: one database instance's shared state.
//!
//! The engine owns the paged store, the table state store, the table-source
//! registry, the commit clock, the object-commit log, the lock manager, and
//! the post-commit event dispatcher. Sessions in the facade crate drive it
//! through `begin` / `commit` / `rollback` plus the DDL entry points.
//!
//! On-disk boot chain: area 1 is the root (magic, state-store header id,
//! source-directory id, commit clock). The source directory maps each table
//! id to the area holding that table's snapshot blob.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_observability::{CommitObserver, NoOpObserver};
use lattice_store::{AreaId, Store, StoreLatch};
use lattice_types::encoding::{append_u32_le, append_u64_le, read_u32_le, read_u64_le};
use lattice_types::{CommitId, ObjectKind, ObjectName, PlanSource, TableId, TableInfo, TxnId};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::events::EventDispatcher;
use crate::lock_manager::LockManager;
use crate::object_log::ObjectCommitLog;
use crate::plan::PredicateCompiler;
use crate::state_store::TableStateStore;
use crate::table_source::TableSource;
use crate::transaction::Transaction;

/// Root area magic.
const ROOT_MAGIC: u32 = 0x1A77_0001;
/// Root format version.
const ROOT_VERSION: u32 = 0;
/// Root area size: magic(4) version(4) state-header(8) source-dir(8) clock(8).
const ROOT_SIZE: u64 = 32;

pub(crate) struct EngineInner {
    pub(crate) state: Mutex<TableStateStore>,
    /// Every live table source, visible or pending delete, keyed by id.
    pub(crate) sources: RwLock<HashMap<TableId, Arc<TableSource>>>,
    /// Committed visible catalog, keyed by lookup name.
    pub(crate) catalog: RwLock<HashMap<ObjectName, TableId>>,
    /// Committed non-table object payloads (views, sequences, triggers).
    pub(crate) objects: RwLock<HashMap<(ObjectKind, ObjectName), PlanSource>>,
    /// Snapshot area per persisted table.
    pub(crate) source_areas: Mutex<HashMap<TableId, AreaId>>,
    pub(crate) source_dir: Mutex<AreaId>,
    pub(crate) root: AreaId,
    pub(crate) commit_mutex: Mutex<()>,
    pub(crate) clock: AtomicU64,
    pub(crate) object_log: Mutex<ObjectCommitLog>,
    /// Begin commit id of every open transaction.
    pub(crate) open_txns: Mutex<BTreeMap<TxnId, CommitId>>,
}

/// One database instance's transactional core.
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: DatabaseConfig,
    pub(crate) inner: EngineInner,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) observer: RwLock<Arc<dyn CommitObserver>>,
    pub(crate) events: EventDispatcher,
    pub(crate) compiler: RwLock<Option<Arc<dyn PredicateCompiler>>>,
    next_txn: AtomicU64,
}

impl Engine {
    /// Initialize a fresh database in an empty store.
    pub fn create(store: Arc<dyn Store>, config: DatabaseConfig) -> Result<Self> {
        let root = store.create_area(ROOT_SIZE)?;
        let state = TableStateStore::create(Arc::clone(&store))?;
        let source_dir = Self::write_source_dir(store.as_ref(), &HashMap::new())?;

        let mut buf = Vec::with_capacity(ROOT_SIZE as usize);
        append_u32_le(&mut buf, ROOT_MAGIC);
        append_u32_le(&mut buf, ROOT_VERSION);
        append_u64_le(&mut buf, state.header_area().get());
        append_u64_le(&mut buf, source_dir.get());
        append_u64_le(&mut buf, 0); // commit clock
        store.write_area(root, 0, &buf)?;
        store.flush()?;

        info!(%root, "created database");
        Self::assemble(store, config, root, state, source_dir, HashMap::new(), 0)
    }

    /// Open an existing database from its store.
    pub fn open(store: Arc<dyn Store>, config: DatabaseConfig) -> Result<Self> {
        let root = AreaId::new(1);
        let buf = store.read_area(root)?;
        let magic = read_u32_le(&buf, 0).unwrap_or(0);
        if magic != ROOT_MAGIC {
            return Err(LatticeError::corruption(format!(
                "bad database root magic {magic:#010x}"
            )));
        }
        let version = read_u32_le(&buf, 4).unwrap_or(u32::MAX);
        if version != ROOT_VERSION {
            return Err(LatticeError::corruption(format!(
                "unsupported database root version {version}"
            )));
        }
        let state_header = AreaId::new(
            read_u64_le(&buf, 8).ok_or_else(|| LatticeError::corruption("root truncated"))?,
        );
        let source_dir = AreaId::new(
            read_u64_le(&buf, 16).ok_or_else(|| LatticeError::corruption("root truncated"))?,
        );
        let clock = read_u64_le(&buf, 24)
            .ok_or_else(|| LatticeError::corruption("root truncated"))?;

        let state = TableStateStore::open(Arc::clone(&store), state_header)?;
        let source_areas = Self::read_source_dir(store.as_ref(), source_dir)?;

        let engine = Self::assemble(store, config, root, state, source_dir, source_areas, clock)?;

        // Materialize every visible source from its snapshot blob.
        {
            let state = engine.inner.state.lock();
            let areas = engine.inner.source_areas.lock();
            let mut sources = engine.inner.sources.write();
            let mut catalog = engine.inner.catalog.write();
            for entry in state.visible() {
                let area = areas.get(&entry.table_id).copied().ok_or_else(|| {
                    LatticeError::corruption(format!(
                        "no snapshot area for visible table {}",
                        entry.table_id
                    ))
                })?;
                let source = TableSource::from_snapshot_bytes(&engine.store.read_area(area)?)?;
                let name = source.table_info().name().clone();
                catalog.insert(
                    name.lookup_key(engine.config.ignore_identifier_case),
                    entry.table_id,
                );
                sources.insert(entry.table_id, source);
            }
            debug!(tables = catalog.len(), clock, "opened database");
        }
        Ok(engine)
    }

    fn assemble(
        store: Arc<dyn Store>,
        config: DatabaseConfig,
        root: AreaId,
        state: TableStateStore,
        source_dir: AreaId,
        source_areas: HashMap<TableId, AreaId>,
        clock: u64,
    ) -> Result<Self> {
        let events = EventDispatcher::start(config.event_queue_capacity)?;
        Ok(Self {
            store,
            config,
            inner: EngineInner {
                state: Mutex::new(state),
                sources: RwLock::new(HashMap::new()),
                catalog: RwLock::new(HashMap::new()),
                objects: RwLock::new(HashMap::new()),
                source_areas: Mutex::new(source_areas),
                source_dir: Mutex::new(source_dir),
                root,
                commit_mutex: Mutex::new(()),
                clock: AtomicU64::new(clock),
                object_log: Mutex::new(ObjectCommitLog::new()),
                open_txns: Mutex::new(BTreeMap::new()),
            },
            locks: Arc::new(LockManager::new()),
            observer: RwLock::new(Arc::new(NoOpObserver)),
            events,
            compiler: RwLock::new(None),
            next_txn: AtomicU64::new(1),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// The current commit clock value.
    #[must_use]
    pub fn current_commit_id(&self) -> CommitId {
        CommitId::new(self.inner.clock.load(Ordering::Acquire))
    }

    pub fn set_observer(&self, observer: Arc<dyn CommitObserver>) {
        *self.observer.write() = observer;
    }

    pub fn set_predicate_compiler(&self, compiler: Arc<dyn PredicateCompiler>) {
        *self.compiler.write() = Some(compiler);
    }

    /// The installed predicate compiler, if any.
    #[must_use]
    pub fn predicate_compiler(&self) -> Option<Arc<dyn PredicateCompiler>> {
        self.compiler.read().clone()
    }

    /// Begin a transaction at the current commit clock.
    pub fn begin(&self) -> Transaction {
        let txn_id = TxnId::new(self.next_txn.fetch_add(1, Ordering::Relaxed));
        let begin = self.current_commit_id();

        let sources = self.inner.sources.read();
        let visible: HashMap<ObjectName, Arc<TableSource>> = self
            .inner
            .catalog
            .read()
            .iter()
            .filter_map(|(key, id)| sources.get(id).map(|s| (key.clone(), Arc::clone(s))))
            .collect();
        drop(sources);

        self.inner.open_txns.lock().insert(txn_id, begin);
        Transaction::new(
            txn_id,
            begin,
            self.config.ignore_identifier_case,
            visible,
        )
    }

    /// Declare a new table inside `tx`. The source stays private to the
    /// transaction until commit publishes it.
    pub fn create_table(&self, tx: &mut Transaction, info: TableInfo) -> Result<TableId> {
        let table_id = self.inner.state.lock().next_table_id()?;
        let source_name = info.name().to_string();
        let source = TableSource::new(table_id, source_name, info)?;
        tx.install_created_table(source)?;
        Ok(table_id)
    }

    /// Drop a table inside `tx`.
    pub fn drop_table(&self, tx: &mut Transaction, name: &ObjectName) -> Result<TableId> {
        tx.drop_table(name)
    }

    /// Record creation of a non-table object (view, sequence, trigger).
    pub fn create_object(
        &self,
        tx: &mut Transaction,
        name: ObjectName,
        kind: ObjectKind,
        payload: PlanSource,
    ) -> Result<()> {
        tx.record_created_object(name.clone(), kind)?;
        tx.stage_object_payload(name, kind, payload);
        Ok(())
    }

    /// Record dropping of a non-table object.
    pub fn drop_object(
        &self,
        tx: &mut Transaction,
        name: ObjectName,
        kind: ObjectKind,
    ) -> Result<()> {
        let known = self
            .inner
            .objects
            .read()
            .contains_key(&(kind, name.lookup_key(self.config.ignore_identifier_case)));
        let created_here = tx
            .created_objects()
            .iter()
            .any(|(n, k)| *k == kind && n.matches(&name, self.config.ignore_identifier_case));
        if !known && !created_here {
            return Err(LatticeError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        tx.record_dropped_object(name, kind)
    }

    /// Committed payload of a non-table object, if any.
    #[must_use]
    pub fn object_payload(&self, name: &ObjectName, kind: ObjectKind) -> Option<PlanSource> {
        self.inner
            .objects
            .read()
            .get(&(kind, name.lookup_key(self.config.ignore_identifier_case)))
            .cloned()
    }

    /// Roll back a transaction: discard its registries and staged rows. No
    /// committed state is touched.
    pub fn rollback(&self, mut tx: Transaction) -> Result<()> {
        tx.begin_rollback_phase()?;
        for table in tx.touched_tables().values() {
            table.source().rollback_transaction_change(table.registry());
        }
        self.observer.read().on_rollback();
        self.inner.open_txns.lock().remove(&tx.txn_id());
        tx.finish_abort();
        debug!(txn = %tx.txn_id(), "transaction rolled back");
        Ok(())
    }

    /// Smallest begin commit id among open transactions, or the clock when
    /// none are open.
    #[must_use]
    pub fn oldest_open_commit_id(&self) -> CommitId {
        self.inner
            .open_txns
            .lock()
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| self.current_commit_id())
    }

    /// Truncate per-table commit histories and the object log down to what
    /// open transactions can still request.
    pub fn vacuum_history(&self) {
        let oldest = self.oldest_open_commit_id();
        for source in self.inner.sources.read().values() {
            source.truncate_history(oldest);
        }
        self.inner.object_log.lock().truncate(oldest);
    }

    /// Physically reclaim dropped tables nothing pins any more.
    pub fn reclaim_dropped(&self) -> Result<usize> {
        let pending: Vec<_> = self.inner.state.lock().pending_delete().to_vec();
        let mut reclaimed = 0_usize;
        for entry in pending {
            let pinned = {
                let sources = self.inner.sources.read();
                match sources.get(&entry.table_id) {
                    // One strong count means only the registry holds it.
                    Some(source) => Arc::strong_count(source) > 1,
                    None => false,
                }
            };
            if pinned {
                continue;
            }
            self.inner.sources.write().remove(&entry.table_id);
            self.inner.state.lock().remove_delete(&entry.source_name)?;
            if let Some(area) = self.inner.source_areas.lock().remove(&entry.table_id) {
                self.store.delete_area(area)?;
            }
            reclaimed += 1;
            debug!(table = %entry.table_id, "reclaimed dropped table");
        }
        if reclaimed > 0 {
            self.persist_sources()?;
            self.inner.state.lock().flush()?;
        }
        Ok(reclaimed)
    }

    /// Persist everything: source snapshots, the source directory, the root
    /// (clock), and the state store lists.
    pub fn flush_all(&self) -> Result<()> {
        let ids: Vec<TableId> = self.inner.sources.read().keys().copied().collect();
        self.persist_source_snapshots(&ids)?;
        self.inner.state.lock().flush()?;
        Ok(())
    }

    /// Shut down: drain events and flush state.
    pub fn close(&self) -> Result<()> {
        self.events.shutdown();
        self.flush_all()
    }

    // -- persistence helpers -----------------------------------------------

    /// Write fresh snapshot areas for the given tables, then rewrite the
    /// source directory and the root, as one latched atomic group.
    pub(crate) fn persist_source_snapshots(&self, tables: &[TableId]) -> Result<()> {
        let sources = self.inner.sources.read();
        let _latch = StoreLatch::acquire(self.store.as_ref());
        let mut areas = self.inner.source_areas.lock();
        for id in tables {
            let Some(source) = sources.get(id) else {
                continue;
            };
            let bytes = source.snapshot_bytes()?;
            let area = self.store.create_area(bytes.len() as u64)?;
            self.store.write_area(area, 0, &bytes)?;
            if let Some(old) = areas.insert(*id, area) {
                self.store.delete_area(old)?;
            }
        }
        drop(areas);
        drop(sources);
        self.persist_dir_and_root_locked()?;
        self.store.flush()
    }

    /// Rewrite the source directory and root without touching snapshots.
    pub(crate) fn persist_sources(&self) -> Result<()> {
        let _latch = StoreLatch::acquire(self.store.as_ref());
        self.persist_dir_and_root_locked()?;
        self.store.flush()
    }

    fn persist_dir_and_root_locked(&self) -> Result<()> {
        let areas = self.inner.source_areas.lock().clone();
        let new_dir = Self::write_source_dir(self.store.as_ref(), &areas)?;
        let mut dir = self.inner.source_dir.lock();
        let old_dir = *dir;
        *dir = new_dir;
        drop(dir);
        self.store.delete_area(old_dir)?;

        let state_header = self.inner.state.lock().header_area();
        let mut buf = Vec::with_capacity(ROOT_SIZE as usize);
        append_u32_le(&mut buf, ROOT_MAGIC);
        append_u32_le(&mut buf, ROOT_VERSION);
        append_u64_le(&mut buf, state_header.get());
        append_u64_le(&mut buf, new_dir.get());
        append_u64_le(&mut buf, self.inner.clock.load(Ordering::Acquire));
        self.store.write_area(self.inner.root, 0, &buf)?;
        Ok(())
    }

    fn write_source_dir(store: &dyn Store, areas: &HashMap<TableId, AreaId>) -> Result<AreaId> {
        let mut buf = Vec::with_capacity(12 + areas.len() * 16);
        append_u32_le(&mut buf, ROOT_VERSION);
        append_u64_le(&mut buf, areas.len() as u64);
        let mut entries: Vec<_> = areas.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        for (table, area) in entries {
            append_u64_le(&mut buf, table.get());
            append_u64_le(&mut buf, area.get());
        }
        let dir = store.create_area(buf.len() as u64)?;
        store.write_area(dir, 0, &buf)?;
        Ok(dir)
    }

    fn read_source_dir(store: &dyn Store, dir: AreaId) -> Result<HashMap<TableId, AreaId>> {
        let buf = store.read_area(dir)?;
        let count = read_u64_le(&buf, 4)
            .ok_or_else(|| LatticeError::corruption("source directory truncated"))?;
        let mut areas = HashMap::with_capacity(count as usize);
        for i in 0..count as usize {
            let base = 12 + i * 16;
            let table = read_u64_le(&buf, base)
                .ok_or_else(|| LatticeError::corruption("source directory entry truncated"))?;
            let area = read_u64_le(&buf, base + 8)
                .ok_or_else(|| LatticeError::corruption("source directory entry truncated"))?;
            areas.insert(TableId::new(table), AreaId::new(area));
        }
        Ok(areas)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "error closing database");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("clock", &self.current_commit_id())
            .field("tables", &self.inner.catalog.read().len())
            .finish_non_exhaustive()
    }
}
