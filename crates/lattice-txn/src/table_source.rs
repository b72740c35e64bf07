//! Persistent per-table master records.
//!
//! A [`TableSource`] owns one table's committed state: the schema, the row
//! payloads, the committed row-existence set, the committed index snapshot,
//! and the ordered history of committed change registries. Sources are shared
//! across transactions behind `Arc`; the committed state is mutated only by
//! [`commit_transaction_change`](TableSource::commit_transaction_change),
//! which the commit pipeline calls under the commit mutex.
//!
//! Row payloads staged by open transactions live here too (keyed by their
//! pre-allocated row numbers) so that a registry plus this source is enough
//! to materialize any view; they are purged again on rollback.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_types::{CommitId, IndexKey, RowNumber, TableId, TableInfo, Value};
use parking_lot::RwLock;
use tracing::debug;

use crate::index_set::{IndexSetSnapshot, TransactionIndexSet};
use crate::registry::TableEventRegistry;

/// One committed change: a registry attached under its commit id.
#[derive(Debug, Clone)]
pub struct CommittedChange {
    pub commit: CommitId,
    pub registry: Arc<TableEventRegistry>,
    /// The committed index snapshot as it was before this change applied.
    /// Readers that began earlier resolve their index view through this.
    indexes_before: Arc<IndexSetSnapshot>,
}

struct SourceState {
    info: Arc<TableInfo>,
    /// All row payloads: committed, historical, and staged-uncommitted.
    rows: HashMap<RowNumber, Arc<Vec<Value>>>,
    /// Committed row-existence set.
    visible: BTreeSet<RowNumber>,
    /// Committed index snapshot.
    indexes: Arc<IndexSetSnapshot>,
    /// Committed registries in commit order.
    history: Vec<CommittedChange>,
}

/// The persistent master record of one table.
pub struct TableSource {
    table_id: TableId,
    source_name: String,
    state: RwLock<SourceState>,
    /// Next row number; never reused while the source lives.
    row_alloc: AtomicU64,
}

/// Serialized form of a source's committed state.
#[derive(serde::Serialize, serde::Deserialize)]
struct SourceSnapshot {
    table_id: u64,
    source_name: String,
    next_row: u64,
    info: TableInfo,
    rows: Vec<(u64, Vec<Value>)>,
}

impl TableSource {
    /// Create an empty source for a freshly declared table.
    pub fn new(table_id: TableId, source_name: impl Into<String>, info: TableInfo) -> Result<Arc<Self>> {
        let indexes = IndexSetSnapshot::for_table(&info)?;
        Ok(Arc::new(Self {
            table_id,
            source_name: source_name.into(),
            state: RwLock::new(SourceState {
                info: Arc::new(info),
                rows: HashMap::new(),
                visible: BTreeSet::new(),
                indexes,
                history: Vec::new(),
            }),
            row_alloc: AtomicU64::new(1),
        }))
    }

    #[inline]
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    #[inline]
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    #[must_use]
    pub fn table_info(&self) -> Arc<TableInfo> {
        Arc::clone(&self.state.read().info)
    }

    /// Publish a new schema version (constraint alters).
    ///
    /// The committed index snapshot is rebuilt from the new constraint set;
    /// callers run full-table validation through the commit pipeline before
    /// this becomes visible.
    pub fn set_table_info(&self, info: TableInfo) -> Result<()> {
        let mut state = self.state.write();
        let snapshot = IndexSetSnapshot::for_table(&info)?;
        let mut rebuilt = TransactionIndexSet::new(snapshot);
        for row in &state.visible {
            if let Some(values) = state.rows.get(row) {
                rebuilt.insert_row(*row, values);
            }
        }
        state.indexes = rebuilt.flush();
        state.info = Arc::new(info);
        Ok(())
    }

    /// Number of committed-visible rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.state.read().visible.len()
    }

    /// Allocate a row number and stage its payload.
    ///
    /// The payload is invisible until a commit applies a registry that adds
    /// the row; rollback purges it.
    pub fn stage_row(&self, values: Vec<Value>) -> RowNumber {
        let row = RowNumber::new(self.row_alloc.fetch_add(1, Ordering::Relaxed));
        self.state.write().rows.insert(row, Arc::new(values));
        row
    }

    /// Payload of a row, whatever its visibility.
    #[must_use]
    pub fn read_row(&self, row: RowNumber) -> Option<Arc<Vec<Value>>> {
        self.state.read().rows.get(&row).cloned()
    }

    /// The committed row set as of now.
    #[must_use]
    pub fn visible_snapshot(&self) -> BTreeSet<RowNumber> {
        self.state.read().visible.clone()
    }

    /// The committed row set as it was at `begin`.
    ///
    /// Reconstructed by reverse-applying every committed registry newer than
    /// `begin` onto the current set.
    #[must_use]
    pub fn visible_as_of(&self, begin: CommitId) -> BTreeSet<RowNumber> {
        let state = self.state.read();
        let mut visible = state.visible.clone();
        for change in state.history.iter().rev() {
            if change.commit <= begin {
                break;
            }
            for event in change.registry.events().iter().rev() {
                let row = event.row();
                if event.is_add() {
                    visible.remove(&row);
                } else {
                    visible.insert(row);
                }
            }
        }
        visible
    }

    /// The committed index snapshot.
    #[must_use]
    pub fn committed_indexes(&self) -> Arc<IndexSetSnapshot> {
        Arc::clone(&self.state.read().indexes)
    }

    /// The committed index snapshot as it was at `begin`.
    #[must_use]
    pub fn indexes_as_of(&self, begin: CommitId) -> Arc<IndexSetSnapshot> {
        let state = self.state.read();
        for change in &state.history {
            if change.commit > begin {
                return Arc::clone(&change.indexes_before);
            }
        }
        Arc::clone(&state.indexes)
    }

    /// Committed registries with commit id `>= since`, in commit order.
    #[must_use]
    pub fn find_changes_since_commit(&self, since: CommitId) -> Vec<CommittedChange> {
        self.state
            .read()
            .history
            .iter()
            .filter(|c| c.commit >= since)
            .cloned()
            .collect()
    }

    /// Attach a registry under `commit`, adopt `indexes` as the committed
    /// snapshot, and apply the registry's add/remove marks to the committed
    /// row set. Called only by the commit pipeline, under the commit mutex.
    pub fn commit_transaction_change(
        &self,
        commit: CommitId,
        registry: Arc<TableEventRegistry>,
        indexes: Arc<IndexSetSnapshot>,
    ) {
        let mut state = self.state.write();
        for event in registry.events() {
            let row = event.row();
            if event.is_add() {
                state.visible.insert(row);
            } else {
                state.visible.remove(&row);
            }
        }
        let indexes_before = std::mem::replace(&mut state.indexes, indexes);
        state.history.push(CommittedChange {
            commit,
            registry,
            indexes_before,
        });
        debug!(table = %self.table_id, %commit, rows = state.visible.len(), "committed table change");
    }

    /// Discard a never-committed registry: purge the payloads it staged.
    pub fn rollback_transaction_change(&self, registry: &TableEventRegistry) {
        let mut state = self.state.write();
        for row in registry.added_rows() {
            if !state.visible.contains(&row) {
                state.rows.remove(&row);
            }
        }
    }

    /// Drop history entries no open transaction can request any more and
    /// purge payloads only that history kept alive.
    ///
    /// `oldest_open` is the smallest begin commit id among open transactions
    /// (or the current clock when none are open).
    pub fn truncate_history(&self, oldest_open: CommitId) {
        let mut state = self.state.write();
        state.history.retain(|c| c.commit > oldest_open);

        let referenced: BTreeSet<RowNumber> = state
            .history
            .iter()
            .flat_map(|c| c.registry.events().iter().map(|e| e.row()))
            .collect();
        let visible = state.visible.clone();
        state
            .rows
            .retain(|row, _| visible.contains(row) || referenced.contains(row));
    }

    /// Serialize the committed state for persistence.
    ///
    /// The page-level format of row data is outside this core; the source
    /// persists as one opaque snapshot blob per table.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let state = self.state.read();
        let snapshot = SourceSnapshot {
            table_id: self.table_id.get(),
            source_name: self.source_name.clone(),
            next_row: self.row_alloc.load(Ordering::Relaxed),
            info: (*state.info).clone(),
            rows: state
                .visible
                .iter()
                .filter_map(|row| state.rows.get(row).map(|v| (row.get(), (**v).clone())))
                .collect(),
        };
        serde_json::to_vec(&snapshot)
            .map_err(|e| LatticeError::internal(format!("source snapshot encode: {e}")))
    }

    /// Rebuild a source from [`snapshot_bytes`](Self::snapshot_bytes) output.
    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Arc<Self>> {
        let snapshot: SourceSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| LatticeError::corruption(format!("source snapshot decode: {e}")))?;

        let source = Self::new(
            TableId::new(snapshot.table_id),
            snapshot.source_name,
            snapshot.info,
        )?;
        {
            let mut state = source.state.write();
            let base = Arc::clone(&state.indexes);
            let mut indexes = TransactionIndexSet::new(base);
            for (raw, values) in snapshot.rows {
                let row = RowNumber::new(raw);
                indexes.insert_row(row, &values);
                state.rows.insert(row, Arc::new(values));
                state.visible.insert(row);
            }
            state.indexes = indexes.flush();
        }
        source.row_alloc.store(snapshot.next_row.max(1), Ordering::Relaxed);
        Ok(source)
    }
}

impl std::fmt::Debug for TableSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSource")
            .field("table_id", &self.table_id)
            .field("source_name", &self.source_name)
            .field("rows", &self.row_count())
            .finish_non_exhaustive()
    }
}

/// A consistent read-only view of one table: schema, row set, and indexes
/// captured together.
#[derive(Clone)]
pub struct TableSnapshotView {
    source: Arc<TableSource>,
    info: Arc<TableInfo>,
    visible: BTreeSet<RowNumber>,
    indexes: Arc<IndexSetSnapshot>,
}

impl TableSnapshotView {
    #[must_use]
    pub fn new(
        source: Arc<TableSource>,
        visible: BTreeSet<RowNumber>,
        indexes: Arc<IndexSetSnapshot>,
    ) -> Self {
        let info = source.table_info();
        Self {
            source,
            info,
            visible,
            indexes,
        }
    }

    /// View of the source's current committed state.
    #[must_use]
    pub fn committed(source: &Arc<TableSource>) -> Self {
        Self::new(
            Arc::clone(source),
            source.visible_snapshot(),
            source.committed_indexes(),
        )
    }

    /// The same view with its schema replaced. Commit-time validation of
    /// constraint alters reads the staged schema through this; lookups on
    /// columns the old index set does not cover fall back to scanning.
    #[must_use]
    pub fn with_info(mut self, info: Arc<TableInfo>) -> Self {
        self.info = info;
        self
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    #[inline]
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.source.table_id()
    }

    #[inline]
    #[must_use]
    pub fn visible(&self) -> &BTreeSet<RowNumber> {
        &self.visible
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.visible.len()
    }

    /// Read a row visible in this view.
    pub fn read_row(&self, row: RowNumber) -> Result<Arc<Vec<Value>>> {
        if !self.visible.contains(&row) {
            return Err(LatticeError::internal(format!(
                "row {row} is not visible in this view of {}",
                self.info.name()
            )));
        }
        self.source
            .read_row(row)
            .ok_or_else(|| LatticeError::corruption(format!("missing payload for {row}")))
    }

    /// Raw payload of a row, without a visibility check. Constraint checks
    /// on removed rows read the just-removed image through this.
    pub fn payload(&self, row: RowNumber) -> Result<Arc<Vec<Value>>> {
        self.source
            .read_row(row)
            .ok_or_else(|| LatticeError::corruption(format!("missing payload for {row}")))
    }

    /// Row numbers in this view holding `key` on `columns`.
    ///
    /// Uses the covering index when one exists, otherwise scans the view.
    pub fn rows_with_key(&self, columns: &[String], key: &IndexKey) -> Result<Vec<RowNumber>> {
        if let Some(pos) = self.indexes.position_for_columns(columns) {
            return Ok(self.indexes.indexes()[pos]
                .rows_for_key(key)
                .iter()
                .filter(|r| self.visible.contains(r))
                .copied()
                .collect());
        }

        let positions = columns
            .iter()
            .map(|c| {
                self.info
                    .column_index(c)
                    .ok_or_else(|| LatticeError::UnknownColumn { name: c.clone() })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::new();
        for row in &self.visible {
            let values = self.read_row(*row)?;
            let parts: Vec<&Value> = positions.iter().map(|p| &values[*p]).collect();
            if IndexKey::from_values(&parts) == *key {
                out.push(*row);
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for TableSnapshotView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSnapshotView")
            .field("table", self.info.name())
            .field("rows", &self.visible.len())
            .finish_non_exhaustive()
    }
}
