//! The transaction object.
//!
//! A transaction captures the visible-table catalog and the commit clock at
//! begin, then layers its own work on top: one [`MutableTable`] per touched
//! table, created/dropped object sets, the read set used by dirty-select
//! checking, and queued events released only on successful commit.
//!
//! A transaction is single-threaded by contract; the shared pieces it holds
//! (`Arc<TableSource>`) are internally synchronized.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_types::{
    CommitId, Constraint, Deferrability, ObjectKind, ObjectName, RowNumber, TableId, TableInfo,
    TxnId,
};
use tracing::debug;

use crate::constraint::{ConstraintChecker, TableResolver};
use crate::events::Event;
use crate::mutable_table::MutableTable;
use crate::plan::PredicateCompiler;
use crate::table_source::{TableSnapshotView, TableSource};

/// Transaction lifecycle states. Transitions are exclusive: once out of
/// `Open`, no further mutation is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committing,
    RollingBack,
    Committed,
    Aborted,
}

impl TxnState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Committing => "Committing",
            Self::RollingBack => "RollingBack",
            Self::Committed => "Committed",
            Self::Aborted => "Aborted",
        }
    }
}

/// One open transaction.
pub struct Transaction {
    txn_id: TxnId,
    begin: CommitId,
    ignore_case: bool,
    state: TxnState,
    read_only: bool,
    /// Snapshot of the visible catalog at begin, plus this transaction's own
    /// DDL layered on top. Keyed by lookup name.
    visible: HashMap<ObjectName, Arc<TableSource>>,
    /// Touched tables with their journals, keyed by table id.
    touched: BTreeMap<TableId, MutableTable>,
    /// Tables read from, for dirty-select checking.
    read_set: BTreeMap<TableId, Arc<TableSource>>,
    created: Vec<(ObjectName, ObjectKind)>,
    dropped: Vec<(ObjectName, ObjectKind)>,
    /// Tables this transaction dropped, by id.
    dropped_tables: BTreeMap<TableId, ObjectName>,
    /// Tables whose constraints this transaction altered.
    constraint_altered: BTreeSet<TableId>,
    /// Staged schema versions for altered tables, applied at publish.
    pending_schemas: BTreeMap<TableId, TableInfo>,
    /// Caller events queued for delivery after successful commit.
    pending_events: Vec<Event>,
    /// Definition payloads of non-table objects created by this transaction,
    /// keyed by lookup name. Published into the engine catalog at commit.
    created_payloads: HashMap<(ObjectKind, ObjectName), lattice_types::PlanSource>,
}

impl Transaction {
    pub(crate) fn new(
        txn_id: TxnId,
        begin: CommitId,
        ignore_case: bool,
        visible: HashMap<ObjectName, Arc<TableSource>>,
    ) -> Self {
        debug!(%txn_id, %begin, tables = visible.len(), "transaction begun");
        Self {
            txn_id,
            begin,
            ignore_case,
            state: TxnState::Open,
            read_only: false,
            visible,
            touched: BTreeMap::new(),
            read_set: BTreeMap::new(),
            created: Vec::new(),
            dropped: Vec::new(),
            dropped_tables: BTreeMap::new(),
            constraint_altered: BTreeSet::new(),
            pending_schemas: BTreeMap::new(),
            pending_events: Vec::new(),
            created_payloads: HashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The commit clock value captured at begin; this transaction observes
    /// exactly the commits with id `<= begin_commit_id()`.
    #[inline]
    #[must_use]
    pub fn begin_commit_id(&self) -> CommitId {
        self.begin
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Latch the transaction read-only; every later mutating entry point
    /// fails with `ReadOnly`. The latch cannot be cleared.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == TxnState::Open {
            Ok(())
        } else {
            Err(LatticeError::InvalidTxnState {
                expected: TxnState::Open.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(LatticeError::ReadOnly);
        }
        Ok(())
    }

    fn resolve_source(&self, name: &ObjectName) -> Result<Arc<TableSource>> {
        self.visible
            .get(&name.lookup_key(self.ignore_case))
            .cloned()
            .ok_or_else(|| LatticeError::NotFound {
                kind: ObjectKind::Table,
                name: name.to_string(),
            })
    }

    /// Names of all tables visible to this transaction.
    #[must_use]
    pub fn table_names(&self) -> Vec<ObjectName> {
        self.visible
            .values()
            .map(|s| s.table_info().name().clone())
            .collect()
    }

    /// Read-only view of a table, recording it in the read set.
    ///
    /// If this transaction already mutated the table the view includes its
    /// own writes; otherwise it is the begin snapshot.
    pub fn get_table(&mut self, name: &ObjectName) -> Result<TableSnapshotView> {
        self.ensure_open()?;
        let source = self.resolve_source(name)?;
        let id = source.table_id();
        self.read_set.insert(id, Arc::clone(&source));

        if let Some(touched) = self.touched.get(&id) {
            return Ok(touched.as_view());
        }
        Ok(TableSnapshotView::new(
            Arc::clone(&source),
            source.visible_as_of(self.begin),
            source.indexes_as_of(self.begin),
        ))
    }

    /// Writable view of a table; the first call registers the table's
    /// journal and index-set copy.
    ///
    /// Writing alone does not enter the dirty-select read set; only
    /// [`get_table`](Self::get_table) records a read. Concurrent changes to a
    /// written table are caught by row-conflict checking instead, so two pure
    /// inserts into the same table can both commit.
    pub fn get_mutable_table(&mut self, name: &ObjectName) -> Result<&mut MutableTable> {
        self.ensure_mutable()?;
        let source = self.resolve_source(name)?;
        let id = source.table_id();
        Ok(self
            .touched
            .entry(id)
            .or_insert_with(|| MutableTable::new(source, self.begin)))
    }

    /// Install a table this transaction created. The source is private to
    /// the transaction until commit publishes it.
    pub(crate) fn install_created_table(&mut self, source: Arc<TableSource>) -> Result<()> {
        self.ensure_mutable()?;
        let name = source.table_info().name().clone();
        let key = name.lookup_key(self.ignore_case);
        if self.visible.contains_key(&key) {
            return Err(LatticeError::DuplicateObject {
                kind: ObjectKind::Table,
                name: name.to_string(),
            });
        }
        let id = source.table_id();
        self.visible.insert(key, Arc::clone(&source));
        self.created.push((name, ObjectKind::Table));
        self.touched.insert(id, MutableTable::new(source, self.begin));
        Ok(())
    }

    /// Drop a table from this transaction's view.
    ///
    /// Dropping a table created by this same transaction cancels the create
    /// instead of recording a drop.
    pub fn drop_table(&mut self, name: &ObjectName) -> Result<TableId> {
        self.ensure_mutable()?;
        let source = self.resolve_source(name)?;
        let id = source.table_id();
        let key = name.lookup_key(self.ignore_case);
        self.visible.remove(&key);
        self.touched.remove(&id);

        let created_here = self
            .created
            .iter()
            .position(|(n, k)| *k == ObjectKind::Table && n.matches(name, self.ignore_case));
        match created_here {
            Some(pos) => {
                self.created.remove(pos);
            }
            None => {
                let canonical = source.table_info().name().clone();
                self.dropped.push((canonical.clone(), ObjectKind::Table));
                self.dropped_tables.insert(id, canonical);
            }
        }
        Ok(id)
    }

    /// Remove a table binding from the visible map without recording DDL.
    pub fn remove_visible_table(&mut self, name: &ObjectName) -> Result<()> {
        self.ensure_mutable()?;
        let key = name.lookup_key(self.ignore_case);
        if self.visible.remove(&key).is_none() {
            return Err(LatticeError::NotFound {
                kind: ObjectKind::Table,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Replace a table binding (schema alters rebind the source in place).
    pub fn update_visible_table(&mut self, source: Arc<TableSource>) -> Result<()> {
        self.ensure_mutable()?;
        let name = source.table_info().name().clone();
        self.visible
            .insert(name.lookup_key(self.ignore_case), source);
        Ok(())
    }

    /// Record a non-table DDL object (view, sequence, trigger) created by
    /// this transaction.
    pub fn record_created_object(&mut self, name: ObjectName, kind: ObjectKind) -> Result<()> {
        self.ensure_mutable()?;
        if self
            .created
            .iter()
            .any(|(n, k)| *k == kind && n.matches(&name, self.ignore_case))
        {
            return Err(LatticeError::DuplicateObject {
                kind,
                name: name.to_string(),
            });
        }
        self.created.push((name, kind));
        Ok(())
    }

    /// Record a non-table DDL object dropped by this transaction.
    pub fn record_dropped_object(&mut self, name: ObjectName, kind: ObjectKind) -> Result<()> {
        self.ensure_mutable()?;
        let created_here = self
            .created
            .iter()
            .position(|(n, k)| *k == kind && n.matches(&name, self.ignore_case));
        match created_here {
            Some(pos) => {
                self.created.remove(pos);
            }
            None => self.dropped.push((name, kind)),
        }
        Ok(())
    }

    /// Mark a touched table's constraints altered; commit revalidates the
    /// whole table.
    pub fn mark_constraints_altered(&mut self, name: &ObjectName) -> Result<()> {
        let id = {
            let table = self.get_mutable_table(name)?;
            table.mark_constraints_altered();
            table.source().table_id()
        };
        self.constraint_altered.insert(id);
        Ok(())
    }

    /// Stage a replacement constraint set for a table.
    ///
    /// The new schema stays private to this transaction: commit validates the
    /// whole table against it and only publish makes it the table's schema.
    pub fn alter_constraints(
        &mut self,
        name: &ObjectName,
        constraints: Vec<Constraint>,
    ) -> Result<()> {
        self.mark_constraints_altered(name)?;
        let source = self.resolve_source(name)?;
        let current = source.table_info();
        let staged = TableInfo::new(current.name().clone(), current.columns().to_vec())
            .with_constraints(constraints);
        self.pending_schemas.insert(source.table_id(), staged);
        Ok(())
    }

    /// Queue an event for delivery after successful commit.
    pub fn raise_event(&mut self, event: Event) -> Result<()> {
        self.ensure_open()?;
        self.pending_events.push(event);
        Ok(())
    }

    /// Statement-level constraint check over rows added to `table`.
    pub fn check_add_constraint_violations(
        &self,
        compiler: Option<&dyn PredicateCompiler>,
        table: &ObjectName,
        rows: &[RowNumber],
        deferrability: Deferrability,
    ) -> Result<()> {
        let view = self.view_of(table)?;
        ConstraintChecker::new(self, compiler).check_add_violations(&view, rows, deferrability)
    }

    /// Statement-level constraint check over rows removed from `table`.
    pub fn check_remove_constraint_violations(
        &self,
        compiler: Option<&dyn PredicateCompiler>,
        table: &ObjectName,
        rows: &[RowNumber],
        deferrability: Deferrability,
    ) -> Result<()> {
        let view = self.view_of(table)?;
        ConstraintChecker::new(self, compiler).check_remove_violations(&view, rows, deferrability)
    }

    fn view_of(&self, name: &ObjectName) -> Result<TableSnapshotView> {
        let source = self.resolve_source(name)?;
        let id = source.table_id();
        if let Some(touched) = self.touched.get(&id) {
            return Ok(touched.as_view());
        }
        Ok(TableSnapshotView::new(
            Arc::clone(&source),
            source.visible_as_of(self.begin),
            source.indexes_as_of(self.begin),
        ))
    }

    // -- state machine -----------------------------------------------------

    pub(crate) fn begin_commit_phase(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TxnState::Committing;
        Ok(())
    }

    pub(crate) fn begin_rollback_phase(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TxnState::RollingBack;
        Ok(())
    }

    pub(crate) fn finish_commit(&mut self) {
        self.state = TxnState::Committed;
    }

    pub(crate) fn finish_abort(&mut self) {
        self.state = TxnState::Aborted;
    }

    // -- commit pipeline accessors -----------------------------------------

    #[must_use]
    pub(crate) fn read_sources(&self) -> &BTreeMap<TableId, Arc<TableSource>> {
        &self.read_set
    }

    #[must_use]
    pub(crate) fn touched_tables(&self) -> &BTreeMap<TableId, MutableTable> {
        &self.touched
    }

    #[must_use]
    pub(crate) fn created_objects(&self) -> &[(ObjectName, ObjectKind)] {
        &self.created
    }

    #[must_use]
    pub(crate) fn dropped_objects(&self) -> &[(ObjectName, ObjectKind)] {
        &self.dropped
    }

    #[must_use]
    pub(crate) fn dropped_table_ids(&self) -> &BTreeMap<TableId, ObjectName> {
        &self.dropped_tables
    }

    #[must_use]
    pub(crate) fn constraint_altered_tables(&self) -> &BTreeSet<TableId> {
        &self.constraint_altered
    }

    #[must_use]
    pub(crate) fn pending_schema(&self, id: TableId) -> Option<&TableInfo> {
        self.pending_schemas.get(&id)
    }

    pub(crate) fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Stash the definition payload of a created non-table object.
    pub(crate) fn stage_object_payload(
        &mut self,
        name: ObjectName,
        kind: ObjectKind,
        payload: lattice_types::PlanSource,
    ) {
        self.created_payloads
            .insert((kind, name.lookup_key(self.ignore_case)), payload);
    }

    pub(crate) fn take_object_payloads(
        &mut self,
    ) -> HashMap<(ObjectKind, ObjectName), lattice_types::PlanSource> {
        std::mem::take(&mut self.created_payloads)
    }
}

impl TableResolver for Transaction {
    fn resolve_view(&self, name: &ObjectName) -> Result<TableSnapshotView> {
        self.view_of(name)
    }

    fn all_views(&self) -> Result<Vec<TableSnapshotView>> {
        self.visible
            .values()
            .map(|source| {
                let id = source.table_id();
                if let Some(touched) = self.touched.get(&id) {
                    Ok(touched.as_view())
                } else {
                    Ok(TableSnapshotView::new(
                        Arc::clone(source),
                        source.visible_as_of(self.begin),
                        source.indexes_as_of(self.begin),
                    ))
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("begin", &self.begin)
            .field("state", &self.state)
            .field("touched", &self.touched.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{ColumnInfo, SqlType, TableInfo, Value};

    fn source(id: u64, name: &str) -> Arc<TableSource> {
        let info = TableInfo::new(
            ObjectName::new("app", name),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("name", SqlType::Text),
            ],
        );
        TableSource::new(TableId::new(id), format!("app.{name}"), info).unwrap()
    }

    fn txn_with(sources: &[Arc<TableSource>]) -> Transaction {
        let visible = sources
            .iter()
            .map(|s| (s.table_info().name().lookup_key(true), Arc::clone(s)))
            .collect();
        Transaction::new(TxnId::new(1), CommitId::ZERO, true, visible)
    }

    #[test]
    fn test_get_table_records_read_set() {
        let s = source(1, "person");
        let mut tx = txn_with(&[Arc::clone(&s)]);
        tx.get_table(&ObjectName::new("APP", "PERSON")).unwrap();
        assert!(tx.read_sources().contains_key(&TableId::new(1)));
    }

    #[test]
    fn test_unknown_table_is_not_found() {
        let mut tx = txn_with(&[]);
        assert!(matches!(
            tx.get_table(&ObjectName::new("app", "ghost")),
            Err(LatticeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_reads_see_own_writes() {
        let s = source(1, "person");
        let mut tx = txn_with(&[Arc::clone(&s)]);
        let name = ObjectName::new("app", "person");
        let row = tx
            .get_mutable_table(&name)
            .unwrap()
            .add_row(vec![Value::Integer(1), Value::text("ada")])
            .unwrap();
        let view = tx.get_table(&name).unwrap();
        assert_eq!(view.row_count(), 1);
        assert!(view.visible().contains(&row));
        // Committed state untouched until commit.
        assert_eq!(s.row_count(), 0);
    }

    #[test]
    fn test_read_only_latch_blocks_mutation() {
        let s = source(1, "person");
        let mut tx = txn_with(&[s]);
        tx.set_read_only();
        let err = tx.get_mutable_table(&ObjectName::new("app", "person"));
        assert!(matches!(err, Err(LatticeError::ReadOnly)));
        // Reads still work.
        tx.get_table(&ObjectName::new("app", "person")).unwrap();
    }

    #[test]
    fn test_state_machine_blocks_after_commit_phase() {
        let s = source(1, "person");
        let mut tx = txn_with(&[s]);
        tx.begin_commit_phase().unwrap();
        assert!(matches!(
            tx.get_mutable_table(&ObjectName::new("app", "person")),
            Err(LatticeError::InvalidTxnState { .. })
        ));
        assert!(tx.begin_commit_phase().is_err());
    }

    #[test]
    fn test_create_then_drop_cancels() {
        let mut tx = txn_with(&[]);
        let s = source(7, "temp");
        tx.install_created_table(Arc::clone(&s)).unwrap();
        assert_eq!(tx.created_objects().len(), 1);
        tx.drop_table(&ObjectName::new("app", "temp")).unwrap();
        assert!(tx.created_objects().is_empty());
        assert!(tx.dropped_objects().is_empty());
        assert!(tx.dropped_table_ids().is_empty());
    }

    #[test]
    fn test_drop_preexisting_table_records_drop() {
        let s = source(3, "person");
        let mut tx = txn_with(&[s]);
        let id = tx.drop_table(&ObjectName::new("app", "person")).unwrap();
        assert_eq!(id, TableId::new(3));
        assert_eq!(tx.dropped_objects().len(), 1);
        assert!(tx.dropped_table_ids().contains_key(&id));
        // The table is gone from this transaction's view.
        assert!(tx.get_table(&ObjectName::new("app", "person")).is_err());
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let mut tx = txn_with(&[source(1, "person")]);
        let dup = source(9, "person");
        assert!(matches!(
            tx.install_created_table(dup),
            Err(LatticeError::DuplicateObject { .. })
        ));
    }
}
