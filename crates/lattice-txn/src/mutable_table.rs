//! The mutable per-transaction view of one table.
//!
//! Every row mutation is journaled into the view's [`TableEventRegistry`] and
//! mirrored into its copy-on-write [`TransactionIndexSet`]; the committed
//! state of the underlying [`TableSource`] is never touched until the commit
//! pipeline publishes the registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_types::{CommitId, RowNumber, TableInfo, Value};

use crate::index_set::TransactionIndexSet;
use crate::registry::TableEventRegistry;
use crate::table_source::{TableSnapshotView, TableSource};

/// A transaction's writable view of one table.
///
/// Reads see the transaction's begin snapshot with its own journal layered on
/// top: snapshot rows minus own removes, plus own adds.
pub struct MutableTable {
    source: Arc<TableSource>,
    info: Arc<TableInfo>,
    registry: TableEventRegistry,
    index_set: TransactionIndexSet,
    /// Committed-visible rows as of the transaction's begin.
    snapshot_visible: BTreeSet<RowNumber>,
    /// Rows added by this transaction and still live.
    added: BTreeSet<RowNumber>,
    /// Snapshot rows removed by this transaction.
    removed: BTreeSet<RowNumber>,
}

impl MutableTable {
    /// Build the view for a transaction that began at `begin`.
    #[must_use]
    pub fn new(source: Arc<TableSource>, begin: CommitId) -> Self {
        let info = source.table_info();
        let snapshot_visible = source.visible_as_of(begin);
        let index_set = TransactionIndexSet::new(source.indexes_as_of(begin));
        let registry = TableEventRegistry::new(source.table_id());
        Self {
            source,
            info,
            registry,
            index_set,
            snapshot_visible,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &Arc<TableSource> {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TableEventRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn index_set(&self) -> &TransactionIndexSet {
        &self.index_set
    }

    /// Whether `row` is visible to this transaction right now.
    #[must_use]
    pub fn is_visible(&self, row: RowNumber) -> bool {
        self.added.contains(&row)
            || (self.snapshot_visible.contains(&row) && !self.removed.contains(&row))
    }

    /// Current row set: snapshot minus own removes, plus own adds.
    #[must_use]
    pub fn rows(&self) -> BTreeSet<RowNumber> {
        let mut rows: BTreeSet<RowNumber> = self
            .snapshot_visible
            .difference(&self.removed)
            .copied()
            .collect();
        rows.extend(self.added.iter().copied());
        rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.snapshot_visible.len() - self.removed.len() + self.added.len()
    }

    /// Read a row visible to this transaction.
    pub fn read_row(&self, row: RowNumber) -> Result<Arc<Vec<Value>>> {
        if !self.is_visible(row) {
            return Err(LatticeError::internal(format!(
                "read of invisible {row} in {}",
                self.info.name()
            )));
        }
        self.source
            .read_row(row)
            .ok_or_else(|| LatticeError::corruption(format!("missing payload for {row}")))
    }

    /// Insert a row; returns its new row number.
    pub fn add_row(&mut self, values: Vec<Value>) -> Result<RowNumber> {
        self.info.validate_row(&values)?;
        let row = self.source.stage_row(values);
        let payload = self
            .source
            .read_row(row)
            .ok_or_else(|| LatticeError::internal("staged row vanished"))?;
        self.index_set.insert_row(row, &payload);
        self.registry.record_add(row);
        self.added.insert(row);
        Ok(row)
    }

    /// Delete a visible row.
    pub fn remove_row(&mut self, row: RowNumber) -> Result<()> {
        let payload = self.read_row(row)?;
        self.index_set.remove_row(row, &payload);
        self.registry.record_remove(row);
        self.unsee(row);
        Ok(())
    }

    /// Replace a visible row; returns the replacement's row number.
    ///
    /// Journaled as an update pair so foreign-key checks can correlate the
    /// old and new images.
    pub fn update_row(&mut self, row: RowNumber, values: Vec<Value>) -> Result<RowNumber> {
        self.info.validate_row(&values)?;
        let old_payload = self.read_row(row)?;

        let new_row = self.source.stage_row(values);
        let new_payload = self
            .source
            .read_row(new_row)
            .ok_or_else(|| LatticeError::internal("staged row vanished"))?;

        self.index_set.remove_row(row, &old_payload);
        self.index_set.insert_row(new_row, &new_payload);
        self.registry.record_update(row, new_row);
        self.unsee(row);
        self.added.insert(new_row);
        Ok(new_row)
    }

    fn unsee(&mut self, row: RowNumber) {
        if !self.added.remove(&row) {
            self.removed.insert(row);
        }
    }

    /// Mark that this transaction altered the table's constraints.
    pub fn mark_constraints_altered(&mut self) {
        self.registry.mark_constraints_altered();
    }

    /// A read-only snapshot of this view's current state, with the private
    /// index mutations flushed in. Used for statement-level constraint
    /// checks.
    #[must_use]
    pub fn as_view(&self) -> TableSnapshotView {
        TableSnapshotView::new(
            Arc::clone(&self.source),
            self.rows(),
            self.index_set.flush(),
        )
    }

}

impl std::fmt::Debug for MutableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableTable")
            .field("table", self.info.name())
            .field("added", &self.added.len())
            .field("removed", &self.removed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{ColumnInfo, Constraint, ConstraintBody, ObjectName, SqlType, TableId};

    fn source() -> Arc<TableSource> {
        let info = TableInfo::new(
            ObjectName::new("app", "person"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("name", SqlType::Text),
            ],
        )
        .with_constraints(vec![Constraint::new(
            "person_pk",
            ConstraintBody::PrimaryKey {
                columns: vec!["id".into()],
            },
        )]);
        TableSource::new(TableId::new(1), "app.person", info).unwrap()
    }

    #[test]
    fn test_add_then_read_sees_own_write() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        let row = table
            .add_row(vec![Value::Integer(1), Value::text("ada")])
            .unwrap();
        assert!(table.is_visible(row));
        assert_eq!(table.read_row(row).unwrap()[0], Value::Integer(1));
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.registry().added_rows(), vec![row]);
        // Nothing committed on the source.
        assert_eq!(table.source().row_count(), 0);
    }

    #[test]
    fn test_remove_own_insert_cancels_out() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        let row = table.add_row(vec![Value::Integer(1), Value::Null]).unwrap();
        table.remove_row(row).unwrap();
        assert!(!table.is_visible(row));
        assert_eq!(table.row_count(), 0);
        assert!(table.registry().normalized_added_rows().is_empty());
        assert!(table.registry().normalized_removed_rows().is_empty());
    }

    #[test]
    fn test_update_journals_a_pair_and_moves_visibility() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        let old = table.add_row(vec![Value::Integer(1), Value::Null]).unwrap();
        let new = table
            .update_row(old, vec![Value::Integer(2), Value::Null])
            .unwrap();
        assert!(!table.is_visible(old));
        assert!(table.is_visible(new));
        assert_eq!(table.registry().events().len(), 3);
        assert_eq!(table.read_row(new).unwrap()[0], Value::Integer(2));
    }

    #[test]
    fn test_shape_violation_rejected() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        assert!(table.add_row(vec![Value::Integer(1)]).is_err());
        assert!(table
            .add_row(vec![Value::text("wrong"), Value::Null])
            .is_err());
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_remove_invisible_row_fails() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        assert!(table.remove_row(RowNumber::new(99)).is_err());
    }

    #[test]
    fn test_as_view_reflects_journal() {
        let mut table = MutableTable::new(source(), CommitId::ZERO);
        let row = table
            .add_row(vec![Value::Integer(5), Value::text("eve")])
            .unwrap();
        let view = table.as_view();
        assert_eq!(view.row_count(), 1);
        let key = lattice_types::IndexKey::from_values(&[&Value::Integer(5)]);
        assert_eq!(view.rows_with_key(&["id".into()], &key).unwrap(), vec![row]);
    }
}
