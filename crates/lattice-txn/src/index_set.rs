//! Copy-on-write index sets.
//!
//! An [`IndexSetSnapshot`] is the immutable committed form of every index on
//! one table. A transaction that touches the table wraps the snapshot in a
//! [`TransactionIndexSet`]; the first mutation of an index clones that index
//! privately, so concurrent transactions keep reading the shared snapshot
//! untouched. [`TransactionIndexSet::flush`] publishes the private copies
//! back into a fresh snapshot for the commit pipeline to adopt.
//!
//! Indexes are derived from the table's declared constraints: PRIMARY KEY and
//! UNIQUE each get a unique index, FOREIGN KEY gets a non-unique index on the
//! referencing columns so child-row checks do not scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_types::{ConstraintBody, IndexKey, RowNumber, TableInfo, Value};
use smallvec::SmallVec;

/// Shape of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One index: an ordered multimap from key to row numbers.
#[derive(Debug, Clone)]
pub struct Index {
    def: IndexDef,
    positions: Vec<usize>,
    map: BTreeMap<IndexKey, SmallVec<[RowNumber; 1]>>,
}

impl Index {
    fn empty(def: IndexDef, info: &TableInfo) -> Result<Self> {
        let positions = def
            .columns
            .iter()
            .map(|c| {
                info.column_index(c).ok_or_else(|| LatticeError::UnknownColumn {
                    name: c.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            def,
            positions,
            map: BTreeMap::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Extract this index's key from a full row.
    #[must_use]
    pub fn key_for_row(&self, row: &[Value]) -> IndexKey {
        let parts: Vec<&Value> = self.positions.iter().map(|p| &row[*p]).collect();
        IndexKey::from_values(&parts)
    }

    fn insert(&mut self, key: IndexKey, row: RowNumber) {
        self.map.entry(key).or_default().push(row);
    }

    fn remove(&mut self, key: &IndexKey, row: RowNumber) {
        if let Some(rows) = self.map.get_mut(key) {
            if let Some(pos) = rows.iter().position(|r| *r == row) {
                rows.swap_remove(pos);
            }
            if rows.is_empty() {
                self.map.remove(key);
            }
        }
    }

    /// Row numbers currently holding `key`.
    #[must_use]
    pub fn rows_for_key(&self, key: &IndexKey) -> &[RowNumber] {
        self.map.get(key).map_or(&[], |rows| rows.as_slice())
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.map.values().map(SmallVec::len).sum()
    }
}

/// Derive the index definitions a table's constraints call for.
#[must_use]
pub fn index_defs_for(info: &TableInfo) -> Vec<IndexDef> {
    let mut defs = Vec::new();
    for constraint in info.constraints() {
        match &constraint.body {
            ConstraintBody::PrimaryKey { columns } | ConstraintBody::Unique { columns } => {
                defs.push(IndexDef {
                    name: constraint.name.clone(),
                    columns: columns.clone(),
                    unique: true,
                });
            }
            ConstraintBody::ForeignKey { columns, .. } => {
                defs.push(IndexDef {
                    name: constraint.name.clone(),
                    columns: columns.clone(),
                    unique: false,
                });
            }
            ConstraintBody::Check { .. } => {}
        }
    }
    defs
}

/// The immutable committed index set of one table.
#[derive(Debug)]
pub struct IndexSetSnapshot {
    indexes: Vec<Arc<Index>>,
}

impl IndexSetSnapshot {
    /// Empty snapshot with one index per constraint-derived definition.
    pub fn for_table(info: &TableInfo) -> Result<Arc<Self>> {
        let indexes = index_defs_for(info)
            .into_iter()
            .map(|def| Index::empty(def, info).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Self { indexes }))
    }

    #[must_use]
    pub fn indexes(&self) -> &[Arc<Index>] {
        &self.indexes
    }

    /// Position of the index covering exactly `columns`, if any.
    #[must_use]
    pub fn position_for_columns(&self, columns: &[String]) -> Option<usize> {
        self.indexes
            .iter()
            .position(|idx| idx.def.columns == columns)
    }
}

/// A transaction's copy-on-write view over one table's indexes.
#[derive(Debug)]
pub struct TransactionIndexSet {
    base: Arc<IndexSetSnapshot>,
    /// One slot per index; `Some` once privatized by a mutation.
    private: Vec<Option<Index>>,
}

impl TransactionIndexSet {
    #[must_use]
    pub fn new(base: Arc<IndexSetSnapshot>) -> Self {
        let private = (0..base.indexes.len()).map(|_| None).collect();
        Self { base, private }
    }

    /// Whether any index has been privatized.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.private.iter().any(Option::is_some)
    }

    /// Read view of the index at `pos`: the private copy if one exists.
    #[must_use]
    pub fn index(&self, pos: usize) -> &Index {
        match &self.private[pos] {
            Some(private) => private,
            None => self.base.indexes[pos].as_ref(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.base.indexes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.indexes.is_empty()
    }

    #[must_use]
    pub fn position_for_columns(&self, columns: &[String]) -> Option<usize> {
        self.base.position_for_columns(columns)
    }

    fn ensure_private(&mut self, pos: usize) -> &mut Index {
        let base = &self.base;
        self.private[pos].get_or_insert_with(|| (*base.indexes[pos]).clone())
    }

    /// Index a freshly added row in every index.
    pub fn insert_row(&mut self, row: RowNumber, values: &[Value]) {
        for pos in 0..self.private.len() {
            let key = self.index(pos).key_for_row(values);
            self.ensure_private(pos).insert(key, row);
        }
    }

    /// Unindex a removed row from every index.
    pub fn remove_row(&mut self, row: RowNumber, values: &[Value]) {
        for pos in 0..self.private.len() {
            let key = self.index(pos).key_for_row(values);
            self.ensure_private(pos).remove(&key, row);
        }
    }

    /// Publish accumulated mutations as a fresh immutable snapshot.
    ///
    /// Untouched indexes stay `Arc`-shared with the base snapshot.
    #[must_use]
    pub fn flush(&self) -> Arc<IndexSetSnapshot> {
        let indexes = self
            .base
            .indexes
            .iter()
            .enumerate()
            .map(|(pos, base_idx)| match &self.private[pos] {
                Some(private) => Arc::new(private.clone()),
                None => Arc::clone(base_idx),
            })
            .collect();
        Arc::new(IndexSetSnapshot { indexes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{
        ColumnInfo, Constraint, ConstraintBody, ObjectName, SqlType, TableInfo,
    };

    fn table() -> TableInfo {
        TableInfo::new(
            ObjectName::new("app", "person"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("email", SqlType::Text),
            ],
        )
        .with_constraints(vec![
            Constraint::new(
                "person_pk",
                ConstraintBody::PrimaryKey {
                    columns: vec!["id".into()],
                },
            ),
            Constraint::new(
                "person_email_uq",
                ConstraintBody::Unique {
                    columns: vec!["email".into()],
                },
            ),
        ])
    }

    fn row(id: i64, email: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::text(email)]
    }

    #[test]
    fn test_defs_derive_from_constraints() {
        let defs = index_defs_for(&table());
        assert_eq!(defs.len(), 2);
        assert!(defs.iter().all(|d| d.unique));
        assert_eq!(defs[0].name, "person_pk");
    }

    #[test]
    fn test_snapshot_is_shared_until_mutation() {
        let snap = IndexSetSnapshot::for_table(&table()).unwrap();
        let mut a = TransactionIndexSet::new(Arc::clone(&snap));
        let b = TransactionIndexSet::new(Arc::clone(&snap));
        assert!(!a.is_dirty());

        a.insert_row(RowNumber::new(1), &row(1, "ada@x"));
        assert!(a.is_dirty());
        assert!(!b.is_dirty());

        // b still sees the empty shared snapshot.
        let key = b.index(0).key_for_row(&row(1, "ada@x"));
        assert!(b.index(0).rows_for_key(&key).is_empty());
        assert_eq!(a.index(0).rows_for_key(&key), &[RowNumber::new(1)]);
    }

    #[test]
    fn test_flush_publishes_private_copies() {
        let snap = IndexSetSnapshot::for_table(&table()).unwrap();
        let mut a = TransactionIndexSet::new(Arc::clone(&snap));
        a.insert_row(RowNumber::new(1), &row(1, "ada@x"));
        a.insert_row(RowNumber::new(2), &row(2, "bob@x"));
        a.remove_row(RowNumber::new(1), &row(1, "ada@x"));

        let flushed = a.flush();
        let key1 = flushed.indexes()[0].key_for_row(&row(1, "ada@x"));
        let key2 = flushed.indexes()[0].key_for_row(&row(2, "bob@x"));
        assert!(flushed.indexes()[0].rows_for_key(&key1).is_empty());
        assert_eq!(flushed.indexes()[0].rows_for_key(&key2), &[RowNumber::new(2)]);
        // Original snapshot untouched.
        assert_eq!(snap.indexes()[0].entry_count(), 0);
    }

    #[test]
    fn test_unknown_index_column_is_an_error() {
        let info = TableInfo::new(
            ObjectName::new("app", "bad"),
            vec![ColumnInfo::new("a", SqlType::Integer)],
        )
        .with_constraints(vec![Constraint::new(
            "bad_pk",
            ConstraintBody::PrimaryKey {
                columns: vec!["missing".into()],
            },
        )]);
        assert!(matches!(
            IndexSetSnapshot::for_table(&info),
            Err(LatticeError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_position_lookup_by_columns() {
        let snap = IndexSetSnapshot::for_table(&table()).unwrap();
        assert_eq!(snap.position_for_columns(&["email".to_owned()]), Some(1));
        assert_eq!(snap.position_for_columns(&["nope".to_owned()]), None);
    }
}
