//! Per-(table, transaction) change journals.
//!
//! A [`TableEventRegistry`] is the ordered log of row events one transaction
//! performed against one table. Registries are private to their transaction
//! until the commit pipeline attaches them to the table source, after which
//! they are immutable and shared (`Arc`) as commit history.

use std::collections::BTreeSet;

use lattice_types::{RowNumber, TableId};
use smallvec::SmallVec;

/// One row event.
///
/// An update is journaled as the adjacent pair `UpdateRemove(old)` then
/// `UpdateAdd(new)`. For constraint checking the pair is equivalent to a
/// remove plus an add; keeping the distinct kinds lets foreign-key checks
/// correlate the old and new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableEvent {
    Add(RowNumber),
    Remove(RowNumber),
    UpdateRemove(RowNumber),
    UpdateAdd(RowNumber),
}

impl TableEvent {
    /// The row number this event touches.
    #[inline]
    #[must_use]
    pub const fn row(self) -> RowNumber {
        match self {
            Self::Add(r) | Self::Remove(r) | Self::UpdateRemove(r) | Self::UpdateAdd(r) => r,
        }
    }

    /// Whether this event contributes to the added multiset.
    #[inline]
    #[must_use]
    pub const fn is_add(self) -> bool {
        matches!(self, Self::Add(_) | Self::UpdateAdd(_))
    }

    /// Whether this event contributes to the removed multiset.
    #[inline]
    #[must_use]
    pub const fn is_remove(self) -> bool {
        matches!(self, Self::Remove(_) | Self::UpdateRemove(_))
    }
}

/// Ordered journal of one transaction's changes to one table.
#[derive(Debug, Clone)]
pub struct TableEventRegistry {
    table_id: TableId,
    events: SmallVec<[TableEvent; 8]>,
    constraints_altered: bool,
}

impl TableEventRegistry {
    #[must_use]
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            events: SmallVec::new(),
            constraints_altered: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    #[inline]
    #[must_use]
    pub fn events(&self) -> &[TableEvent] {
        &self.events
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.constraints_altered
    }

    pub fn record_add(&mut self, row: RowNumber) {
        self.events.push(TableEvent::Add(row));
    }

    pub fn record_remove(&mut self, row: RowNumber) {
        self.events.push(TableEvent::Remove(row));
    }

    /// Journal an update as the `UpdateRemove`/`UpdateAdd` pair.
    pub fn record_update(&mut self, old: RowNumber, new: RowNumber) {
        self.events.push(TableEvent::UpdateRemove(old));
        self.events.push(TableEvent::UpdateAdd(new));
    }

    /// Mark that this transaction altered the table's constraints; commit
    /// revalidates the whole table.
    pub fn mark_constraints_altered(&mut self) {
        self.constraints_altered = true;
    }

    #[inline]
    #[must_use]
    pub const fn constraints_altered(&self) -> bool {
        self.constraints_altered
    }

    /// Multiset of rows added (including the add half of updates), in event
    /// order.
    #[must_use]
    pub fn added_rows(&self) -> Vec<RowNumber> {
        self.events
            .iter()
            .filter(|e| e.is_add())
            .map(|e| e.row())
            .collect()
    }

    /// Multiset of rows removed (including the remove half of updates), in
    /// event order.
    #[must_use]
    pub fn removed_rows(&self) -> Vec<RowNumber> {
        self.events
            .iter()
            .filter(|e| e.is_remove())
            .map(|e| e.row())
            .collect()
    }

    /// Added rows that survive this registry: rows the transaction added and
    /// did not itself remove again.
    #[must_use]
    pub fn normalized_added_rows(&self) -> Vec<RowNumber> {
        let removed: BTreeSet<RowNumber> = self.removed_rows().into_iter().collect();
        let mut seen = BTreeSet::new();
        self.added_rows()
            .into_iter()
            .filter(|r| !removed.contains(r) && seen.insert(*r))
            .collect()
    }

    /// Removed rows that existed before this registry: rows removed that the
    /// transaction did not itself add.
    #[must_use]
    pub fn normalized_removed_rows(&self) -> Vec<RowNumber> {
        let added: BTreeSet<RowNumber> = self.added_rows().into_iter().collect();
        let mut seen = BTreeSet::new();
        self.removed_rows()
            .into_iter()
            .filter(|r| !added.contains(r) && seen.insert(*r))
            .collect()
    }

    /// Conflict predicate between two registries for the same table.
    ///
    /// Two registries clash iff one side removed (or updated) a row the other
    /// side touched at all. Pure insert/insert never clashes: freshly
    /// allocated row numbers are unique across transactions.
    #[must_use]
    pub fn test_commit_clash(&self, other: &TableEventRegistry) -> Option<RowNumber> {
        let self_touched: BTreeSet<RowNumber> = self.events.iter().map(|e| e.row()).collect();
        let other_touched: BTreeSet<RowNumber> = other.events.iter().map(|e| e.row()).collect();

        for r in other.removed_rows() {
            if self_touched.contains(&r) {
                return Some(r);
            }
        }
        for r in self.removed_rows() {
            if other_touched.contains(&r) {
                return Some(r);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reg(events: &[TableEvent]) -> TableEventRegistry {
        let mut r = TableEventRegistry::new(TableId::new(1));
        for e in events {
            r.events.push(*e);
        }
        r
    }

    #[test]
    fn test_update_pair_feeds_both_multisets() {
        let mut r = TableEventRegistry::new(TableId::new(1));
        r.record_update(RowNumber::new(3), RowNumber::new(9));
        assert_eq!(r.added_rows(), vec![RowNumber::new(9)]);
        assert_eq!(r.removed_rows(), vec![RowNumber::new(3)]);
        assert_eq!(
            r.events(),
            &[
                TableEvent::UpdateRemove(RowNumber::new(3)),
                TableEvent::UpdateAdd(RowNumber::new(9)),
            ]
        );
    }

    #[test]
    fn test_pure_inserts_never_clash() {
        let a = reg(&[TableEvent::Add(RowNumber::new(1))]);
        let b = reg(&[TableEvent::Add(RowNumber::new(1))]);
        assert_eq!(a.test_commit_clash(&b), None);
    }

    #[test]
    fn test_remove_vs_touch_clashes() {
        let a = reg(&[TableEvent::Remove(RowNumber::new(5))]);
        let b = reg(&[TableEvent::Add(RowNumber::new(5))]);
        assert_eq!(a.test_commit_clash(&b), Some(RowNumber::new(5)));

        let c = reg(&[
            TableEvent::UpdateRemove(RowNumber::new(7)),
            TableEvent::UpdateAdd(RowNumber::new(8)),
        ]);
        let d = reg(&[
            TableEvent::UpdateRemove(RowNumber::new(7)),
            TableEvent::UpdateAdd(RowNumber::new(9)),
        ]);
        assert_eq!(c.test_commit_clash(&d), Some(RowNumber::new(7)));
    }

    #[test]
    fn test_disjoint_rows_do_not_clash() {
        let a = reg(&[
            TableEvent::Remove(RowNumber::new(1)),
            TableEvent::Add(RowNumber::new(2)),
        ]);
        let b = reg(&[
            TableEvent::Remove(RowNumber::new(3)),
            TableEvent::Add(RowNumber::new(4)),
        ]);
        assert_eq!(a.test_commit_clash(&b), None);
    }

    #[test]
    fn test_normalization_cancels_add_then_remove() {
        let mut r = TableEventRegistry::new(TableId::new(1));
        r.record_add(RowNumber::new(1));
        r.record_add(RowNumber::new(2));
        r.record_remove(RowNumber::new(1)); // own insert deleted again
        r.record_remove(RowNumber::new(40)); // pre-existing row

        assert_eq!(r.normalized_added_rows(), vec![RowNumber::new(2)]);
        assert_eq!(r.normalized_removed_rows(), vec![RowNumber::new(40)]);
    }

    proptest! {
        #[test]
        fn clash_is_symmetric(
            a_rows in proptest::collection::vec((0_u64..20, 0_u8..4), 0..12),
            b_rows in proptest::collection::vec((0_u64..20, 0_u8..4), 0..12),
        ) {
            let build = |rows: &[(u64, u8)]| {
                let mut r = TableEventRegistry::new(TableId::new(1));
                for (n, kind) in rows {
                    let row = RowNumber::new(*n);
                    match kind {
                        0 => r.record_add(row),
                        1 => r.record_remove(row),
                        _ => r.record_update(row, RowNumber::new(n + 100)),
                    }
                }
                r
            };
            let a = build(&a_rows);
            let b = build(&b_rows);
            prop_assert_eq!(a.test_commit_clash(&b).is_some(), b.test_commit_clash(&a).is_some());
        }

        #[test]
        fn insert_only_registries_never_clash(
            a_rows in proptest::collection::vec(0_u64..50, 0..16),
            b_rows in proptest::collection::vec(0_u64..50, 0..16),
        ) {
            let build = |rows: &[u64]| {
                let mut r = TableEventRegistry::new(TableId::new(1));
                for n in rows {
                    r.record_add(RowNumber::new(*n));
                }
                r
            };
            prop_assert_eq!(build(&a_rows).test_commit_clash(&build(&b_rows)), None);
        }
    }
}
