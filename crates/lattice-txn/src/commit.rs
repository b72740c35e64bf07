//! The commit pipeline.
//!
//! One commit at a time: the whole pipeline runs under the engine's commit
//! mutex, and publish is the only place the commit clock advances. Stages:
//!
//! 1. dirty-select check over the transaction's read set,
//! 2. namespace check against the object-commit log,
//! 3. row-clash check against registries committed since begin,
//! 4. dropped-but-modified check,
//! 5. synthesis of the read-only check-view (merged per-table views),
//! 6. deferred constraint validation against the check-view,
//! 7. assembly of post-commit events,
//! 8. publish: registries attached, catalog and state store updated, clock
//!    advanced, snapshots persisted,
//! 9. cleanup, which always runs: locks released, and if publish never
//!    started, every touched source discards the transaction's staged rows.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_observability::ConflictKind;
use lattice_types::{
    CommitId, Deferrability, ObjectKind, ObjectName, RowId, RowNumber, TableId,
};
use tracing::{debug, warn};

use crate::constraint::{ConstraintChecker, TableResolver};
use crate::engine::Engine;
use crate::events::{Event, ObjectLifecycleEvent, TableModifiedEvent};
use crate::index_set::{IndexSetSnapshot, TransactionIndexSet};
use crate::lock_manager::LockHandle;
use crate::object_log::ObjectCommitState;
use crate::registry::TableEventRegistry;
use crate::state_store::TableState;
use crate::table_source::{TableSnapshotView, TableSource};
use crate::transaction::Transaction;

/// The synthetic post-commit view: every table as it will look if this
/// commit publishes. Read-only by construction; constraint checks resolve
/// foreign keys through it.
struct CheckView {
    by_name: HashMap<ObjectName, TableSnapshotView>,
    ignore_case: bool,
}

impl TableResolver for CheckView {
    fn resolve_view(&self, name: &ObjectName) -> Result<TableSnapshotView> {
        self.by_name
            .get(&name.lookup_key(self.ignore_case))
            .cloned()
            .ok_or_else(|| LatticeError::NotFound {
                kind: ObjectKind::Table,
                name: name.to_string(),
            })
    }

    fn all_views(&self) -> Result<Vec<TableSnapshotView>> {
        Ok(self.by_name.values().cloned().collect())
    }
}

/// Per-table artifacts carried from view synthesis into publish.
struct PreparedTable {
    table_id: TableId,
    name: ObjectName,
    source: Arc<TableSource>,
    registry: Arc<TableEventRegistry>,
    indexes: Arc<IndexSetSnapshot>,
    view: TableSnapshotView,
    added: Vec<RowNumber>,
    removed: Vec<RowNumber>,
}

impl Engine {
    /// Validate and publish a transaction.
    ///
    /// On any error the transaction aborts: stage 9 cleanup always runs, the
    /// locks are released, and the committed state is untouched. Commit
    /// conflicts are retryable by rerunning the whole transaction.
    pub fn commit(&self, mut tx: Transaction, locks: Vec<LockHandle>) -> Result<CommitId> {
        tx.begin_commit_phase()?;

        let mut publish_started = false;
        let result = self.run_pipeline(&mut tx, &mut publish_started);

        // Stage 9: cleanup, always.
        match &result {
            Ok(commit) => {
                tx.finish_commit();
                debug!(txn = %tx.txn_id(), %commit, "transaction committed");
            }
            Err(err) => {
                if !publish_started {
                    for table in tx.touched_tables().values() {
                        table.source().rollback_transaction_change(table.registry());
                    }
                }
                self.report_conflict(err);
                tx.finish_abort();
                debug!(txn = %tx.txn_id(), %err, "commit aborted");
            }
        }
        drop(locks);
        self.inner.open_txns.lock().remove(&tx.txn_id());
        result
    }

    fn report_conflict(&self, err: &LatticeError) {
        let kind = match err {
            LatticeError::DirtySelect { .. } => ConflictKind::DirtySelect,
            LatticeError::NamespaceConflict { .. } => ConflictKind::Namespace,
            LatticeError::RowConflict { .. } => ConflictKind::Row,
            LatticeError::DroppedModifiedConflict { .. } => ConflictKind::DroppedModified,
            LatticeError::NonCommittedConflict { .. } => ConflictKind::NonCommitted,
            LatticeError::ConstraintViolation { .. } => ConflictKind::Constraint,
            _ => return,
        };
        let (table, row) = match err {
            LatticeError::DirtySelect { table }
            | LatticeError::DroppedModifiedConflict { table }
            | LatticeError::NonCommittedConflict { table } => (Some(table.as_str()), None),
            LatticeError::RowConflict { table, row } => (Some(table.as_str()), Some(*row)),
            LatticeError::ConstraintViolation { row, .. } => (None, Some(*row)),
            _ => (None, None),
        };
        self.observer.read().on_conflict(kind, table, row);
    }

    #[allow(clippy::too_many_lines)]
    fn run_pipeline(&self, tx: &mut Transaction, publish_started: &mut bool) -> Result<CommitId> {
        let _commit_guard = self.inner.commit_mutex.lock();
        let begin = tx.begin_commit_id();
        let since = begin.next();
        let ignore_case = self.config.ignore_identifier_case;
        self.observer.read().on_validation_started(begin);

        // Stage 1: dirty select.
        if self.config.error_on_dirty_select {
            for source in tx.read_sources().values() {
                if !source.find_changes_since_commit(since).is_empty() {
                    return Err(LatticeError::DirtySelect {
                        table: source.table_info().name().to_string(),
                    });
                }
            }
        }

        // Stage 2: namespace conflicts against commits since begin.
        if let Some((name, action)) = self.inner.object_log.lock().namespace_conflict(
            since,
            tx.created_objects(),
            tx.dropped_objects(),
            ignore_case,
        ) {
            return Err(LatticeError::NamespaceConflict {
                name: name.to_string(),
                action,
            });
        }

        // Stage 3: per-table row clashes, and tables dropped under us.
        {
            let log = self.inner.object_log.lock();
            for (id, table) in tx.touched_tables() {
                let source = table.source();
                let info = source.table_info();
                if log.was_dropped_since(since, info.name(), ignore_case) {
                    return Err(LatticeError::NonCommittedConflict {
                        table: info.name().to_string(),
                    });
                }
                for change in source.find_changes_since_commit(since) {
                    if let Some(row) = table.registry().test_commit_clash(&change.registry) {
                        return Err(LatticeError::RowConflict {
                            table: info.name().to_string(),
                            row: RowId::new(*id, row),
                        });
                    }
                }
            }
        }

        // Stage 4: tables this transaction dropped that others modified.
        {
            let sources = self.inner.sources.read();
            for (id, name) in tx.dropped_table_ids() {
                if let Some(source) = sources.get(id) {
                    if !source.find_changes_since_commit(since).is_empty() {
                        return Err(LatticeError::DroppedModifiedConflict {
                            table: name.to_string(),
                        });
                    }
                }
            }
        }

        // Stage 5: synthesize the check-view at the latest commit id.
        let mut check = CheckView {
            by_name: HashMap::new(),
            ignore_case,
        };
        {
            let sources = self.inner.sources.read();
            for (key, id) in self.inner.catalog.read().iter() {
                if tx.dropped_table_ids().contains_key(id) {
                    continue;
                }
                if let Some(source) = sources.get(id) {
                    check
                        .by_name
                        .insert(key.clone(), TableSnapshotView::committed(source));
                }
            }
        }

        let mut prepared = Vec::with_capacity(tx.touched_tables().len());
        for (id, table) in tx.touched_tables() {
            let source = Arc::clone(table.source());
            let registry = Arc::new(table.registry().clone());
            let had_concurrent = !source.find_changes_since_commit(since).is_empty();

            let (visible, indexes) = if had_concurrent {
                // Replay this transaction's journal on top of the current
                // committed state. Row clashes were excluded in stage 3, so
                // every remove still targets a live row.
                let mut visible = source.visible_snapshot();
                let mut index_set = TransactionIndexSet::new(source.committed_indexes());
                for event in registry.events() {
                    let row = event.row();
                    let payload = source.read_row(row).ok_or_else(|| {
                        LatticeError::corruption(format!("missing payload for {row}"))
                    })?;
                    if event.is_add() {
                        visible.insert(row);
                        index_set.insert_row(row, &payload);
                    } else {
                        visible.remove(&row);
                        index_set.remove_row(row, &payload);
                    }
                }
                (visible, index_set.flush())
            } else {
                (table.rows(), table.index_set().flush())
            };

            let mut view = TableSnapshotView::new(Arc::clone(&source), visible, Arc::clone(&indexes));
            if let Some(staged) = tx.pending_schema(*id) {
                view = view.with_info(Arc::new(staged.clone()));
            }
            let name = source.table_info().name().clone();
            check
                .by_name
                .insert(name.lookup_key(ignore_case), view.clone());
            prepared.push(PreparedTable {
                table_id: *id,
                name,
                source,
                added: registry.normalized_added_rows(),
                removed: registry.normalized_removed_rows(),
                registry,
                indexes,
                view,
            });
        }

        // Stage 6: deferred constraint validation against the check-view.
        {
            let compiler_guard = self.compiler.read();
            let checker = ConstraintChecker::new(&check, compiler_guard.as_deref());
            for p in &prepared {
                if tx.constraint_altered_tables().contains(&p.table_id) {
                    checker.check_full_table(&p.view)?;
                }
            }
            for p in &prepared {
                checker.check_add_violations(&p.view, &p.added, Deferrability::InitiallyDeferred)?;
                checker.check_remove_violations(
                    &p.view,
                    &p.removed,
                    Deferrability::InitiallyDeferred,
                )?;
            }
        }

        // Stage 7: assemble post-commit events; delivered after publish.
        let new_commit = self.current_commit_id().next();
        let mut events: Vec<Event> = Vec::new();
        for p in &prepared {
            if p.registry.is_empty() {
                continue;
            }
            events.push(Event::TableModified(TableModifiedEvent {
                table: p.name.clone(),
                table_id: p.table_id,
                commit: new_commit,
                added: p.added.clone(),
                removed: p.removed.clone(),
            }));
        }
        for (name, kind) in tx.created_objects() {
            events.push(Event::ObjectCreated(ObjectLifecycleEvent {
                name: name.clone(),
                kind: *kind,
                commit: new_commit,
            }));
        }
        for (name, kind) in tx.dropped_objects() {
            events.push(Event::ObjectDropped(ObjectLifecycleEvent {
                name: name.clone(),
                kind: *kind,
                commit: new_commit,
            }));
        }
        events.extend(tx.take_pending_events());

        // Stage 8: publish. Not cancellable from here on.
        *publish_started = true;

        for p in &prepared {
            p.source.commit_transaction_change(
                new_commit,
                Arc::clone(&p.registry),
                Arc::clone(&p.indexes),
            );
            if let Some(staged) = tx.pending_schema(p.table_id) {
                p.source.set_table_info(staged.clone())?;
            }
        }

        let created_tables: Vec<&PreparedTable> = prepared
            .iter()
            .filter(|p| {
                tx.created_objects()
                    .iter()
                    .any(|(n, k)| *k == ObjectKind::Table && n.matches(&p.name, ignore_case))
            })
            .collect();
        let dropped_entries: Vec<(TableId, String)> = {
            let sources = self.inner.sources.read();
            tx.dropped_table_ids()
                .keys()
                .filter_map(|id| sources.get(id).map(|s| (*id, s.source_name().to_owned())))
                .collect()
        };

        {
            let mut sources = self.inner.sources.write();
            let mut catalog = self.inner.catalog.write();
            for p in &created_tables {
                sources.insert(p.table_id, Arc::clone(&p.source));
                catalog.insert(p.name.lookup_key(ignore_case), p.table_id);
            }
            for name in tx.dropped_table_ids().values() {
                catalog.remove(&name.lookup_key(ignore_case));
            }
        }

        {
            let payloads = tx.take_object_payloads();
            let mut objects = self.inner.objects.write();
            objects.extend(payloads);
            for (name, kind) in tx.dropped_objects() {
                if *kind != ObjectKind::Table {
                    objects.remove(&(*kind, name.lookup_key(ignore_case)));
                }
            }
        }

        let has_table_ddl = !created_tables.is_empty() || !dropped_entries.is_empty();
        if has_table_ddl {
            let mut state = self.inner.state.lock();
            for p in &created_tables {
                state.add_visible(TableState::new(p.table_id, p.source.source_name().to_owned()));
            }
            for (_, source_name) in &dropped_entries {
                let entry = state.remove_visible(source_name)?;
                state.add_delete(entry);
            }
        }

        if !tx.created_objects().is_empty() || !tx.dropped_objects().is_empty() {
            self.inner.object_log.lock().append(ObjectCommitState {
                commit: new_commit,
                created: tx.created_objects().to_vec(),
                dropped: tx.dropped_objects().to_vec(),
            });
        }

        self.inner
            .clock
            .store(new_commit.get(), std::sync::atomic::Ordering::Release);

        if self.config.auto_flush_state {
            let changed: Vec<TableId> = prepared
                .iter()
                .map(|p| p.table_id)
                .filter(|id| !tx.dropped_table_ids().contains_key(id))
                .collect();
            // Snapshots and directory first, list flush second: a crash in
            // between leaves an orphan snapshot, never a listed table with no
            // snapshot.
            self.persist_source_snapshots(&changed)?;
            if let Err(err) = self.inner.state.lock().flush() {
                warn!(%err, "state flush failed after publish");
                return Err(err);
            }
        }

        self.observer.read().on_publish(new_commit, prepared.len());
        for event in events {
            self.events.publish(event);
        }
        Ok(new_commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_store::MemoryStore;
    use lattice_types::{
        ColumnInfo, Constraint, ConstraintBody, ForeignKeyAction, SqlType, TableInfo, Value,
    };

    use crate::config::DatabaseConfig;

    fn engine() -> Engine {
        Engine::create(Arc::new(MemoryStore::new()), DatabaseConfig::default()).unwrap()
    }

    fn person_info() -> TableInfo {
        TableInfo::new(
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
        )])
    }

    fn setup_person(engine: &Engine) {
        let mut tx = engine.begin();
        engine.create_table(&mut tx, person_info()).unwrap();
        engine.commit(tx, Vec::new()).unwrap();
    }

    fn insert(tx: &mut Transaction, id: i64, name: &str) -> RowNumber {
        tx.get_mutable_table(&ObjectName::new("app", "person"))
            .unwrap()
            .add_row(vec![Value::Integer(id), Value::text(name)])
            .unwrap()
    }

    #[test]
    fn test_concurrent_inserts_both_commit() {
        let engine = engine();
        setup_person(&engine);

        let mut t1 = engine.begin();
        let mut t2 = engine.begin();
        insert(&mut t1, 1, "a");
        insert(&mut t2, 2, "b");

        let c1 = engine.commit(t1, Vec::new()).unwrap();
        let c2 = engine.commit(t2, Vec::new()).unwrap();
        assert_eq!(c2, c1.next());

        let mut reader = engine.begin();
        let view = reader.get_table(&ObjectName::new("app", "person")).unwrap();
        assert_eq!(view.row_count(), 2);
    }

    #[test]
    fn test_update_clash_second_committer_loses() {
        let engine = engine();
        setup_person(&engine);

        // Seed one row.
        let mut seed = engine.begin();
        let row = insert(&mut seed, 1, "a");
        engine.commit(seed, Vec::new()).unwrap();

        let name = ObjectName::new("app", "person");
        let mut t1 = engine.begin();
        let mut t2 = engine.begin();
        t1.get_mutable_table(&name)
            .unwrap()
            .update_row(row, vec![Value::Integer(1), Value::text("x")])
            .unwrap();
        t2.get_mutable_table(&name)
            .unwrap()
            .update_row(row, vec![Value::Integer(1), Value::text("y")])
            .unwrap();

        engine.commit(t1, Vec::new()).unwrap();
        let err = engine.commit(t2, Vec::new()).unwrap_err();
        match err {
            LatticeError::RowConflict { row: rid, .. } => assert_eq!(rid.row, row),
            other => panic!("expected row conflict, got {other}"),
        }
    }

    #[test]
    fn test_dirty_select_rejected() {
        let engine = engine();
        setup_person(&engine);

        let name = ObjectName::new("app", "person");
        let mut reader = engine.begin();
        reader.get_table(&name).unwrap();

        let mut writer = engine.begin();
        insert(&mut writer, 1, "a");
        engine.commit(writer, Vec::new()).unwrap();

        // Even a write-free commit is rejected: the read set went stale.
        let err = engine.commit(reader, Vec::new()).unwrap_err();
        assert!(matches!(err, LatticeError::DirtySelect { .. }));
    }

    #[test]
    fn test_ddl_namespace_clash() {
        let engine = engine();

        let mut t1 = engine.begin();
        let mut t2 = engine.begin();
        engine.create_table(&mut t1, person_info()).unwrap();
        engine.create_table(&mut t2, person_info()).unwrap();

        engine.commit(t1, Vec::new()).unwrap();
        let err = engine.commit(t2, Vec::new()).unwrap_err();
        assert!(matches!(err, LatticeError::NamespaceConflict { .. }));
    }

    #[test]
    fn test_deferred_fk_fails_at_commit_not_statement() {
        let engine = engine();

        let dept = TableInfo::new(
            ObjectName::new("app", "dept"),
            vec![ColumnInfo::new("id", SqlType::Integer).not_null()],
        )
        .with_constraints(vec![Constraint::new(
            "dept_pk",
            ConstraintBody::PrimaryKey {
                columns: vec!["id".into()],
            },
        )]);
        let child = TableInfo::new(
            ObjectName::new("app", "emp"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("dept_id", SqlType::Integer),
            ],
        )
        .with_constraints(vec![Constraint::new(
            "emp_dept_fk",
            ConstraintBody::ForeignKey {
                columns: vec!["dept_id".into()],
                ref_table: ObjectName::new("app", "dept"),
                ref_columns: vec!["id".into()],
                on_delete: ForeignKeyAction::NoAction,
            },
        )
        .deferred()]);

        let mut ddl = engine.begin();
        engine.create_table(&mut ddl, dept).unwrap();
        engine.create_table(&mut ddl, child).unwrap();
        engine.commit(ddl, Vec::new()).unwrap();

        let mut tx = engine.begin();
        let orphan = tx
            .get_mutable_table(&ObjectName::new("app", "emp"))
            .unwrap()
            .add_row(vec![Value::Integer(1), Value::Integer(5)])
            .unwrap();

        // Statement-level (immediate) check passes: the FK is deferred.
        tx.check_add_constraint_violations(
            None,
            &ObjectName::new("app", "emp"),
            &[orphan],
            Deferrability::InitiallyImmediate,
        )
        .unwrap();

        // Commit runs the deferred pass; parent 5 does not exist.
        let err = engine.commit(tx, Vec::new()).unwrap_err();
        match err {
            LatticeError::ConstraintViolation { kind, .. } => {
                assert_eq!(kind, lattice_types::ConstraintKind::ForeignKey);
            }
            other => panic!("expected FK violation, got {other}"),
        }
    }

    #[test]
    fn test_rollback_leaves_no_trace() {
        let engine = engine();
        setup_person(&engine);
        let before = engine.current_commit_id();

        let mut tx = engine.begin();
        insert(&mut tx, 1, "ghost");
        engine.rollback(tx).unwrap();

        assert_eq!(engine.current_commit_id(), before);
        let mut reader = engine.begin();
        let view = reader.get_table(&ObjectName::new("app", "person")).unwrap();
        assert_eq!(view.row_count(), 0);
        let sources = engine.inner.sources.read();
        let source = sources.values().next().unwrap();
        assert!(source.find_changes_since_commit(CommitId::ZERO).len() <= 1);
    }

    #[test]
    fn test_drop_table_then_concurrent_write_conflicts() {
        let engine = engine();
        setup_person(&engine);

        let name = ObjectName::new("app", "person");
        let mut dropper = engine.begin();
        let mut writer = engine.begin();

        engine.drop_table(&mut dropper, &name).unwrap();
        insert(&mut writer, 1, "a");
        engine.commit(writer, Vec::new()).unwrap();

        let err = engine.commit(dropper, Vec::new()).unwrap_err();
        assert!(matches!(err, LatticeError::DroppedModifiedConflict { .. }));
    }

    #[test]
    fn test_write_to_concurrently_dropped_table_conflicts() {
        let engine = engine();
        setup_person(&engine);

        let name = ObjectName::new("app", "person");
        let mut writer = engine.begin();
        let mut dropper = engine.begin();

        insert(&mut writer, 1, "a");
        engine.drop_table(&mut dropper, &name).unwrap();
        engine.commit(dropper, Vec::new()).unwrap();

        let err = engine.commit(writer, Vec::new()).unwrap_err();
        assert!(matches!(err, LatticeError::NonCommittedConflict { .. }));
    }

    #[test]
    fn test_snapshot_isolation_for_readers() {
        let engine = engine();
        setup_person(&engine);

        let mut early = engine.begin();

        let mut writer = engine.begin();
        insert(&mut writer, 1, "new");
        engine.commit(writer, Vec::new()).unwrap();

        // A reader that began before the commit sees the old state...
        let view = early.get_table(&ObjectName::new("app", "person")).unwrap();
        assert_eq!(view.row_count(), 0);
        engine.rollback(early).unwrap();

        // ...and one begun after sees the new row.
        let mut late = engine.begin();
        let view = late.get_table(&ObjectName::new("app", "person")).unwrap();
        assert_eq!(view.row_count(), 1);
    }

    #[test]
    fn test_constraint_alter_revalidates_whole_table() {
        let engine = engine();

        // person without any declared constraints.
        let bare = TableInfo::new(
            ObjectName::new("app", "person"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null(),
                ColumnInfo::new("name", SqlType::Text),
            ],
        );
        let mut ddl = engine.begin();
        engine.create_table(&mut ddl, bare).unwrap();
        engine.commit(ddl, Vec::new()).unwrap();

        // Two rows with the same id commit fine without a key.
        let mut tx = engine.begin();
        insert(&mut tx, 1, "a");
        insert(&mut tx, 1, "b");
        engine.commit(tx, Vec::new()).unwrap();

        // Adding a primary key over duplicate data fails at commit and
        // leaves the schema untouched.
        let pk = || {
            vec![Constraint::new(
                "person_pk",
                ConstraintBody::PrimaryKey {
                    columns: vec!["id".into()],
                },
            )]
        };
        let name = ObjectName::new("app", "person");
        let mut alter = engine.begin();
        alter.alter_constraints(&name, pk()).unwrap();
        let err = engine.commit(alter, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::ConstraintViolation {
                kind: lattice_types::ConstraintKind::PrimaryKey,
                ..
            }
        ));

        // Clean up the duplicate, then the alter goes through.
        let mut fix = engine.begin();
        let dup = {
            let table = fix.get_mutable_table(&name).unwrap();
            let rows: Vec<_> = table.rows().into_iter().collect();
            rows[1]
        };
        fix.get_mutable_table(&name).unwrap().remove_row(dup).unwrap();
        engine.commit(fix, Vec::new()).unwrap();

        let mut alter = engine.begin();
        alter.alter_constraints(&name, pk()).unwrap();
        engine.commit(alter, Vec::new()).unwrap();

        // The key is live now: a duplicate insert fails commit validation.
        let mut tx = engine.begin();
        let row = insert(&mut tx, 1, "again");
        tx.check_add_constraint_violations(
            None,
            &name,
            &[row],
            Deferrability::InitiallyImmediate,
        )
        .unwrap_err();
        engine.rollback(tx).unwrap();
    }

    #[test]
    fn test_update_merges_with_unrelated_concurrent_insert() {
        // Registry replay path: a concurrent commit touched the table, but a
        // different row, so the merge view replays instead of reusing the
        // transaction's index set.
        let engine = engine();
        setup_person(&engine);

        let mut seed = engine.begin();
        let target = insert(&mut seed, 1, "a");
        engine.commit(seed, Vec::new()).unwrap();

        let name = ObjectName::new("app", "person");
        let mut updater = engine.begin();
        updater
            .get_mutable_table(&name)
            .unwrap()
            .update_row(target, vec![Value::Integer(1), Value::text("a2")])
            .unwrap();

        let mut inserter = engine.begin();
        insert(&mut inserter, 2, "b");
        engine.commit(inserter, Vec::new()).unwrap();

        engine.commit(updater, Vec::new()).unwrap();

        let mut reader = engine.begin();
        let view = reader.get_table(&name).unwrap();
        assert_eq!(view.row_count(), 2);
        let key = lattice_types::IndexKey::from_values(&[&Value::Integer(1)]);
        let hits = view.rows_with_key(&["id".into()], &key).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(view.read_row(hits[0]).unwrap()[1], Value::text("a2"));
    }
}
