//! The session surface: one user, at most one open transaction.
//!
//! Statement helpers (`insert_row`, `update_row`, `delete_row`) acquire the
//! table locks for the statement's duration, run the immediate constraint
//! pass afterwards, and leave deferred constraints to commit. A statement
//! that fails its constraint check leaves the transaction poisoned the way
//! SQL engines do: the caller is expected to roll back.
//!
//! Locks explicitly taken with [`Session::lock_tables`] are owned by the
//! session and force-released at transaction end even if the caller forgot.

use std::sync::Arc;

use lattice_error::{LatticeError, Result};
use lattice_txn::{
    Engine, EvalContext, Event, LockHandle, QueryPlanNode, TableSnapshotView, Transaction,
};
use lattice_types::{
    CommitId, Deferrability, ObjectKind, ObjectName, PlanSource, RowNumber, TableId, TableInfo,
    Value,
};
use tracing::debug;

use crate::privilege::{Privilege, PrivilegeQuery};

/// One user's connection to the database.
pub struct Session {
    engine: Arc<Engine>,
    privileges: Arc<dyn PrivilegeQuery>,
    user: String,
    tx: Option<Transaction>,
    /// Explicitly held statement locks, force-released at transaction end.
    locks: Vec<LockHandle>,
}

impl Session {
    pub(crate) fn new(
        engine: Arc<Engine>,
        privileges: Arc<dyn PrivilegeQuery>,
        user: String,
    ) -> Self {
        Self {
            engine,
            privileges,
            user,
            tx: None,
            locks: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Begin a serializable transaction. One at a time per session.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(LatticeError::InvalidTxnState {
                expected: "no open transaction",
                actual: "Open",
            });
        }
        self.tx = Some(self.engine.begin());
        Ok(())
    }

    fn tx_mut(&mut self) -> Result<&mut Transaction> {
        self.tx.as_mut().ok_or(LatticeError::InvalidTxnState {
            expected: "Open",
            actual: "no transaction",
        })
    }

    /// Direct access to the open transaction, for executor integration.
    pub fn transaction_mut(&mut self) -> Result<&mut Transaction> {
        self.tx_mut()
    }

    /// Commit the open transaction; session locks release with it.
    pub fn commit(&mut self) -> Result<CommitId> {
        let tx = self.tx.take().ok_or(LatticeError::InvalidTxnState {
            expected: "Open",
            actual: "no transaction",
        })?;
        let locks = std::mem::take(&mut self.locks);
        self.engine.commit(tx, locks)
    }

    /// Roll back the open transaction; session locks release with it.
    pub fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(LatticeError::InvalidTxnState {
            expected: "Open",
            actual: "no transaction",
        })?;
        self.locks.clear();
        self.engine.rollback(tx)
    }

    // -- reads -------------------------------------------------------------

    /// Read-only view of a table; takes a shared lock for the statement.
    pub fn get_table(&mut self, name: &ObjectName) -> Result<TableSnapshotView> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Select)?;
        let txn_id = self.tx_mut()?.txn_id();
        let view = self.tx_mut()?.get_table(name)?;
        let _statement_lock = self
            .engine
            .locks()
            .lock(txn_id, &[], &[view.table_id()]);
        Ok(view)
    }

    // -- DML statements ----------------------------------------------------

    /// Insert one row; runs the immediate constraint pass.
    pub fn insert_row(&mut self, name: &ObjectName, values: Vec<Value>) -> Result<RowNumber> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Insert)?;
        let (txn_id, table_id, row) = {
            let tx = self.tx_mut()?;
            let table = tx.get_mutable_table(name)?;
            let table_id = table.source().table_id();
            let row = table.add_row(values)?;
            (tx.txn_id(), table_id, row)
        };
        let _statement_lock = self.engine.locks().lock(txn_id, &[table_id], &[]);
        self.immediate_add_check(name, &[row])?;
        Ok(row)
    }

    /// Update one row; runs the immediate constraint pass on the new image.
    pub fn update_row(
        &mut self,
        name: &ObjectName,
        row: RowNumber,
        values: Vec<Value>,
    ) -> Result<RowNumber> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Update)?;
        let (txn_id, table_id, old, new) = {
            let tx = self.tx_mut()?;
            let table = tx.get_mutable_table(name)?;
            let table_id = table.source().table_id();
            let new = table.update_row(row, values)?;
            (tx.txn_id(), table_id, row, new)
        };
        let _statement_lock = self.engine.locks().lock(txn_id, &[table_id], &[]);
        self.immediate_add_check(name, &[new])?;
        self.immediate_remove_check(name, &[old])?;
        Ok(new)
    }

    /// Delete one row; runs the immediate referential pass.
    pub fn delete_row(&mut self, name: &ObjectName, row: RowNumber) -> Result<()> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Delete)?;
        let (txn_id, table_id) = {
            let tx = self.tx_mut()?;
            let table = tx.get_mutable_table(name)?;
            let table_id = table.source().table_id();
            table.remove_row(row)?;
            (tx.txn_id(), table_id)
        };
        let _statement_lock = self.engine.locks().lock(txn_id, &[table_id], &[]);
        self.immediate_remove_check(name, &[row])?;
        Ok(())
    }

    fn immediate_add_check(&mut self, name: &ObjectName, rows: &[RowNumber]) -> Result<()> {
        let compiler = self.engine.predicate_compiler();
        self.tx_mut()?.check_add_constraint_violations(
            compiler.as_deref(),
            name,
            rows,
            Deferrability::InitiallyImmediate,
        )
    }

    fn immediate_remove_check(&mut self, name: &ObjectName, rows: &[RowNumber]) -> Result<()> {
        let compiler = self.engine.predicate_compiler();
        self.tx_mut()?.check_remove_constraint_violations(
            compiler.as_deref(),
            name,
            rows,
            Deferrability::InitiallyImmediate,
        )
    }

    // -- locks -------------------------------------------------------------

    /// Explicitly lock tables for a multi-statement operation. The lock is
    /// owned by the session and released at transaction end.
    pub fn lock_tables(&mut self, write: &[TableId], read: &[TableId]) -> Result<()> {
        let txn_id = self.tx_mut()?.txn_id();
        let handle = self.engine.locks().lock(txn_id, write, read);
        self.locks.push(handle);
        Ok(())
    }

    // -- DDL ---------------------------------------------------------------

    /// Create a table.
    pub fn create_table(&mut self, info: TableInfo) -> Result<TableId> {
        let name = info.name().clone();
        self.check_privilege(ObjectKind::Table, &name, Privilege::Create)?;
        let engine = Arc::clone(&self.engine);
        let tx = self.tx_mut()?;
        let id = engine.create_table(tx, info)?;
        debug!(user = %self.user, %name, %id, "table created");
        Ok(id)
    }

    /// Drop a table.
    pub fn drop_table(&mut self, name: &ObjectName) -> Result<()> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Drop)?;
        let engine = Arc::clone(&self.engine);
        let tx = self.tx_mut()?;
        engine.drop_table(tx, name)?;
        Ok(())
    }

    /// Replace a table's constraint set. The whole table is revalidated
    /// against the new constraints when the transaction commits.
    pub fn alter_table_constraints(
        &mut self,
        name: &ObjectName,
        constraints: Vec<lattice_types::Constraint>,
    ) -> Result<()> {
        self.check_privilege(ObjectKind::Table, name, Privilege::Alter)?;
        self.tx_mut()?.alter_constraints(name, constraints)
    }

    /// Create a view. The definition is stored opaquely; compilation is the
    /// planner's job.
    pub fn create_view(&mut self, name: ObjectName, definition: PlanSource) -> Result<()> {
        self.create_object(name, ObjectKind::View, definition)
    }

    /// Create a view after materializing its compiled plan once to prove the
    /// definition is evaluable. The planner supplies `plan`.
    pub fn create_view_validated(
        &mut self,
        name: ObjectName,
        definition: PlanSource,
        plan: &dyn QueryPlanNode,
    ) -> Result<()> {
        plan.evaluate(&EvalContext::new())?;
        self.create_view(name, definition)
    }

    pub fn drop_view(&mut self, name: &ObjectName) -> Result<()> {
        self.drop_object(name, ObjectKind::View)
    }

    /// Create a sequence.
    pub fn create_sequence(&mut self, name: ObjectName) -> Result<()> {
        self.create_object(name, ObjectKind::Sequence, PlanSource::new(""))
    }

    pub fn drop_sequence(&mut self, name: &ObjectName) -> Result<()> {
        self.drop_object(name, ObjectKind::Sequence)
    }

    /// Create a trigger. The body is stored opaquely; firing is driven by
    /// the post-commit event dispatcher.
    pub fn create_trigger(&mut self, name: ObjectName, body: PlanSource) -> Result<()> {
        self.create_object(name, ObjectKind::Trigger, body)
    }

    pub fn drop_trigger(&mut self, name: &ObjectName) -> Result<()> {
        self.drop_object(name, ObjectKind::Trigger)
    }

    fn create_object(
        &mut self,
        name: ObjectName,
        kind: ObjectKind,
        payload: PlanSource,
    ) -> Result<()> {
        self.check_privilege(kind, &name, Privilege::Create)?;
        let engine = Arc::clone(&self.engine);
        let tx = self.tx_mut()?;
        engine.create_object(tx, name, kind, payload)
    }

    fn drop_object(&mut self, name: &ObjectName, kind: ObjectKind) -> Result<()> {
        self.check_privilege(kind, name, Privilege::Drop)?;
        let engine = Arc::clone(&self.engine);
        let tx = self.tx_mut()?;
        engine.drop_object(tx, name.clone(), kind)
    }

    // -- events ------------------------------------------------------------

    /// Queue an event for delivery after successful commit.
    pub fn raise_event(&mut self, event: Event) -> Result<()> {
        self.tx_mut()?.raise_event(event)
    }

    fn check_privilege(
        &self,
        kind: ObjectKind,
        object: &ObjectName,
        privilege: Privilege,
    ) -> Result<()> {
        if self
            .privileges
            .user_has_privilege(&self.user, kind, object, privilege)
        {
            Ok(())
        } else {
            Err(LatticeError::PrivilegeDenied {
                user: self.user.clone(),
                object: object.to_string(),
                privilege: privilege.to_string(),
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.locks.clear();
            if let Err(err) = self.engine.rollback(tx) {
                debug!(%err, "implicit rollback on session drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
