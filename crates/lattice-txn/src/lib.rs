//! The transactional core of LatticeDB.
//!
//! Dependency order, leaf first: change registries and index sets, the table
//! state store over the paged store, table sources with their mutable
//! per-transaction views, the lock manager, transactions, the constraint
//! checker, and on top of everything the engine with its commit pipeline.

pub mod commit;
pub mod config;
pub mod constraint;
pub mod engine;
pub mod events;
pub mod index_set;
pub mod lock_manager;
pub mod mutable_table;
pub mod object_log;
pub mod plan;
pub mod registry;
pub mod state_store;
pub mod table_source;
pub mod transaction;

pub use config::DatabaseConfig;
pub use constraint::{ConstraintChecker, TableResolver};
pub use engine::Engine;
pub use events::{
    CustomEvent, Event, EventDispatcher, ObjectLifecycleEvent, TableModifiedEvent,
};
pub use index_set::{Index, IndexDef, IndexSetSnapshot, TransactionIndexSet};
pub use lock_manager::{LockHandle, LockManager, LockMode};
pub use mutable_table::MutableTable;
pub use object_log::{ObjectCommitLog, ObjectCommitState};
pub use plan::{
    EvalContext, FnCompiler, FnPredicate, MaterializedRows, PredicateCompiler, QueryPlanNode,
    RowPredicate,
};
pub use registry::{TableEvent, TableEventRegistry};
pub use state_store::{TableState, TableStateStore};
pub use table_source::{CommittedChange, TableSnapshotView, TableSource};
pub use transaction::{Transaction, TxnState};
