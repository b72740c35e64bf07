//! LatticeDB: an embeddable relational storage core.
//!
//! Serializable optimistic transactions over per-table change journals,
//! copy-on-write index snapshots, and a paged on-disk store. The SQL
//! front-end (lexer, parser, planner) and the wire protocol live outside
//! this workspace; they drive the [`Session`] surface and hand the core
//! evaluable plan objects through the interfaces in [`lattice_txn::plan`].
//!
//! ```no_run
//! use lattice::{Database, DatabaseConfig};
//! use lattice_types::{ColumnInfo, ObjectName, SqlType, TableInfo, Value};
//!
//! # fn main() -> lattice_error::Result<()> {
//! let db = Database::create_in_memory(DatabaseConfig::default())?;
//! let mut session = db.session("admin");
//!
//! session.begin_transaction()?;
//! session.create_table(TableInfo::new(
//!     ObjectName::new("app", "person"),
//!     vec![
//!         ColumnInfo::new("id", SqlType::Integer).not_null(),
//!         ColumnInfo::new("name", SqlType::Text),
//!     ],
//! ))?;
//! session.commit()?;
//!
//! session.begin_transaction()?;
//! session.insert_row(
//!     &ObjectName::new("app", "person"),
//!     vec![Value::Integer(1), Value::text("ada")],
//! )?;
//! session.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod privilege;
pub mod session;

pub use database::Database;
pub use privilege::{AllowAll, FnPrivileges, Privilege, PrivilegeQuery};
pub use session::Session;

pub use lattice_error::{ErrorCode, LatticeError, Result};
pub use lattice_txn::{
    DatabaseConfig, EvalContext, Event, EventDispatcher, MaterializedRows, PredicateCompiler,
    QueryPlanNode, RowPredicate, TableSnapshotView,
};
