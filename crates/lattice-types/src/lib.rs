//! Core cross-cutting types for LatticeDB.
//!
//! This crate holds the identifier newtypes, the SQL value model, the
//! order-preserving index key form, and the immutable schema metadata shared
//! by every other crate in the workspace. It has no engine logic and no I/O.

pub mod encoding;
pub mod ids;
pub mod key;
pub mod object_name;
pub mod table_info;
pub mod value;

pub use ids::{CommitId, RowId, RowNumber, TableId, TxnId};
pub use key::{IndexKey, KeyPart};
pub use object_name::{ObjectKind, ObjectName};
pub use table_info::{
    ColumnInfo, Constraint, ConstraintBody, ConstraintKind, Deferrability, ForeignKeyAction,
    RowShapeError, TableInfo,
};
pub use value::{
    Collation, CollationDecomposition, CollationStrength, DivisionByZero, Interval, LobRef,
    Numeric, PlanSource, SqlType, Value,
};
