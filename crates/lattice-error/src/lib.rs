//! Primary error type for LatticeDB operations.
//!
//! One structured enum covers the whole engine: commit conflicts (retryable),
//! constraint violations, storage failures, and API misuse. The numeric
//! [`ErrorCode`] mapping is what the wire layer puts on the wire.

use lattice_types::{ConstraintKind, DivisionByZero, ObjectKind, RowId, RowShapeError};
use thiserror::Error;

/// Primary error type for LatticeDB operations.
#[derive(Error, Debug)]
pub enum LatticeError {
    // === Commit conflicts (retryable) ===
    /// A table in the read set was modified and committed after this
    /// transaction began.
    #[error("dirty select on table {table}: committed changes since begin")]
    DirtySelect { table: String },

    /// Another transaction committed a create/drop of the same object name.
    #[error("object {name} was concurrently {action} by another transaction")]
    NamespaceConflict { name: String, action: ConflictAction },

    /// Two transactions touched the same physical row with at least one
    /// remove/update side.
    #[error("row conflict on table {table}: row {row} changed by a concurrent commit")]
    RowConflict { table: String, row: RowId },

    /// This transaction dropped a table that a concurrent commit modified.
    #[error("table {table} was dropped here but modified by a concurrent commit")]
    DroppedModifiedConflict { table: String },

    /// This transaction modified a table that a concurrent commit dropped.
    #[error("table {table} was dropped by a concurrent commit")]
    NonCommittedConflict { table: String },

    // === Constraint violations ===
    /// A PK/UNIQUE/FK/CHECK/NOT NULL constraint failed.
    #[error("{kind} constraint {constraint} violated at {row}{detail}")]
    ConstraintViolation {
        constraint: String,
        kind: ConstraintKind,
        row: RowId,
        /// Extra context such as the declared referential action.
        detail: String,
    },

    /// Division by zero during expression evaluation.
    #[error("division by zero")]
    DivisionByZero,

    /// A row does not fit its table's declared shape.
    #[error(transparent)]
    RowShape(#[from] RowShapeError),

    // === Storage ===
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes than expected from the backing store.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// The store image is unusable: bad magic, bad version, torn directory.
    #[error("store is corrupt: {detail}")]
    Corruption { detail: String },

    // === Programmer errors ===
    /// Named object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    /// Store area id does not exist.
    #[error("store area {area} not found")]
    AreaNotFound { area: u64 },

    /// Column name does not exist in the table.
    #[error("no such column: {name}")]
    UnknownColumn { name: String },

    /// Object already exists in this transaction's view.
    #[error("{kind} {name} already exists")]
    DuplicateObject { kind: ObjectKind, name: String },

    /// The privilege callback rejected the operation.
    #[error("user {user} lacks {privilege} on {object}")]
    PrivilegeDenied {
        user: String,
        object: String,
        privilege: String,
    },

    /// Mutation attempted through a read-only transaction or view.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Operation not legal in the transaction's current state.
    #[error("invalid transaction state: expected {expected}, was {actual}")]
    InvalidTxnState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Internal logic error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Which side of a namespace conflict collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictAction {
    Created,
    Dropped,
}

impl std::fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Dropped => f.write_str("dropped"),
        }
    }
}

/// Wire-layer error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Read set invalidated by a concurrent commit.
    DirtySelect = 1,
    /// Concurrent create/drop of the same object name.
    NamespaceConflict = 2,
    /// Concurrent change to the same physical row.
    RowConflict = 3,
    /// Drop raced with modification.
    DroppedModifiedConflict = 4,
    /// Declared constraint failed.
    ConstraintViolation = 5,
    /// Object not found.
    NotFound = 6,
    /// Privilege check failed.
    PrivilegeDenied = 7,
    /// Paged store I/O failure.
    StoreIo = 8,
    /// Unrecoverable store corruption.
    Corruption = 9,
    /// Library used incorrectly.
    Misuse = 10,
}

impl LatticeError {
    /// Map this error to its wire code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::DirtySelect { .. } => ErrorCode::DirtySelect,
            Self::NamespaceConflict { .. } | Self::DuplicateObject { .. } => {
                ErrorCode::NamespaceConflict
            }
            Self::RowConflict { .. } => ErrorCode::RowConflict,
            Self::DroppedModifiedConflict { .. } | Self::NonCommittedConflict { .. } => {
                ErrorCode::DroppedModifiedConflict
            }
            Self::ConstraintViolation { .. } | Self::DivisionByZero | Self::RowShape(_) => {
                ErrorCode::ConstraintViolation
            }
            Self::Io(_) | Self::ShortRead { .. } => ErrorCode::StoreIo,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::NotFound { .. } | Self::AreaNotFound { .. } | Self::UnknownColumn { .. } => {
                ErrorCode::NotFound
            }
            Self::PrivilegeDenied { .. } => ErrorCode::PrivilegeDenied,
            Self::ReadOnly | Self::InvalidTxnState { .. } | Self::Internal(_) => ErrorCode::Misuse,
        }
    }

    /// Whether the caller may retry the whole transaction and expect to
    /// succeed. True exactly for the commit-conflict family.
    #[must_use]
    pub const fn is_commit_conflict(&self) -> bool {
        matches!(
            self,
            Self::DirtySelect { .. }
                | Self::NamespaceConflict { .. }
                | Self::RowConflict { .. }
                | Self::DroppedModifiedConflict { .. }
                | Self::NonCommittedConflict { .. }
        )
    }

    /// Whether this error marks the database image unusable.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a corruption error.
    pub fn corruption(detail: impl Into<String>) -> Self {
        Self::Corruption {
            detail: detail.into(),
        }
    }

    /// Constraint violation with no extra detail.
    pub fn constraint(
        constraint: impl Into<String>,
        kind: ConstraintKind,
        row: RowId,
    ) -> Self {
        Self::ConstraintViolation {
            constraint: constraint.into(),
            kind,
            row,
            detail: String::new(),
        }
    }
}

impl From<DivisionByZero> for LatticeError {
    fn from(_: DivisionByZero) -> Self {
        Self::DivisionByZero
    }
}

/// Result type alias using [`LatticeError`].
pub type Result<T> = std::result::Result<T, LatticeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{RowNumber, TableId};

    fn rid() -> RowId {
        RowId::new(TableId::new(4), RowNumber::new(2))
    }

    #[test]
    fn conflict_family_is_retryable() {
        assert!(LatticeError::DirtySelect {
            table: "t".into()
        }
        .is_commit_conflict());
        assert!(LatticeError::RowConflict {
            table: "t".into(),
            row: rid()
        }
        .is_commit_conflict());
        assert!(!LatticeError::constraint("pk", ConstraintKind::PrimaryKey, rid())
            .is_commit_conflict());
        assert!(!LatticeError::corruption("bad magic").is_commit_conflict());
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(
            LatticeError::DirtySelect { table: "t".into() }.error_code(),
            ErrorCode::DirtySelect
        );
        assert_eq!(
            LatticeError::constraint("u", ConstraintKind::Unique, rid()).error_code(),
            ErrorCode::ConstraintViolation
        );
        assert_eq!(
            LatticeError::NonCommittedConflict { table: "t".into() }.error_code(),
            ErrorCode::DroppedModifiedConflict
        );
        assert_eq!(LatticeError::ReadOnly.error_code(), ErrorCode::Misuse);
        assert_eq!(LatticeError::corruption("x").error_code(), ErrorCode::Corruption);
        assert_eq!(ErrorCode::Corruption as i32, 9);
    }

    #[test]
    fn display_names_the_offender() {
        let err = LatticeError::RowConflict {
            table: "app.person".into(),
            row: rid(),
        };
        assert_eq!(
            err.to_string(),
            "row conflict on table app.person: row tbl#4:row#2 changed by a concurrent commit"
        );
    }

    #[test]
    fn constraint_violation_carries_kind_and_row() {
        let err = LatticeError::constraint("person_pk", ConstraintKind::PrimaryKey, rid());
        assert!(err.to_string().contains("PRIMARY KEY"));
        assert!(err.to_string().contains("person_pk"));
        assert!(err.to_string().contains("tbl#4:row#2"));
    }

    #[test]
    fn io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: LatticeError = io.into();
        assert_eq!(err.error_code(), ErrorCode::StoreIo);
    }

    #[test]
    fn division_by_zero_converts() {
        let err: LatticeError = DivisionByZero.into();
        assert_eq!(err.error_code(), ErrorCode::ConstraintViolation);
    }
}
