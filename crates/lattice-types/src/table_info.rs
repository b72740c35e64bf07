//! Schema metadata: columns, constraints, and the immutable `TableInfo`.

use std::fmt;

use crate::object_name::ObjectName;
use crate::value::{PlanSource, SqlType, Value};

/// Referential action declared on a foreign key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAction => f.write_str("NO ACTION"),
            Self::Cascade => f.write_str("CASCADE"),
            Self::SetNull => f.write_str("SET NULL"),
            Self::SetDefault => f.write_str("SET DEFAULT"),
        }
    }
}

/// When a constraint is enforced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub enum Deferrability {
    /// Checked after each statement.
    #[default]
    InitiallyImmediate,
    /// Checked at commit.
    InitiallyDeferred,
}

/// Violation category carried in constraint errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKey => f.write_str("PRIMARY KEY"),
            Self::Unique => f.write_str("UNIQUE"),
            Self::ForeignKey => f.write_str("FOREIGN KEY"),
            Self::Check => f.write_str("CHECK"),
            Self::NotNull => f.write_str("NOT NULL"),
        }
    }
}

/// Body of a declared table constraint.
///
/// NOT NULL is column-level (see [`ColumnInfo::nullable`]) and never appears
/// here; it still has a [`ConstraintKind`] so violations can name it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstraintBody {
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        ref_table: ObjectName,
        ref_columns: Vec<String>,
        on_delete: ForeignKeyAction,
    },
    Check {
        expr: PlanSource,
    },
}

impl ConstraintBody {
    #[must_use]
    pub const fn kind(&self) -> ConstraintKind {
        match self {
            Self::PrimaryKey { .. } => ConstraintKind::PrimaryKey,
            Self::Unique { .. } => ConstraintKind::Unique,
            Self::ForeignKey { .. } => ConstraintKind::ForeignKey,
            Self::Check { .. } => ConstraintKind::Check,
        }
    }
}

/// A named, declared table constraint.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Constraint {
    pub name: String,
    pub deferrability: Deferrability,
    pub body: ConstraintBody,
}

impl Constraint {
    pub fn new(name: impl Into<String>, body: ConstraintBody) -> Self {
        Self {
            name: name.into(),
            deferrability: Deferrability::default(),
            body,
        }
    }

    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferrability = Deferrability::InitiallyDeferred;
        self
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Opaque default expression payload; compiled by the planner.
    pub default: Option<PlanSource>,
    /// Identity columns draw from the table's sequence on insert.
    pub identity: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default: None,
            identity: false,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: PlanSource) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }
}

/// A row that does not fit its table's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowShapeError {
    /// Wrong number of values.
    Arity { expected: usize, actual: usize },
    /// Value tag not storable in the declared column type.
    Type {
        column: String,
        expected: SqlType,
        actual: SqlType,
    },
}

impl fmt::Display for RowShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arity { expected, actual } => {
                write!(f, "row has {actual} values, table has {expected} columns")
            }
            Self::Type {
                column,
                expected,
                actual,
            } => write!(f, "column {column} is {expected}, value is {actual}"),
        }
    }
}

impl std::error::Error for RowShapeError {}

/// The immutable published schema of one table.
///
/// An ALTER produces a new `TableInfo`; existing readers keep the version
/// they resolved at statement start.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableInfo {
    name: ObjectName,
    columns: Vec<ColumnInfo>,
    constraints: Vec<Constraint>,
}

impl TableInfo {
    #[must_use]
    pub fn new(name: ObjectName, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name,
            columns,
            constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    #[inline]
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Position of a column by name (exact match).
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Check arity and value tags against the declared columns.
    ///
    /// NULLs pass here; nullability is a constraint concern, not a shape
    /// concern.
    pub fn validate_row(&self, row: &[Value]) -> Result<(), RowShapeError> {
        if row.len() != self.columns.len() {
            return Err(RowShapeError::Arity {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (col, value) in self.columns.iter().zip(row) {
            if let Some(actual) = value.type_of() {
                if !col.sql_type.accepts(actual) {
                    return Err(RowShapeError::Type {
                        column: col.name.clone(),
                        expected: col.sql_type,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableInfo {
        TableInfo::new(
            ObjectName::new("app", "person"),
            vec![
                ColumnInfo::new("id", SqlType::Integer).not_null().identity(),
                ColumnInfo::new("name", SqlType::Text).not_null(),
                ColumnInfo::new("score", SqlType::Float),
            ],
        )
        .with_constraints(vec![Constraint::new(
            "person_pk",
            ConstraintBody::PrimaryKey {
                columns: vec!["id".into()],
            },
        )])
    }

    #[test]
    fn test_column_lookup() {
        let t = sample();
        assert_eq!(t.column_index("name"), Some(1));
        assert!(t.column("missing").is_none());
        assert!(!t.column("id").unwrap().nullable);
    }

    #[test]
    fn test_validate_row_arity() {
        let t = sample();
        let err = t.validate_row(&[Value::Integer(1)]).unwrap_err();
        assert_eq!(
            err,
            RowShapeError::Arity {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn test_validate_row_types_and_widening() {
        let t = sample();
        // Integer widens into the FLOAT column.
        t.validate_row(&[Value::Integer(1), Value::text("ada"), Value::Integer(9)])
            .unwrap();
        let err = t
            .validate_row(&[Value::text("x"), Value::text("ada"), Value::Null])
            .unwrap_err();
        assert!(matches!(err, RowShapeError::Type { .. }));
    }

    #[test]
    fn test_nulls_pass_shape_validation() {
        let t = sample();
        t.validate_row(&[Value::Null, Value::Null, Value::Null]).unwrap();
    }

    #[test]
    fn test_constraint_kind_mapping() {
        let c = Constraint::new(
            "fk",
            ConstraintBody::ForeignKey {
                columns: vec!["id".into()],
                ref_table: ObjectName::new("app", "dept"),
                ref_columns: vec!["id".into()],
                on_delete: ForeignKeyAction::NoAction,
            },
        )
        .deferred();
        assert_eq!(c.body.kind(), ConstraintKind::ForeignKey);
        assert_eq!(c.deferrability, Deferrability::InitiallyDeferred);
    }
}
