//! Qualified object names and object kinds.

use std::fmt;

/// What kind of schema object a name refers to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ObjectKind {
    Schema,
    Table,
    View,
    Sequence,
    Trigger,
    Index,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => f.write_str("SCHEMA"),
            Self::Table => f.write_str("TABLE"),
            Self::View => f.write_str("VIEW"),
            Self::Sequence => f.write_str("SEQUENCE"),
            Self::Trigger => f.write_str("TRIGGER"),
            Self::Index => f.write_str("INDEX"),
        }
    }
}

/// A qualified `(schema, name)` identifier.
///
/// The stored form preserves the original spelling. Whether two names are
/// equal may be case-sensitive or -insensitive depending on database
/// configuration, so lookups go through [`ObjectName::matches`] with the
/// configured flag rather than `==` (which is exact).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ObjectName {
    schema: String,
    name: String,
}

impl ObjectName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compare against another name under the given case rule.
    #[must_use]
    pub fn matches(&self, other: &Self, ignore_case: bool) -> bool {
        if ignore_case {
            self.schema.eq_ignore_ascii_case(&other.schema)
                && self.name.eq_ignore_ascii_case(&other.name)
        } else {
            self == other
        }
    }

    /// Canonical lookup key under the given case rule.
    ///
    /// Case-insensitive databases key their catalogs by the folded form so
    /// that `Employees` and `EMPLOYEES` collide.
    #[must_use]
    pub fn lookup_key(&self, ignore_case: bool) -> ObjectName {
        if ignore_case {
            ObjectName {
                schema: self.schema.to_ascii_lowercase(),
                name: self.name.to_ascii_lowercase(),
            }
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}
