//! The privilege callback consumed before DDL publishes state.
//!
//! The core does not own privilege tables; a user/role manager answers
//! [`PrivilegeQuery::user_has_privilege`] and the session surface consults it
//! before touching any state.

use std::fmt;

use lattice_types::{ObjectKind, ObjectName};

/// The privilege classes the session surface asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    References,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::References => "REFERENCES",
        };
        f.write_str(s)
    }
}

/// Answers privilege questions for the session surface.
pub trait PrivilegeQuery: Send + Sync {
    fn user_has_privilege(
        &self,
        user: &str,
        kind: ObjectKind,
        object: &ObjectName,
        privilege: Privilege,
    ) -> bool;
}

/// Grants everything; the default for embedded single-user databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PrivilegeQuery for AllowAll {
    fn user_has_privilege(
        &self,
        _user: &str,
        _kind: ObjectKind,
        _object: &ObjectName,
        _privilege: Privilege,
    ) -> bool {
        true
    }
}

/// Closure-backed privilege callback.
pub struct FnPrivileges<F>(pub F);

impl<F> PrivilegeQuery for FnPrivileges<F>
where
    F: Fn(&str, ObjectKind, &ObjectName, Privilege) -> bool + Send + Sync,
{
    fn user_has_privilege(
        &self,
        user: &str,
        kind: ObjectKind,
        object: &ObjectName,
        privilege: Privilege,
    ) -> bool {
        (self.0)(user, kind, object, privilege)
    }
}
