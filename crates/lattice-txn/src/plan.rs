//! Interfaces consumed from the SQL planner.
//!
//! The core never compiles SQL. The planner hands it evaluable objects:
//! [`QueryPlanNode`] for whole sub-queries (view DDL, computed defaults) and
//! [`RowPredicate`] for CHECK constraint expressions. A [`PredicateCompiler`]
//! turns the opaque [`PlanSource`] payloads stored in schema metadata into
//! predicates on demand.

use std::fmt;
use std::sync::Arc;

use lattice_error::Result;
use lattice_types::{PlanSource, TableInfo, Value};

/// Rows materialized by evaluating a plan node.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Evaluation context handed to plan nodes.
///
/// Carries nothing today beyond a marker; the planner side owns name
/// resolution and parameter binding.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalContext {
    _private: (),
}

impl EvalContext {
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

/// An evaluable query plan produced by the external planner.
pub trait QueryPlanNode: fmt::Debug + Send + Sync {
    fn evaluate(&self, ctx: &EvalContext) -> Result<MaterializedRows>;
}

/// A compiled boolean predicate over one row.
///
/// CHECK semantics are SQL three-valued: implementations return `true` for
/// unknown (NULL) results so that only a definite `false` violates.
pub trait RowPredicate: fmt::Debug + Send + Sync {
    fn test(&self, info: &TableInfo, row: &[Value]) -> Result<bool>;
}

/// Compiles stored predicate payloads into evaluable predicates.
pub trait PredicateCompiler: Send + Sync {
    fn compile(&self, expr: &PlanSource) -> Result<Arc<dyn RowPredicate>>;
}

/// A closure-backed predicate, convenient for embedders and tests.
pub struct FnPredicate<F>(pub F);

impl<F> fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnPredicate")
    }
}

impl<F> RowPredicate for FnPredicate<F>
where
    F: Fn(&TableInfo, &[Value]) -> Result<bool> + Send + Sync,
{
    fn test(&self, info: &TableInfo, row: &[Value]) -> Result<bool> {
        (self.0)(info, row)
    }
}

/// A closure-backed compiler.
pub struct FnCompiler<F>(pub F);

impl<F> PredicateCompiler for FnCompiler<F>
where
    F: Fn(&PlanSource) -> Result<Arc<dyn RowPredicate>> + Send + Sync,
{
    fn compile(&self, expr: &PlanSource) -> Result<Arc<dyn RowPredicate>> {
        (self.0)(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{ColumnInfo, ObjectName, SqlType};

    #[test]
    fn test_fn_predicate_delegates() {
        let info = TableInfo::new(
            ObjectName::new("app", "t"),
            vec![ColumnInfo::new("x", SqlType::Integer)],
        );
        let positive = FnPredicate(|_: &TableInfo, row: &[Value]| {
            Ok(match row[0].sql_cmp(&Value::Integer(0)) {
                Some(ord) => ord == std::cmp::Ordering::Greater,
                None => true, // unknown passes
            })
        });
        assert!(positive.test(&info, &[Value::Integer(5)]).unwrap());
        assert!(!positive.test(&info, &[Value::Integer(-5)]).unwrap());
        assert!(positive.test(&info, &[Value::Null]).unwrap());
    }
}
