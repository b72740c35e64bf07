//! Constraint evaluation over post-change table views.
//!
//! The checker works against [`TableSnapshotView`]s: at statement level the
//! transaction's own views, at commit the synthetic check-view the pipeline
//! assembles. Checks short-circuit on the first violation.
//!
//! Deferrability filtering: an invocation checks only the constraints whose
//! declared deferrability matches the filter. NOT NULL is always treated as
//! initially-immediate.

use lattice_error::{LatticeError, Result};
use lattice_types::{
    ConstraintBody, ConstraintKind, Deferrability, IndexKey, ObjectName, RowId, RowNumber, Value,
};

use crate::plan::PredicateCompiler;
use crate::table_source::TableSnapshotView;

/// Name resolution for cross-table checks (foreign keys).
pub trait TableResolver {
    /// The post-change view of one table.
    fn resolve_view(&self, name: &ObjectName) -> Result<TableSnapshotView>;

    /// Post-change views of every visible table.
    fn all_views(&self) -> Result<Vec<TableSnapshotView>>;
}

/// Evaluates PK/UNIQUE/FK/CHECK/NOT NULL against added and removed rows.
pub struct ConstraintChecker<'a> {
    resolver: &'a dyn TableResolver,
    compiler: Option<&'a dyn PredicateCompiler>,
}

impl<'a> ConstraintChecker<'a> {
    #[must_use]
    pub fn new(resolver: &'a dyn TableResolver, compiler: Option<&'a dyn PredicateCompiler>) -> Self {
        Self { resolver, compiler }
    }

    /// Validate rows added to `view`'s table.
    pub fn check_add_violations(
        &self,
        view: &TableSnapshotView,
        rows: &[RowNumber],
        deferrability: Deferrability,
    ) -> Result<()> {
        if deferrability == Deferrability::InitiallyImmediate {
            self.check_not_null(view, rows)?;
        }
        for constraint in view.info().constraints() {
            if constraint.deferrability != deferrability {
                continue;
            }
            self.check_one_on_added(view, constraint, rows)?;
        }
        Ok(())
    }

    /// Validate rows removed from `view`'s table: no child may still
    /// reference them.
    pub fn check_remove_violations(
        &self,
        view: &TableSnapshotView,
        rows: &[RowNumber],
        deferrability: Deferrability,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let parent_name = view.info().name().clone();

        for child in self.resolver.all_views()? {
            for constraint in child.info().constraints() {
                let ConstraintBody::ForeignKey {
                    columns,
                    ref_table,
                    ref_columns,
                    on_delete,
                } = &constraint.body
                else {
                    continue;
                };
                if constraint.deferrability != deferrability {
                    continue;
                }
                if !ref_table.matches(&parent_name, true) {
                    continue;
                }

                let positions = column_positions(view, ref_columns)?;
                for row in rows {
                    let payload = view.payload(*row)?;
                    let key = key_at(&payload, &positions);
                    if key.has_null() {
                        continue;
                    }
                    // An update that keeps the key (or a surviving duplicate)
                    // still satisfies the children.
                    if !view.rows_with_key(ref_columns, &key)?.is_empty() {
                        continue;
                    }
                    let referencing = child.rows_with_key(columns, &key)?;
                    if !referencing.is_empty() {
                        return Err(LatticeError::ConstraintViolation {
                            constraint: constraint.name.clone(),
                            kind: ConstraintKind::ForeignKey,
                            row: RowId::new(view.table_id(), *row),
                            detail: format!(
                                " (still referenced from {}; ON DELETE {on_delete})",
                                child.info().name()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate every row and every constraint of `view`'s table, ignoring
    /// deferrability. Used after constraint alters.
    pub fn check_full_table(&self, view: &TableSnapshotView) -> Result<()> {
        let rows: Vec<RowNumber> = view.visible().iter().copied().collect();
        self.check_not_null(view, &rows)?;
        for constraint in view.info().constraints() {
            self.check_one_on_added(view, constraint, &rows)?;
        }
        Ok(())
    }

    fn check_not_null(&self, view: &TableSnapshotView, rows: &[RowNumber]) -> Result<()> {
        for row in rows {
            let payload = view.read_row(*row)?;
            for (pos, column) in view.info().columns().iter().enumerate() {
                if !column.nullable && payload[pos].is_null() {
                    return Err(LatticeError::ConstraintViolation {
                        constraint: format!("{}_not_null", column.name),
                        kind: ConstraintKind::NotNull,
                        row: RowId::new(view.table_id(), *row),
                        detail: format!(" (column {})", column.name),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_one_on_added(
        &self,
        view: &TableSnapshotView,
        constraint: &lattice_types::Constraint,
        rows: &[RowNumber],
    ) -> Result<()> {
        match &constraint.body {
            ConstraintBody::PrimaryKey { columns } => {
                let positions = column_positions(view, columns)?;
                for row in rows {
                    let payload = view.read_row(*row)?;
                    let key = key_at(&payload, &positions);
                    if key.has_null() {
                        return Err(violation(constraint, ConstraintKind::PrimaryKey, view, *row, ""));
                    }
                    if view.rows_with_key(columns, &key)?.len() > 1 {
                        return Err(violation(constraint, ConstraintKind::PrimaryKey, view, *row, ""));
                    }
                }
            }
            ConstraintBody::Unique { columns } => {
                let positions = column_positions(view, columns)?;
                for row in rows {
                    let payload = view.read_row(*row)?;
                    let key = key_at(&payload, &positions);
                    if key.has_null() {
                        continue;
                    }
                    if view.rows_with_key(columns, &key)?.len() > 1 {
                        return Err(violation(constraint, ConstraintKind::Unique, view, *row, ""));
                    }
                }
            }
            ConstraintBody::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                ..
            } => {
                let positions = column_positions(view, columns)?;
                let parent = self.resolver.resolve_view(ref_table)?;
                for row in rows {
                    let payload = view.read_row(*row)?;
                    let key = key_at(&payload, &positions);
                    if key.has_null() {
                        continue;
                    }
                    if parent.rows_with_key(ref_columns, &key)?.is_empty() {
                        return Err(violation(
                            constraint,
                            ConstraintKind::ForeignKey,
                            view,
                            *row,
                            &format!(" (no parent row in {ref_table})"),
                        ));
                    }
                }
            }
            ConstraintBody::Check { expr } => {
                let compiler = self.compiler.ok_or_else(|| {
                    LatticeError::internal(format!(
                        "CHECK constraint {} present but no predicate compiler installed",
                        constraint.name
                    ))
                })?;
                let predicate = compiler.compile(expr)?;
                for row in rows {
                    let payload = view.read_row(*row)?;
                    if !predicate.test(view.info(), &payload)? {
                        return Err(violation(constraint, ConstraintKind::Check, view, *row, ""));
                    }
                }
            }
        }
        Ok(())
    }
}

fn violation(
    constraint: &lattice_types::Constraint,
    kind: ConstraintKind,
    view: &TableSnapshotView,
    row: RowNumber,
    detail: &str,
) -> LatticeError {
    LatticeError::ConstraintViolation {
        constraint: constraint.name.clone(),
        kind,
        row: RowId::new(view.table_id(), row),
        detail: detail.to_owned(),
    }
}

fn column_positions(view: &TableSnapshotView, columns: &[String]) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            view.info()
                .column_index(c)
                .ok_or_else(|| LatticeError::UnknownColumn { name: c.clone() })
        })
        .collect()
}

fn key_at(payload: &[Value], positions: &[usize]) -> IndexKey {
    let parts: Vec<&Value> = positions.iter().map(|p| &payload[*p]).collect();
    IndexKey::from_values(&parts)
}
