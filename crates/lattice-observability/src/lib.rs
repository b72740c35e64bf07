//! Commit-pipeline analytics and observability hooks.
//!
//! All observation is opt-in via the [`CommitObserver`] trait. When no
//! observer is registered the pipeline uses [`NoOpObserver`], whose empty
//! methods inline to nothing. Observers MUST NOT block: they are called
//! while the commit mutex is held.

use std::sync::atomic::{AtomicU64, Ordering};

use lattice_types::{CommitId, RowId};

/// Why a commit attempt was rejected during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ConflictKind {
    DirtySelect,
    Namespace,
    Row,
    DroppedModified,
    NonCommitted,
    Constraint,
}

/// Observation points raised by the commit pipeline.
///
/// The default method bodies are empty so observers implement only what they
/// care about.
pub trait CommitObserver: Send + Sync {
    /// A commit attempt entered validation.
    fn on_validation_started(&self, _begin: CommitId) {}

    /// Validation rejected the transaction.
    fn on_conflict(&self, _kind: ConflictKind, _table: Option<&str>, _row: Option<RowId>) {}

    /// A commit published successfully.
    fn on_publish(&self, _commit: CommitId, _tables_changed: usize) {}

    /// A transaction rolled back before reaching publish.
    fn on_rollback(&self) {}
}

/// The do-nothing default observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpObserver;

impl CommitObserver for NoOpObserver {}

/// Counter snapshot from a [`MetricsObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CommitMetricsSnapshot {
    pub validations_started: u64,
    pub commits_published: u64,
    pub rollbacks: u64,
    pub conflicts_dirty_select: u64,
    pub conflicts_namespace: u64,
    pub conflicts_row: u64,
    pub conflicts_dropped_modified: u64,
    pub conflicts_non_committed: u64,
    pub conflicts_constraint: u64,
}

/// An observer that aggregates atomic counters.
#[derive(Debug, Default)]
pub struct MetricsObserver {
    validations_started: AtomicU64,
    commits_published: AtomicU64,
    rollbacks: AtomicU64,
    dirty_select: AtomicU64,
    namespace: AtomicU64,
    row: AtomicU64,
    dropped_modified: AtomicU64,
    non_committed: AtomicU64,
    constraint: AtomicU64,
}

impl MetricsObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters at once.
    #[must_use]
    pub fn snapshot(&self) -> CommitMetricsSnapshot {
        CommitMetricsSnapshot {
            validations_started: self.validations_started.load(Ordering::Relaxed),
            commits_published: self.commits_published.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            conflicts_dirty_select: self.dirty_select.load(Ordering::Relaxed),
            conflicts_namespace: self.namespace.load(Ordering::Relaxed),
            conflicts_row: self.row.load(Ordering::Relaxed),
            conflicts_dropped_modified: self.dropped_modified.load(Ordering::Relaxed),
            conflicts_non_committed: self.non_committed.load(Ordering::Relaxed),
            conflicts_constraint: self.constraint.load(Ordering::Relaxed),
        }
    }
}

impl CommitObserver for MetricsObserver {
    fn on_validation_started(&self, _begin: CommitId) {
        self.validations_started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_conflict(&self, kind: ConflictKind, _table: Option<&str>, _row: Option<RowId>) {
        let counter = match kind {
            ConflictKind::DirtySelect => &self.dirty_select,
            ConflictKind::Namespace => &self.namespace,
            ConflictKind::Row => &self.row,
            ConflictKind::DroppedModified => &self.dropped_modified,
            ConflictKind::NonCommitted => &self.non_committed,
            ConflictKind::Constraint => &self.constraint,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn on_publish(&self, _commit: CommitId, _tables_changed: usize) {
        self.commits_published.fetch_add(1, Ordering::Relaxed);
    }

    fn on_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{RowNumber, TableId};

    #[test]
    fn test_metrics_observer_counts_by_kind() {
        let obs = MetricsObserver::new();
        obs.on_validation_started(CommitId::ZERO);
        obs.on_validation_started(CommitId::new(1));
        obs.on_conflict(ConflictKind::Row, Some("t"), Some(RowId::new(
            TableId::new(1),
            RowNumber::new(2),
        )));
        obs.on_conflict(ConflictKind::DirtySelect, Some("t"), None);
        obs.on_publish(CommitId::new(2), 1);
        obs.on_rollback();

        let snap = obs.snapshot();
        assert_eq!(snap.validations_started, 2);
        assert_eq!(snap.conflicts_row, 1);
        assert_eq!(snap.conflicts_dirty_select, 1);
        assert_eq!(snap.conflicts_namespace, 0);
        assert_eq!(snap.commits_published, 1);
        assert_eq!(snap.rollbacks, 1);
    }

    #[test]
    fn test_noop_observer_is_callable() {
        let obs = NoOpObserver;
        obs.on_validation_started(CommitId::ZERO);
        obs.on_conflict(ConflictKind::Constraint, None, None);
        obs.on_publish(CommitId::new(1), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let obs = MetricsObserver::new();
        let json = serde_json::to_string(&obs.snapshot()).unwrap();
        assert!(json.contains("commits_published"));
    }
}
