//! The global object-commit-state log.
//!
//! Every successful commit appends the names it created and dropped. The
//! commit pipeline's namespace checks walk this log for commits newer than a
//! transaction's begin snapshot.

use lattice_error::ConflictAction;
use lattice_types::{CommitId, ObjectKind, ObjectName};

/// One commit's DDL footprint.
#[derive(Debug, Clone)]
pub struct ObjectCommitState {
    pub commit: CommitId,
    pub created: Vec<(ObjectName, ObjectKind)>,
    pub dropped: Vec<(ObjectName, ObjectKind)>,
}

/// Append-only log of committed DDL, in commit order.
#[derive(Debug, Default)]
pub struct ObjectCommitLog {
    entries: Vec<ObjectCommitState>,
}

impl ObjectCommitLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ObjectCommitState) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[ObjectCommitState] {
        &self.entries
    }

    /// First namespace collision between `created`/`dropped` and commits with
    /// id `>= since`: created-vs-created or dropped-vs-dropped.
    #[must_use]
    pub fn namespace_conflict(
        &self,
        since: CommitId,
        created: &[(ObjectName, ObjectKind)],
        dropped: &[(ObjectName, ObjectKind)],
        ignore_case: bool,
    ) -> Option<(ObjectName, ConflictAction)> {
        for entry in self.entries.iter().filter(|e| e.commit >= since) {
            for (name, _) in created {
                if entry
                    .created
                    .iter()
                    .any(|(other, _)| name.matches(other, ignore_case))
                {
                    return Some((name.clone(), ConflictAction::Created));
                }
            }
            for (name, _) in dropped {
                if entry
                    .dropped
                    .iter()
                    .any(|(other, _)| name.matches(other, ignore_case))
                {
                    return Some((name.clone(), ConflictAction::Dropped));
                }
            }
        }
        None
    }

    /// Whether a commit with id `>= since` dropped `name`.
    #[must_use]
    pub fn was_dropped_since(&self, since: CommitId, name: &ObjectName, ignore_case: bool) -> bool {
        self.entries
            .iter()
            .filter(|e| e.commit >= since)
            .any(|e| {
                e.dropped
                    .iter()
                    .any(|(other, _)| name.matches(other, ignore_case))
            })
    }

    /// Drop entries no open transaction can consult any more.
    pub fn truncate(&mut self, oldest_open: CommitId) {
        self.entries.retain(|e| e.commit > oldest_open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> ObjectName {
        ObjectName::new("app", n)
    }

    fn entry(commit: u64, created: &[&str], dropped: &[&str]) -> ObjectCommitState {
        ObjectCommitState {
            commit: CommitId::new(commit),
            created: created.iter().map(|n| (name(n), ObjectKind::Table)).collect(),
            dropped: dropped.iter().map(|n| (name(n), ObjectKind::Table)).collect(),
        }
    }

    #[test]
    fn test_created_vs_created_conflicts() {
        let mut log = ObjectCommitLog::new();
        log.append(entry(3, &["a"], &[]));

        let created = vec![(name("A"), ObjectKind::Table)];
        let hit = log.namespace_conflict(CommitId::new(2), &created, &[], true);
        assert_eq!(hit, Some((name("A"), ConflictAction::Created)));
        // Case-sensitive mode does not collide A with a.
        assert_eq!(log.namespace_conflict(CommitId::new(2), &created, &[], false), None);
    }

    #[test]
    fn test_old_commits_are_ignored() {
        let mut log = ObjectCommitLog::new();
        log.append(entry(3, &["a"], &[]));
        let created = vec![(name("a"), ObjectKind::Table)];
        assert_eq!(log.namespace_conflict(CommitId::new(4), &created, &[], true), None);
    }

    #[test]
    fn test_dropped_vs_dropped_conflicts() {
        let mut log = ObjectCommitLog::new();
        log.append(entry(5, &[], &["t"]));
        let dropped = vec![(name("t"), ObjectKind::Table)];
        assert_eq!(
            log.namespace_conflict(CommitId::new(5), &[], &dropped, true),
            Some((name("t"), ConflictAction::Dropped))
        );
        assert!(log.was_dropped_since(CommitId::new(5), &name("T"), true));
        assert!(!log.was_dropped_since(CommitId::new(6), &name("t"), true));
    }

    #[test]
    fn test_truncate_drops_stale_entries() {
        let mut log = ObjectCommitLog::new();
        log.append(entry(1, &["a"], &[]));
        log.append(entry(2, &["b"], &[]));
        log.truncate(CommitId::new(1));
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.entries()[0].commit, CommitId::new(2));
    }
}
