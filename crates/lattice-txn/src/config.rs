//! Engine configuration.

/// Tunable behavior of one database instance.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Whether object-name equality folds ASCII case.
    pub ignore_identifier_case: bool,
    /// Reject a commit whose read set was changed by a concurrent commit.
    pub error_on_dirty_select: bool,
    /// Capacity of the bounded post-commit event queue.
    pub event_queue_capacity: usize,
    /// Persist table state inside commit publish rather than lazily.
    pub auto_flush_state: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            ignore_identifier_case: true,
            error_on_dirty_select: true,
            event_queue_capacity: 256,
            auto_flush_state: true,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn case_sensitive(mut self) -> Self {
        self.ignore_identifier_case = false;
        self
    }

    #[must_use]
    pub fn allow_dirty_select(mut self) -> Self {
        self.error_on_dirty_select = false;
        self
    }

    #[must_use]
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn lazy_state_flush(mut self) -> Self {
        self.auto_flush_state = false;
        self
    }
}
