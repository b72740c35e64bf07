//! The database handle.
//!
//! A [`Database`] owns one engine instance over one store and hands out
//! [`Session`]s. All global mutable state (commit clock, visible catalog,
//! state store) lives behind the engine; there are no ambient singletons.

use std::path::Path;
use std::sync::Arc;

use lattice_error::Result;
use lattice_observability::CommitObserver;
use lattice_store::{FileStore, MemoryStore, Store};
use lattice_txn::{DatabaseConfig, Engine, EventDispatcher, PredicateCompiler};
use lattice_types::CommitId;

use crate::privilege::{AllowAll, PrivilegeQuery};
use crate::session::Session;

/// One embeddable database instance.
pub struct Database {
    engine: Arc<Engine>,
    privileges: Arc<dyn PrivilegeQuery>,
}

impl Database {
    /// Create a fresh database backed by a new store file at `path`.
    pub fn create(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(FileStore::create(path)?);
        Ok(Self::wrap(Engine::create(store, config)?))
    }

    /// Open an existing database file.
    pub fn open(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(FileStore::open(path)?);
        Ok(Self::wrap(Engine::open(store, config)?))
    }

    /// Create an in-memory database (tests, caches, scratch work).
    pub fn create_in_memory(config: DatabaseConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Ok(Self::wrap(Engine::create(store, config)?))
    }

    fn wrap(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            privileges: Arc::new(AllowAll),
        }
    }

    /// Install the privilege callback consulted before DDL.
    #[must_use]
    pub fn with_privileges(mut self, privileges: Arc<dyn PrivilegeQuery>) -> Self {
        self.privileges = privileges;
        self
    }

    /// Install a commit observer (metrics, conflict tracing).
    pub fn set_observer(&self, observer: Arc<dyn CommitObserver>) {
        self.engine.set_observer(observer);
    }

    /// Install the planner's predicate compiler used for CHECK constraints.
    pub fn set_predicate_compiler(&self, compiler: Arc<dyn PredicateCompiler>) {
        self.engine.set_predicate_compiler(compiler);
    }

    /// Open a session bound to `user`.
    #[must_use]
    pub fn session(&self, user: impl Into<String>) -> Session {
        Session::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.privileges),
            user.into(),
        )
    }

    /// The post-commit event dispatcher, for typed subscriptions.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        self.engine.events()
    }

    /// Current commit clock value.
    #[must_use]
    pub fn current_commit_id(&self) -> CommitId {
        self.engine.current_commit_id()
    }

    /// Truncate commit history and physically reclaim dropped tables nothing
    /// pins. Returns how many tables were reclaimed.
    pub fn vacuum(&self) -> Result<usize> {
        self.engine.vacuum_history();
        self.engine.reclaim_dropped()
    }

    /// Persist all dirty state.
    pub fn flush(&self) -> Result<()> {
        self.engine.flush_all()
    }

    /// Drain post-commit events and flush. The handle stays usable; drop it
    /// to fully release the store.
    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("commit_id", &self.current_commit_id())
            .finish_non_exhaustive()
    }
}
