// FILE: src/state.rs

use std::sync::{Arc, Mutex, RwLock};

/// Global shared state handed to the store, the resolver and the filesystem view
pub struct GlobalState {
    /// Database connection (created lazily by `init_connection`)
    pub db_connection: Arc<Mutex<Option<rusqlite::Connection>>>,
}

/// Shared state wrapper for easy cloning and sharing
pub type SharedState = Arc<RwLock<GlobalState>>;

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            db_connection: Arc::new(Mutex::new(None)),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-open connection. Used by tests and embedders that
    /// manage the database file themselves.
    pub fn with_connection(conn: rusqlite::Connection) -> Self {
        Self {
            db_connection: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}
