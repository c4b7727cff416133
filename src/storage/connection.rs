//! Database connection management
//!
//! Provides initialization and access for the connection held in
//! GlobalState's db_connection field.

use std::sync::{Arc, Mutex};
use rusqlite::Connection;
use crate::error::{Result, VirtualFolderError};
use crate::storage::init;
use crate::SharedState;

/// Initialize the database connection in GlobalState
///
/// Called once at startup to open the database, create the schema and
/// store the connection. Every later operation borrows it through
/// [`with_connection`].
pub fn init_connection(state: &SharedState, db_path: &str) -> Result<()> {
    let conn = init::initialize_database(db_path)?;
    init::create_tables(&conn)?;

    let conn_arc = get_connection(state)?;
    let mut conn_guard = conn_arc.lock()
        .map_err(|_| VirtualFolderError::State("Poisoned lock".into()))?;
    *conn_guard = Some(conn);

    tracing::info!("Loaded database schema");
    Ok(())
}

/// Get a reference to the database connection Arc<Mutex<Option<Connection>>>
pub fn get_connection(state: &SharedState) -> Result<Arc<Mutex<Option<Connection>>>> {
    let state_guard = state.read()
        .map_err(|_| VirtualFolderError::State("Poisoned lock".into()))?;

    Ok(state_guard.db_connection.clone())
}

/// Run `f` with the locked connection.
///
/// The lock is held only for the duration of `f`; callers must not call
/// back into anything that locks the connection again from inside `f`.
pub fn with_connection<T, F>(state: &SharedState, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let conn_opt = get_connection(state)?;
    let conn_guard = conn_opt.lock()
        .map_err(|_| VirtualFolderError::State("Poisoned lock".into()))?;
    let conn = conn_guard.as_ref()
        .ok_or_else(|| VirtualFolderError::State("Database not initialized".into()))?;
    f(conn)
}
