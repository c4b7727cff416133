//! Database initialization module
//!
//! Handles opening the SQLite database with:
//! - WAL mode for concurrent access
//! - Two folder tables owned by the store: virtual_folders, virtual_folder_files
//! - The metadata tables read by the file cache and the filesystem view:
//!   users, storages, filecache, mounts

use std::path::Path;
use rusqlite::Connection;
use crate::error::{Result, VirtualFolderError};

/// Open the SQLite database at the specified path
///
/// Creates the database file and its parent directory, then enables WAL mode
/// for better concurrency.
pub fn initialize_database(db_path: &str) -> Result<Connection> {
    let db_dir = Path::new(db_path).parent()
        .ok_or_else(|| VirtualFolderError::InvalidPath("Invalid database path".into()))?;

    if !db_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(db_dir)
            .map_err(VirtualFolderError::Io)?;
    }

    let conn = Connection::open(db_path)
        .map_err(VirtualFolderError::Database)?;

    // Enable WAL mode for better concurrent access
    conn.pragma_update(None, "journal_mode", WAL)?;

    // Memberships reference folders; deletes are ordered by the store, never cascaded
    conn.pragma_update(None, "foreign_keys", ON)?;

    conn.pragma_update(None, "synchronous", NORMAL)?;

    tracing::info!("Database initialized at: {}", db_path);

    Ok(conn)
}

/// Create all required tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    create_user_table(conn)?;
    create_storage_tables(conn)?;
    create_mount_table(conn)?;
    create_folder_tables(conn)?;
    Ok(())
}

fn create_folder_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS virtual_folders (
            folder_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user TEXT NOT NULL,
            source_user TEXT NOT NULL,
            mount_point TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS virtual_folders_user ON virtual_folders(user);

        CREATE TABLE IF NOT EXISTS virtual_folder_files (
            folder_id INTEGER NOT NULL,
            file_id INTEGER NOT NULL,

            PRIMARY KEY (folder_id, file_id),
            FOREIGN KEY (folder_id) REFERENCES virtual_folders(folder_id)
        );

        CREATE INDEX IF NOT EXISTS virtual_folder_files_file ON virtual_folder_files(file_id);
    "#)?;
    tracing::debug!("Created virtual_folders and virtual_folder_files tables");
    Ok(())
}

fn create_user_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS users (
            uid TEXT PRIMARY KEY,
            display_name TEXT
        );
    "#)?;
    tracing::debug!("Created users table");
    Ok(())
}

fn create_storage_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS storages (
            numeric_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS filecache (
            fileid INTEGER PRIMARY KEY AUTOINCREMENT,
            storage INTEGER NOT NULL,
            path TEXT NOT NULL,
            path_hash TEXT NOT NULL,
            parent INTEGER NOT NULL DEFAULT -1,
            name TEXT NOT NULL,
            mimetype TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL DEFAULT 0,
            mtime INTEGER NOT NULL DEFAULT 0,
            etag TEXT NOT NULL DEFAULT '',
            permissions INTEGER NOT NULL DEFAULT 31,
            checksum TEXT NOT NULL DEFAULT '',

            UNIQUE(storage, path_hash),
            FOREIGN KEY (storage) REFERENCES storages(numeric_id)
        );

        CREATE INDEX IF NOT EXISTS filecache_parent ON filecache(parent);
    "#)?;
    tracing::debug!("Created storages and filecache tables");
    Ok(())
}

fn create_mount_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS mounts (
            mount_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user TEXT NOT NULL,
            storage INTEGER NOT NULL,
            mount_point TEXT NOT NULL,

            FOREIGN KEY (storage) REFERENCES storages(numeric_id)
        );

        CREATE INDEX IF NOT EXISTS mounts_user ON mounts(user);
    "#)?;
    tracing::debug!("Created mounts table");
    Ok(())
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";
