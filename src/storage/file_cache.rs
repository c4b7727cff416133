//! File cache operations
//!
//! Handles the metadata tables shared with the storage layer:
//! - Bulk lookups of cache entries by file id (one statement per 100 ids)
//! - Locating a storage's root entry through the hash of the empty path
//! - Registering storages, entries and mounts
//! - Moving and deleting entries together with their descendants

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::error::{Result, VirtualFolderError};
use crate::storage::{FileId, FolderId};

/// Mimetype carried by directory entries
pub const DIRECTORY_MIMETYPE: &str = "httpd/unix-directory";

/// Storage id prefix of the synthetic storage behind each virtual folder
pub const VIRTUAL_STORAGE_PREFIX: &str = "virtual_";

/// Maximum number of ids bound into a single IN clause
const MAX_BATCH_SIZE: usize = 100;

pub(crate) const ENTRY_COLUMNS: &str =
    "f.fileid, f.storage, f.path, f.path_hash, f.parent, f.name, f.mimetype, f.size, f.mtime, f.etag, f.permissions, f.checksum";

/// Storage id of the synthetic storage presenting folder `folder_id`
pub fn virtual_storage_id(folder_id: FolderId) -> String {
    format!("{}{}", VIRTUAL_STORAGE_PREFIX, folder_id)
}

/// Hash of a storage-relative path. The storage root is the entry whose
/// path hash equals `path_hash("")`.
pub fn path_hash(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

/// One row of the file cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub id: FileId,
    pub storage: u64,
    pub path: String,
    pub path_hash: String,
    /// -1 for a storage root
    pub parent: i64,
    pub name: String,
    pub mimetype: String,
    pub size: u64,
    pub mtime: i64,
    pub etag: String,
    pub permissions: u32,
    pub checksum: String,
}

impl CacheEntry {
    pub fn is_dir(&self) -> bool {
        self.mimetype == DIRECTORY_MIMETYPE
    }

    /// Map the columns selected by [`ENTRY_COLUMNS`], starting at index 0
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            storage: row.get(1)?,
            path: row.get(2)?,
            path_hash: row.get(3)?,
            parent: row.get(4)?,
            name: row.get(5)?,
            mimetype: row.get(6)?,
            size: row.get(7)?,
            mtime: row.get(8)?,
            etag: row.get(9)?,
            permissions: row.get(10)?,
            checksum: row.get(11)?,
        })
    }
}

impl std::fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (fileid: {}, storage: {}, size: {})", self.path, self.id, self.storage, self.size)
    }
}

/// A cache entry joined with the string id of its storage
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub entry: CacheEntry,
    pub storage_id: String,
}

/// Bulk lookup of cache entries joined to their storage rows.
///
/// Ids with no cache row are simply absent from the result.
pub fn get_entries_by_ids(conn: &Connection, ids: &[FileId]) -> Result<Vec<StoredEntry>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(MAX_BATCH_SIZE) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {}, s.id FROM filecache f
             INNER JOIN storages s ON f.storage = s.numeric_id
             WHERE f.fileid IN ({})",
            ENTRY_COLUMNS,
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok(StoredEntry {
                entry: CacheEntry::from_row(row)?,
                storage_id: row.get(12)?,
            })
        })?;
        for r in rows { results.push(r?); }
    }

    tracing::debug!("Loaded {} of {} requested cache entries", results.len(), ids.len());
    Ok(results)
}

pub fn get_entry(conn: &Connection, id: FileId) -> Result<Option<CacheEntry>> {
    let sql = format!("SELECT {} FROM filecache f WHERE f.fileid = ?1", ENTRY_COLUMNS);
    Ok(conn.query_row(&sql, params![id], CacheEntry::from_row).optional()?)
}

/// The root entry of a storage, located by the hash of the empty path
pub fn get_root_entry(conn: &Connection, storage: u64) -> Result<Option<CacheEntry>> {
    let sql = format!(
        "SELECT {} FROM filecache f WHERE f.storage = ?1 AND f.path_hash = ?2",
        ENTRY_COLUMNS
    );
    Ok(conn.query_row(&sql, params![storage, path_hash("")], CacheEntry::from_row).optional()?)
}

pub fn get_children(conn: &Connection, parent: FileId) -> Result<Vec<CacheEntry>> {
    let sql = format!("SELECT {} FROM filecache f WHERE f.parent = ?1 ORDER BY f.name", ENTRY_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![parent], CacheEntry::from_row)?;
    let mut children = Vec::new();
    for r in rows { children.push(r?); }
    Ok(children)
}

/// Register a storage by its string id, returning its numeric id.
/// Registering an existing id returns the existing numeric id.
pub fn register_storage(conn: &Connection, storage_id: &str) -> Result<u64> {
    let mut stmt = conn.prepare(
        "INSERT INTO storages (id) VALUES (?1)
         ON CONFLICT(id) DO UPDATE SET id = excluded.id
         RETURNING numeric_id"
    )?;
    let numeric_id = stmt.query_row(params![storage_id], |row| row.get::<_, u64>(0))?;
    tracing::debug!("Registered storage: {} (numeric_id: {})", storage_id, numeric_id);
    Ok(numeric_id)
}

pub fn get_storage_numeric_id(conn: &Connection, storage_id: &str) -> Result<Option<u64>> {
    Ok(conn
        .query_row("SELECT numeric_id FROM storages WHERE id = ?1", params![storage_id], |r| r.get(0))
        .optional()?)
}

/// Remove a storage with all of its cache entries and mounts
pub fn remove_storage(conn: &Connection, storage_id: &str) -> Result<bool> {
    let Some(numeric_id) = get_storage_numeric_id(conn, storage_id)? else {
        return Ok(false);
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM mounts WHERE storage = ?1", params![numeric_id])?;
    tx.execute("DELETE FROM filecache WHERE storage = ?1", params![numeric_id])?;
    tx.execute("DELETE FROM storages WHERE numeric_id = ?1", params![numeric_id])?;
    tx.commit()?;
    tracing::debug!("Removed storage: {}", storage_id);
    Ok(true)
}

/// Insert or update the entry at `path` in `storage`.
///
/// The parent entry must already exist unless `path` is the root (`""`).
pub fn put_entry(
    conn: &Connection,
    storage: u64,
    path: &str,
    mimetype: &str,
    size: u64,
    mtime: i64,
) -> Result<FileId> {
    let path = path.trim_matches('/');
    let parent: i64 = if path.is_empty() {
        -1
    } else {
        let parent_path = parent_path(path);
        let parent_id: Option<i64> = conn
            .query_row(
                "SELECT fileid FROM filecache WHERE storage = ?1 AND path_hash = ?2",
                params![storage, path_hash(parent_path)],
                |r| r.get(0),
            )
            .optional()?;
        parent_id.ok_or_else(|| {
            VirtualFolderError::InvalidPath(format!("Parent of '{}' is not in the file cache", path))
        })?
    };

    let name = path.rsplit('/').next().unwrap_or_default();
    let etag = format!("{:x}{:x}", mtime, size);

    let mut stmt = conn.prepare(
        "INSERT INTO filecache (storage, path, path_hash, parent, name, mimetype, size, mtime, etag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(storage, path_hash) DO UPDATE SET
             mimetype = excluded.mimetype,
             size = excluded.size,
             mtime = excluded.mtime,
             etag = excluded.etag
         RETURNING fileid"
    )?;
    let file_id = stmt.query_row(
        params![storage, path, path_hash(path), parent, name, mimetype, size, mtime, etag],
        |row| row.get::<_, FileId>(0),
    )?;

    tracing::debug!("Stored cache entry: {} (storage: {}, fileid: {})", path, storage, file_id);
    Ok(file_id)
}

/// Rename an entry in place, rewriting the paths of its descendants
pub fn rename_entry(conn: &Connection, id: FileId, new_name: &str) -> Result<CacheEntry> {
    if new_name.is_empty() || new_name.contains('/') {
        return Err(VirtualFolderError::InvalidPath(format!("Invalid name: '{}'", new_name)));
    }
    let entry = get_entry(conn, id)?
        .ok_or_else(|| VirtualFolderError::NotFound(format!("File {} not found in cache", id)))?;
    if entry.path.is_empty() {
        return Err(VirtualFolderError::InvalidPath("Cannot rename a storage root".into()));
    }

    let parent = parent_path(&entry.path);
    let new_path = if parent.is_empty() {
        new_name.to_string()
    } else {
        format!("{}/{}", parent, new_name)
    };

    let old_prefix = format!("{}/", entry.path);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE filecache SET name = ?1, path = ?2, path_hash = ?3 WHERE fileid = ?4",
        params![new_name, new_path, path_hash(&new_path), id],
    )?;

    let descendants: Vec<(FileId, String)> = {
        let mut stmt = tx.prepare(
            "SELECT fileid, path FROM filecache WHERE storage = ?1 AND substr(path, 1, ?2) = ?3"
        )?;
        let rows = stmt.query_map(
            params![entry.storage, old_prefix.chars().count() as i64, old_prefix],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    for (child_id, child_path) in descendants {
        let moved = format!("{}/{}", new_path, &child_path[old_prefix.len()..]);
        tx.execute(
            "UPDATE filecache SET path = ?1, path_hash = ?2 WHERE fileid = ?3",
            params![moved, path_hash(&moved), child_id],
        )?;
    }
    tx.commit()?;

    tracing::debug!("Renamed {} -> {}", entry.path, new_path);
    get_entry(conn, id)?
        .ok_or_else(|| VirtualFolderError::NotFound(format!("File {} vanished during rename", id)))
}

/// Delete an entry and all of its descendants, returning every removed id
pub fn delete_entry(conn: &Connection, id: FileId) -> Result<Vec<FileId>> {
    let Some(entry) = get_entry(conn, id)? else {
        return Ok(Vec::new());
    };

    let prefix = format!("{}/", entry.path);
    let tx = conn.unchecked_transaction()?;
    let mut removed: Vec<FileId> = if entry.path.is_empty() {
        let mut stmt = tx.prepare("SELECT fileid FROM filecache WHERE storage = ?1 AND fileid != ?2")?;
        let rows = stmt.query_map(params![entry.storage, id], |r| r.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    } else {
        let mut stmt = tx.prepare(
            "SELECT fileid FROM filecache WHERE storage = ?1 AND substr(path, 1, ?2) = ?3"
        )?;
        let rows = stmt.query_map(
            params![entry.storage, prefix.chars().count() as i64, prefix],
            |r| r.get(0),
        )?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    removed.push(id);

    for file_id in &removed {
        tx.execute("DELETE FROM filecache WHERE fileid = ?1", params![file_id])?;
    }
    tx.commit()?;

    tracing::debug!("Deleted {} (rows removed: {})", entry.path, removed.len());
    Ok(removed)
}

/// Mount `storage` into `user`'s namespace at `mount_point`
pub fn add_mount(conn: &Connection, user: &str, storage: u64, mount_point: &str) -> Result<u64> {
    conn.execute(
        "INSERT INTO mounts (user, storage, mount_point) VALUES (?1, ?2, ?3)",
        params![user, storage, mount_point],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

pub fn set_mount_point(conn: &Connection, storage: u64, mount_point: &str) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE mounts SET mount_point = ?1 WHERE storage = ?2",
        params![mount_point, storage],
    )?)
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
