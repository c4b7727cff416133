// FILE: src/core/view.rs
//! Per-user filesystem view and user directory.
//!
//! These are the storage-layer collaborators the resolver and the node
//! adapter talk to. The `Db*` implementations read the `users`, `mounts`,
//! `storages` and `filecache` tables of the shared database.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use rusqlite::{params, OptionalExtension};
use crate::error::{Result, VirtualFolderError};
use crate::storage::file_cache::{self, CacheEntry, DIRECTORY_MIMETYPE, ENTRY_COLUMNS, VIRTUAL_STORAGE_PREFIX};
use crate::storage::{with_connection, FileId};
use crate::SharedState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
}

pub trait UserDirectory: Send + Sync {
    fn get(&self, uid: &str) -> Result<Option<User>>;
}

/// A storage backend as seen through a mounted node
pub trait StorageBackend: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn numeric_id(&self) -> u64;

    /// True for synthetic storages that present aggregated content
    /// instead of a physical device.
    fn is_virtual(&self) -> bool;

    /// Content of the file at storage-relative `path`
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replace the content of the file at storage-relative `path`
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// Storages with this id prefix keep their files under the local
/// directory named by the rest of the id
pub const LOCAL_STORAGE_PREFIX: &str = "local::";

pub type StorageHandle = Arc<dyn StorageBackend>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

/// A live node in some user's namespace
#[derive(Debug, Clone)]
pub struct FsNode {
    pub entry: CacheEntry,
    /// Path of the node in the user's namespace
    pub path: String,
    pub storage: StorageHandle,
}

impl FsNode {
    /// `None` when the entry is neither a file nor a folder
    pub fn kind(&self) -> Option<NodeKind> {
        match self.entry.mimetype.as_str() {
            DIRECTORY_MIMETYPE => Some(NodeKind::Folder),
            "" => None,
            _ => Some(NodeKind::File),
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

/// Navigable root of every user's namespace
pub trait RootFolder: Send + Sync {
    /// All nodes in `uid`'s namespace backed by cache entry `file_id`.
    /// A file can show up more than once, e.g. through its own storage and
    /// through a virtual folder presenting it.
    fn get_by_id(&self, uid: &str, file_id: FileId) -> Result<Vec<FsNode>>;

    fn get_directory_listing(&self, node: &FsNode) -> Result<Vec<FsNode>>;

    /// Rename `node` within its parent, returning the moved node
    fn rename(&self, node: &FsNode, new_name: &str) -> Result<FsNode>;

    /// Delete `node` (and its contents), returning every removed file id
    fn delete(&self, node: &FsNode) -> Result<Vec<FileId>>;

    /// Content of a file node
    fn get(&self, node: &FsNode) -> Result<Vec<u8>>;

    /// Replace the content of a file node, returning the updated node
    fn put(&self, node: &FsNode, data: &[u8]) -> Result<FsNode>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStorage {
    id: String,
    numeric_id: u64,
}

impl DbStorage {
    pub fn new(id: impl Into<String>, numeric_id: u64) -> Self {
        Self { id: id.into(), numeric_id }
    }

    /// On-disk location of `path`. Only `local::` storages have one.
    fn local_path(&self, path: &str) -> Result<PathBuf> {
        let Some(base) = self.id.strip_prefix(LOCAL_STORAGE_PREFIX) else {
            return Err(VirtualFolderError::InvalidPath(format!(
                "Storage '{}' has no local content", self.id
            )));
        };
        let rel = Path::new(path);
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(VirtualFolderError::InvalidPath(format!("Invalid path: '{}'", path)));
        }
        Ok(Path::new(base).join(rel))
    }
}

impl StorageBackend for DbStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn numeric_id(&self) -> u64 {
        self.numeric_id
    }

    fn is_virtual(&self) -> bool {
        self.id.starts_with(VIRTUAL_STORAGE_PREFIX)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let local = self.local_path(path)?;
        std::fs::read(&local).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VirtualFolderError::NotFound(format!("{} not found in '{}'", path, self.id))
            }
            _ => VirtualFolderError::Io(e),
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        std::fs::write(self.local_path(path)?, data)?;
        Ok(())
    }
}

pub struct DbUserDirectory {
    state: SharedState,
}

impl DbUserDirectory {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl UserDirectory for DbUserDirectory {
    fn get(&self, uid: &str) -> Result<Option<User>> {
        with_connection(&self.state, |conn| {
            Ok(conn
                .query_row(
                    "SELECT uid, display_name FROM users WHERE uid = ?1",
                    params![uid],
                    |r| Ok(User { uid: r.get(0)?, display_name: r.get(1)? }),
                )
                .optional()?)
        })
    }
}

/// Register a user in the `users` table
pub fn register_user(conn: &rusqlite::Connection, uid: &str, display_name: Option<&str>) -> Result<()> {
    conn.execute(
        "INSERT INTO users (uid, display_name) VALUES (?1, ?2)
         ON CONFLICT(uid) DO UPDATE SET display_name = excluded.display_name",
        params![uid, display_name],
    )?;
    Ok(())
}

/// Filesystem view backed by the `mounts` table.
///
/// A user sees an entry through every mount of the entry's storage, and
/// through every mounted virtual folder listing the entry as a member.
pub struct DbRootFolder {
    state: SharedState,
}

impl DbRootFolder {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

fn join_path(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    if rel.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, rel)
    }
}

impl RootFolder for DbRootFolder {
    fn get_by_id(&self, uid: &str, file_id: FileId) -> Result<Vec<FsNode>> {
        let sql = format!(
            "SELECT {cols}, m.mount_point, s.id, s.numeric_id, m.mount_id, 0
             FROM mounts m
             INNER JOIN storages s ON m.storage = s.numeric_id
             INNER JOIN filecache f ON f.storage = m.storage
             WHERE m.user = ?1 AND f.fileid = ?2
             UNION ALL
             SELECT {cols}, m.mount_point, s.id, s.numeric_id, m.mount_id, 1
             FROM mounts m
             INNER JOIN storages s ON m.storage = s.numeric_id
             INNER JOIN virtual_folder_files vf ON s.id = ?3 || CAST(vf.folder_id AS TEXT)
             INNER JOIN filecache f ON f.fileid = vf.file_id
             WHERE m.user = ?1 AND vf.file_id = ?2
             ORDER BY 16",
            cols = ENTRY_COLUMNS
        );

        let nodes = with_connection(&self.state, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![uid, file_id, VIRTUAL_STORAGE_PREFIX], |row| {
                let entry = CacheEntry::from_row(row)?;
                let mount_point: String = row.get(12)?;
                let storage = DbStorage::new(row.get::<_, String>(13)?, row.get(14)?);
                let wrapped: bool = row.get(16)?;
                // Virtual folders present their members flat under the mount
                let path = if wrapped {
                    join_path(&mount_point, &entry.name)
                } else {
                    join_path(&mount_point, &entry.path)
                };
                Ok(FsNode { entry, path, storage: Arc::new(storage) as StorageHandle })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        tracing::debug!("[View] File {} has {} nodes for '{}'", file_id, nodes.len(), uid);
        Ok(nodes)
    }

    fn get_directory_listing(&self, node: &FsNode) -> Result<Vec<FsNode>> {
        let children = with_connection(&self.state, |conn| file_cache::get_children(conn, node.entry.id))?;
        Ok(children
            .into_iter()
            .map(|entry| FsNode {
                path: join_path(&node.path, &entry.name),
                entry,
                storage: Arc::clone(&node.storage),
            })
            .collect())
    }

    fn rename(&self, node: &FsNode, new_name: &str) -> Result<FsNode> {
        let entry = with_connection(&self.state, |conn| file_cache::rename_entry(conn, node.entry.id, new_name))?;
        let parent = match node.path.rfind('/') {
            Some(idx) => &node.path[..idx],
            None => "",
        };
        Ok(FsNode {
            path: join_path(parent, &entry.name),
            entry,
            storage: Arc::clone(&node.storage),
        })
    }

    fn delete(&self, node: &FsNode) -> Result<Vec<FileId>> {
        with_connection(&self.state, |conn| file_cache::delete_entry(conn, node.entry.id))
    }

    fn get(&self, node: &FsNode) -> Result<Vec<u8>> {
        node.storage.read(&node.entry.path)
    }

    fn put(&self, node: &FsNode, data: &[u8]) -> Result<FsNode> {
        node.storage.write(&node.entry.path, data)?;

        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let entry = with_connection(&self.state, |conn| {
            let id = file_cache::put_entry(
                conn,
                node.storage.numeric_id(),
                &node.entry.path,
                &node.entry.mimetype,
                data.len() as u64,
                mtime,
            )?;
            file_cache::get_entry(conn, id)?
                .ok_or_else(|| VirtualFolderError::NotFound(format!("File {} vanished during write", id)))
        })?;

        tracing::debug!("[View] Wrote {} bytes to {}", data.len(), node.path);
        Ok(FsNode { entry, path: node.path.clone(), storage: Arc::clone(&node.storage) })
    }
}
