// FILE: src/storage/repository.rs
use std::collections::{BTreeSet, HashMap};
use rusqlite::{ffi, params, Connection, ErrorCode, Row};
use crate::error::{Result, VirtualFolderError};
use crate::storage::file_cache::{path_hash, VIRTUAL_STORAGE_PREFIX};
use crate::storage::root_index::RootIndex;
use crate::storage::{FileId, FolderConfig, FolderId};

const FOLDER_SELECT: &str =
    "SELECT folder.folder_id, folder.user, folder.source_user, folder.mount_point, files.file_id
     FROM virtual_folders folder
     LEFT JOIN virtual_folder_files files ON folder.folder_id = files.folder_id";

/// One row of the folder/membership join. `key` is the grouping key:
/// the folder id, or the root cache entry id for the root index.
#[derive(Debug, Clone)]
pub(crate) struct FolderRow {
    pub key: u64,
    pub folder_id: FolderId,
    pub user: String,
    pub source_user: String,
    pub mount_point: String,
    /// NULL when the folder has no members
    pub file_id: Option<FileId>,
}

impl FolderRow {
    fn keyed_by_folder(row: &Row<'_>) -> rusqlite::Result<Self> {
        let folder_id: FolderId = row.get(0)?;
        Ok(Self {
            key: folder_id,
            folder_id,
            user: row.get(1)?,
            source_user: row.get(2)?,
            mount_point: row.get(3)?,
            file_id: row.get(4)?,
        })
    }

    fn keyed_by_root(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(5)?,
            ..Self::keyed_by_folder(row)?
        })
    }
}

/// Group joined rows into folder configs, sorted by key ascending.
///
/// Row delivery order does not matter: rows are accumulated per key and
/// the result is sorted afterwards.
pub(crate) fn from_rows<I>(rows: I) -> Vec<(u64, FolderConfig)>
where
    I: IntoIterator<Item = FolderRow>,
{
    let mut folders: HashMap<u64, FolderConfig> = HashMap::new();

    for row in rows {
        let folder = folders.entry(row.key).or_insert_with(|| FolderConfig {
            id: row.folder_id,
            user: row.user,
            source_user: row.source_user,
            mount_point: row.mount_point,
            source_file_ids: BTreeSet::new(),
        });
        if let Some(file_id) = row.file_id {
            folder.source_file_ids.insert(file_id);
        }
    }

    let mut folders: Vec<(u64, FolderConfig)> = folders.into_iter().collect();
    folders.sort_by_key(|(key, _)| *key);
    folders
}

/// Durable store for virtual folder definitions and their memberships
pub struct FolderConfigStore<'a> {
    conn: &'a Connection,
}

impl<'a> FolderConfigStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_folders<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<FolderConfig>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, FolderRow::keyed_by_folder)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(from_rows(rows).into_iter().map(|(_, folder)| folder).collect())
    }

    /// All folders mounted for `user`, ordered by folder id
    pub fn get_folders_for_user(&self, user: &str) -> Result<Vec<FolderConfig>> {
        self.query_folders(&format!("{} WHERE folder.user = ?1", FOLDER_SELECT), params![user])
    }

    pub fn get_by_id(&self, id: FolderId) -> Result<Option<FolderConfig>> {
        let folders = self.query_folders(
            &format!("{} WHERE folder.folder_id = ?1", FOLDER_SELECT),
            params![id],
        )?;
        Ok(folders.into_iter().next())
    }

    pub fn get_all_folders(&self) -> Result<Vec<FolderConfig>> {
        self.query_folders(FOLDER_SELECT, [])
    }

    /// Every folder keyed by the root cache entry of its synthetic
    /// `virtual_<id>` storage. Folders whose storage has not been set up
    /// yet have no root entry and are left out.
    pub fn get_all_by_root_ids(&self) -> Result<RootIndex> {
        let mut stmt = self.conn.prepare(
            "SELECT folder.folder_id, folder.user, folder.source_user, folder.mount_point, files.file_id, f.fileid
             FROM virtual_folders folder
             INNER JOIN storages s ON s.id = ?1 || CAST(folder.folder_id AS TEXT)
             INNER JOIN filecache f ON f.storage = s.numeric_id AND f.path_hash = ?2
             LEFT JOIN virtual_folder_files files ON folder.folder_id = files.folder_id"
        )?;
        let rows = stmt.query_map(
            params![VIRTUAL_STORAGE_PREFIX, path_hash("")],
            FolderRow::keyed_by_root,
        )?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(RootIndex::from_entries(from_rows(rows)))
    }

    /// Create a folder for `user` presenting files owned by `source_user`.
    ///
    /// The mount point check and the insert are not atomic: two concurrent
    /// calls for the same user and mount point can both succeed.
    pub fn new_folder(
        &self,
        source_user: &str,
        user: &str,
        mount_point: &str,
        file_ids: &[FileId],
    ) -> Result<FolderConfig> {
        let tx = self.conn.unchecked_transaction()?;
        let folder = FolderConfigStore::new(&tx).insert_folder(source_user, user, mount_point, file_ids)?;
        tx.commit()?;
        Ok(folder)
    }

    /// Body of [`new_folder`](Self::new_folder) without its own
    /// transaction, for callers that run it inside a larger one.
    pub(crate) fn insert_folder(
        &self,
        source_user: &str,
        user: &str,
        mount_point: &str,
        file_ids: &[FileId],
    ) -> Result<FolderConfig> {
        let file_ids: BTreeSet<FileId> = file_ids.iter().copied().collect();

        let existing = self.get_folders_for_user(user)?;
        if existing.iter().any(|folder| folder.mount_point == mount_point) {
            return Err(VirtualFolderError::AlreadyExists(format!(
                "Virtual folder with mount point '{}' already exists for user '{}'",
                mount_point, user
            )));
        }

        self.conn.execute(
            "INSERT INTO virtual_folders (user, source_user, mount_point) VALUES (?1, ?2, ?3)",
            params![user, source_user, mount_point],
        )?;
        let folder_id = self.conn.last_insert_rowid() as FolderId;

        for &file_id in &file_ids {
            insert_member(self.conn, folder_id, file_id)?;
        }

        tracing::info!(
            "[Store] Created folder {} for '{}' at '{}' ({} files from '{}')",
            folder_id, user, mount_point, file_ids.len(), source_user
        );

        Ok(FolderConfig {
            id: folder_id,
            user: user.to_string(),
            source_user: source_user.to_string(),
            mount_point: mount_point.to_string(),
            source_file_ids: file_ids,
        })
    }

    /// Remove all memberships of `id`, then the folder itself.
    /// Returns false when no such folder existed.
    pub fn delete_folder(&self, id: FolderId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let members = tx.execute("DELETE FROM virtual_folder_files WHERE folder_id = ?1", params![id])?;
        let folders = tx.execute("DELETE FROM virtual_folders WHERE folder_id = ?1", params![id])?;
        tx.commit()?;

        tracing::info!("[Store] Deleted folder {} ({} memberships)", id, members);
        Ok(folders > 0)
    }

    /// Overwrite the mount point. Uniqueness is not re-checked.
    pub fn set_mount_point(&self, id: FolderId, mount_point: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE virtual_folders SET mount_point = ?1 WHERE folder_id = ?2",
            params![mount_point, id],
        )?;
        Ok(updated > 0)
    }

    /// Add a member. Adding an existing member is a no-op.
    pub fn add_source_file(&self, folder_id: FolderId, file_id: FileId) -> Result<()> {
        insert_member(self.conn, folder_id, file_id)?;
        Ok(())
    }

    pub fn remove_source_file(&self, folder_id: FolderId, file_id: FileId) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM virtual_folder_files WHERE file_id = ?1 AND folder_id = ?2",
            params![file_id, folder_id],
        )?;
        Ok(removed > 0)
    }

    /// Drop `file_id` from every folder. Used once the physical file is gone.
    pub fn remove_source_file_all(&self, file_id: FileId) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM virtual_folder_files WHERE file_id = ?1",
            params![file_id],
        )?;
        if removed > 0 {
            tracing::debug!("[Store] Removed file {} from {} folders", file_id, removed);
        }
        Ok(removed)
    }
}

/// Insert one membership row, swallowing the uniqueness violation of a
/// duplicate. Returns whether a row was inserted.
fn insert_member(conn: &Connection, folder_id: FolderId, file_id: FileId) -> Result<bool> {
    match conn.execute(
        "INSERT INTO virtual_folder_files (folder_id, file_id) VALUES (?1, ?2)",
        params![folder_id, file_id],
    ) {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _)) if is_duplicate(&e) => {
            tracing::debug!("[Store] File {} already in folder {}", file_id, folder_id);
            Ok(false)
        }
        Err(e) => Err(VirtualFolderError::Database(e)),
    }
}

fn is_duplicate(e: &ffi::Error) -> bool {
    e.code == ErrorCode::ConstraintViolation
        && matches!(
            e.extended_code,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
        )
}
