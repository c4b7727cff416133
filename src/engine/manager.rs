// FILE: src/engine/manager.rs
//! Entry points used by the CLI, the remote access layer and the storage
//! wrapper.

use std::sync::Arc;
use crate::core::view::{DbRootFolder, DbUserDirectory, RootFolder, UserDirectory};
use crate::dav::{NodeContext, VirtualFolder};
use crate::engine::resolver::{BatchResolution, SourceFileResolver};
use crate::error::{Result, VirtualFolderError};
use crate::storage::file_cache::{self, virtual_storage_id, DIRECTORY_MIMETYPE};
use crate::storage::{with_connection, FileId, FolderConfig, FolderConfigStore, FolderId, RootIndex};
use crate::SharedState;

pub struct VirtualFolderManager {
    state: SharedState,
    users: Arc<dyn UserDirectory>,
    root: Arc<dyn RootFolder>,
    resolver: SourceFileResolver,
}

impl VirtualFolderManager {
    pub fn new(state: SharedState, users: Arc<dyn UserDirectory>, root: Arc<dyn RootFolder>) -> Self {
        let resolver = SourceFileResolver::new(Arc::clone(&state), Arc::clone(&root));
        Self { state, users, root, resolver }
    }

    /// Manager over the users and mounts stored in the same database
    pub fn with_database(state: SharedState) -> Self {
        let users = Arc::new(DbUserDirectory::new(Arc::clone(&state)));
        let root = Arc::new(DbRootFolder::new(Arc::clone(&state)));
        Self::new(state, users, root)
    }

    fn store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&FolderConfigStore<'_>) -> Result<T>,
    {
        with_connection(&self.state, |conn| f(&FolderConfigStore::new(conn)))
    }

    pub fn node_context(&self) -> NodeContext {
        NodeContext::new(Arc::clone(&self.state), Arc::clone(&self.root))
    }

    fn require_user(&self, uid: &str) -> Result<()> {
        match self.users.get(uid)? {
            Some(_) => Ok(()),
            None => Err(VirtualFolderError::NotFound(format!("User '{}' not found", uid))),
        }
    }

    /// Create a folder mounted for `target_user` at `mount_point`, holding
    /// files owned by `source_user`, and set up its synthetic storage.
    pub fn create(
        &self,
        source_user: &str,
        target_user: &str,
        mount_point: &str,
        file_ids: &[FileId],
    ) -> Result<FolderId> {
        self.require_user(source_user)?;
        self.require_user(target_user)?;

        // Folder row and its storage are committed together
        let folder = with_connection(&self.state, |conn| {
            let tx = conn.unchecked_transaction()?;
            let folder = FolderConfigStore::new(&tx).insert_folder(source_user, target_user, mount_point, file_ids)?;
            let storage = file_cache::register_storage(&tx, &virtual_storage_id(folder.id))?;
            file_cache::put_entry(&tx, storage, "", DIRECTORY_MIMETYPE, 0, 0)?;
            file_cache::add_mount(&tx, target_user, storage, mount_point)?;
            tx.commit()?;
            Ok(folder)
        })?;

        Ok(folder.id)
    }

    pub fn get(&self, id: FolderId) -> Result<Option<FolderConfig>> {
        self.store(|store| store.get_by_id(id))
    }

    pub fn all_folders(&self) -> Result<Vec<FolderConfig>> {
        self.store(|store| store.get_all_folders())
    }

    /// Folders mounted for `uid`, with every member resolved against the
    /// source user's current namespace
    pub fn folders_for_user(&self, uid: &str) -> Result<Vec<VirtualFolder>> {
        let folders = self.store(|store| store.get_folders_for_user(uid))?;

        let mut result = Vec::with_capacity(folders.len());
        for folder in folders {
            let ids: Vec<FileId> = folder.source_file_ids.iter().copied().collect();
            let members: BatchResolution = match self.users.get(&folder.source_user)? {
                Some(source_user) => self.resolver.resolve_batch(&source_user, &ids)?,
                None => {
                    tracing::warn!(
                        "[Manager] Source user '{}' of folder {} not found",
                        folder.source_user, folder.id
                    );
                    ids.into_iter()
                        .map(|id| {
                            let err = VirtualFolderError::NotFound(format!(
                                "Source user '{}' not found for virtual folder",
                                folder.source_user
                            ));
                            (id, Err(err))
                        })
                        .collect()
                }
            };
            result.push(VirtualFolder::new(folder, members, self.node_context()));
        }
        Ok(result)
    }

    pub fn root_index(&self) -> Result<RootIndex> {
        self.store(|store| store.get_all_by_root_ids())
    }

    /// Delete a folder and its synthetic storage
    pub fn delete(&self, id: FolderId) -> Result<bool> {
        with_connection(&self.state, |conn| {
            let existed = FolderConfigStore::new(conn).delete_folder(id)?;
            file_cache::remove_storage(conn, &virtual_storage_id(id))?;
            Ok(existed)
        })
    }

    pub fn set_mount_point(&self, id: FolderId, mount_point: &str) -> Result<bool> {
        with_connection(&self.state, |conn| {
            let updated = FolderConfigStore::new(conn).set_mount_point(id, mount_point)?;
            if let Some(storage) = file_cache::get_storage_numeric_id(conn, &virtual_storage_id(id))? {
                file_cache::set_mount_point(conn, storage, mount_point)?;
            }
            Ok(updated)
        })
    }

    pub fn add_file(&self, id: FolderId, file_id: FileId) -> Result<()> {
        self.store(|store| store.add_source_file(id, file_id))
    }

    pub fn remove_file(&self, id: FolderId, file_id: FileId) -> Result<bool> {
        self.store(|store| store.remove_source_file(id, file_id))
    }
}
