// FILE: src/engine/resolver.rs
//! Source File Resolver
//!
//! Turns member file ids back into live files owned by the source user.
//! The cache entries come from one bulk lookup; the storage actually
//! holding each file is only looked up on demand, and looked up again on
//! every call, so moves and renames in the source storage are picked up.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use crate::core::view::{FsNode, RootFolder, StorageHandle, User};
use crate::error::{Result, VirtualFolderError};
use crate::storage::file_cache::{self, CacheEntry};
use crate::storage::{with_connection, FileId};
use crate::SharedState;

/// Deferred lookup of the storage physically holding a source file
#[derive(Clone)]
pub struct SourceStorage {
    root: Arc<dyn RootFolder>,
    user: String,
    file_id: FileId,
}

impl SourceStorage {
    pub fn new(root: Arc<dyn RootFolder>, user: impl Into<String>, file_id: FileId) -> Self {
        Self { root, user: user.into(), file_id }
    }

    /// Walk the user's namespace now and return the first node that is not
    /// backed by a virtual storage. Resolving through a virtual storage
    /// would lead straight back into the virtual folder.
    pub fn resolve_node(&self) -> Result<FsNode> {
        let nodes = self.root.get_by_id(&self.user, self.file_id)?;
        let total = nodes.len();
        match nodes.into_iter().find(|node| !node.storage.is_virtual()) {
            Some(node) => Ok(node),
            None => {
                tracing::debug!(
                    "[Resolver] File {} has {} nodes for '{}', none outside virtual storages",
                    self.file_id, total, self.user
                );
                Err(VirtualFolderError::NotFound(format!(
                    "Source file {} for virtual folder not found",
                    self.file_id
                )))
            }
        }
    }

    pub fn resolve(&self) -> Result<StorageHandle> {
        Ok(self.resolve_node()?.storage)
    }
}

impl fmt::Debug for SourceStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStorage")
            .field("user", &self.user)
            .field("file_id", &self.file_id)
            .finish()
    }
}

/// One member of a virtual folder, as found in the file cache
#[derive(Debug, Clone)]
pub struct SourceFile {
    entry: CacheEntry,
    storage_id: String,
    user: User,
    source: SourceStorage,
}

impl SourceFile {
    pub fn new(entry: CacheEntry, storage_id: String, user: User, source: SourceStorage) -> Self {
        Self { entry, storage_id, user, source }
    }

    pub fn cache_entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// Storage holding the file right now. Not cached.
    pub fn source_storage(&self) -> Result<StorageHandle> {
        self.source.resolve()
    }

    /// Node of the file in the source user's namespace right now. Not cached.
    pub fn source_node(&self) -> Result<FsNode> {
        self.source.resolve_node()
    }

    /// String id of the storage the cache entry belongs to
    pub fn source_storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn user(&self) -> &User {
        &self.user
    }
}

/// Resolution outcome per requested file id, ordered by file id
pub type BatchResolution = Vec<(FileId, Result<SourceFile>)>;

pub struct SourceFileResolver {
    state: SharedState,
    root: Arc<dyn RootFolder>,
}

impl SourceFileResolver {
    pub fn new(state: SharedState, root: Arc<dyn RootFolder>) -> Self {
        Self { state, root }
    }

    /// Resolve a batch of file ids owned by `source_user` with a single
    /// file cache lookup.
    ///
    /// Every requested id gets its own outcome; ids missing from the file
    /// cache come back as `NotFound` without affecting the others. Only a
    /// failing lookup fails the whole batch.
    pub fn resolve_batch(&self, source_user: &User, file_ids: &[FileId]) -> Result<BatchResolution> {
        let requested: BTreeSet<FileId> = file_ids.iter().copied().collect();
        let ids: Vec<FileId> = requested.iter().copied().collect();

        let rows = with_connection(&self.state, |conn| file_cache::get_entries_by_ids(conn, &ids))?;
        let mut found: HashMap<FileId, file_cache::StoredEntry> =
            rows.into_iter().map(|row| (row.entry.id, row)).collect();

        let resolved: BatchResolution = ids
            .into_iter()
            .map(|file_id| {
                let outcome = match found.remove(&file_id) {
                    Some(row) => Ok(SourceFile::new(
                        row.entry,
                        row.storage_id,
                        source_user.clone(),
                        SourceStorage::new(Arc::clone(&self.root), source_user.uid.clone(), file_id),
                    )),
                    None => Err(VirtualFolderError::NotFound(format!(
                        "File {} not found in file cache",
                        file_id
                    ))),
                };
                (file_id, outcome)
            })
            .collect();

        tracing::debug!(
            "[Resolver] Resolved {}/{} files for '{}'",
            resolved.iter().filter(|(_, r)| r.is_ok()).count(),
            resolved.len(),
            source_user.uid
        );
        Ok(resolved)
    }
}
