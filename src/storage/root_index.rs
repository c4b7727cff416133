//! Reverse index from a virtual folder's root cache entry to its config.
//!
//! The storage wrapper consults this while walking the generic file cache:
//! any entry id found here is the root of a virtual folder mount.

use std::collections::HashMap;
use crate::storage::{FileId, FolderConfig};

#[derive(Debug, Clone, Default)]
pub struct RootIndex {
    by_root: HashMap<FileId, FolderConfig>,
}

impl RootIndex {
    /// Build from `(root entry id, config)` pairs
    pub(crate) fn from_entries(entries: Vec<(FileId, FolderConfig)>) -> Self {
        Self {
            by_root: entries.into_iter().collect(),
        }
    }

    pub fn folder_for_root(&self, entry_id: FileId) -> Option<&FolderConfig> {
        self.by_root.get(&entry_id)
    }

    pub fn is_virtual_root(&self, entry_id: FileId) -> bool {
        self.by_root.contains_key(&entry_id)
    }

    /// Root entry ids in ascending order
    pub fn root_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.by_root.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// `(root entry id, config)` pairs in ascending root id order
    pub fn sorted(&self) -> Vec<(FileId, &FolderConfig)> {
        let mut entries: Vec<(FileId, &FolderConfig)> =
            self.by_root.iter().map(|(id, folder)| (*id, folder)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.by_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_root.is_empty()
    }
}
