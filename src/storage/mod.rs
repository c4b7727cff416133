// FILE: src/storage/mod.rs
pub mod connection;
pub mod file_cache;
pub mod init;
pub mod repository;
pub mod root_index;

use std::collections::BTreeSet;
use serde::Serialize;

// Common exports
pub use connection::{init_connection, with_connection};
pub use file_cache::{CacheEntry, StoredEntry};
pub use repository::FolderConfigStore;
pub use root_index::RootIndex;

/// Identifier of a virtual folder, assigned by the store
pub type FolderId = u64;

/// Identifier of a row in the file cache
pub type FileId = u64;

// Data Types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderConfig {
    pub id: FolderId,
    /// User whose namespace holds the mount point
    pub user: String,
    /// User owning the member files
    pub source_user: String,
    pub mount_point: String,
    pub source_file_ids: BTreeSet<FileId>,
}

impl std::fmt::Display for FolderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} -> {}:{} ({} files)",
            self.id,
            self.source_user,
            self.user,
            self.mount_point,
            self.source_file_ids.len()
        )
    }
}
