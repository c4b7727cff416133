//! Virtual folders: per-user mount points aggregating files that live in
//! another user's storage.
//!
//! - Storage (folder configs, file cache lookups, root index)
//! - Engine (batch resolution of member files, the manager entry points)
//! - Dav (file/folder node tree for the remote access layer)

pub mod core;
pub mod dav;
pub mod engine;
pub mod error;
pub mod state;
pub mod storage;

pub use state::{GlobalState, SharedState};
pub use error::{Result, VirtualFolderError};
pub use engine::{SourceFile, VirtualFolderManager};
pub use dav::{DavNode, NodeStat, VirtualFolder};
// Export the common storage types
pub use storage::{
    init_connection,
    with_connection,
    FileId,
    FolderConfig,
    FolderConfigStore,
    FolderId,
    RootIndex,
};
