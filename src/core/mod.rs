pub mod view;

pub use view::{
    DbRootFolder, DbStorage, DbUserDirectory, FsNode, NodeKind, RootFolder, StorageBackend,
    StorageHandle, User, UserDirectory,
};
