//! Error types for the virtual folder store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VirtualFolderError {
    /// A folder with the same mount point already exists for the user.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Missing user, folder or source file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A filesystem node that is neither a file nor a folder.
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VirtualFolderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VirtualFolderError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, VirtualFolderError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, VirtualFolderError>;
