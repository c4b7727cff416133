// FILE: src/dav.rs
//! Node tree handed to the remote access layer.
//!
//! A virtual folder lists its members as top-level nodes. Deleting a
//! top-level node only drops it from the folder; deleting anything below
//! (or any ordinary node) deletes the real file.

use std::fmt;
use std::sync::Arc;
use serde::Serialize;
use crate::core::view::{FsNode, NodeKind, RootFolder};
use crate::engine::resolver::{BatchResolution, SourceFile};
use crate::error::{Result, VirtualFolderError};
use crate::storage::{with_connection, FileId, FolderConfig, FolderConfigStore, FolderId};
use crate::SharedState;

/// What a node needs to reach the filesystem and the folder store
#[derive(Clone)]
pub struct NodeContext {
    pub state: SharedState,
    pub root: Arc<dyn RootFolder>,
}

impl NodeContext {
    pub fn new(state: SharedState, root: Arc<dyn RootFolder>) -> Self {
        Self { state, root }
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStat {
    pub file_id: FileId,
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64,
    pub etag: String,
    /// None for folders
    pub content_type: Option<String>,
}

#[derive(Debug)]
pub struct NodeHandle {
    node: FsNode,
    ctx: NodeContext,
}

#[derive(Debug)]
pub enum DavNode {
    File(NodeHandle),
    Folder(NodeHandle),
    TopLevelFile { handle: NodeHandle, folder_id: FolderId },
    TopLevelFolder { handle: NodeHandle, folder_id: FolderId },
}

fn invalid_node(node: &FsNode) -> VirtualFolderError {
    VirtualFolderError::InvalidNode(format!(
        "Invalid node, neither file nor folder: {} (fileid: {})",
        node.path, node.entry.id
    ))
}

impl DavNode {
    pub fn new(node: FsNode, ctx: NodeContext) -> Result<Self> {
        let handle = NodeHandle { node, ctx };
        match handle.node.kind() {
            Some(NodeKind::Folder) => Ok(DavNode::Folder(handle)),
            Some(NodeKind::File) => Ok(DavNode::File(handle)),
            None => Err(invalid_node(&handle.node)),
        }
    }

    /// Node sitting directly under the mount point of folder `folder_id`
    pub fn new_top_level(node: FsNode, folder_id: FolderId, ctx: NodeContext) -> Result<Self> {
        let handle = NodeHandle { node, ctx };
        match handle.node.kind() {
            Some(NodeKind::Folder) => Ok(DavNode::TopLevelFolder { handle, folder_id }),
            Some(NodeKind::File) => Ok(DavNode::TopLevelFile { handle, folder_id }),
            None => Err(invalid_node(&handle.node)),
        }
    }

    fn handle(&self) -> &NodeHandle {
        match self {
            DavNode::File(handle) | DavNode::Folder(handle) => handle,
            DavNode::TopLevelFile { handle, .. } | DavNode::TopLevelFolder { handle, .. } => handle,
        }
    }

    fn handle_mut(&mut self) -> &mut NodeHandle {
        match self {
            DavNode::File(handle) | DavNode::Folder(handle) => handle,
            DavNode::TopLevelFile { handle, .. } | DavNode::TopLevelFolder { handle, .. } => handle,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, DavNode::Folder(_) | DavNode::TopLevelFolder { .. })
    }

    pub fn is_top_level(&self) -> bool {
        matches!(self, DavNode::TopLevelFile { .. } | DavNode::TopLevelFolder { .. })
    }

    pub fn name(&self) -> &str {
        self.handle().node.name()
    }

    pub fn last_modified(&self) -> i64 {
        self.handle().node.entry.mtime
    }

    pub fn stat(&self) -> NodeStat {
        let node = &self.handle().node;
        NodeStat {
            file_id: node.entry.id,
            name: node.entry.name.clone(),
            path: node.path.clone(),
            is_dir: self.is_folder(),
            size: node.entry.size,
            mtime: node.entry.mtime,
            etag: node.entry.etag.clone(),
            content_type: if self.is_folder() { None } else { Some(node.entry.mimetype.clone()) },
        }
    }

    /// Content of a file node
    pub fn get(&self) -> Result<Vec<u8>> {
        if self.is_folder() {
            return Err(VirtualFolderError::InvalidPath(format!("{} is a folder", self.handle().node.path)));
        }
        let handle = self.handle();
        handle.ctx.root.get(&handle.node)
    }

    /// Replace the content of a file node. A top-level node writes through
    /// to the source file.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        if self.is_folder() {
            return Err(VirtualFolderError::InvalidPath(format!("{} is a folder", self.handle().node.path)));
        }
        let handle = self.handle_mut();
        handle.node = handle.ctx.root.put(&handle.node, data)?;
        Ok(())
    }

    /// Rename the underlying file. Membership follows the file id, so a
    /// top-level node stays in its folder under the new name.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        let handle = self.handle_mut();
        let moved = handle.ctx.root.rename(&handle.node, new_name)?;
        tracing::debug!("[Dav] Renamed {} -> {}", handle.node.path, moved.path);
        handle.node = moved;
        Ok(())
    }

    pub fn delete(self) -> Result<()> {
        match self {
            DavNode::TopLevelFile { handle, folder_id } | DavNode::TopLevelFolder { handle, folder_id } => {
                let file_id = handle.node.entry.id;
                with_connection(&handle.ctx.state, |conn| {
                    FolderConfigStore::new(conn).remove_source_file(folder_id, file_id)
                })?;
                tracing::info!("[Dav] Removed file {} from folder {}", file_id, folder_id);
                Ok(())
            }
            DavNode::File(handle) | DavNode::Folder(handle) => {
                let removed = handle.ctx.root.delete(&handle.node)?;
                with_connection(&handle.ctx.state, |conn| {
                    let store = FolderConfigStore::new(conn);
                    for file_id in &removed {
                        store.remove_source_file_all(*file_id)?;
                    }
                    Ok(())
                })?;
                tracing::info!("[Dav] Deleted {} ({} entries)", handle.node.path, removed.len());
                Ok(())
            }
        }
    }

    /// Contents of a folder node, as ordinary nodes
    pub fn children(&self) -> Result<Vec<DavNode>> {
        if !self.is_folder() {
            return Err(VirtualFolderError::InvalidPath(format!("{} is not a folder", self.handle().node.path)));
        }
        let handle = self.handle();
        handle
            .ctx
            .root
            .get_directory_listing(&handle.node)?
            .into_iter()
            .map(|child| DavNode::new(child, handle.ctx.clone()))
            .collect()
    }
}

/// A folder config together with the resolution outcome of each member
pub struct VirtualFolder {
    config: FolderConfig,
    members: BatchResolution,
    ctx: NodeContext,
}

impl VirtualFolder {
    pub fn new(config: FolderConfig, members: BatchResolution, ctx: NodeContext) -> Self {
        Self { config, members, ctx }
    }

    pub fn config(&self) -> &FolderConfig {
        &self.config
    }

    pub fn mount_point(&self) -> &str {
        &self.config.mount_point
    }

    pub fn source_files(&self) -> impl Iterator<Item = &SourceFile> {
        self.members.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    /// Members that could not be resolved
    pub fn failures(&self) -> Vec<(FileId, &VirtualFolderError)> {
        self.members
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e)))
            .collect()
    }

    /// Top-level nodes of the folder.
    ///
    /// Members that cannot be found are logged and left out; an invalid
    /// node aborts the listing.
    pub fn children(&self) -> Result<Vec<DavNode>> {
        let mut children = Vec::with_capacity(self.members.len());
        for (file_id, member) in &self.members {
            let source = match member {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!("[Dav] Skipping file {} in '{}': {}", file_id, self.config.mount_point, e);
                    continue;
                }
            };
            let node = match source.source_node() {
                Ok(node) => node,
                Err(e) if e.is_not_found() => {
                    tracing::warn!("[Dav] Skipping file {} in '{}': {}", file_id, self.config.mount_point, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            children.push(DavNode::new_top_level(node, self.config.id, self.ctx.clone())?);
        }
        Ok(children)
    }

    /// Top-level node by name
    pub fn child(&self, name: &str) -> Result<DavNode> {
        self.children()?
            .into_iter()
            .find(|node| node.name() == name)
            .ok_or_else(|| VirtualFolderError::NotFound(format!(
                "{} not found in '{}'",
                name, self.config.mount_point
            )))
    }
}
