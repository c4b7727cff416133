// FILE: src/engine/mod.rs
pub mod manager;
pub mod resolver;

pub use manager::VirtualFolderManager;
pub use resolver::{BatchResolution, SourceFile, SourceFileResolver, SourceStorage};
