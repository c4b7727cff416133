// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use virtualfolder::core::view::register_user;
use virtualfolder::{
    init_connection, with_connection, DavNode, FileId, FolderConfig, FolderId, GlobalState, NodeStat,
    VirtualFolderManager,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual folder administration", long_about = None)]
struct Args {
    /// Index database (defaults to <data dir>/virtualfolder/index.db)
    #[arg(long, env = "VIRTUALFOLDER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a user
    User {
        uid: String,
        #[arg(long)]
        display_name: Option<String>,
    },

    /// Create a folder for TARGET_USER showing files owned by SOURCE_USER
    Create {
        source_user: String,
        target_user: String,
        mount_point: String,
        file_ids: Vec<FileId>,
    },

    /// List folder configurations
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved contents of a user's folders
    Show {
        user: String,
        #[arg(long)]
        json: bool,
    },

    Delete { id: FolderId },

    /// Add a file to a folder
    Add { id: FolderId, file_id: FileId },

    /// Remove a file from a folder (the file itself is kept)
    Remove { id: FolderId, file_id: FileId },

    /// Change the mount point of a folder
    Move { id: FolderId, mount_point: String },

    /// List folders by the root entry of their storage
    Roots {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct FolderListing<'a> {
    folder: &'a FolderConfig,
    files: Vec<NodeStat>,
    missing: Vec<FileId>,
}

#[derive(Serialize)]
struct RootListing<'a> {
    root_id: FileId,
    folder: &'a FolderConfig,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("virtualfolder")
        .join("index.db")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let db_path = args.db.unwrap_or_else(default_db_path);
    let global_state = GlobalState::new().shared();
    init_connection(
        &global_state,
        db_path.to_str().context("Database path is not valid UTF-8")?,
    )?;
    tracing::debug!("Database initialized: {}", db_path.display());

    let manager = VirtualFolderManager::with_database(Arc::clone(&global_state));

    match args.command {
        Command::User { uid, display_name } => {
            with_connection(&global_state, |conn| register_user(conn, &uid, display_name.as_deref()))?;
            tracing::info!("Registered user '{}'", uid);
        }

        Command::Create { source_user, target_user, mount_point, file_ids } => {
            match manager.create(&source_user, &target_user, &mount_point, &file_ids) {
                Ok(id) => println!("{}", id),
                Err(e) if e.is_already_exists() => {
                    eprintln!("Rejected: {}", e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Command::List { user, json } => {
            let folders: Vec<FolderConfig> = manager
                .all_folders()?
                .into_iter()
                .filter(|folder| user.as_deref().map_or(true, |u| folder.user == u))
                .collect();
            if json {
                print_json(&folders)?;
            } else {
                for folder in &folders {
                    println!("{}", folder);
                }
            }
        }

        Command::Show { user, json } => {
            let folders = manager.folders_for_user(&user)?;
            let mut listings = Vec::with_capacity(folders.len());
            for folder in &folders {
                let files = folder.children()?.iter().map(DavNode::stat).collect();
                let missing = folder.failures().into_iter().map(|(id, _)| id).collect();
                listings.push(FolderListing { folder: folder.config(), files, missing });
            }

            if json {
                print_json(&listings)?;
            } else {
                for listing in &listings {
                    println!("{}", listing.folder);
                    for file in &listing.files {
                        let kind = if file.is_dir { "d" } else { "-" };
                        println!("  {} {:>10}  {}  ({})", kind, file.size, file.name, file.path);
                    }
                    for id in &listing.missing {
                        println!("  ? {:>10}  <missing file {}>", "", id);
                    }
                }
            }
        }

        Command::Delete { id } => {
            if !manager.delete(id)? {
                anyhow::bail!("Virtual folder {} not found", id);
            }
        }

        Command::Add { id, file_id } => {
            if manager.get(id)?.is_none() {
                anyhow::bail!("Virtual folder {} not found", id);
            }
            manager.add_file(id, file_id)?;
        }

        Command::Remove { id, file_id } => {
            if !manager.remove_file(id, file_id)? {
                tracing::warn!("File {} was not in folder {}", file_id, id);
            }
        }

        Command::Move { id, mount_point } => {
            if !manager.set_mount_point(id, &mount_point)? {
                anyhow::bail!("Virtual folder {} not found", id);
            }
        }

        Command::Roots { json } => {
            let index = manager.root_index()?;
            let roots: Vec<RootListing> = index
                .sorted()
                .into_iter()
                .map(|(root_id, folder)| RootListing { root_id, folder })
                .collect();
            if json {
                print_json(&roots)?;
            } else {
                for root in &roots {
                    println!("{:>8}  {}", root.root_id, root.folder);
                }
            }
        }
    }

    Ok(())
}
