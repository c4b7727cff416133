// tests/virtual_folders.rs
//
// Drives the manager and the node tree against an in-memory database
// holding two users, a mounted home storage for alice and an unmounted
// external storage.

use std::sync::Arc;
use virtualfolder::core::view::{register_user, DbRootFolder, RootFolder, LOCAL_STORAGE_PREFIX};
use virtualfolder::storage::file_cache::{
    self, add_mount, put_entry, register_storage, virtual_storage_id, DIRECTORY_MIMETYPE,
};
use virtualfolder::storage::init::create_tables;
use virtualfolder::{with_connection, DavNode, FileId, FolderId, GlobalState, SharedState, VirtualFolderManager};

struct Fixture {
    state: SharedState,
    manager: VirtualFolderManager,
    docs: FileId,
    a: FileId,
    b: FileId,
    c: FileId,
    /// File in a storage alice has no mount for
    external: FileId,
}

fn setup() -> Fixture {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    register_user(&conn, "alice", Some("Alice")).unwrap();
    register_user(&conn, "bob", None).unwrap();

    let home = register_storage(&conn, "home::alice").unwrap();
    put_entry(&conn, home, "", DIRECTORY_MIMETYPE, 0, 1).unwrap();
    let docs = put_entry(&conn, home, "docs", DIRECTORY_MIMETYPE, 0, 1).unwrap();
    let a = put_entry(&conn, home, "a.txt", "text/plain", 10, 1).unwrap();
    let b = put_entry(&conn, home, "b.txt", "text/plain", 20, 1).unwrap();
    let c = put_entry(&conn, home, "docs/c.txt", "text/plain", 30, 1).unwrap();
    add_mount(&conn, "alice", home, "/alice/files").unwrap();

    let nas = register_storage(&conn, "external::nas").unwrap();
    put_entry(&conn, nas, "", DIRECTORY_MIMETYPE, 0, 1).unwrap();
    let external = put_entry(&conn, nas, "n.txt", "text/plain", 5, 1).unwrap();

    let state = GlobalState::with_connection(conn).shared();
    let manager = VirtualFolderManager::with_database(Arc::clone(&state));
    Fixture { state, manager, docs, a, b, c, external }
}

fn root_entry_of(state: &SharedState, id: FolderId) -> FileId {
    with_connection(state, |conn| {
        let storage = file_cache::get_storage_numeric_id(conn, &virtual_storage_id(id))?;
        let root = file_cache::get_root_entry(conn, storage.unwrap())?;
        Ok(root.unwrap().id)
    })
    .unwrap()
}

fn names(nodes: &[DavNode]) -> Vec<String> {
    nodes.iter().map(|n| n.name().to_string()).collect()
}

#[test]
fn test_create_dedups_and_rejects_duplicate_mount() {
    let fx = setup();

    let id = fx.manager.create("alice", "alice", "/shared", &[fx.a, fx.a, fx.b]).unwrap();
    let folder = fx.manager.get(id).unwrap().unwrap();
    assert_eq!(folder.user, "alice");
    assert_eq!(folder.source_user, "alice");
    assert_eq!(folder.mount_point, "/shared");
    assert_eq!(folder.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.a, fx.b]);

    let err = fx.manager.create("alice", "alice", "/shared", &[fx.c]).unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(fx.manager.all_folders().unwrap().len(), 1);

    // Same mount point for another user is fine
    fx.manager.create("alice", "bob", "/shared", &[fx.c]).unwrap();
    assert_eq!(fx.manager.all_folders().unwrap().len(), 2);
}

#[test]
fn test_create_requires_known_users() {
    let fx = setup();
    assert!(fx.manager.create("carol", "alice", "/x", &[fx.a]).unwrap_err().is_not_found());
    assert!(fx.manager.create("alice", "carol", "/x", &[fx.a]).unwrap_err().is_not_found());
    assert!(fx.manager.all_folders().unwrap().is_empty());
}

#[test]
fn test_listing_skips_missing_members() {
    let fx = setup();
    let missing = fx.external + 100;
    fx.manager.create("alice", "bob", "/from-alice", &[missing, fx.c, fx.a]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    assert_eq!(folders.len(), 1);
    let folder = &folders[0];
    assert_eq!(folder.mount_point(), "/from-alice");
    assert_eq!(folder.source_files().count(), 2);

    let failures = folder.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, missing);
    assert!(failures[0].1.is_not_found());

    let children = folder.children().unwrap();
    assert_eq!(names(&children), vec!["a.txt", "c.txt"]);
    assert!(children.iter().all(|n| n.is_top_level()));

    // Resolved through alice's home, not through bob's view
    let stat = children[1].stat();
    assert_eq!(stat.path, "/alice/files/docs/c.txt");
    assert_eq!(stat.size, 30);
    assert_eq!(stat.content_type.as_deref(), Some("text/plain"));

    assert!(fx.manager.folders_for_user("carol").unwrap().is_empty());
}

#[test]
fn test_member_only_reachable_through_virtual_folder_is_not_found() {
    let fx = setup();
    fx.manager.create("alice", "alice", "/picked", &[fx.external]).unwrap();

    // alice sees the file only through her own virtual folder
    let nodes = DbRootFolder::new(Arc::clone(&fx.state)).get_by_id("alice", fx.external).unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(nodes[0].storage.is_virtual());

    let folders = fx.manager.folders_for_user("alice").unwrap();
    let source = folders[0].source_files().next().unwrap();
    assert_eq!(source.source_storage_id(), "external::nas");
    assert!(source.source_storage().unwrap_err().is_not_found());
    assert!(folders[0].children().unwrap().is_empty());
}

#[test]
fn test_missing_source_user_fails_every_member() {
    let fx = setup();
    fx.manager.create("alice", "bob", "/from-alice", &[fx.a, fx.b]).unwrap();
    with_connection(&fx.state, |conn| {
        conn.execute("DELETE FROM users WHERE uid = 'alice'", [])?;
        Ok(())
    })
    .unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    assert_eq!(folders[0].failures().len(), 2);
    assert!(folders[0].children().unwrap().is_empty());
}

#[test]
fn test_top_level_delete_only_removes_membership() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/from-alice", &[fx.a, fx.b]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    folders[0].child("a.txt").unwrap().delete().unwrap();

    let folder = fx.manager.get(id).unwrap().unwrap();
    assert_eq!(folder.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.b]);
    let entry = with_connection(&fx.state, |conn| file_cache::get_entry(conn, fx.a)).unwrap();
    assert!(entry.is_some());
}

#[test]
fn test_ordinary_delete_removes_file_from_every_folder() {
    let fx = setup();
    let first = fx.manager.create("alice", "bob", "/one", &[fx.docs, fx.c]).unwrap();
    let second = fx.manager.create("alice", "alice", "/two", &[fx.c, fx.a]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    let docs = folders[0].child("docs").unwrap();
    assert!(docs.is_folder());
    assert!(docs.is_top_level());
    assert!(docs.stat().content_type.is_none());

    // Below the top level, nodes are ordinary
    let inner = docs.children().unwrap();
    assert_eq!(names(&inner), vec!["c.txt"]);
    assert!(!inner[0].is_top_level());
    inner.into_iter().next().unwrap().delete().unwrap();

    let entry = with_connection(&fx.state, |conn| file_cache::get_entry(conn, fx.c)).unwrap();
    assert!(entry.is_none());
    let first = fx.manager.get(first).unwrap().unwrap();
    assert_eq!(first.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.docs]);
    let second = fx.manager.get(second).unwrap().unwrap();
    assert_eq!(second.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.a]);
}

#[test]
fn test_ordinary_folder_delete_removes_subtree_members() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/one", &[fx.c, fx.b]).unwrap();

    let node = DbRootFolder::new(Arc::clone(&fx.state))
        .get_by_id("alice", fx.docs)
        .unwrap()
        .remove(0);
    let docs = fx.manager.node_context();
    let docs = DavNode::new(node, docs).unwrap();
    assert!(docs.is_folder());
    assert!(!docs.is_top_level());
    docs.delete().unwrap();

    let folder = fx.manager.get(id).unwrap().unwrap();
    assert_eq!(folder.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.b]);
}

#[test]
fn test_file_node_has_no_children() {
    let fx = setup();
    fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();
    let folders = fx.manager.folders_for_user("bob").unwrap();
    assert!(folders[0].child("a.txt").unwrap().children().is_err());
    assert!(folders[0].child("nope.txt").unwrap_err().is_not_found());
}

#[test]
fn test_invalid_node_aborts_listing() {
    let fx = setup();
    let broken = with_connection(&fx.state, |conn| {
        let home = file_cache::get_storage_numeric_id(conn, "home::alice")?.unwrap();
        put_entry(conn, home, "broken", "", 0, 1)
    })
    .unwrap();
    fx.manager.create("alice", "bob", "/one", &[fx.a, broken]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    let err = folders[0].children().unwrap_err();
    assert!(matches!(err, virtualfolder::VirtualFolderError::InvalidNode(_)));
}

#[test]
fn test_rename_keeps_membership() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    let mut node = folders[0].child("a.txt").unwrap();
    node.rename("renamed.txt").unwrap();
    assert_eq!(node.name(), "renamed.txt");
    assert_eq!(node.stat().path, "/alice/files/renamed.txt");

    assert!(fx.manager.get(id).unwrap().unwrap().source_file_ids.contains(&fx.a));
    let folders = fx.manager.folders_for_user("bob").unwrap();
    assert_eq!(names(&folders[0].children().unwrap()), vec!["renamed.txt"]);
}

#[test]
fn test_root_index_maps_each_folder_once() {
    let fx = setup();
    let one = fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();
    let two = fx.manager.create("alice", "alice", "/two", &[]).unwrap();

    let index = fx.manager.root_index().unwrap();
    assert_eq!(index.len(), 2);

    let root_one = root_entry_of(&fx.state, one);
    let root_two = root_entry_of(&fx.state, two);
    assert_ne!(root_one, root_two);
    assert_eq!(index.folder_for_root(root_one).unwrap().id, one);
    assert_eq!(index.folder_for_root(root_two).unwrap().id, two);
    assert!(index.folder_for_root(root_two).unwrap().source_file_ids.is_empty());
    assert!(!index.is_virtual_root(fx.a));
}

#[test]
fn test_delete_folder_removes_storage() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();
    let keep = fx.manager.create("alice", "bob", "/two", &[fx.a]).unwrap();

    assert!(fx.manager.delete(id).unwrap());
    assert!(fx.manager.get(id).unwrap().is_none());
    assert!(!fx.manager.delete(id).unwrap());

    let index = fx.manager.root_index().unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.sorted()[0].1.id, keep);
    let storage = with_connection(&fx.state, |conn| {
        file_cache::get_storage_numeric_id(conn, &virtual_storage_id(id))
    })
    .unwrap();
    assert!(storage.is_none());

    // The mount point is free again
    fx.manager.create("alice", "bob", "/one", &[fx.b]).unwrap();
}

#[test]
fn test_set_mount_point_moves_mount() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();
    assert!(fx.manager.set_mount_point(id, "/moved").unwrap());
    assert!(!fx.manager.set_mount_point(id + 1, "/moved").unwrap());

    assert_eq!(fx.manager.get(id).unwrap().unwrap().mount_point, "/moved");
    let nodes = DbRootFolder::new(Arc::clone(&fx.state)).get_by_id("bob", fx.a).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].path, "/moved/a.txt");
}

#[test]
fn test_add_and_remove_file() {
    let fx = setup();
    let id = fx.manager.create("alice", "bob", "/one", &[]).unwrap();

    fx.manager.add_file(id, fx.b).unwrap();
    fx.manager.add_file(id, fx.b).unwrap();
    fx.manager.add_file(id, fx.a).unwrap();
    let folder = fx.manager.get(id).unwrap().unwrap();
    assert_eq!(folder.source_file_ids.iter().copied().collect::<Vec<_>>(), vec![fx.a, fx.b]);

    assert!(fx.manager.remove_file(id, fx.a).unwrap());
    assert!(!fx.manager.remove_file(id, fx.a).unwrap());
    assert_eq!(fx.manager.get(id).unwrap().unwrap().source_file_ids.len(), 1);
}

#[test]
fn test_failed_setup_leaves_no_folder_behind() {
    let fx = setup();
    with_connection(&fx.state, |conn| {
        conn.execute_batch("DROP TABLE mounts")?;
        Ok(())
    })
    .unwrap();

    assert!(fx.manager.create("alice", "bob", "/one", &[fx.a]).is_err());
    assert!(fx.manager.all_folders().unwrap().is_empty());
    let storage = with_connection(&fx.state, |conn| {
        file_cache::get_storage_numeric_id(conn, &virtual_storage_id(1))
    })
    .unwrap();
    assert!(storage.is_none());

    // Once the schema is back the same mount point can be used
    with_connection(&fx.state, |conn| create_tables(conn)).unwrap();
    let id = fx.manager.create("alice", "bob", "/one", &[fx.a]).unwrap();
    assert_eq!(fx.manager.root_index().unwrap().len(), 1);
    assert_eq!(fx.manager.get(id).unwrap().unwrap().mount_point, "/one");
}

#[test]
fn test_top_level_file_content_is_the_source_file() {
    let fx = setup();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.txt"), b"draft").unwrap();
    let report = with_connection(&fx.state, |conn| {
        let local = register_storage(conn, &format!("{}{}", LOCAL_STORAGE_PREFIX, dir.path().display()))?;
        put_entry(conn, local, "", DIRECTORY_MIMETYPE, 0, 1)?;
        let report = put_entry(conn, local, "report.txt", "text/plain", 5, 1)?;
        add_mount(conn, "alice", local, "/alice/work")?;
        Ok(report)
    })
    .unwrap();
    fx.manager.create("alice", "bob", "/from-alice", &[report, fx.docs]).unwrap();

    let folders = fx.manager.folders_for_user("bob").unwrap();
    let mut node = folders[0].child("report.txt").unwrap();
    assert!(node.is_top_level());
    assert_eq!(node.get().unwrap(), b"draft");

    node.put(b"final version").unwrap();
    assert_eq!(node.stat().size, 13);
    assert_eq!(std::fs::read(dir.path().join("report.txt")).unwrap(), b"final version");

    // Same file id, so it stays in the folder with the new size
    let folders = fx.manager.folders_for_user("bob").unwrap();
    let node = folders[0].child("report.txt").unwrap();
    assert_eq!(node.stat().file_id, report);
    assert_eq!(node.stat().size, 13);

    assert!(folders[0].child("docs").unwrap().get().is_err());
}
