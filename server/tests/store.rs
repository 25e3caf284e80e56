use server::{ServerError, Store};

fn store_with_user() -> (Store, i64) {
    let store = Store::open_in_memory().unwrap();
    let user = store.create_user("alice", "hunter2").unwrap();
    (store, user.id)
}

#[test]
fn users_round_trip_and_password_check() {
    let store = Store::open_in_memory().unwrap();
    let user = store.create_user("alice", "hunter2").unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(user.salt.len(), 15);

    let loaded = store.get_user("alice").unwrap().unwrap();
    assert!(loaded.check_password("hunter2"));
    assert!(!loaded.check_password("wrong"));
    assert!(store.get_user("bob").unwrap().is_none());

    let err = store.create_user("alice", "again").unwrap_err();
    assert!(matches!(err, ServerError::UserExists));
}

#[test]
fn sessions_are_scoped_to_user_and_token() {
    let store = Store::open_in_memory().unwrap();
    let alice = store.create_user("alice", "pw").unwrap();
    let bob = store.create_user("bob", "pw").unwrap();

    let session = store.create_session(&alice, "laptop").unwrap();
    assert_eq!(session.computer_name, "laptop");

    assert!(store.get_session(alice.id, &session.token).unwrap().is_some());
    assert!(store.get_session(alice.id, "bogus").unwrap().is_none());
    assert!(store.get_session(bob.id, &session.token).unwrap().is_none());
}

#[test]
fn create_file_requires_parent_folder() {
    let (mut store, user) = store_with_user();

    let err = store
        .create_file(user, "/dir/a.txt", false, true, "u-1", 1, "aa")
        .unwrap_err();
    assert!(matches!(err, ServerError::ParentMissing(_)));

    store.create_folder(user, "/dir").unwrap();
    let (file, rev) = store
        .create_file(user, "/dir/a.txt", false, true, "u-1", 1, "aa")
        .unwrap();
    assert_eq!(file.path, "/dir/a.txt");
    assert_eq!(file.parent, "/dir");
    assert_eq!(file.current_revision_id, rev.id);
    assert_eq!(rev.file_id, file.id);
}

#[test]
fn paths_are_case_insensitive_but_names_keep_case() {
    let (mut store, user) = store_with_user();
    let (file, rev) = store
        .create_file(user, "/Report.TXT", false, true, "u-1", 1, "aa")
        .unwrap();
    assert_eq!(file.path, "/report.txt");
    assert_eq!(rev.name, "Report.TXT");
    assert!(store.get_file_by_path(user, "/report.txt").unwrap().is_some());
}

#[test]
fn create_without_overwrite_conflicts_unless_removed() {
    let (mut store, user) = store_with_user();
    store.create_folder(user, "/dir").unwrap();

    let err = store.create_folder(user, "/dir").unwrap_err();
    assert!(matches!(err, ServerError::AlreadyExists(_)));

    // A tombstoned path can be re-created without overwrite.
    store.remove(user, "/dir").unwrap();
    let (file, _) = store.create_folder(user, "/dir").unwrap();
    assert!(!file.is_removed);
}

#[test]
fn folder_create_remove_create_yields_three_revisions() {
    let (mut store, user) = store_with_user();
    let (_, r1) = store.create_folder(user, "/dir").unwrap();
    let (_, r2) = store.remove(user, "/dir").unwrap();
    let (file, r3) = store.create_folder(user, "/dir").unwrap();

    assert!(r1.id < r2.id && r2.id < r3.id);
    assert!(!file.is_removed);
    assert_eq!(file.current_revision_id, r3.id);
}

#[test]
fn duplicate_uploads_produce_distinct_revisions() {
    let (mut store, user) = store_with_user();
    let r1 = store.create_revision(user, "/x.txt", "u-1", 4, "cafe").unwrap();
    let r2 = store.create_revision(user, "/x.txt", "u-2", 4, "cafe").unwrap();

    assert!(r2.id > r1.id);
    assert_eq!(r1.hash, r2.hash);
    assert_eq!(r1.size, r2.size);

    let file = store.get_file_by_path(user, "/x.txt").unwrap().unwrap();
    assert_eq!(file.current_revision_id, r2.id);
    assert_eq!(store.revisions_for_file(file.id).unwrap().len(), 2);
}

#[test]
fn changes_from_cursor_orders_and_advances() {
    let (mut store, user) = store_with_user();
    assert_eq!(store.changes_from_cursor(user, 0).unwrap(), (Vec::new(), 0));

    let (_, ra) = store.create_file(user, "/a.txt", false, true, "u-a", 1, "aa").unwrap();
    let (_, rb) = store.create_file(user, "/b.txt", false, true, "u-b", 2, "bb").unwrap();

    let (entries, cursor) = store.changes_from_cursor(user, 0).unwrap();
    assert_eq!(cursor, rb.id);
    let paths: Vec<_> = entries
        .iter()
        .flat_map(|e| e.keys().cloned())
        .collect();
    assert_eq!(paths, vec!["/a.txt".to_string(), "/b.txt".to_string()]);

    // Polling from a later cursor returns a strict suffix.
    let (entries, cursor2) = store.changes_from_cursor(user, ra.id).unwrap();
    assert_eq!(cursor2, rb.id);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains_key("/b.txt"));

    let (entries, _) = store.changes_from_cursor(user, rb.id).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn changes_are_per_user() {
    let store = Store::open_in_memory().unwrap();
    let alice = store.create_user("alice", "pw").unwrap();
    let bob = store.create_user("bob", "pw").unwrap();
    let mut store = store;

    store.create_file(alice.id, "/a.txt", false, true, "u-a", 1, "aa").unwrap();
    let (_, rb) = store.create_file(bob.id, "/b.txt", false, true, "u-b", 1, "bb").unwrap();

    let (entries, cursor) = store.changes_from_cursor(bob.id, 0).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains_key("/b.txt"));
    assert_eq!(cursor, rb.id);
}

#[test]
fn removing_a_directory_tombstones_children_with_one_entry() {
    let (mut store, user) = store_with_user();
    store.create_folder(user, "/dir").unwrap();
    store.create_file(user, "/dir/x", false, true, "u-x", 1, "xx").unwrap();
    let (_, before) = store.create_file(user, "/dir/y", false, true, "u-y", 1, "yy").unwrap();

    store.remove(user, "/dir").unwrap();

    for path in ["/dir", "/dir/x", "/dir/y"] {
        let file = store.get_file_by_path(user, path).unwrap().unwrap();
        assert!(file.is_removed, "{path} should be tombstoned");
    }

    // Only the directory itself surfaces in the delta, as a tombstone.
    let (entries, cursor) = store.changes_from_cursor(user, before.id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("/dir"), Some(&None));
    assert!(cursor > before.id);
}

#[test]
fn remove_missing_path_is_not_found() {
    let (mut store, user) = store_with_user();
    let err = store.remove(user, "/nope").unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
}

#[test]
fn current_state_lists_only_live_root_children() {
    let (mut store, user) = store_with_user();
    store.create_folder(user, "/dir").unwrap();
    store.create_file(user, "/dir/nested", false, true, "u-n", 1, "nn").unwrap();
    store.create_file(user, "/top.txt", false, true, "u-t", 1, "tt").unwrap();
    store.create_file(user, "/gone.txt", false, true, "u-g", 1, "gg").unwrap();
    store.remove(user, "/gone.txt").unwrap();

    let entries = store.current_state(user).unwrap();
    let paths: Vec<_> = entries.iter().flat_map(|e| e.keys().cloned()).collect();
    assert_eq!(paths, vec!["/dir".to_string(), "/top.txt".to_string()]);
}

#[test]
fn revision_lookup_by_size_and_hash() {
    let (mut store, user) = store_with_user();
    let r1 = store.create_revision(user, "/x", "u-1", 3, "aaa").unwrap();
    store.create_revision(user, "/x", "u-2", 5, "bbb").unwrap();

    let file = store.get_file_by_path(user, "/x").unwrap().unwrap();
    let found = store.revision_by_size_and_hash(file.id, 3, "aaa").unwrap().unwrap();
    assert_eq!(found.id, r1.id);
    assert!(store.revision_by_size_and_hash(file.id, 3, "zzz").unwrap().is_none());
}

#[test]
fn revision_lookup_is_scoped_to_file() {
    let (mut store, user) = store_with_user();
    let ra = store.create_revision(user, "/a", "u-a", 1, "aa").unwrap();
    store.create_revision(user, "/b", "u-b", 1, "bb").unwrap();

    let file_b = store.get_file_by_path(user, "/b").unwrap().unwrap();
    assert!(store.revision(&file_b, ra.id).unwrap().is_none());
}

#[test]
fn metadata_projection_matches_revision() {
    let (mut store, user) = store_with_user();
    let rev = store.create_revision(user, "/Doc.txt", "u-1", 7, "beef").unwrap();
    let meta = store.metadata_for_revision(rev.id).unwrap();

    assert_eq!(meta.rev, rev.id);
    assert_eq!(meta.path, "/doc.txt");
    assert_eq!(meta.name, "Doc.txt");
    assert_eq!(meta.size, 7);
    assert_eq!(meta.hash, "beef");
    assert!(!meta.is_dir);
    assert!(!meta.is_removed);
}
