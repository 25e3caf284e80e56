use client::{FileState, StateDb};
use models::Metadata;

fn sample(path: &str, rev: i64, synced: bool) -> FileState {
    FileState {
        id: 0,
        path: path.to_string(),
        name: toolkit::basename(path),
        parent: toolkit::parent_dir(path),
        is_dir: false,
        is_removed: false,
        size: 3,
        hash: "aa".to_string(),
        modification_time: 1_700_000_000,
        current_revision: rev,
        parent_revision: 0,
        synced,
    }
}

#[test]
fn save_inserts_then_updates_by_path() {
    let db = StateDb::open_in_memory().unwrap();
    db.save(&sample("/a.txt", 1, false)).unwrap();

    let loaded = db.get_file_by_path("/a.txt").unwrap().unwrap();
    assert_eq!(loaded.current_revision, 1);
    assert!(!loaded.synced);

    let mut updated = loaded.clone();
    updated.current_revision = 2;
    updated.synced = true;
    db.save(&updated).unwrap();

    let loaded = db.get_file_by_path("/a.txt").unwrap().unwrap();
    assert_eq!(loaded.current_revision, 2);
    assert!(loaded.synced);
    assert!(db.get_file_by_path("/other").unwrap().is_none());
}

#[test]
fn add_file_records_server_metadata() {
    let db = StateDb::open_in_memory().unwrap();
    let meta = Metadata {
        size: 9,
        rev: 4,
        name: "B.txt".to_string(),
        is_dir: false,
        modified: 1_700_000_001,
        is_removed: false,
        path: "/dir/b.txt".to_string(),
        hash: "bb".to_string(),
    };
    db.add_file("/dir/b.txt", &meta, false).unwrap();

    let loaded = db.get_file_by_path("/dir/b.txt").unwrap().unwrap();
    assert_eq!(loaded.name, "B.txt");
    assert_eq!(loaded.parent, "/dir");
    assert_eq!(loaded.current_revision, 4);
    assert!(!loaded.synced);
}

#[test]
fn unsynced_and_not_uploaded_queries() {
    let db = StateDb::open_in_memory().unwrap();
    db.save(&sample("/local-only.txt", 0, true)).unwrap();
    db.save(&sample("/pending.txt", 5, false)).unwrap();
    db.save(&sample("/done.txt", 6, true)).unwrap();

    let not_uploaded = db.get_not_uploaded_files().unwrap();
    assert_eq!(not_uploaded.len(), 1);
    assert_eq!(not_uploaded[0].path, "/local-only.txt");

    let unsynced = db.get_unsynced_files().unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].path, "/pending.txt");

    db.mark_synced("/pending.txt").unwrap();
    assert!(db.get_unsynced_files().unwrap().is_empty());
}

#[test]
fn update_modification_time_only_touches_mtime() {
    let db = StateDb::open_in_memory().unwrap();
    db.save(&sample("/a.txt", 1, true)).unwrap();
    db.update_modification_time("/a.txt", 1_800_000_000).unwrap();

    let loaded = db.get_file_by_path("/a.txt").unwrap().unwrap();
    assert_eq!(loaded.modification_time, 1_800_000_000);
    assert_eq!(loaded.current_revision, 1);
    assert!(loaded.synced);
}

#[test]
fn children_and_recursive_removal() {
    let db = StateDb::open_in_memory().unwrap();
    let mut dir = sample("/dir", 1, true);
    dir.is_dir = true;
    db.save(&dir).unwrap();
    db.save(&sample("/dir/x", 2, true)).unwrap();
    let mut sub = sample("/dir/sub", 3, true);
    sub.is_dir = true;
    db.save(&sub).unwrap();
    db.save(&sample("/dir/sub/deep", 4, true)).unwrap();
    db.save(&sample("/top.txt", 5, true)).unwrap();

    let children = db.get_children("/dir").unwrap();
    let paths: Vec<_> = children.iter().map(|f| f.path.clone()).collect();
    assert_eq!(paths, vec!["/dir/sub".to_string(), "/dir/x".to_string()]);

    db.remove_all("/dir").unwrap();
    assert!(db.get_file_by_path("/dir").unwrap().is_none());
    assert!(db.get_file_by_path("/dir/x").unwrap().is_none());
    assert!(db.get_file_by_path("/dir/sub/deep").unwrap().is_none());
    assert!(db.get_file_by_path("/top.txt").unwrap().is_some());
}

#[test]
fn config_values_default_to_empty() {
    let db = StateDb::open_in_memory().unwrap();
    assert_eq!(db.get_cfg_value("cursor").unwrap(), "");

    db.set_cfg_value("cursor", "42").unwrap();
    assert_eq!(db.get_cfg_value("cursor").unwrap(), "42");

    db.set_cfg_value("cursor", "43").unwrap();
    assert_eq!(db.get_cfg_value("cursor").unwrap(), "43");
}

#[test]
fn metadata_round_trip() {
    let file = sample("/a.txt", 7, true);
    let meta = file.metadata();
    assert_eq!(meta.path, "/a.txt");
    assert_eq!(meta.rev, 7);
    assert_eq!(meta.size, 3);
    assert_eq!(meta.hash, "aa");
    assert_eq!(meta.name, "a.txt");
}
