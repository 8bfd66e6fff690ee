use crate::store::Record;

use super::*;

#[test]
fn test_doc_insert_and_flags() {
    let mut doc = Doc::new(b"d");
    assert!(!doc.exists());
    assert_eq!(doc.revid(), None);

    assert_eq!(doc.insert_revision(b"1-a", b"{\"x\":1}", false, false, false).unwrap(), 1);
    assert!(doc.exists());
    assert!(!doc.is_deleted());
    assert!(!doc.is_conflicted());
    assert_eq!(doc.revid().unwrap(), b"1-a");
    assert_eq!(doc.selected_rev().unwrap().revid(), b"1-a");

    assert_eq!(doc.insert_revision(b"2-b", b"{\"x\":2}", false, false, false).unwrap(), 1);
    assert_eq!(doc.revid().unwrap(), b"2-b");

    // duplicate insert is a no-op.
    assert_eq!(doc.insert_revision(b"2-b", b"{\"x\":2}", false, false, false).unwrap(), 0);

    // branching off 1-a: refused without allow_conflict, flagged with it.
    doc.select_revision(b"1-a").unwrap();
    assert_eq!(
        doc.insert_revision(b"2-c", b"{\"x\":3}", false, false, false).unwrap_err(),
        Error::Conflict(String::default(), String::default())
    );
    assert_eq!(doc.insert_revision(b"2-c", b"{\"x\":3}", false, false, true).unwrap(), 1);
    assert!(doc.is_conflicted());

    // tombstoning one branch resolves the conflict.
    doc.select_revision(b"2-c").unwrap();
    assert_eq!(doc.insert_revision(b"3-d", b"", true, false, true).unwrap(), 1);
    assert!(!doc.is_conflicted());
    assert!(!doc.is_deleted());
    assert_eq!(doc.revid().unwrap(), b"2-b");

    // tombstoning the last live branch deletes the document.
    doc.select_revision(b"2-b").unwrap();
    assert_eq!(doc.insert_revision(b"3-e", b"", true, false, false).unwrap(), 1);
    assert!(doc.is_deleted());
}

#[test]
fn test_doc_attachments_flag() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"x", false, true, false).unwrap();
    assert!(doc.has_attachments());
    assert!(doc.selected_rev().unwrap().has_attachments());

    doc.insert_revision(b"2-b", b"y", false, false, false).unwrap();
    assert!(!doc.has_attachments());
}

#[test]
fn test_doc_history_insert() {
    let mut doc = Doc::new(b"d");
    let history: Vec<&[u8]> = vec![b"3-z", b"2-y", b"1-x"];
    let added = doc
        .insert_revision_with_history(b"{\"v\":3}", false, false, &history)
        .unwrap();
    assert_eq!(added, 3);
    assert_eq!(doc.revid().unwrap(), b"3-z");
    assert_eq!(doc.selected_rev().unwrap().revid(), b"3-z");
    assert!(doc.exists());
}

#[test]
fn test_doc_selection_cursor() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    doc.insert_revision(b"2-b", b"v2", false, false, false).unwrap();
    doc.select_revision(b"1-a").unwrap();
    doc.insert_revision(b"2-c", b"v3", false, false, true).unwrap();

    assert!(doc.select_current_revision());
    assert_eq!(doc.selected_rev().unwrap().revid(), b"2-c");

    assert!(doc.select_parent_revision());
    assert_eq!(doc.selected_rev().unwrap().revid(), b"1-a");
    assert!(!doc.select_parent_revision());

    // walk every revision in canonical order.
    doc.select_current_revision();
    let mut seen = vec![doc.selected_rev().unwrap().revid().to_vec()];
    while doc.select_next_revision() {
        seen.push(doc.selected_rev().unwrap().revid().to_vec());
    }
    assert_eq!(seen, vec![b"2-c".to_vec(), b"2-b".to_vec(), b"1-a".to_vec()]);

    // leaf walk skips the ancestor.
    doc.select_current_revision();
    assert!(doc.select_next_leaf_revision(false));
    assert_eq!(doc.selected_rev().unwrap().revid(), b"2-b");
    assert!(!doc.select_next_leaf_revision(false));

    assert_eq!(
        doc.select_revision(b"9-zz").unwrap_err(),
        Error::UnknownRevision(String::default(), String::default())
    );
}

#[test]
fn test_doc_select_next_leaf_deleted() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    doc.insert_revision(b"2-b", b"v2", false, false, false).unwrap();
    doc.select_revision(b"1-a").unwrap();
    doc.insert_revision(b"2-c", b"", true, false, true).unwrap();

    doc.select_current_revision();
    assert!(!doc.select_next_leaf_revision(false));

    doc.select_current_revision();
    assert!(doc.select_next_leaf_revision(true));
    assert_eq!(doc.selected_rev().unwrap().revid(), b"2-c");
}

#[test]
fn test_doc_purge() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    doc.insert_revision(b"2-b", b"v2", false, false, false).unwrap();
    doc.insert_revision(b"3-c", b"v3", false, false, false).unwrap();

    let n = doc.purge_revision(b"3-c").unwrap();
    assert_eq!(n, 3);
    assert!(!doc.exists());
    assert_eq!(doc.flags(), 0);
    assert!(doc.selected_rev().is_none());
}

#[test]
fn test_doc_meta_roundtrip() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    doc.insert_revision(b"2-b", b"v2", false, false, false).unwrap();
    doc.select_revision(b"1-a").unwrap();
    doc.insert_revision(b"2-c", b"v3", true, false, true).unwrap();
    doc.set_doc_type(b"widget");
    doc.mark_saved(7);

    let (meta, body) = doc.to_meta_body().unwrap();
    let record = Record {
        store: "docs".to_string(),
        key: b"d".to_vec(),
        meta,
        body: Some(body),
        seqno: 7,
        deleted: false,
    };

    let loaded = Doc::from_record(&record).unwrap();
    assert_eq!(loaded.id(), b"d");
    assert_eq!(loaded.seqno(), 7);
    assert_eq!(loaded.doc_type(), b"widget");
    assert_eq!(loaded.revid().unwrap(), b"2-b");
    assert!(loaded.exists());
    assert!(!loaded.is_conflicted()); // 2-c is a tombstone
    assert_eq!(loaded.tree().len(), 3);

    // bodies, flags and parents survive the trip.
    let tree = loaded.tree();
    let leaf = tree.rev(tree.index_of(b"2-b").unwrap()).unwrap();
    assert_eq!(leaf.body().unwrap(), b"v2");
    assert_eq!(leaf.seqno(), 7);
    assert!(leaf.is_leaf());
    assert!(!leaf.is_new());
    let root = tree.rev(tree.index_of(b"1-a").unwrap()).unwrap();
    assert_eq!(root.body().unwrap(), b"v1");
    assert!(!root.is_leaf());
    let tomb = tree.rev(tree.index_of(b"2-c").unwrap()).unwrap();
    assert!(tomb.is_deleted());
    assert_eq!(tree.rev(tomb.parent.unwrap()).unwrap().revid(), b"1-a");
}

#[test]
fn test_doc_meta_only_load() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    doc.insert_revision(b"2-b", b"v2", false, false, false).unwrap();
    doc.mark_saved(3);
    let (meta, body) = doc.to_meta_body().unwrap();

    let record = Record {
        store: "docs".to_string(),
        key: b"d".to_vec(),
        meta,
        body: None,
        seqno: 3,
        deleted: false,
    };
    let mut loaded = Doc::from_record(&record).unwrap();
    assert_eq!(loaded.revid().unwrap(), b"2-b");
    assert_eq!(loaded.selected_rev().unwrap().body(), None);
    assert!(loaded.has_revision_body());
    assert!(loaded.needs_bodies());

    loaded.fill_bodies(&body).unwrap();
    assert_eq!(loaded.selected_rev().unwrap().body().unwrap(), b"v2");
    assert!(!loaded.needs_bodies());
}

#[test]
fn test_doc_new_flag_cleared_on_save_only() {
    let mut doc = Doc::new(b"d");
    doc.insert_revision(b"1-a", b"v1", false, false, false).unwrap();
    assert!(doc.selected_rev().unwrap().is_new());
    assert_eq!(doc.selected_rev().unwrap().seqno(), 0);

    doc.mark_saved(9);
    assert!(!doc.selected_rev().unwrap().is_new());
    assert_eq!(doc.selected_rev().unwrap().seqno(), 9);
    assert_eq!(doc.seqno(), 9);
}

#[test]
fn test_doc_prune_respects_depth() {
    let mut doc = Doc::new(b"d");
    for g in 1..=5 {
        let revid = format!("{}-r", g);
        doc.insert_revision(revid.as_bytes(), b"v", false, false, false).unwrap();
    }
    let n = doc.prune(2);
    assert_eq!(n, 3);
    assert_eq!(doc.tree().len(), 2);
    assert_eq!(doc.revid().unwrap(), b"5-r");
}
