use super::*;

fn linear_tree() -> RevTree {
    // 1-a <- 2-b <- 3-c
    let mut tree = RevTree::default();
    tree.insert(b"1-a", b"v1".to_vec(), false, false, false, None).unwrap();
    tree.insert(b"2-b", b"v2".to_vec(), false, false, false, Some(b"1-a")).unwrap();
    tree.insert(b"3-c", b"v3".to_vec(), false, false, false, Some(b"2-b")).unwrap();
    tree
}

#[test]
fn test_tree_insert_linear() {
    let tree = linear_tree();
    assert_eq!(tree.len(), 3);

    // canonical order: the active leaf first, ancestors by generation.
    assert_eq!(tree.rev(0).unwrap().revid(), b"3-c");
    assert_eq!(tree.rev(1).unwrap().revid(), b"2-b");
    assert_eq!(tree.rev(2).unwrap().revid(), b"1-a");

    assert!(tree.rev(0).unwrap().is_leaf());
    assert!(!tree.rev(1).unwrap().is_leaf());
    assert!(tree.rev(0).unwrap().is_new());
    assert_eq!(tree.n_active_leaves(), 1);

    // parent links survive the ordering.
    let leaf = tree.rev(0).unwrap();
    assert_eq!(tree.rev(leaf.parent.unwrap()).unwrap().revid(), b"2-b");
}

#[test]
fn test_tree_conflict_policy() {
    let mut tree = linear_tree();

    // branching off a non-leaf requires allow_conflict.
    assert_eq!(
        tree.insert(b"3-x", b"vx".to_vec(), false, false, false, Some(b"2-b"))
            .unwrap_err(),
        Error::Conflict(String::default(), String::default())
    );
    tree.insert(b"3-x", b"vx".to_vec(), false, false, true, Some(b"2-b")).unwrap();
    assert_eq!(tree.n_active_leaves(), 2);

    // a second root also needs allow_conflict.
    assert_eq!(
        tree.insert(b"1-root2", b"".to_vec(), false, false, false, None).unwrap_err(),
        Error::Conflict(String::default(), String::default())
    );

    // duplicate revid is refused.
    assert_eq!(
        tree.insert(b"3-c", b"v3".to_vec(), false, false, true, Some(b"2-b"))
            .unwrap_err(),
        Error::RevIDExists(String::default(), String::default())
    );

    // unknown parent is refused.
    assert_eq!(
        tree.insert(b"4-y", b"".to_vec(), false, false, true, Some(b"9-nope"))
            .unwrap_err(),
        Error::UnknownRevision(String::default(), String::default())
    );
}

#[test]
fn test_tree_current_rev_ranking() {
    let mut tree = linear_tree();
    tree.insert(b"3-x", b"vx".to_vec(), false, false, true, Some(b"2-b")).unwrap();

    // two active leaves at the same generation: higher revid wins.
    assert_eq!(tree.rev(0).unwrap().revid(), b"3-x");

    // tombstoning the winner moves the crown to the other leaf.
    let index = tree.index_of(b"3-x").unwrap();
    tree.rev_mut(index).unwrap().flags |= crate::doc::REV_DELETED;
    tree.sort();
    assert_eq!(tree.rev(0).unwrap().revid(), b"3-c");
    assert_eq!(tree.n_active_leaves(), 1);
}

#[test]
fn test_tree_insert_history_empty() {
    let mut tree = RevTree::default();
    let history: Vec<&[u8]> = vec![b"3-z", b"2-y", b"1-x"];
    let added = tree.insert_history(&history, b"body".to_vec(), false, false).unwrap();
    assert_eq!(added, 3);

    assert_eq!(tree.rev(0).unwrap().revid(), b"3-z");
    assert!(tree.rev(0).unwrap().is_leaf());
    assert_eq!(tree.rev(0).unwrap().body().unwrap(), b"body");

    // ancestors carry no body and are not leaves.
    let mid = tree.index_of(b"2-y").unwrap();
    assert!(!tree.rev(mid).unwrap().is_leaf());
    assert!(tree.rev(mid).unwrap().body().is_none());
    assert!(tree.rev(mid).unwrap().is_new());

    // the chain is linked 3-z -> 2-y -> 1-x -> root.
    let leaf = tree.index_of(b"3-z").unwrap();
    let mid = tree.rev(leaf).unwrap().parent.unwrap();
    assert_eq!(tree.rev(mid).unwrap().revid(), b"2-y");
    let root = tree.rev(mid).unwrap().parent.unwrap();
    assert_eq!(tree.rev(root).unwrap().revid(), b"1-x");
    assert_eq!(tree.rev(root).unwrap().parent, None);
}

#[test]
fn test_tree_insert_history_graft() {
    let mut tree = linear_tree();

    // 5-q and 4-p are new, 3-c is the attachment point.
    let history: Vec<&[u8]> = vec![b"5-q", b"4-p", b"3-c", b"2-b"];
    let added = tree.insert_history(&history, b"v5".to_vec(), false, false).unwrap();
    assert_eq!(added, 2);
    assert_eq!(tree.len(), 5);

    assert_eq!(tree.rev(0).unwrap().revid(), b"5-q");
    let attach = tree.index_of(b"3-c").unwrap();
    assert!(!tree.rev(attach).unwrap().is_leaf());

    // the new revision is already known: nothing to add.
    let added = tree.insert_history(&history, b"v5".to_vec(), false, false).unwrap();
    assert_eq!(added, 0);

    // no common ancestor: the chain becomes a second root.
    let history: Vec<&[u8]> = vec![b"2-bb", b"1-aa"];
    let added = tree.insert_history(&history, b"vb".to_vec(), false, false).unwrap();
    assert_eq!(added, 2);
    let root = tree.index_of(b"1-aa").unwrap();
    assert_eq!(tree.rev(root).unwrap().parent, None);
    assert_eq!(tree.n_active_leaves(), 2);
}

#[test]
fn test_tree_purge_linear() {
    let mut tree = linear_tree();
    let n = tree.purge(b"3-c").unwrap();
    assert_eq!(n, 3);
    assert!(tree.is_empty());
}

#[test]
fn test_tree_purge_branch() {
    let mut tree = linear_tree();
    tree.insert(b"3-x", b"vx".to_vec(), false, false, true, Some(b"2-b")).unwrap();

    // purging one branch stops at the shared ancestor.
    let n = tree.purge(b"3-x").unwrap();
    assert_eq!(n, 1);
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.index_of(b"3-x"), None);
    assert_eq!(tree.rev(0).unwrap().revid(), b"3-c");

    // non-leaves cannot be purged.
    assert_eq!(
        tree.purge(b"2-b").unwrap_err(),
        Error::NotALeaf(String::default(), String::default())
    );
    assert_eq!(
        tree.purge(b"9-zz").unwrap_err(),
        Error::UnknownRevision(String::default(), String::default())
    );
}

#[test]
fn test_tree_prune() {
    let mut tree = RevTree::default();
    let ids: Vec<Vec<u8>> = (1..=6).map(|g| format!("{}-r", g).into_bytes()).collect();
    tree.insert(&ids[0], b"".to_vec(), false, false, false, None).unwrap();
    for (parent, id) in ids.iter().zip(ids[1..].iter()) {
        tree.insert(id, b"".to_vec(), false, false, false, Some(parent.as_slice()))
            .unwrap();
    }
    assert_eq!(tree.len(), 6);

    let n = tree.prune(3);
    assert_eq!(n, 3);
    assert_eq!(tree.len(), 3);

    // the oldest retained revision became a root.
    let root = tree.index_of(b"4-r").unwrap();
    assert_eq!(tree.rev(root).unwrap().parent, None);
    assert_eq!(tree.rev(0).unwrap().revid(), b"6-r");

    // pruning to a depth the tree already satisfies is a no-op.
    assert_eq!(tree.prune(3), 0);
}

#[test]
fn test_tree_prune_shared_ancestry() {
    // two branches off 1-a; depth 2 keeps each branch's tip + parent.
    let mut tree = RevTree::default();
    tree.insert(b"1-a", b"".to_vec(), false, false, false, None).unwrap();
    tree.insert(b"2-b", b"".to_vec(), false, false, false, Some(b"1-a")).unwrap();
    tree.insert(b"3-c", b"".to_vec(), false, false, false, Some(b"2-b")).unwrap();
    tree.insert(b"2-x", b"".to_vec(), false, false, true, Some(b"1-a")).unwrap();

    let n = tree.prune(2);
    // 1-a stays: it is within depth 2 of the 2-x leaf.
    assert_eq!(n, 0);

    let n = tree.prune(1);
    assert_eq!(n, 2);
    assert_eq!(tree.index_of(b"1-a"), None);
    assert_eq!(tree.index_of(b"2-b"), None);
    assert_eq!(tree.rev(tree.index_of(b"3-c").unwrap()).unwrap().parent, None);
    assert_eq!(tree.rev(tree.index_of(b"2-x").unwrap()).unwrap().parent, None);
}
