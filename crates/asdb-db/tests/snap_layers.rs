//! どこで: snapshot層の結合テスト / 何を: diff解決・destructマスク・cap flatten / なぜ: trie迂回読みの正しさを固定するため

use alloy_primitives::B256;
use asdb_db::snap::SnapError;
use asdb_db::SnapshotTree;
use std::collections::{HashMap, HashSet};

fn root(tag: u8) -> B256 {
    B256::repeat_byte(tag)
}

fn accounts(entries: &[(B256, &[u8])]) -> HashMap<B256, Vec<u8>> {
    entries.iter().map(|(k, v)| (*k, v.to_vec())).collect()
}

#[test]
fn reads_resolve_through_the_layer_chain() {
    let tree = SnapshotTree::new(root(0));
    let a = B256::repeat_byte(0xaa);
    let b = B256::repeat_byte(0xbb);

    tree.update(
        root(1),
        root(0),
        HashSet::new(),
        accounts(&[(a, b"alpha")]),
        HashMap::new(),
    )
    .expect("layer 1");
    tree.update(
        root(2),
        root(1),
        HashSet::new(),
        accounts(&[(b, b"beta")]),
        HashMap::new(),
    )
    .expect("layer 2");

    let snap2 = tree.snapshot(root(2)).expect("snapshot");
    assert_eq!(snap2.account(a).expect("read"), Some(b"alpha".to_vec()));
    assert_eq!(snap2.account(b).expect("read"), Some(b"beta".to_vec()));

    let snap1 = tree.snapshot(root(1)).expect("snapshot");
    assert_eq!(snap1.account(b).expect("read"), None);

    assert!(tree.snapshot(root(9)).is_none());
}

#[test]
fn destruct_masks_lower_layers_until_recreated() {
    let tree = SnapshotTree::new(root(0));
    let a = B256::repeat_byte(0xaa);

    tree.update(
        root(1),
        root(0),
        HashSet::new(),
        accounts(&[(a, b"v1")]),
        HashMap::new(),
    )
    .expect("layer 1");

    let mut destructs = HashSet::new();
    destructs.insert(a);
    tree.update(root(2), root(1), destructs.clone(), HashMap::new(), HashMap::new())
        .expect("layer 2");
    let snap = tree.snapshot(root(2)).expect("snapshot");
    assert_eq!(snap.account(a).expect("read"), None);

    // Destructed and re-created within the same block: the new data wins.
    tree.update(
        root(3),
        root(2),
        destructs,
        accounts(&[(a, b"v2")]),
        HashMap::new(),
    )
    .expect("layer 3");
    let snap = tree.snapshot(root(3)).expect("snapshot");
    assert_eq!(snap.account(a).expect("read"), Some(b"v2".to_vec()));
}

#[test]
fn storage_reads_walk_layers_and_masks() {
    let tree = SnapshotTree::new(root(0));
    let acct = B256::repeat_byte(0xaa);
    let slot = B256::repeat_byte(0x01);

    let mut storage = HashMap::new();
    storage.insert(acct, {
        let mut slots = HashMap::new();
        slots.insert(slot, b"stored".to_vec());
        slots
    });
    tree.update(root(1), root(0), HashSet::new(), HashMap::new(), storage)
        .expect("layer 1");

    let snap = tree.snapshot(root(1)).expect("snapshot");
    assert_eq!(snap.storage(acct, slot).expect("read"), Some(b"stored".to_vec()));

    let mut destructs = HashSet::new();
    destructs.insert(acct);
    tree.update(root(2), root(1), destructs, HashMap::new(), HashMap::new())
        .expect("layer 2");
    let snap = tree.snapshot(root(2)).expect("snapshot");
    assert_eq!(snap.storage(acct, slot).expect("read"), None);
}

#[test]
fn cap_flattens_old_layers_into_the_base() {
    let tree = SnapshotTree::new(root(0));
    let a = B256::repeat_byte(0xaa);
    let b = B256::repeat_byte(0xbb);
    let c = B256::repeat_byte(0xcc);

    tree.update(root(1), root(0), HashSet::new(), accounts(&[(a, b"v1")]), HashMap::new())
        .expect("layer 1");
    tree.update(root(2), root(1), HashSet::new(), accounts(&[(b, b"v2")]), HashMap::new())
        .expect("layer 2");
    tree.update(root(3), root(2), HashSet::new(), accounts(&[(c, b"v3")]), HashMap::new())
        .expect("layer 3");

    tree.cap(root(3), 1).expect("cap");
    assert_eq!(tree.base_root(), root(2));
    assert_eq!(tree.layer_count(), 1);

    let snap = tree.snapshot(root(3)).expect("snapshot");
    assert_eq!(snap.account(a).expect("read"), Some(b"v1".to_vec()));
    assert_eq!(snap.account(b).expect("read"), Some(b"v2".to_vec()));
    assert_eq!(snap.account(c).expect("read"), Some(b"v3".to_vec()));

    // Flattened roots are no longer addressable.
    assert!(tree.snapshot(root(1)).is_none());
}

#[test]
fn cap_applies_destructs_to_the_base() {
    let tree = SnapshotTree::new(root(0));
    let a = B256::repeat_byte(0xaa);

    tree.update(root(1), root(0), HashSet::new(), accounts(&[(a, b"v1")]), HashMap::new())
        .expect("layer 1");
    let mut destructs = HashSet::new();
    destructs.insert(a);
    tree.update(root(2), root(1), destructs, HashMap::new(), HashMap::new())
        .expect("layer 2");

    tree.cap(root(2), 0).expect("cap");
    assert_eq!(tree.base_root(), root(2));
    let snap = tree.snapshot(root(2)).expect("snapshot");
    assert_eq!(snap.account(a).expect("read"), None);
}

#[test]
fn unknown_parent_is_rejected() {
    let tree = SnapshotTree::new(root(0));
    let err = tree
        .update(root(5), root(4), HashSet::new(), HashMap::new(), HashMap::new())
        .expect_err("must reject");
    assert_eq!(err, SnapError::UnknownParent);
    assert_eq!(
        tree.cap(root(7), 8).expect_err("unknown root"),
        SnapError::UnknownRoot
    );
}
