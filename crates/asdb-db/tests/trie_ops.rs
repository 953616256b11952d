//! どこで: trie結合テスト / 何を: root決定性・削除復元・proof・commit再開 / なぜ: 合意に効くrootの性質を固定するため

use alloy_primitives::{keccak256, B256};
use alloy_trie::EMPTY_ROOT_HASH;
use asdb_db::{NodeDb, Trie};

fn key(tag: u8) -> B256 {
    keccak256([tag])
}

fn value(tag: u8) -> Vec<u8> {
    vec![0x80 + 1, tag]
}

#[test]
fn empty_trie_has_known_root() {
    let trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    assert_eq!(trie.hash(), EMPTY_ROOT_HASH);
}

#[test]
fn insert_then_get() {
    let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    for tag in 0..32u8 {
        trie.update(key(tag), value(tag));
    }
    for tag in 0..32u8 {
        assert_eq!(trie.get(key(tag)).expect("get"), Some(value(tag)));
    }
    assert_eq!(trie.get(key(0xee)).expect("get"), None);
    assert_ne!(trie.hash(), EMPTY_ROOT_HASH);
}

#[test]
fn root_is_independent_of_insertion_order() {
    let mut forward = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    let mut backward = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    for tag in 0..24u8 {
        forward.update(key(tag), value(tag));
    }
    for tag in (0..24u8).rev() {
        backward.update(key(tag), value(tag));
    }
    assert_eq!(forward.hash(), backward.hash());
}

#[test]
fn overwrite_changes_root_deterministically() {
    let mut a = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    let mut b = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    for tag in 0..8u8 {
        a.update(key(tag), value(tag));
        b.update(key(tag), value(tag));
    }
    a.update(key(3), value(0x99));
    b.update(key(3), value(0x99));
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn remove_restores_previous_root() {
    let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    for tag in 0..8u8 {
        trie.update(key(tag), value(tag));
    }
    let before = trie.hash();
    trie.update(key(0x42), value(0x42));
    assert_ne!(trie.hash(), before);
    trie.remove(key(0x42));
    assert_eq!(trie.hash(), before);
    assert_eq!(trie.get(key(0x42)).expect("get"), None);
}

#[test]
fn remove_down_to_empty() {
    let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    trie.update(key(1), value(1));
    trie.update(key(2), value(2));
    trie.remove(key(1));
    trie.remove(key(2));
    assert_eq!(trie.hash(), EMPTY_ROOT_HASH);
}

#[test]
fn commit_persists_and_reopens() {
    let db = NodeDb::new();
    let mut trie = Trie::open(db.clone(), EMPTY_ROOT_HASH);
    for tag in 0..16u8 {
        trie.update(key(tag), value(tag));
    }
    let mut leaves = 0usize;
    let root = trie.commit(|_, _| leaves += 1);
    assert_eq!(leaves, 16);

    let reopened = Trie::open(db, root);
    for tag in 0..16u8 {
        assert_eq!(reopened.get(key(tag)).expect("get"), Some(value(tag)));
    }
    assert_eq!(reopened.hash(), root);
}

#[test]
fn missing_node_is_reported() {
    let db = NodeDb::new();
    let mut trie = Trie::open(db.clone(), EMPTY_ROOT_HASH);
    for tag in 0..16u8 {
        trie.update(key(tag), value(tag));
    }
    let root = trie.commit(|_, _| {});
    db.dereference(root);
    let broken = Trie::open(db, root);
    assert!(broken.get(key(3)).is_err());
}

#[test]
fn proof_starts_at_the_root_node() {
    let db = NodeDb::new();
    let mut trie = Trie::open(db.clone(), EMPTY_ROOT_HASH);
    for tag in 0..16u8 {
        trie.update(key(tag), value(tag));
    }
    let root = trie.commit(|_, _| {});

    let proof = Trie::open(db, root).prove(key(5)).expect("prove");
    assert!(!proof.is_empty());
    assert_eq!(keccak256(&proof[0]), root);
    // An absent key still yields the visited prefix of the path.
    let mut reopened_proof_len = 0;
    if let Ok(p) = trie.prove(key(0xcc)) {
        reopened_proof_len = p.len();
    }
    assert!(reopened_proof_len >= 1);
}

#[test]
fn leaves_enumerates_every_entry() {
    let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    for tag in 0..12u8 {
        trie.update(key(tag), value(tag));
    }
    let mut leaves = trie.leaves().expect("leaves");
    leaves.sort_by_key(|(k, _)| *k);
    assert_eq!(leaves.len(), 12);
    let mut expected: Vec<B256> = (0..12u8).map(key).collect();
    expected.sort();
    let got: Vec<B256> = leaves.iter().map(|(k, _)| *k).collect();
    assert_eq!(got, expected);
}

#[test]
fn storage_value_codec_strips_leading_zeroes() {
    use asdb_db::trie::{decode_storage_value, encode_storage_value};
    let word = B256::with_last_byte(0x07);
    let encoded = encode_storage_value(word);
    assert_eq!(encoded.as_slice(), &[0x07]);
    assert_eq!(decode_storage_value(&encoded), Some(word));

    let zero = B256::ZERO;
    let encoded = encode_storage_value(zero);
    assert_eq!(decode_storage_value(&encoded), Some(zero));
}
