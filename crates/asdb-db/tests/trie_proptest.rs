//! どこで: trie性質テスト / 何を: 乱択した書き込み集合のroot不変量 / なぜ: 順序・削除・再開に依らない決定性を固定するため

use alloy_primitives::{keccak256, B256};
use alloy_trie::EMPTY_ROOT_HASH;
use asdb_db::{NodeDb, Trie};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn entries_strategy() -> impl Strategy<Value = BTreeMap<u8, Vec<u8>>> {
    proptest::collection::btree_map(any::<u8>(), proptest::collection::vec(any::<u8>(), 1..24), 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn root_ignores_write_order(entries in entries_strategy(), seed in any::<u64>()) {
        let mut forward = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
        for (tag, value) in &entries {
            forward.update(keccak256([*tag]), value.clone());
        }

        // A deterministic shuffle driven by the seed.
        let mut shuffled: Vec<(u8, Vec<u8>)> =
            entries.iter().map(|(t, v)| (*t, v.clone())).collect();
        let mut s = seed;
        for i in (1..shuffled.len()).rev() {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (s % (i as u64 + 1)) as usize);
        }
        let mut scrambled = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
        for (tag, value) in &shuffled {
            scrambled.update(keccak256([*tag]), value.clone());
        }

        prop_assert_eq!(forward.hash(), scrambled.hash());
    }

    #[test]
    fn inserting_then_removing_extras_restores_the_root(
        entries in entries_strategy(),
        extras in proptest::collection::btree_map(any::<u16>(), proptest::collection::vec(any::<u8>(), 1..16), 1..8),
    ) {
        let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
        for (tag, value) in &entries {
            trie.update(keccak256([*tag]), value.clone());
        }
        let before = trie.hash();

        for (tag, value) in &extras {
            // Extra keys live in a disjoint keyspace from the base entries.
            trie.update(keccak256(tag.to_be_bytes()), value.clone());
        }
        for tag in extras.keys() {
            trie.remove(keccak256(tag.to_be_bytes()));
        }

        prop_assert_eq!(trie.hash(), before);
    }

    #[test]
    fn committed_tries_reopen_identically(entries in entries_strategy()) {
        let db = NodeDb::new();
        let mut trie = Trie::open(db.clone(), EMPTY_ROOT_HASH);
        for (tag, value) in &entries {
            trie.update(keccak256([*tag]), value.clone());
        }
        let root = trie.commit(|_, _| {});

        let reopened = Trie::open(db, root);
        for (tag, value) in &entries {
            prop_assert_eq!(
                reopened.get(keccak256([*tag])).expect("reopened get"),
                Some(value.clone())
            );
        }
        prop_assert_eq!(reopened.hash(), root);
    }
}

#[test]
fn empty_value_is_still_a_value() {
    // Values are opaque; the trie never confuses an empty value with absence.
    let mut trie = Trie::open(NodeDb::new(), EMPTY_ROOT_HASH);
    trie.update(keccak256([1u8]), vec![0x80]);
    assert_eq!(trie.get(keccak256([1u8])).expect("get"), Some(vec![0x80]));
}
