//! どこで: 結合テスト共通部 / 何を: StateDb生成とアドレス束 / なぜ: 各テストの前提を揃えるため

#![allow(dead_code)]

use alloy_primitives::Address;
use alloy_trie::EMPTY_ROOT_HASH;
use asdb_core::StateDb;
use asdb_db::{NodeDb, SnapshotTree};

pub fn fresh_state() -> StateDb {
    StateDb::new(EMPTY_ROOT_HASH, NodeDb::new(), None).expect("open state")
}

pub fn fresh_state_with_snaps() -> (StateDb, NodeDb, SnapshotTree) {
    let db = NodeDb::new();
    let snaps = SnapshotTree::new(EMPTY_ROOT_HASH);
    let state = StateDb::new(EMPTY_ROOT_HASH, db.clone(), Some(snaps.clone())).expect("open state");
    (state, db, snaps)
}

pub fn addr(tag: u8) -> Address {
    Address::repeat_byte(tag)
}
