//! どこで: 状態DBの保存基盤 / 何を: ノードDB・trie・フラットsnapshot / なぜ: 上位の状態層から永続形を分離するため

pub mod keys;
pub mod node_db;
pub mod overlay;
pub mod snap;
pub mod trie;

pub use node_db::NodeDb;
pub use snap::{Snapshot, SnapshotTree};
pub use trie::{Trie, TrieError};
