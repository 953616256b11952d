//! どこで: trieノードDB / 何を: 参照カウント付きノード保存とコード保存 / なぜ: 同一rootから派生する複数StateDbで共有するため

use alloy_primitives::B256;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
struct NodeRecord {
    rlp: Vec<u8>,
    refs: i64,
}

/// Content-addressed node store shared by every trie opened on top of it.
/// Clones are cheap handles onto the same map.
#[derive(Clone, Default, Debug)]
pub struct NodeDb {
    inner: Arc<RwLock<NodeDbInner>>,
}

#[derive(Default, Debug)]
struct NodeDbInner {
    nodes: HashMap<B256, NodeRecord>,
    codes: HashMap<B256, Vec<u8>>,
}

impl NodeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, hash: &B256) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("node db lock");
        inner.nodes.get(hash).map(|r| r.rlp.clone())
    }

    pub fn contains(&self, hash: &B256) -> bool {
        let inner = self.inner.read().expect("node db lock");
        inner.nodes.contains_key(hash)
    }

    pub fn insert_node(&self, hash: B256, rlp: Vec<u8>) {
        let mut inner = self.inner.write().expect("node db lock");
        inner
            .nodes
            .entry(hash)
            .or_insert(NodeRecord { rlp, refs: 0 });
    }

    /// Applies the per-commit reference deltas produced by a trie commit.
    pub fn apply_delta(&self, counts: &BTreeMap<B256, i64>) {
        let mut inner = self.inner.write().expect("node db lock");
        for (hash, delta) in counts {
            if let Some(record) = inner.nodes.get_mut(hash) {
                record.refs += delta;
            }
        }
    }

    /// Pins `child` under `parent`; the account commit uses this to retain
    /// storage roots referenced from account leaves.
    pub fn reference(&self, child: B256, _parent: B256) {
        let mut inner = self.inner.write().expect("node db lock");
        if let Some(record) = inner.nodes.get_mut(&child) {
            record.refs += 1;
        }
    }

    /// Drops one reference from `root`; unreferenced records are removed.
    pub fn dereference(&self, root: B256) {
        let mut inner = self.inner.write().expect("node db lock");
        let drop_it = match inner.nodes.get_mut(&root) {
            Some(record) => {
                record.refs -= 1;
                record.refs <= 0
            }
            None => false,
        };
        if drop_it {
            inner.nodes.remove(&root);
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().expect("node db lock").nodes.len()
    }

    pub fn contract_code(&self, code_hash: &B256) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("node db lock");
        inner.codes.get(code_hash).cloned()
    }

    pub fn write_code(&self, code_hash: B256, code: Vec<u8>) {
        let mut inner = self.inner.write().expect("node db lock");
        inner.codes.insert(code_hash, code);
    }
}
