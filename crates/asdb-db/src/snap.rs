//! どこで: フラットsnapshot層 / 何を: diff layer管理とcap/flatten / なぜ: trie walkを避けた高速読み出しと破壊追跡のため

use crate::keys::{make_account_flat_key, make_storage_flat_key, storage_flat_prefix};
use crate::overlay::FlatOverlay;
use alloy_primitives::B256;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapError {
    UnknownRoot,
    UnknownParent,
}

#[derive(Clone, Debug, Default)]
struct DiffLayer {
    parent: B256,
    destructs: HashSet<B256>,
    accounts: HashMap<B256, Vec<u8>>,
    storage: HashMap<B256, HashMap<B256, Vec<u8>>>,
}

#[derive(Default, Debug)]
struct SnapInner {
    base_root: B256,
    base: BTreeMap<Vec<u8>, Vec<u8>>,
    layers: HashMap<B256, DiffLayer>,
}

/// Flat account/storage cache layered over the trie. Diff layers stack per
/// committed root; `cap` flattens the oldest layers into the base store.
/// Readers may run concurrently; writers take the tree-wide lock.
#[derive(Clone, Debug)]
pub struct SnapshotTree {
    inner: Arc<RwLock<SnapInner>>,
}

impl SnapshotTree {
    pub fn new(base_root: B256) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SnapInner {
                base_root,
                base: BTreeMap::new(),
                layers: HashMap::new(),
            })),
        }
    }

    /// Returns a read handle for `root`, or `None` when the tree does not
    /// cover that root.
    pub fn snapshot(&self, root: B256) -> Option<Snapshot> {
        let inner = self.inner.read().expect("snapshot tree lock");
        if root != inner.base_root && !inner.layers.contains_key(&root) {
            return None;
        }
        Some(Snapshot {
            inner: Arc::clone(&self.inner),
            root,
        })
    }

    /// Appends a diff layer on top of `parent`.
    pub fn update(
        &self,
        root: B256,
        parent: B256,
        destructs: HashSet<B256>,
        accounts: HashMap<B256, Vec<u8>>,
        storage: HashMap<B256, HashMap<B256, Vec<u8>>>,
    ) -> Result<(), SnapError> {
        let mut inner = self.inner.write().expect("snapshot tree lock");
        if parent != inner.base_root && !inner.layers.contains_key(&parent) {
            return Err(SnapError::UnknownParent);
        }
        inner.layers.insert(
            root,
            DiffLayer {
                parent,
                destructs,
                accounts,
                storage,
            },
        );
        Ok(())
    }

    /// Flattens diff layers below `root` until at most `max_layers` remain on
    /// the chain from `root` down to the base.
    pub fn cap(&self, root: B256, max_layers: usize) -> Result<(), SnapError> {
        let mut inner = self.inner.write().expect("snapshot tree lock");
        if root != inner.base_root && !inner.layers.contains_key(&root) {
            return Err(SnapError::UnknownRoot);
        }
        while chain_depth(&inner, root) > max_layers {
            let Some(bottom) = bottom_layer_root(&inner, root) else {
                break;
            };
            flatten_into_base(&mut inner, bottom);
        }
        Ok(())
    }

    pub fn base_root(&self) -> B256 {
        self.inner.read().expect("snapshot tree lock").base_root
    }

    pub fn layer_count(&self) -> usize {
        self.inner.read().expect("snapshot tree lock").layers.len()
    }
}

fn chain_depth(inner: &SnapInner, root: B256) -> usize {
    let mut depth = 0usize;
    let mut cursor = root;
    while let Some(layer) = inner.layers.get(&cursor) {
        depth += 1;
        cursor = layer.parent;
        if depth > inner.layers.len() {
            break;
        }
    }
    depth
}

/// The layer on the chain from `root` whose parent is the base.
fn bottom_layer_root(inner: &SnapInner, root: B256) -> Option<B256> {
    let mut cursor = root;
    let mut hops = 0usize;
    loop {
        let layer = inner.layers.get(&cursor)?;
        if layer.parent == inner.base_root {
            return Some(cursor);
        }
        cursor = layer.parent;
        hops += 1;
        if hops > inner.layers.len() {
            return None;
        }
    }
}

fn flatten_into_base(inner: &mut SnapInner, root: B256) {
    let Some(layer) = inner.layers.remove(&root) else {
        return;
    };
    tracing::debug!(%root, destructs = layer.destructs.len(), accounts = layer.accounts.len(), "flattening snapshot layer into base");
    let mut overlay = FlatOverlay::new();
    for addr_hash in &layer.destructs {
        overlay.delete(make_account_flat_key(*addr_hash).to_vec());
        overlay.delete_prefix(&inner.base, &storage_flat_prefix(*addr_hash));
    }
    for (addr_hash, slim) in &layer.accounts {
        overlay.set(make_account_flat_key(*addr_hash).to_vec(), slim.clone());
    }
    for (addr_hash, slots) in &layer.storage {
        for (slot_hash, value) in slots {
            overlay.set(
                make_storage_flat_key(*addr_hash, *slot_hash).to_vec(),
                value.clone(),
            );
        }
    }
    overlay.drain_into(&mut inner.base);
    inner.base_root = root;
}

/// Read handle pinned to one root of the snapshot tree.
#[derive(Clone, Debug)]
pub struct Snapshot {
    inner: Arc<RwLock<SnapInner>>,
    root: B256,
}

impl Snapshot {
    pub fn root(&self) -> B256 {
        self.root
    }

    /// Slim-encoded account bytes, or `None` when the account is absent or
    /// destructed at this root.
    pub fn account(&self, addr_hash: B256) -> Result<Option<Vec<u8>>, SnapError> {
        let inner = self.inner.read().expect("snapshot tree lock");
        let mut cursor = self.root;
        let mut hops = 0usize;
        while cursor != inner.base_root {
            let Some(layer) = inner.layers.get(&cursor) else {
                return Err(SnapError::UnknownRoot);
            };
            if let Some(slim) = layer.accounts.get(&addr_hash) {
                return Ok(Some(slim.clone()));
            }
            if layer.destructs.contains(&addr_hash) {
                return Ok(None);
            }
            cursor = layer.parent;
            hops += 1;
            if hops > inner.layers.len() {
                return Err(SnapError::UnknownRoot);
            }
        }
        Ok(inner.base.get(make_account_flat_key(addr_hash).as_slice()).cloned())
    }

    /// Storage slot bytes under an account, resolved through the diff chain.
    pub fn storage(&self, addr_hash: B256, slot_hash: B256) -> Result<Option<Vec<u8>>, SnapError> {
        let inner = self.inner.read().expect("snapshot tree lock");
        let mut cursor = self.root;
        let mut hops = 0usize;
        while cursor != inner.base_root {
            let Some(layer) = inner.layers.get(&cursor) else {
                return Err(SnapError::UnknownRoot);
            };
            if let Some(slots) = layer.storage.get(&addr_hash) {
                if let Some(value) = slots.get(&slot_hash) {
                    return Ok(Some(value.clone()));
                }
            }
            if layer.destructs.contains(&addr_hash) {
                return Ok(None);
            }
            cursor = layer.parent;
            hops += 1;
            if hops > inner.layers.len() {
                return Err(SnapError::UnknownRoot);
            }
        }
        Ok(inner
            .base
            .get(make_storage_flat_key(addr_hash, slot_hash).as_slice())
            .cloned())
    }
}
