//! どこで: Merkle-Patricia trie / 何を: 差分更新・root計算・proof / なぜ: 全件再構築を避け決定的rootを得るため

use crate::node_db::NodeDb;
use alloy_primitives::{keccak256, B256};
use alloy_rlp::Decodable;
use alloy_trie::nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode, TrieNode};
use alloy_trie::{Nibbles, TrieMask, EMPTY_ROOT_HASH};
use smallvec::SmallVec;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrieError {
    MissingNode,
}

/// Secure trie over a shared [`NodeDb`]. Keys are 32-byte digests; the caller
/// hashes addresses and slots before lookup. Mutations accumulate new nodes
/// in a pending set until [`Trie::commit`] flushes them.
#[derive(Clone, Debug)]
pub struct Trie {
    db: NodeDb,
    root_ptr: Option<RlpNode>,
    pending: BTreeMap<B256, Vec<u8>>,
    delta: BTreeMap<B256, i64>,
}

impl Trie {
    pub fn open(db: NodeDb, root: B256) -> Self {
        let root_ptr = if root == EMPTY_ROOT_HASH {
            None
        } else {
            Some(RlpNode::word_rlp(&root))
        };
        Self {
            db,
            root_ptr,
            pending: BTreeMap::new(),
            delta: BTreeMap::new(),
        }
    }

    pub fn hash(&self) -> B256 {
        ptr_to_root(self.root_ptr.as_ref())
    }

    pub fn get(&self, key: B256) -> Result<Option<Vec<u8>>, TrieError> {
        let path = Nibbles::unpack(key);
        let Some(root) = self.root_ptr.clone() else {
            return Ok(None);
        };
        let mut current = root;
        let mut depth = 0usize;
        loop {
            let Some(node) = self.resolve(&current) else {
                return Err(TrieError::MissingNode);
            };
            match node {
                TrieNode::EmptyRoot => return Ok(None),
                TrieNode::Leaf(leaf) => {
                    if leaf.key == path.slice(depth..) {
                        return Ok(Some(leaf.value));
                    }
                    return Ok(None);
                }
                TrieNode::Extension(ext) => {
                    let rest = path.slice(depth..);
                    if ext.key.common_prefix_length(&rest) != ext.key.len() {
                        return Ok(None);
                    }
                    depth += ext.key.len();
                    current = ext.child;
                }
                TrieNode::Branch(branch) => {
                    if depth >= path.len() {
                        return Ok(None);
                    }
                    let nibble = path.get(depth).expect("depth bounded by path length");
                    let Some(child) = branch_child(&branch, nibble) else {
                        return Ok(None);
                    };
                    depth += 1;
                    current = child;
                }
            }
        }
    }

    pub fn update(&mut self, key: B256, value: Vec<u8>) {
        let path = Nibbles::unpack(key);
        self.apply_op(&path, Some(&value));
    }

    pub fn remove(&mut self, key: B256) {
        let path = Nibbles::unpack(key);
        self.apply_op(&path, None);
    }

    /// Raw node RLP along the lookup path, root first. A key that is absent
    /// still yields the nodes visited before the divergence point.
    pub fn prove(&self, key: B256) -> Result<Vec<Vec<u8>>, TrieError> {
        let mut proof = Vec::new();
        let path = Nibbles::unpack(key);
        let Some(root) = self.root_ptr.clone() else {
            return Ok(proof);
        };
        let mut current = root;
        let mut depth = 0usize;
        loop {
            let Some(raw) = self.raw_node(&current) else {
                return Err(TrieError::MissingNode);
            };
            let mut slice = raw.as_slice();
            let Ok(node) = TrieNode::decode(&mut slice) else {
                return Err(TrieError::MissingNode);
            };
            proof.push(raw);
            match node {
                TrieNode::EmptyRoot | TrieNode::Leaf(_) => return Ok(proof),
                TrieNode::Extension(ext) => {
                    let rest = path.slice(depth..);
                    if ext.key.common_prefix_length(&rest) != ext.key.len() {
                        return Ok(proof);
                    }
                    depth += ext.key.len();
                    current = ext.child;
                }
                TrieNode::Branch(branch) => {
                    if depth >= path.len() {
                        return Ok(proof);
                    }
                    let nibble = path.get(depth).expect("depth bounded by path length");
                    let Some(child) = branch_child(&branch, nibble) else {
                        return Ok(proof);
                    };
                    depth += 1;
                    current = child;
                }
            }
        }
    }

    /// Depth-first walk over every leaf, yielding the packed 32-byte key
    /// path and the raw leaf value.
    pub fn leaves(&self) -> Result<Vec<(B256, Vec<u8>)>, TrieError> {
        let mut out = Vec::new();
        let Some(root) = self.root_ptr.clone() else {
            return Ok(out);
        };
        self.collect_leaves(&root, Nibbles::default(), &mut out)?;
        Ok(out)
    }

    fn collect_leaves(
        &self,
        ptr: &RlpNode,
        prefix: Nibbles,
        out: &mut Vec<(B256, Vec<u8>)>,
    ) -> Result<(), TrieError> {
        let Some(node) = self.resolve(ptr) else {
            return Err(TrieError::MissingNode);
        };
        match node {
            TrieNode::EmptyRoot => Ok(()),
            TrieNode::Leaf(leaf) => {
                let full = prefix.join(&leaf.key);
                if full.len() == 64 {
                    out.push((B256::from_slice(&full.pack()), leaf.value));
                }
                Ok(())
            }
            TrieNode::Extension(ext) => {
                let next = prefix.join(&ext.key);
                self.collect_leaves(&ext.child, next, out)
            }
            TrieNode::Branch(branch) => {
                for (idx, child) in branch_children(&branch).into_iter().enumerate() {
                    if let Some(child) = child {
                        let mut next = prefix.clone();
                        next.push(idx as u8);
                        self.collect_leaves(&child, next, out)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Flushes pending nodes and reference deltas into the node DB.
    /// `leaf_cb(value_rlp, node_hash)` fires once per newly written leaf that
    /// is reachable from the final root; superseded intermediates are only
    /// persisted for the refcount ledger.
    pub fn commit<F: FnMut(&[u8], B256)>(&mut self, mut leaf_cb: F) -> B256 {
        self.force_root_record();
        if let Some(root) = self.root_ptr.clone() {
            self.walk_new_leaves(&root, &mut leaf_cb);
        }
        let pending = std::mem::take(&mut self.pending);
        for (hash, raw) in pending {
            self.db.insert_node(hash, raw);
        }
        let delta = std::mem::take(&mut self.delta);
        self.db.apply_delta(&delta);
        self.hash()
    }

    fn walk_new_leaves<F: FnMut(&[u8], B256)>(&self, ptr: &RlpNode, leaf_cb: &mut F) {
        // A hashed pointer outside the pending set is an already-persisted
        // subtree; its leaves were reported by an earlier commit.
        if let Some(hash) = ptr.as_hash() {
            if !self.pending.contains_key(&hash) {
                return;
            }
        }
        let Some(node) = self.resolve(ptr) else {
            return;
        };
        match node {
            TrieNode::EmptyRoot => {}
            TrieNode::Leaf(leaf) => {
                let hash = ptr.as_hash().unwrap_or_else(|| keccak256(ptr.as_ref()));
                leaf_cb(&leaf.value, hash);
            }
            TrieNode::Extension(ext) => self.walk_new_leaves(&ext.child, leaf_cb),
            TrieNode::Branch(branch) => {
                for child in branch_children(&branch).into_iter().flatten() {
                    self.walk_new_leaves(&child, leaf_cb);
                }
            }
        }
    }

    fn force_root_record(&mut self) {
        let Some(ptr) = self.root_ptr.clone() else {
            return;
        };
        // A short root embeds inline; persist it under its hash so reopening
        // by root keeps resolving.
        if ptr.as_hash().is_none() {
            let hash = keccak256(ptr.as_ref());
            self.pending
                .entry(hash)
                .or_insert_with(|| ptr.as_ref().to_vec());
        }
    }

    fn raw_node(&self, ptr: &RlpNode) -> Option<Vec<u8>> {
        if let Some(hash) = ptr.as_hash() {
            if let Some(raw) = self.pending.get(&hash) {
                return Some(raw.clone());
            }
            self.db.node(&hash)
        } else {
            Some(ptr.as_ref().to_vec())
        }
    }

    fn resolve(&self, ptr: &RlpNode) -> Option<TrieNode> {
        let raw = self.raw_node(ptr)?;
        let mut slice = raw.as_slice();
        TrieNode::decode(&mut slice).ok()
    }

    fn emit_node(&mut self, node: TrieNode) -> RlpNode {
        let mut raw = Vec::with_capacity(96);
        let ptr = node.rlp(&mut raw);
        if let Some(hash) = ptr.as_hash() {
            self.pending.entry(hash).or_insert(raw);
        }
        ptr
    }

    fn replace_ptr(&mut self, old_ptr: Option<&RlpNode>, new_ptr: Option<&RlpNode>) {
        let old_hash = old_ptr.and_then(|p| p.as_hash());
        let new_hash = new_ptr.and_then(|p| p.as_hash());
        if old_hash == new_hash {
            return;
        }
        if let Some(old) = old_hash {
            *self.delta.entry(old).or_insert(0) -= 1;
            if self.delta.get(&old) == Some(&0) {
                self.delta.remove(&old);
            }
        }
        if let Some(new) = new_hash {
            *self.delta.entry(new).or_insert(0) += 1;
            if self.delta.get(&new) == Some(&0) {
                self.delta.remove(&new);
            }
        }
    }

    fn apply_op(&mut self, key: &Nibbles, value: Option<&[u8]>) {
        let root = self.root_ptr.clone();
        let next = self.update_at(root.as_ref(), key, 0, value);
        self.replace_ptr(root.as_ref(), next.as_ref());
        self.root_ptr = next;
    }

    fn update_at(
        &mut self,
        node_ptr: Option<&RlpNode>,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let rest = key.slice(depth..);
        let Some(ptr) = node_ptr else {
            return value.map(|v| self.emit_node(TrieNode::Leaf(LeafNode::new(rest, v.to_vec()))));
        };
        let Some(node) = self.resolve(ptr) else {
            // Unresolvable subtree is left untouched.
            return node_ptr.cloned();
        };

        match node {
            TrieNode::EmptyRoot => {
                value.map(|v| self.emit_node(TrieNode::Leaf(LeafNode::new(rest, v.to_vec()))))
            }
            TrieNode::Leaf(leaf) => self.update_leaf(ptr, leaf, &rest, value),
            TrieNode::Extension(ext) => self.update_extension(ptr, ext, key, depth, value),
            TrieNode::Branch(branch) => self.update_branch(ptr, branch, key, depth, value),
        }
    }

    fn update_leaf(
        &mut self,
        old_ptr: &RlpNode,
        leaf: LeafNode,
        rest: &Nibbles,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let old_ptr = old_ptr.clone();
        let common = leaf.key.common_prefix_length(rest);
        if common == leaf.key.len() && common == rest.len() {
            let Some(v) = value else {
                self.replace_ptr(Some(&old_ptr), None);
                return None;
            };
            if leaf.value.as_slice() == v {
                return Some(old_ptr);
            }
            let next = self.emit_node(TrieNode::Leaf(LeafNode::new(leaf.key, v.to_vec())));
            self.replace_ptr(Some(&old_ptr), Some(&next));
            return Some(next);
        }

        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);
        let old_suffix = leaf.key.slice(common..);
        if !old_suffix.is_empty() {
            let old_idx = old_suffix.get(0).expect("non-empty suffix") as usize;
            let old_tail = old_suffix.slice(1..);
            let old_child = self.emit_node(TrieNode::Leaf(LeafNode::new(old_tail, leaf.value)));
            children[old_idx] = Some(old_child);
        }

        if let Some(v) = value {
            let new_suffix = rest.slice(common..);
            if !new_suffix.is_empty() {
                let new_idx = new_suffix.get(0).expect("non-empty suffix") as usize;
                let new_tail = new_suffix.slice(1..);
                let new_child =
                    self.emit_node(TrieNode::Leaf(LeafNode::new(new_tail, v.to_vec())));
                children[new_idx] = Some(new_child);
            }
        }

        let Some(collapsed) = self.collapse_children(children) else {
            self.replace_ptr(Some(&old_ptr), None);
            return None;
        };

        let next = if common > 0 {
            let prefix = rest.slice(0..common);
            self.emit_node(TrieNode::Extension(ExtensionNode::new(prefix, collapsed)))
        } else {
            collapsed
        };
        self.replace_ptr(Some(&old_ptr), Some(&next));
        Some(next)
    }

    fn update_extension(
        &mut self,
        old_ptr: &RlpNode,
        ext: ExtensionNode,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        let old_ptr = old_ptr.clone();
        let rest = key.slice(depth..);
        let common = ext.key.common_prefix_length(&rest);

        if common == ext.key.len() {
            let child_next = self.update_at(Some(&ext.child), key, depth + common, value);
            let Some(child_next) = child_next else {
                self.replace_ptr(Some(&old_ptr), None);
                return None;
            };
            let next = if ext.key.is_empty() {
                child_next
            } else {
                self.emit_node(TrieNode::Extension(ExtensionNode::new(ext.key, child_next)))
            };
            self.replace_ptr(Some(&old_ptr), Some(&next));
            return Some(next);
        }

        let mut children: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);

        let old_suffix = ext.key.slice(common..);
        let old_idx = old_suffix.get(0).expect("diverging suffix") as usize;
        let old_tail = old_suffix.slice(1..);
        let old_child = if old_tail.is_empty() {
            ext.child
        } else {
            self.emit_node(TrieNode::Extension(ExtensionNode::new(old_tail, ext.child)))
        };
        children[old_idx] = Some(old_child);

        if let Some(v) = value {
            let new_suffix = rest.slice(common..);
            if !new_suffix.is_empty() {
                let new_idx = new_suffix.get(0).expect("non-empty suffix") as usize;
                let new_tail = new_suffix.slice(1..);
                let new_child =
                    self.emit_node(TrieNode::Leaf(LeafNode::new(new_tail, v.to_vec())));
                children[new_idx] = Some(new_child);
            }
        }

        let Some(collapsed) = self.collapse_children(children) else {
            self.replace_ptr(Some(&old_ptr), None);
            return None;
        };
        let next = if common > 0 {
            self.emit_node(TrieNode::Extension(ExtensionNode::new(
                rest.slice(0..common),
                collapsed,
            )))
        } else {
            collapsed
        };
        self.replace_ptr(Some(&old_ptr), Some(&next));
        Some(next)
    }

    fn update_branch(
        &mut self,
        old_ptr: &RlpNode,
        branch: BranchNode,
        key: &Nibbles,
        depth: usize,
        value: Option<&[u8]>,
    ) -> Option<RlpNode> {
        if depth >= key.len() {
            return Some(old_ptr.clone());
        }
        let old_ptr = old_ptr.clone();

        let mut children = branch_children(&branch);
        let index = key.get(depth).expect("depth bounded by key length") as usize;
        let next_child = self.update_at(children[index].as_ref(), key, depth + 1, value);
        children[index] = next_child;

        let Some(collapsed) = self.collapse_children(children) else {
            self.replace_ptr(Some(&old_ptr), None);
            return None;
        };
        self.replace_ptr(Some(&old_ptr), Some(&collapsed));
        Some(collapsed)
    }

    fn collapse_children(&mut self, children: [Option<RlpNode>; 16]) -> Option<RlpNode> {
        let mut present = Vec::new();
        for (idx, child) in children.into_iter().enumerate() {
            if let Some(child) = child {
                present.push((idx as u8, child));
            }
        }

        match present.len() {
            0 => None,
            1 => {
                let (idx, child) = present.remove(0);
                let prefix = Nibbles::from_nibbles_unchecked([idx]);
                let Some(child_node) = self.resolve(&child) else {
                    return Some(
                        self.emit_node(TrieNode::Extension(ExtensionNode::new(prefix, child))),
                    );
                };
                match child_node {
                    TrieNode::Leaf(leaf) => {
                        let key = prefix.join(&leaf.key);
                        Some(self.emit_node(TrieNode::Leaf(LeafNode::new(key, leaf.value))))
                    }
                    TrieNode::Extension(ext) => {
                        let key = prefix.join(&ext.key);
                        Some(
                            self.emit_node(TrieNode::Extension(ExtensionNode::new(key, ext.child))),
                        )
                    }
                    _ => Some(
                        self.emit_node(TrieNode::Extension(ExtensionNode::new(prefix, child))),
                    ),
                }
            }
            _ => {
                let mut stack = Vec::with_capacity(present.len());
                let mut mask = TrieMask::default();
                for (idx, child) in present {
                    mask.set_bit(idx);
                    stack.push(child);
                }
                Some(self.emit_node(TrieNode::Branch(BranchNode::new(stack, mask))))
            }
        }
    }
}

fn branch_children(branch: &BranchNode) -> [Option<RlpNode>; 16] {
    let mut out: [Option<RlpNode>; 16] = std::array::from_fn(|_| None);
    let mut pos = 0usize;
    for idx in 0..16u8 {
        if branch.state_mask.is_bit_set(idx) {
            out[idx as usize] = branch.stack.get(pos).cloned();
            pos = pos.saturating_add(1);
        }
    }
    out
}

fn branch_child(branch: &BranchNode, nibble: u8) -> Option<RlpNode> {
    if !branch.state_mask.is_bit_set(nibble) {
        return None;
    }
    let mut pos = 0usize;
    for idx in 0..16u8 {
        if idx == nibble {
            return branch.stack.get(pos).cloned();
        }
        if branch.state_mask.is_bit_set(idx) {
            pos = pos.saturating_add(1);
        }
    }
    None
}

fn ptr_to_root(ptr: Option<&RlpNode>) -> B256 {
    match ptr {
        Some(ptr) => {
            if let Some(hash) = ptr.as_hash() {
                hash
            } else {
                keccak256(ptr.as_ref())
            }
        }
        None => EMPTY_ROOT_HASH,
    }
}

/// Encodes a storage word the way account storage tries expect it: RLP of the
/// big-endian value with leading zeroes stripped.
pub fn encode_storage_value(value: B256) -> SmallVec<[u8; 40]> {
    use alloy_primitives::U256;
    use alloy_rlp::Encodable;
    let mut out = Vec::with_capacity(33);
    U256::from_be_bytes(value.0).encode(&mut out);
    SmallVec::from_vec(out)
}

pub fn decode_storage_value(raw: &[u8]) -> Option<B256> {
    use alloy_primitives::U256;
    let mut slice = raw;
    U256::decode(&mut slice).ok().map(|v| B256::from(v.to_be_bytes()))
}
