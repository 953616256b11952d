//! どこで: 状態DB orchestrator / 何を: cache・journal・snapshot・commit配管 / なぜ: 実行層へ一貫した読み書き面を与えるため

use crate::access_list::AccessList;
use crate::account::{self, Account};
use crate::constants::SNAP_DIFF_LAYERS;
use crate::journal::{Journal, JournalEntry};
use crate::log::Log;
use crate::prefetch::TriePrefetcher;
use crate::state_object::{StateObject, StorageReader};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable};
use alloy_trie::EMPTY_ROOT_HASH;
use asdb_db::{NodeDb, Snapshot, SnapshotTree, Trie};
use std::collections::{HashMap, HashSet};
use tracing::{error, warn};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateError {
    /// Underlying trie or snapshot failure, memoised at first occurrence and
    /// surfaced out of commit.
    Db(String),
    InvalidRevision,
    StorageTrieMissing,
}

#[derive(Clone, Copy, Debug)]
struct Revision {
    id: usize,
    journal_index: usize,
}

/// Which extension a materialised object starts with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ObjectKind {
    Account,
    Nft,
    Staker,
}

/// Transactional, journaled, cached account-state database layered over the
/// Merkle trie and the flat snapshot tree.
#[derive(Debug)]
pub struct StateDb {
    pub(crate) db: NodeDb,
    pub(crate) trie: Trie,
    original_root: B256,
    snaps: Option<SnapshotTree>,
    pub(crate) snap: Option<Snapshot>,
    pub(crate) snap_destructs: HashSet<B256>,
    snap_accounts: HashMap<B256, Vec<u8>>,
    snap_storage: HashMap<B256, HashMap<B256, Vec<u8>>>,

    pub(crate) state_objects: HashMap<Address, StateObject>,
    state_objects_pending: HashSet<Address>,
    state_objects_dirty: HashSet<Address>,

    db_err: Option<StateError>,
    pub(crate) refund: u64,

    thash: B256,
    tx_index: usize,
    pub(crate) logs: HashMap<B256, Vec<Log>>,
    pub(crate) log_size: u64,
    pub(crate) preimages: HashMap<B256, Bytes>,

    pub(crate) access_list: AccessList,
    pub(crate) journal: Journal,
    valid_revisions: Vec<Revision>,
    next_revision_id: usize,

    prefetcher: Option<TriePrefetcher>,
}

impl StateDb {
    pub fn new(
        root: B256,
        db: NodeDb,
        snaps: Option<SnapshotTree>,
    ) -> Result<Self, StateError> {
        if root != EMPTY_ROOT_HASH && !db.contains(&root) {
            return Err(StateError::Db(format!("unknown state root {root}")));
        }
        let trie = Trie::open(db.clone(), root);
        let snap = snaps.as_ref().and_then(|s| s.snapshot(root));
        Ok(Self {
            db,
            trie,
            original_root: root,
            snaps,
            snap,
            snap_destructs: HashSet::new(),
            snap_accounts: HashMap::new(),
            snap_storage: HashMap::new(),
            state_objects: HashMap::new(),
            state_objects_pending: HashSet::new(),
            state_objects_dirty: HashSet::new(),
            db_err: None,
            refund: 0,
            thash: B256::ZERO,
            tx_index: 0,
            logs: HashMap::new(),
            log_size: 0,
            preimages: HashMap::new(),
            access_list: AccessList::new(),
            journal: Journal::new(),
            valid_revisions: Vec::new(),
            next_revision_id: 0,
            prefetcher: None,
        })
    }

    pub fn database(&self) -> NodeDb {
        self.db.clone()
    }

    fn set_error(&mut self, err: StateError) {
        if self.db_err.is_none() {
            self.db_err = Some(err);
        }
    }

    /// The memoised database error, if any read has failed so far.
    pub fn error(&self) -> Option<&StateError> {
        self.db_err.as_ref()
    }

    // ---- object loading ----

    /// Loads the object for `addr` into the live set, keeping the deleted
    /// flag visible so the journal can revert a destruction.
    fn get_deleted_state_object(&mut self, addr: Address) -> bool {
        if self.state_objects.contains_key(&addr) {
            return true;
        }
        let addr_hash = keccak256(addr.as_slice());
        let mut data: Option<Account> = None;
        let mut snap_failed = false;
        if let Some(snap) = &self.snap {
            match snap.account(addr_hash) {
                Ok(Some(slim)) => match account::from_slim_rlp(&slim) {
                    Ok(decoded) => data = Some(decoded),
                    Err(err) => {
                        error!(%addr, ?err, "failed to decode slim account");
                        return false;
                    }
                },
                Ok(None) => return false,
                Err(_) => snap_failed = true,
            }
        }
        if self.snap.is_none() || snap_failed {
            match self.trie.get(addr_hash) {
                Err(_) => {
                    self.set_error(StateError::Db(format!("account read failed for {addr}")));
                    return false;
                }
                Ok(None) => return false,
                Ok(Some(rlp)) => match Account::decode(&mut rlp.as_slice()) {
                    Ok(decoded) => data = Some(decoded),
                    Err(err) => {
                        error!(%addr, ?err, "failed to decode account");
                        return false;
                    }
                },
            }
        }
        let data = data.expect("account resolved above");
        self.state_objects.insert(addr, StateObject::new(addr, data));
        true
    }

    fn get_state_object(&mut self, addr: Address) -> bool {
        self.get_deleted_state_object(addr)
            && self
                .state_objects
                .get(&addr)
                .map_or(false, |obj| !obj.deleted)
    }

    pub(crate) fn read_object<R>(
        &mut self,
        addr: Address,
        f: impl FnOnce(&StateObject) -> R,
    ) -> Option<R> {
        if !self.get_state_object(addr) {
            return None;
        }
        self.state_objects.get(&addr).map(f)
    }

    /// Materialises the object when missing, seeding the extension matching
    /// `kind`. A resurrected account carries the prior balance over.
    pub(crate) fn ensure_object(&mut self, addr: Address, kind: ObjectKind) {
        if self.get_state_object(addr) {
            return;
        }
        let carried = self.create_object(addr);
        let obj = self
            .state_objects
            .get_mut(&addr)
            .expect("object created above");
        match kind {
            ObjectKind::Account => {
                if let Some(balance) = carried {
                    obj.set_balance(balance);
                }
                obj.ensure_worm();
            }
            ObjectKind::Nft => {
                obj.ensure_nft();
            }
            ObjectKind::Staker => {
                obj.ensure_staker();
            }
        }
    }

    /// Journals a full prior-state snapshot of the object, so extension
    /// mutations revert like any other write.
    pub(crate) fn journal_account_snapshot(&mut self, addr: Address) {
        let Some(obj) = self.state_objects.get(&addr) else {
            return;
        };
        let prev_destruct =
            self.snap.is_some() && self.snap_destructs.contains(&obj.addr_hash());
        self.journal.append(JournalEntry::ResetObject {
            prev: Box::new(obj.clone()),
            prev_destruct,
        });
        self.journal.append(JournalEntry::Touch { address: addr });
    }

    pub(crate) fn update_object<R>(
        &mut self,
        addr: Address,
        kind: ObjectKind,
        f: impl FnOnce(&mut StateObject) -> R,
    ) -> R {
        self.ensure_object(addr, kind);
        self.journal_account_snapshot(addr);
        let obj = self
            .state_objects
            .get_mut(&addr)
            .expect("object ensured above");
        match kind {
            ObjectKind::Account => {
                obj.ensure_worm();
            }
            ObjectKind::Nft => {
                obj.ensure_nft();
            }
            ObjectKind::Staker => {
                obj.ensure_staker();
            }
        }
        f(obj)
    }

    /// Overwrites the slot for `addr` with a fresh object. Returns the prior
    /// balance when a live predecessor existed.
    pub(crate) fn create_object(&mut self, addr: Address) -> Option<U256> {
        let prev_loaded = self.get_deleted_state_object(addr);
        let mut carried = None;
        if prev_loaded {
            let prev = self
                .state_objects
                .get(&addr)
                .expect("loaded above")
                .clone();
            let mut prev_destruct = false;
            if self.snap.is_some() {
                let addr_hash = prev.addr_hash();
                prev_destruct = self.snap_destructs.contains(&addr_hash);
                if !prev_destruct {
                    self.snap_destructs.insert(addr_hash);
                }
            }
            if !prev.deleted {
                carried = Some(prev.balance());
            }
            self.journal.append(JournalEntry::ResetObject {
                prev: Box::new(prev),
                prev_destruct,
            });
        } else {
            self.journal
                .append(JournalEntry::CreateObject { address: addr });
        }
        self.state_objects
            .insert(addr, StateObject::new(addr, Account::default()));
        carried
    }

    // ---- read surface ----

    /// True also for suicided accounts until the next finalise.
    pub fn exist(&mut self, addr: Address) -> bool {
        self.get_state_object(addr)
    }

    /// Non-existent or empty per the balance/nonce/code rule.
    pub fn empty(&mut self, addr: Address) -> bool {
        self.read_object(addr, |obj| obj.empty()).unwrap_or(true)
    }

    pub fn get_balance(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.balance()).unwrap_or_default()
    }

    pub fn get_nonce(&mut self, addr: Address) -> u64 {
        self.read_object(addr, |obj| obj.nonce()).unwrap_or_default()
    }

    pub fn get_code_hash(&mut self, addr: Address) -> B256 {
        self.read_object(addr, |obj| obj.code_hash())
            .unwrap_or(B256::ZERO)
    }

    pub fn get_code(&mut self, addr: Address) -> Bytes {
        if !self.get_state_object(addr) {
            return Bytes::new();
        }
        let db = self.db.clone();
        let result = self
            .state_objects
            .get_mut(&addr)
            .expect("loaded above")
            .load_code(&db);
        match result {
            Ok(code) => code,
            Err(err) => {
                self.set_error(err);
                Bytes::new()
            }
        }
    }

    pub fn get_code_size(&mut self, addr: Address) -> usize {
        self.get_code(addr).len()
    }

    pub fn has_suicided(&mut self, addr: Address) -> bool {
        self.read_object(addr, |obj| obj.suicided).unwrap_or(false)
    }

    fn storage_lookup(&mut self, addr: Address, key: B256, committed: bool) -> B256 {
        if !self.get_state_object(addr) {
            return B256::ZERO;
        }
        let db = self.db.clone();
        let snap = self.snap.clone();
        let addr_hash = self
            .state_objects
            .get(&addr)
            .expect("loaded above")
            .addr_hash();
        let destructed = snap.is_some() && self.snap_destructs.contains(&addr_hash);
        let reader = StorageReader {
            db: &db,
            snap: snap.as_ref(),
            destructed,
        };
        let obj = self.state_objects.get_mut(&addr).expect("loaded above");
        let result = if committed {
            obj.committed_storage(&reader, key)
        } else {
            obj.storage_value(&reader, key)
        };
        match result {
            Ok(value) => value,
            Err(err) => {
                self.set_error(err);
                B256::ZERO
            }
        }
    }

    pub fn get_state(&mut self, addr: Address, key: B256) -> B256 {
        self.storage_lookup(addr, key, false)
    }

    pub fn get_committed_state(&mut self, addr: Address, key: B256) -> B256 {
        self.storage_lookup(addr, key, true)
    }

    pub fn get_account_info(&mut self, addr: Address) -> Account {
        self.read_object(addr, |obj| obj.account().clone())
            .unwrap_or_default()
    }

    pub fn get_proof(&mut self, addr: Address) -> Result<Vec<Vec<u8>>, StateError> {
        self.get_proof_by_hash(keccak256(addr.as_slice()))
    }

    pub fn get_proof_by_hash(&mut self, addr_hash: B256) -> Result<Vec<Vec<u8>>, StateError> {
        self.trie
            .prove(addr_hash)
            .map_err(|_| StateError::Db(format!("missing trie node proving {addr_hash}")))
    }

    pub fn get_storage_proof(
        &mut self,
        addr: Address,
        key: B256,
    ) -> Result<Vec<Vec<u8>>, StateError> {
        if !self.get_state_object(addr) {
            return Err(StateError::StorageTrieMissing);
        }
        let db = self.db.clone();
        let mut copy = self
            .state_objects
            .get(&addr)
            .expect("loaded above")
            .deep_copy();
        let trie = copy.storage_trie_copy(&db);
        trie.prove(keccak256(key.as_slice()))
            .map_err(|_| StateError::Db(format!("missing storage trie node under {addr}")))
    }

    /// Walks the committed storage of `addr`, resolving slot preimages that
    /// the VM submitted. Dirty slots shadow committed values.
    pub fn for_each_storage<F>(&mut self, addr: Address, mut cb: F) -> Result<(), StateError>
    where
        F: FnMut(B256, B256) -> bool,
    {
        if !self.get_state_object(addr) {
            return Ok(());
        }
        let db = self.db.clone();
        let (root, dirty) = {
            let obj = self.state_objects.get(&addr).expect("loaded above");
            (obj.account().root, obj.dirty_storage.clone())
        };
        let trie = Trie::open(db, root);
        let leaves = trie
            .leaves()
            .map_err(|_| StateError::Db(format!("missing storage trie node under {addr}")))?;
        for (hashed_key, raw) in leaves {
            let Some(preimage) = self.preimages.get(&hashed_key) else {
                continue;
            };
            if preimage.len() != 32 {
                continue;
            }
            let slot = B256::from_slice(preimage);
            let value = match dirty.get(&slot) {
                Some(value) => *value,
                None => asdb_db::trie::decode_storage_value(&raw).unwrap_or(B256::ZERO),
            };
            if !cb(slot, value) {
                return Ok(());
            }
        }
        Ok(())
    }

    // ---- write surface ----

    /// Explicit account creation. A suicided predecessor is replaced by a
    /// fresh object carrying the prior balance over, so funds sent ahead of
    /// a create cannot disappear.
    pub fn create_account(&mut self, addr: Address) {
        let suicided = self
            .read_object(addr, |obj| obj.suicided)
            .unwrap_or(false);
        if !suicided {
            self.ensure_object(addr, ObjectKind::Account);
            return;
        }
        let carried = self.create_object(addr);
        let obj = self
            .state_objects
            .get_mut(&addr)
            .expect("object created above");
        if let Some(balance) = carried {
            obj.set_balance(balance);
        }
        obj.ensure_worm();
    }

    pub fn create_nft_account(&mut self, addr: Address) {
        self.ensure_object(addr, ObjectKind::Nft);
    }

    pub fn create_staker_account(&mut self, addr: Address) {
        self.ensure_object(addr, ObjectKind::Staker);
    }

    pub fn add_balance(&mut self, addr: Address, amount: U256) {
        self.ensure_object(addr, ObjectKind::Account);
        let (prev, is_empty) = {
            let obj = self.state_objects.get(&addr).expect("ensured above");
            (obj.balance(), obj.empty())
        };
        if amount.is_zero() {
            if is_empty {
                self.journal.append(JournalEntry::Touch { address: addr });
            }
            return;
        }
        self.journal.append(JournalEntry::Balance { address: addr, prev });
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_balance(prev.saturating_add(amount));
    }

    pub fn sub_balance(&mut self, addr: Address, amount: U256) {
        self.ensure_object(addr, ObjectKind::Account);
        if amount.is_zero() {
            return;
        }
        let prev = self
            .state_objects
            .get(&addr)
            .expect("ensured above")
            .balance();
        self.journal.append(JournalEntry::Balance { address: addr, prev });
        let next = prev.checked_sub(amount).unwrap_or_else(|| {
            warn!(%addr, %prev, %amount, "balance underflow clamped to zero");
            U256::ZERO
        });
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_balance(next);
    }

    pub fn set_balance(&mut self, addr: Address, amount: U256) {
        self.ensure_object(addr, ObjectKind::Account);
        let prev = self
            .state_objects
            .get(&addr)
            .expect("ensured above")
            .balance();
        self.journal.append(JournalEntry::Balance { address: addr, prev });
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_balance(amount);
    }

    pub fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.ensure_object(addr, ObjectKind::Account);
        let prev = self
            .state_objects
            .get(&addr)
            .expect("ensured above")
            .nonce();
        self.journal.append(JournalEntry::Nonce { address: addr, prev });
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_nonce(nonce);
    }

    pub fn set_code(&mut self, addr: Address, code: Bytes) {
        self.ensure_object(addr, ObjectKind::Account);
        let db = self.db.clone();
        let (prev_hash, prev_code) = {
            let obj = self.state_objects.get_mut(&addr).expect("ensured above");
            let prev_hash = obj.code_hash();
            let prev_code = obj.load_code(&db);
            (prev_hash, prev_code)
        };
        let prev_code = match prev_code {
            Ok(code) => code,
            Err(err) => {
                self.set_error(err);
                Bytes::new()
            }
        };
        self.journal.append(JournalEntry::Code {
            address: addr,
            prev_hash,
            prev_code,
        });
        let code_hash = keccak256(&code);
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_code(code_hash, code);
    }

    pub fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        self.ensure_object(addr, ObjectKind::Account);
        let prev = self.get_state(addr, key);
        if prev == value {
            return;
        }
        self.journal.append(JournalEntry::Storage {
            address: addr,
            key,
            prev,
        });
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .set_storage_value(key, value);
    }

    /// Debug-only wholesale storage replacement; not journalled.
    pub fn set_storage(&mut self, addr: Address, storage: HashMap<B256, B256>) {
        self.ensure_object(addr, ObjectKind::Account);
        self.state_objects
            .get_mut(&addr)
            .expect("ensured above")
            .replace_storage(storage);
    }

    /// Marks the account suicided and zeroes the balance. The object stays
    /// readable until finalise.
    pub fn suicide(&mut self, addr: Address) -> bool {
        if !self.get_state_object(addr) {
            return false;
        }
        let (prev_suicided, prev_balance) = {
            let obj = self.state_objects.get(&addr).expect("loaded above");
            (obj.suicided, obj.balance())
        };
        self.journal.append(JournalEntry::Suicide {
            address: addr,
            prev_suicided,
            prev_balance,
        });
        let obj = self.state_objects.get_mut(&addr).expect("loaded above");
        obj.mark_suicided();
        obj.set_balance(U256::ZERO);
        true
    }

    // ---- logs, preimages, refund ----

    pub fn add_log(&mut self, mut log: Log) {
        self.journal.append(JournalEntry::AddLog {
            tx_hash: self.thash,
        });
        log.tx_hash = self.thash;
        log.tx_index = self.tx_index as u64;
        log.index = self.log_size;
        self.logs.entry(self.thash).or_default().push(log);
        self.log_size += 1;
    }

    pub fn get_logs(&self, tx_hash: B256) -> Vec<Log> {
        self.logs.get(&tx_hash).cloned().unwrap_or_default()
    }

    pub fn logs(&self) -> Vec<Log> {
        let mut all: Vec<Log> = self.logs.values().flatten().cloned().collect();
        all.sort_by_key(|log| log.index);
        all
    }

    pub fn add_preimage(&mut self, hash: B256, preimage: &[u8]) {
        if !self.preimages.contains_key(&hash) {
            self.journal.append(JournalEntry::AddPreimage { hash });
            self.preimages.insert(hash, Bytes::copy_from_slice(preimage));
        }
    }

    pub fn preimages(&self) -> &HashMap<B256, Bytes> {
        &self.preimages
    }

    pub fn add_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        self.refund += gas;
    }

    /// Panics on underflow: the VM must never release more than it holds.
    pub fn sub_refund(&mut self, gas: u64) {
        self.journal.append(JournalEntry::Refund { prev: self.refund });
        if gas > self.refund {
            panic!(
                "refund counter below zero (gas: {gas} > refund: {})",
                self.refund
            );
        }
        self.refund -= gas;
    }

    pub fn get_refund(&self) -> u64 {
        self.refund
    }

    // ---- access list ----

    /// Seeds the per-transaction access list per the warm-start rules.
    pub fn prepare_access_list(
        &mut self,
        sender: Address,
        dst: Option<Address>,
        precompiles: &[Address],
        entries: &[(Address, Vec<B256>)],
    ) {
        self.add_address_to_access_list(sender);
        if let Some(dst) = dst {
            self.add_address_to_access_list(dst);
        }
        for addr in precompiles {
            self.add_address_to_access_list(*addr);
        }
        for (addr, slots) in entries {
            self.add_address_to_access_list(*addr);
            for slot in slots {
                self.add_slot_to_access_list(*addr, *slot);
            }
        }
    }

    pub fn add_address_to_access_list(&mut self, addr: Address) {
        if self.access_list.add_address(addr) {
            self.journal
                .append(JournalEntry::AccessListAddAccount { address: addr });
        }
    }

    pub fn add_slot_to_access_list(&mut self, addr: Address, slot: B256) {
        let (addr_added, slot_added) = self.access_list.add_slot(addr, slot);
        if addr_added {
            self.journal
                .append(JournalEntry::AccessListAddAccount { address: addr });
        }
        if slot_added {
            self.journal
                .append(JournalEntry::AccessListAddSlot { address: addr, slot });
        }
    }

    pub fn address_in_access_list(&self, addr: Address) -> bool {
        self.access_list.contains_address(addr)
    }

    pub fn slot_in_access_list(&self, addr: Address, slot: B256) -> (bool, bool) {
        self.access_list.contains(addr, slot)
    }

    // ---- transaction control ----

    /// Assigns the transaction identity and resets the access list.
    pub fn prepare(&mut self, tx_hash: B256, tx_index: usize) {
        self.thash = tx_hash;
        self.tx_index = tx_index;
        self.access_list = AccessList::new();
    }

    pub fn tx_index(&self) -> usize {
        self.tx_index
    }

    pub fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.valid_revisions.push(Revision {
            id,
            journal_index: self.journal.length(),
        });
        id
    }

    pub fn revert_to_snapshot(&mut self, id: usize) -> Result<(), StateError> {
        let idx = self.valid_revisions.partition_point(|r| r.id < id);
        if idx == self.valid_revisions.len() || self.valid_revisions[idx].id != id {
            return Err(StateError::InvalidRevision);
        }
        let target = self.valid_revisions[idx].journal_index;
        let mut journal = std::mem::take(&mut self.journal);
        journal.revert(self, target);
        self.journal = journal;
        self.valid_revisions.truncate(idx);
        Ok(())
    }

    fn clear_journal_and_refund(&mut self) {
        if self.journal.length() > 0 {
            self.journal = Journal::new();
            self.refund = 0;
        }
        // Revisions may exist without journal entries; reverting across
        // transactions is never allowed.
        self.valid_revisions.clear();
    }

    /// Settles this transaction's dirty objects into the pending set, marks
    /// destructions, and clears journal, refund and revisions.
    pub fn finalise(&mut self, delete_empty: bool) {
        let mut dirty_addrs: Vec<Address> = self.journal.dirties().keys().copied().collect();
        dirty_addrs.sort();
        let mut to_prefetch = Vec::with_capacity(dirty_addrs.len());
        for addr in dirty_addrs {
            // A touch on a never-materialised special account can sit in the
            // journal without a live object; skip it.
            let Some((suicided, is_empty, addr_hash)) = self
                .state_objects
                .get(&addr)
                .map(|obj| (obj.suicided, obj.empty(), obj.addr_hash()))
            else {
                continue;
            };
            if suicided || (delete_empty && is_empty) {
                self.state_objects
                    .get_mut(&addr)
                    .expect("checked above")
                    .deleted = true;
                if self.snap.is_some() {
                    // Destructions must be tracked per transaction: a later tx
                    // in the same block may resurrect the account.
                    self.snap_destructs.insert(addr_hash);
                    self.snap_accounts.remove(&addr_hash);
                    self.snap_storage.remove(&addr_hash);
                }
            } else {
                self.state_objects
                    .get_mut(&addr)
                    .expect("checked above")
                    .finalise();
            }
            self.state_objects_pending.insert(addr);
            self.state_objects_dirty.insert(addr);
            to_prefetch.push(addr);
        }
        if let Some(prefetcher) = &self.prefetcher {
            if !to_prefetch.is_empty() {
                prefetcher.prefetch(self.original_root, &to_prefetch);
            }
        }
        self.clear_journal_and_refund();
    }

    /// Computes the current state root, writing pending objects through to
    /// the account trie.
    pub fn intermediate_root(&mut self, delete_empty: bool) -> B256 {
        self.finalise(delete_empty);

        // The prefetcher is spent once we start pulling tries out of it.
        let prefetcher = self.prefetcher.take();

        let mut pending: Vec<Address> = self.state_objects_pending.iter().copied().collect();
        pending.sort();

        let db = self.db.clone();
        // Storage roots first; account writes follow so a prefetched account
        // trie stays adoptable.
        for addr in &pending {
            let deleted = self
                .state_objects
                .get(addr)
                .map_or(true, |obj| obj.deleted);
            if deleted {
                continue;
            }
            let obj = self.state_objects.get_mut(addr).expect("pending object");
            let addr_hash = obj.addr_hash();
            let writes = obj.update_root(&db);
            if self.snap.is_some() {
                if let Some(writes) = writes {
                    self.snap_storage.entry(addr_hash).or_default().extend(writes);
                }
            }
        }

        if let Some(prefetcher) = &prefetcher {
            if let Some(trie) = prefetcher.trie(self.original_root) {
                self.trie = trie;
            }
        }

        let mut used = Vec::with_capacity(pending.len());
        for addr in &pending {
            let (deleted, addr_hash, data) = {
                let obj = self.state_objects.get(addr).expect("pending object");
                (obj.deleted, obj.addr_hash(), obj.account().clone())
            };
            if deleted {
                self.trie.remove(addr_hash);
            } else {
                let mut rlp = Vec::with_capacity(128);
                data.encode(&mut rlp);
                self.trie.update(addr_hash, rlp);
                if self.snap.is_some() {
                    self.snap_accounts
                        .insert(addr_hash, account::to_slim_rlp(&data));
                }
            }
            used.push(*addr);
        }
        if let Some(prefetcher) = &prefetcher {
            prefetcher.used(self.original_root, &used);
        }
        if let Some(prefetcher) = prefetcher {
            prefetcher.close();
        }
        self.state_objects_pending.clear();
        self.trie.hash()
    }

    /// Writes the state through to the node DB and returns the new root.
    /// Fails fast when an earlier read error was memoised.
    pub fn commit(&mut self, delete_empty: bool) -> Result<B256, StateError> {
        if let Some(err) = &self.db_err {
            return Err(err.clone());
        }
        self.intermediate_root(delete_empty);

        let db = self.db.clone();
        let mut dirty: Vec<Address> = self.state_objects_dirty.iter().copied().collect();
        dirty.sort();
        for addr in dirty {
            let Some(obj) = self.state_objects.get_mut(&addr) else {
                continue;
            };
            if obj.deleted {
                continue;
            }
            if obj.dirty_code {
                if let Some(code) = obj.cached_code() {
                    db.write_code(obj.code_hash(), code.to_vec());
                }
                obj.dirty_code = false;
            }
            obj.commit_trie(&db);
        }
        self.state_objects_dirty.clear();

        let ref_db = db.clone();
        let root = self.trie.commit(move |leaf, parent| {
            // Pin every non-empty storage root under its account leaf.
            if let Ok(account) = Account::decode(&mut &leaf[..]) {
                if account.root != EMPTY_ROOT_HASH {
                    ref_db.reference(account.root, parent);
                }
            }
        });

        if let (Some(snaps), Some(snap)) = (&self.snaps, &self.snap) {
            let parent = snap.root();
            if parent != root {
                let destructs = std::mem::take(&mut self.snap_destructs);
                let accounts = std::mem::take(&mut self.snap_accounts);
                let storage = std::mem::take(&mut self.snap_storage);
                if let Err(err) = snaps.update(root, parent, destructs, accounts, storage) {
                    warn!(%parent, %root, ?err, "failed to update snapshot tree");
                }
                if let Err(err) = snaps.cap(root, SNAP_DIFF_LAYERS) {
                    warn!(%root, layers = SNAP_DIFF_LAYERS, ?err, "failed to cap snapshot tree");
                }
            }
        }
        self.snap = None;
        self.snap_destructs = HashSet::new();
        self.snap_accounts = HashMap::new();
        self.snap_storage = HashMap::new();
        Ok(root)
    }

    // ---- lifecycle ----

    pub fn start_prefetcher(&mut self, namespace: &str) {
        if let Some(prefetcher) = self.prefetcher.take() {
            prefetcher.close();
        }
        if self.snap.is_some() {
            self.prefetcher = Some(TriePrefetcher::new(
                self.db.clone(),
                self.original_root,
                namespace,
            ));
        }
    }

    pub fn stop_prefetcher(&mut self) {
        if let Some(prefetcher) = self.prefetcher.take() {
            prefetcher.close();
        }
    }

    /// Deep, independent copy. Revisions of the original do not apply to the
    /// copy; the node DB and the snapshot tree are shared.
    pub fn copy(&self) -> StateDb {
        let mut state = StateDb {
            db: self.db.clone(),
            trie: self.trie.clone(),
            original_root: self.original_root,
            snaps: self.snaps.clone(),
            snap: self.snap.clone(),
            snap_destructs: self.snap_destructs.clone(),
            snap_accounts: self.snap_accounts.clone(),
            snap_storage: self
                .snap_storage
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            state_objects: HashMap::with_capacity(self.journal.dirties().len()),
            state_objects_pending: HashSet::with_capacity(self.state_objects_pending.len()),
            state_objects_dirty: HashSet::with_capacity(self.state_objects_dirty.len()),
            db_err: None,
            refund: self.refund,
            thash: B256::ZERO,
            tx_index: 0,
            logs: HashMap::with_capacity(self.logs.len()),
            log_size: self.log_size,
            preimages: self.preimages.clone(),
            access_list: self.access_list.clone(),
            journal: Journal::new(),
            valid_revisions: Vec::new(),
            next_revision_id: 0,
            prefetcher: self.prefetcher.as_ref().map(|p| p.copy()),
        };
        // The journal itself is not copied, so commit-time side effects of
        // dirty objects must already be visible on the copies.
        for addr in self.journal.dirties().keys() {
            if let Some(obj) = self.state_objects.get(addr) {
                state.state_objects.insert(*addr, obj.deep_copy());
                state.state_objects_dirty.insert(*addr);
                state.state_objects_pending.insert(*addr);
            }
        }
        // Copies of copies keep working because pending/dirty sets carry the
        // addresses the empty journal no longer knows about.
        for addr in &self.state_objects_pending {
            if !state.state_objects.contains_key(addr) {
                if let Some(obj) = self.state_objects.get(addr) {
                    state.state_objects.insert(*addr, obj.deep_copy());
                }
            }
            state.state_objects_pending.insert(*addr);
        }
        for addr in &self.state_objects_dirty {
            if !state.state_objects.contains_key(addr) {
                if let Some(obj) = self.state_objects.get(addr) {
                    state.state_objects.insert(*addr, obj.deep_copy());
                }
            }
            state.state_objects_dirty.insert(*addr);
        }
        for (hash, logs) in &self.logs {
            state.logs.insert(*hash, logs.clone());
        }
        state
    }
}
