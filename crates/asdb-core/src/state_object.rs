//! どこで: 稼働中アカウント / 何を: storage差分層とコード・拡張の可変ビュー / なぜ: trie書き込みをtx境界まで遅延するため

use crate::account::{Account, MintDeep, NftExt, StakerExt, WormExt};
use crate::constants::{MAX_COEFFICIENT, MINT_DEEP_STORAGE_ADDRESS, SNFT_BASE};
use crate::state_db::StateError;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_trie::KECCAK_EMPTY;
use asdb_db::trie::{decode_storage_value, encode_storage_value};
use asdb_db::{NodeDb, Snapshot, Trie};
use std::collections::{BTreeMap, HashMap};

/// Non-owning read context handed into storage reads, so the object never
/// stores a back-pointer onto the database.
pub(crate) struct StorageReader<'a> {
    pub db: &'a NodeDb,
    pub snap: Option<&'a Snapshot>,
    /// The account was destructed in the current block; the snapshot layer
    /// below must not be trusted for it.
    pub destructed: bool,
}

#[derive(Clone, Debug)]
pub struct StateObject {
    address: Address,
    addr_hash: B256,
    pub(crate) account: Account,
    code: Option<Bytes>,
    pub(crate) dirty_code: bool,
    pub(crate) suicided: bool,
    pub(crate) deleted: bool,
    trie: Option<Trie>,
    origin_storage: HashMap<B256, B256>,
    pending_storage: HashMap<B256, B256>,
    pub(crate) dirty_storage: HashMap<B256, B256>,
}

impl StateObject {
    pub fn new(address: Address, account: Account) -> Self {
        Self {
            address,
            addr_hash: keccak256(address.as_slice()),
            account,
            code: None,
            dirty_code: false,
            suicided: false,
            deleted: false,
            trie: None,
            origin_storage: HashMap::new(),
            pending_storage: HashMap::new(),
            dirty_storage: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn addr_hash(&self) -> B256 {
        self.addr_hash
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn balance(&self) -> U256 {
        self.account.balance
    }

    pub fn nonce(&self) -> u64 {
        self.account.nonce
    }

    pub fn code_hash(&self) -> B256 {
        self.account.code_hash
    }

    pub fn empty(&self) -> bool {
        self.account.is_empty()
    }

    pub(crate) fn set_balance(&mut self, balance: U256) {
        self.account.balance = balance;
    }

    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.account.nonce = nonce;
    }

    pub(crate) fn set_code(&mut self, code_hash: B256, code: Bytes) {
        self.code = Some(code);
        self.account.code_hash = code_hash;
        self.dirty_code = true;
    }

    pub(crate) fn set_code_cached(&mut self, code: Bytes) {
        self.code = Some(code);
    }

    pub(crate) fn cached_code(&self) -> Option<&Bytes> {
        self.code.as_ref()
    }

    pub(crate) fn mark_suicided(&mut self) {
        self.suicided = true;
    }

    pub(crate) fn load_code(&mut self, db: &NodeDb) -> Result<Bytes, StateError> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        if self.account.code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        match db.contract_code(&self.account.code_hash) {
            Some(code) => {
                let code = Bytes::from(code);
                self.code = Some(code.clone());
                Ok(code)
            }
            None => Err(StateError::Db(format!(
                "missing code {} for {}",
                self.account.code_hash, self.address
            ))),
        }
    }

    fn storage_trie(&mut self, db: &NodeDb) -> &mut Trie {
        if self.trie.is_none() {
            self.trie = Some(Trie::open(db.clone(), self.account.root));
        }
        self.trie.as_mut().expect("storage trie just opened")
    }

    /// Committed view of a slot: pending, then clean cache, then snapshot,
    /// then the storage trie. A trie miss populates the clean cache.
    pub(crate) fn committed_storage(
        &mut self,
        reader: &StorageReader<'_>,
        key: B256,
    ) -> Result<B256, StateError> {
        if let Some(value) = self.pending_storage.get(&key) {
            return Ok(*value);
        }
        if let Some(value) = self.origin_storage.get(&key) {
            return Ok(*value);
        }

        let slot_hash = keccak256(key.as_slice());
        let mut resolved: Option<B256> = None;
        if let Some(snap) = reader.snap {
            if reader.destructed {
                return Ok(B256::ZERO);
            }
            match snap.storage(self.addr_hash, slot_hash) {
                Ok(Some(raw)) => {
                    resolved = Some(decode_storage_value(&raw).unwrap_or(B256::ZERO));
                }
                Ok(None) => resolved = Some(B256::ZERO),
                Err(_) => {}
            }
        }
        let value = match resolved {
            Some(value) => value,
            None => {
                let root = self.account.root;
                let trie = self.storage_trie(reader.db);
                match trie.get(slot_hash) {
                    Ok(Some(raw)) => decode_storage_value(&raw).unwrap_or(B256::ZERO),
                    Ok(None) => B256::ZERO,
                    Err(_) => {
                        return Err(StateError::Db(format!(
                            "missing storage trie node under root {root}"
                        )))
                    }
                }
            }
        };
        self.origin_storage.insert(key, value);
        Ok(value)
    }

    pub(crate) fn storage_value(
        &mut self,
        reader: &StorageReader<'_>,
        key: B256,
    ) -> Result<B256, StateError> {
        if let Some(value) = self.dirty_storage.get(&key) {
            return Ok(*value);
        }
        self.committed_storage(reader, key)
    }

    pub(crate) fn set_storage_value(&mut self, key: B256, value: B256) {
        self.dirty_storage.insert(key, value);
    }

    /// Wholesale storage replacement; debugging aid only.
    pub(crate) fn replace_storage(&mut self, storage: HashMap<B256, B256>) {
        self.pending_storage = storage;
    }

    /// Moves this transaction's writes into the pending set.
    pub(crate) fn finalise(&mut self) {
        for (key, value) in self.dirty_storage.drain() {
            self.pending_storage.insert(key, value);
        }
    }

    /// Flushes pending slots into the storage trie. Returns hashed-slot
    /// writes for the snapshot mirror; empty bytes mark a deletion.
    pub(crate) fn update_trie(&mut self, db: &NodeDb) -> Option<HashMap<B256, Vec<u8>>> {
        self.finalise();
        if self.pending_storage.is_empty() {
            return None;
        }
        let pending: BTreeMap<B256, B256> = self.pending_storage.drain().collect();
        let mut snap_writes = HashMap::with_capacity(pending.len());
        for (key, value) in pending {
            if self.origin_storage.get(&key) == Some(&value) {
                continue;
            }
            self.origin_storage.insert(key, value);
            let slot_hash = keccak256(key.as_slice());
            let trie = self.storage_trie(db);
            if value.is_zero() {
                trie.remove(slot_hash);
                snap_writes.insert(slot_hash, Vec::new());
            } else {
                let encoded = encode_storage_value(value);
                trie.update(slot_hash, encoded.to_vec());
                snap_writes.insert(slot_hash, encoded.to_vec());
            }
        }
        Some(snap_writes)
    }

    /// Recomputes the storage root after flushing pending writes.
    pub(crate) fn update_root(&mut self, db: &NodeDb) -> Option<HashMap<B256, Vec<u8>>> {
        let writes = self.update_trie(db);
        if let Some(trie) = &self.trie {
            self.account.root = trie.hash();
        }
        writes
    }

    /// Commits the storage trie nodes into the node DB.
    pub(crate) fn commit_trie(&mut self, db: &NodeDb) {
        self.update_trie(db);
        if let Some(trie) = self.trie.as_mut() {
            self.account.root = trie.commit(|_, _| {});
        }
    }

    pub(crate) fn storage_trie_copy(&mut self, db: &NodeDb) -> Trie {
        self.update_trie(db);
        self.storage_trie(db).clone()
    }

    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    // ---- worm extension ----

    pub fn worm(&self) -> Option<&WormExt> {
        self.account.worm.as_ref()
    }

    pub(crate) fn ensure_worm(&mut self) -> &mut WormExt {
        self.account.worm.get_or_insert_with(WormExt::default)
    }

    pub fn pledged_balance(&self) -> U256 {
        self.worm().map(|w| w.pledged_balance).unwrap_or_default()
    }

    pub fn vote_weight(&self) -> U256 {
        self.worm().map(|w| w.vote_weight).unwrap_or_default()
    }

    pub fn vote_block_number(&self) -> U256 {
        self.worm().map(|w| w.vote_block_number).unwrap_or_default()
    }

    pub fn coefficient(&self) -> u8 {
        self.worm().map(|w| w.coefficient).unwrap_or_default()
    }

    pub fn exchanger_flag(&self) -> bool {
        self.worm().map(|w| w.exchanger_flag).unwrap_or_default()
    }

    pub fn exchanger_balance(&self) -> U256 {
        self.worm().map(|w| w.exchanger_balance).unwrap_or_default()
    }

    pub fn open_block_number(&self) -> U256 {
        self.worm().map(|w| w.block_number).unwrap_or_default()
    }

    pub fn fee_rate(&self) -> u16 {
        self.worm().map(|w| w.fee_rate).unwrap_or_default()
    }

    pub fn exchanger_name(&self) -> String {
        self.worm().map(|w| w.name.clone()).unwrap_or_default()
    }

    pub fn exchanger_url(&self) -> String {
        self.worm().map(|w| w.url.clone()).unwrap_or_default()
    }

    pub fn approve_addresses(&self) -> Vec<Address> {
        self.worm()
            .map(|w| w.approve_addresses.clone())
            .unwrap_or_default()
    }

    pub fn is_approve_address(&self, addr: Address) -> bool {
        self.worm()
            .map(|w| w.approve_addresses.contains(&addr))
            .unwrap_or(false)
    }

    pub fn snft_agent_recipient(&self) -> Address {
        self.worm()
            .map(|w| w.snft_agent_recipient)
            .unwrap_or_default()
    }

    pub fn snft_no_merge(&self) -> bool {
        self.worm().map(|w| w.snft_no_merge).unwrap_or_default()
    }

    pub fn lock_snft(&self) -> bool {
        self.worm().map(|w| w.lock_snft).unwrap_or_default()
    }

    pub fn staker_pledged_balance(&self, validator: Address) -> U256 {
        self.worm()
            .and_then(|w| w.stakers.iter().find(|s| s.addr == validator))
            .map(|s| s.balance)
            .unwrap_or_default()
    }

    pub fn staker_pledged_block_number(&self, validator: Address) -> U256 {
        self.worm()
            .and_then(|w| w.stakers.iter().find(|s| s.addr == validator))
            .map(|s| s.block_number)
            .unwrap_or_default()
    }

    pub(crate) fn add_coefficient(&mut self, delta: u8) {
        let worm = self.ensure_worm();
        worm.coefficient = worm.coefficient.saturating_add(delta).min(MAX_COEFFICIENT);
    }

    pub(crate) fn sub_coefficient(&mut self, delta: u8) {
        let worm = self.ensure_worm();
        worm.coefficient = worm.coefficient.saturating_sub(delta);
    }

    // ---- nft extension ----

    pub fn nft(&self) -> Option<&NftExt> {
        self.account.nft.as_ref()
    }

    pub(crate) fn ensure_nft(&mut self) -> &mut NftExt {
        self.account.nft.get_or_insert_with(NftExt::default)
    }

    pub fn nft_owner(&self) -> Address {
        self.nft().map(|n| n.owner).unwrap_or_default()
    }

    pub fn nft_merge_level(&self) -> u8 {
        self.nft().map(|n| n.merge_level).unwrap_or_default()
    }

    pub fn nft_merge_number(&self) -> u32 {
        self.nft().map(|n| n.merge_number).unwrap_or_default()
    }

    pub fn nft_meta_url(&self) -> String {
        self.nft().map(|n| n.meta_url.clone()).unwrap_or_default()
    }

    pub fn nft_creator(&self) -> Address {
        self.nft().map(|n| n.creator).unwrap_or_default()
    }

    pub fn nft_royalty(&self) -> u16 {
        self.nft().map(|n| n.royalty).unwrap_or_default()
    }

    pub fn nft_exchanger(&self) -> Address {
        self.nft().map(|n| n.exchanger).unwrap_or_default()
    }

    pub fn nft_name(&self) -> String {
        self.nft().map(|n| n.name.clone()).unwrap_or_default()
    }

    pub fn nft_symbol(&self) -> String {
        self.nft().map(|n| n.symbol.clone()).unwrap_or_default()
    }

    pub fn nft_approve_address(&self) -> Address {
        self.nft().map(|n| n.approve_address).unwrap_or_default()
    }

    pub fn nft_snft_recipient(&self) -> Address {
        self.nft().map(|n| n.snft_recipient).unwrap_or_default()
    }

    pub(crate) fn set_nft_info(&mut self, info: NftExt) {
        self.account.nft = Some(info);
    }

    pub(crate) fn clean_nft(&mut self) {
        self.account.nft = None;
    }

    // ---- staker extension ----

    pub fn staker(&self) -> Option<&StakerExt> {
        self.account.staker.as_ref()
    }

    pub(crate) fn ensure_staker(&mut self) -> &mut StakerExt {
        let init_mint = self.address == MINT_DEEP_STORAGE_ADDRESS;
        self.account.staker.get_or_insert_with(|| {
            let mut ext = StakerExt::default();
            if init_mint {
                ext.mint = MintDeep {
                    user_mint: U256::from(1u64),
                    official_mint: SNFT_BASE,
                };
            }
            ext
        })
    }
}
