//! どこで: アカウントレコード / 何を: 拡張付きRLP codecとslim codec / なぜ: root計算とsnapshotの両表現を凍結するため

use crate::constants::DEFAULT_COEFFICIENT;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{
    Buf, BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable, EMPTY_STRING_CODE,
};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};

/// Per-address payload persisted in the account trie. The three extensions
/// are optional; absent extensions encode as empty strings so old records
/// keep decoding when fields are appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub root: B256,
    pub code_hash: B256,
    pub worm: Option<WormExt>,
    pub nft: Option<NftExt>,
    pub staker: Option<StakerExt>,
    pub extra: Bytes,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
            worm: None,
            nft: None,
            staker: None,
            extra: Bytes::new(),
        }
    }
}

impl Account {
    /// Empty per the balance/nonce/code rule. An account carrying a live
    /// extension payload is never empty, so finalise cannot reap NFT or
    /// system-list accounts that hold no currency.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && self.code_hash == KECCAK_EMPTY
            && self.worm.as_ref().map_or(true, |w| *w == WormExt::default())
            && self.nft.is_none()
            && self.staker.is_none()
            && self.extra.is_empty()
    }
}

/// Extension carried by externally-owned and exchanger accounts.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct WormExt {
    pub pledged_balance: U256,
    pub pledged_block_number: U256,
    pub vote_weight: U256,
    pub vote_block_number: U256,
    pub coefficient: u8,
    pub exchanger_flag: bool,
    pub block_number: U256,
    pub exchanger_balance: U256,
    pub fee_rate: u16,
    pub name: String,
    pub url: String,
    pub approve_addresses: Vec<Address>,
    pub snft_agent_recipient: Address,
    pub stakers: Vec<StakerPledge>,
    pub lock_snft: bool,
    pub snft_no_merge: bool,
}

impl Default for WormExt {
    fn default() -> Self {
        Self {
            pledged_balance: U256::ZERO,
            pledged_block_number: U256::ZERO,
            vote_weight: U256::ZERO,
            vote_block_number: U256::ZERO,
            coefficient: DEFAULT_COEFFICIENT,
            exchanger_flag: false,
            block_number: U256::ZERO,
            exchanger_balance: U256::ZERO,
            fee_rate: 0,
            name: String::new(),
            url: String::new(),
            approve_addresses: Vec::new(),
            snft_agent_recipient: Address::ZERO,
            stakers: Vec::new(),
            lock_snft: false,
            snft_no_merge: false,
        }
    }
}

/// One delegated pledge from this account towards a validator.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StakerPledge {
    pub addr: Address,
    pub balance: U256,
    pub block_number: U256,
}

/// Extension carried by NFT-bearing addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NftExt {
    pub name: String,
    pub symbol: String,
    pub owner: Address,
    pub approve_address: Address,
    pub merge_level: u8,
    pub merge_number: u32,
    pub creator: Address,
    pub royalty: u16,
    pub exchanger: Address,
    pub meta_url: String,
    pub snft_recipient: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Validator {
    pub addr: Address,
    pub balance: U256,
    pub proxy: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StakerCut {
    pub addr: Address,
    pub balance: U256,
}

/// A pre-registered range of official SNFT addresses awaiting minting.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct InjectedSnft {
    pub dir: String,
    pub start_index: U256,
    pub number: u64,
    pub royalty: u16,
    pub creator: Address,
    pub address: Address,
    pub vote_weight: U256,
}

impl InjectedSnft {
    pub fn end_index(&self) -> U256 {
        self.start_index + U256::from(self.number)
    }

    pub fn covers(&self, index: U256) -> bool {
        index >= self.start_index && index < self.end_index()
    }
}

/// The candidate currently nominated for the next injection. A zero address
/// means no live nomination.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NominatedSnft {
    pub dir: String,
    pub start_index: U256,
    pub number: u64,
    pub royalty: u16,
    pub creator: Address,
    pub address: Address,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct MintDeep {
    pub user_mint: U256,
    pub official_mint: U256,
}

/// Extension carried by the reserved system addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StakerExt {
    pub validators: Vec<Validator>,
    pub stakers: Vec<StakerCut>,
    pub injected: Vec<InjectedSnft>,
    pub nominee: NominatedSnft,
    pub mint: MintDeep,
    pub snft_l3_addrs: Vec<Address>,
    pub dividend_addrs: Vec<Address>,
}

impl StakerExt {
    pub fn validator_mut(&mut self, addr: Address) -> Option<&mut Validator> {
        self.validators.iter_mut().find(|v| v.addr == addr)
    }

    /// Adds `amount` to a validator, creating the record on first pledge.
    /// A non-zero proxy overwrites the stored one.
    pub fn add_validator(&mut self, addr: Address, amount: U256, proxy: Address) {
        if let Some(v) = self.validator_mut(addr) {
            v.balance = v.balance.saturating_add(amount);
            if proxy != Address::ZERO {
                v.proxy = proxy;
            }
            return;
        }
        self.validators.push(Validator {
            addr,
            balance: amount,
            proxy,
        });
    }

    /// Removes `amount` from a validator; a drained record is dropped.
    pub fn remove_validator(&mut self, addr: Address, amount: U256) {
        if let Some(v) = self.validator_mut(addr) {
            v.balance = v.balance.saturating_sub(amount);
            if v.balance.is_zero() {
                self.validators.retain(|v| v.addr != addr);
            }
        }
    }

    pub fn add_staker(&mut self, addr: Address, amount: U256) {
        if let Some(s) = self.stakers.iter_mut().find(|s| s.addr == addr) {
            s.balance = s.balance.saturating_add(amount);
            return;
        }
        self.stakers.push(StakerCut {
            addr,
            balance: amount,
        });
    }

    pub fn remove_staker(&mut self, addr: Address, amount: U256) {
        if let Some(s) = self.stakers.iter_mut().find(|s| s.addr == addr) {
            s.balance = s.balance.saturating_sub(amount);
            if s.balance.is_zero() {
                self.stakers.retain(|s| s.addr != addr);
            }
        }
    }

    pub fn add_injected(&mut self, record: InjectedSnft) {
        self.injected.push(record);
    }

    /// Drops injected records whose whole range lies before `index`.
    pub fn remove_injected_before(&mut self, index: U256) {
        self.injected.retain(|r| r.end_index() > index);
    }

    pub fn injected_info(&self, index: U256) -> Option<&InjectedSnft> {
        self.injected.iter().find(|r| r.covers(index))
    }

    /// First index past every registered injection; the SNFT base when no
    /// injection exists yet.
    pub fn injected_max_index(&self) -> U256 {
        self.injected
            .iter()
            .map(InjectedSnft::end_index)
            .max()
            .unwrap_or(crate::constants::SNFT_BASE)
    }

    /// How many registered slots remain at or past `mint`.
    pub fn injected_remainder(&self, mint: U256) -> u64 {
        let mut remaining = U256::ZERO;
        for record in &self.injected {
            let end = record.end_index();
            if end > mint {
                let from = record.start_index.max(mint);
                remaining += end - from;
            }
        }
        remaining.try_into().unwrap_or(u64::MAX)
    }
}

fn encode_opt<T: Encodable>(value: &Option<T>, out: &mut Vec<u8>) {
    match value {
        Some(v) => v.encode(out),
        None => out.put_u8(EMPTY_STRING_CODE),
    }
}

fn decode_opt<T: Decodable>(buf: &mut &[u8]) -> alloy_rlp::Result<Option<T>> {
    match buf.first() {
        None => Ok(None),
        Some(&EMPTY_STRING_CODE) => {
            buf.advance(1);
            Ok(None)
        }
        Some(_) => Ok(Some(T::decode(buf)?)),
    }
}

fn decode_tail_bytes(buf: &mut &[u8]) -> alloy_rlp::Result<Bytes> {
    if buf.is_empty() {
        return Ok(Bytes::new());
    }
    Bytes::decode(buf)
}

impl Encodable for Account {
    fn encode(&self, out: &mut dyn BufMut) {
        let mut payload = Vec::with_capacity(128);
        self.nonce.encode(&mut payload);
        self.balance.encode(&mut payload);
        self.root.encode(&mut payload);
        self.code_hash.encode(&mut payload);
        encode_opt(&self.worm, &mut payload);
        encode_opt(&self.nft, &mut payload);
        encode_opt(&self.staker, &mut payload);
        self.extra.encode(&mut payload);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(out);
        out.put_slice(&payload);
    }
}

impl Decodable for Account {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let (mut body, rest) = buf.split_at(header.payload_length);
        *buf = rest;

        let nonce = u64::decode(&mut body)?;
        let balance = U256::decode(&mut body)?;
        let root = B256::decode(&mut body)?;
        let code_hash = B256::decode(&mut body)?;
        let worm = decode_opt(&mut body)?;
        let nft = decode_opt(&mut body)?;
        let staker = decode_opt(&mut body)?;
        let extra = decode_tail_bytes(&mut body)?;
        Ok(Self {
            nonce,
            balance,
            root,
            code_hash,
            worm,
            nft,
            staker,
            extra,
        })
    }
}

/// Snapshot slim encoding: the empty-root and empty-code sentinels collapse
/// to empty strings to keep diff layers small.
pub fn to_slim_rlp(account: &Account) -> Vec<u8> {
    let mut payload = Vec::with_capacity(96);
    account.nonce.encode(&mut payload);
    account.balance.encode(&mut payload);
    if account.root == EMPTY_ROOT_HASH {
        payload.put_u8(EMPTY_STRING_CODE);
    } else {
        account.root.encode(&mut payload);
    }
    if account.code_hash == KECCAK_EMPTY {
        payload.put_u8(EMPTY_STRING_CODE);
    } else {
        account.code_hash.encode(&mut payload);
    }
    encode_opt(&account.worm, &mut payload);
    encode_opt(&account.nft, &mut payload);
    encode_opt(&account.staker, &mut payload);
    account.extra.encode(&mut payload);

    let mut out = Vec::with_capacity(payload.len() + 4);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.put_slice(&payload);
    out
}

pub fn from_slim_rlp(mut buf: &[u8]) -> alloy_rlp::Result<Account> {
    let buf = &mut buf;
    let header = Header::decode(buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let (mut body, _) = buf.split_at(header.payload_length);

    let nonce = u64::decode(&mut body)?;
    let balance = U256::decode(&mut body)?;
    let root = match body.first() {
        Some(&EMPTY_STRING_CODE) => {
            body.advance(1);
            EMPTY_ROOT_HASH
        }
        _ => B256::decode(&mut body)?,
    };
    let code_hash = match body.first() {
        Some(&EMPTY_STRING_CODE) => {
            body.advance(1);
            KECCAK_EMPTY
        }
        _ => B256::decode(&mut body)?,
    };
    let worm = decode_opt(&mut body)?;
    let nft = decode_opt(&mut body)?;
    let staker = decode_opt(&mut body)?;
    let extra = decode_tail_bytes(&mut body)?;
    Ok(Account {
        nonce,
        balance,
        root,
        code_hash,
        worm,
        nft,
        staker,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_account_roundtrip() {
        let account = Account {
            nonce: 7,
            balance: U256::from(1_000u64),
            ..Account::default()
        };
        let mut encoded = Vec::new();
        account.encode(&mut encoded);
        let decoded = Account::decode(&mut encoded.as_slice()).expect("decode");
        assert_eq!(decoded, account);

        let mut again = Vec::new();
        decoded.encode(&mut again);
        assert_eq!(again, encoded);
    }

    #[test]
    fn extensions_survive_roundtrip() {
        let mut account = Account::default();
        account.worm = Some(WormExt {
            pledged_balance: U256::from(5u64),
            stakers: vec![StakerPledge {
                addr: Address::repeat_byte(0x11),
                balance: U256::from(9u64),
                block_number: U256::from(3u64),
            }],
            ..WormExt::default()
        });
        account.nft = Some(NftExt {
            owner: Address::repeat_byte(0x22),
            merge_level: 2,
            merge_number: 256,
            meta_url: "u/0x22".to_string(),
            ..NftExt::default()
        });
        let mut encoded = Vec::new();
        account.encode(&mut encoded);
        let decoded = Account::decode(&mut encoded.as_slice()).expect("decode");
        assert_eq!(decoded, account);
    }

    #[test]
    fn slim_restores_sentinels() {
        let account = Account {
            nonce: 1,
            balance: U256::from(2u64),
            ..Account::default()
        };
        let slim = to_slim_rlp(&account);
        let decoded = from_slim_rlp(&slim).expect("slim decode");
        assert_eq!(decoded.root, EMPTY_ROOT_HASH);
        assert_eq!(decoded.code_hash, KECCAK_EMPTY);
        assert_eq!(decoded, account);
    }

    #[test]
    fn injected_remainder_counts_open_slots() {
        let mut ext = StakerExt::default();
        ext.add_injected(InjectedSnft {
            start_index: U256::from(100u64),
            number: 50,
            ..InjectedSnft::default()
        });
        ext.add_injected(InjectedSnft {
            start_index: U256::from(150u64),
            number: 10,
            ..InjectedSnft::default()
        });
        assert_eq!(ext.injected_remainder(U256::from(100u64)), 60);
        assert_eq!(ext.injected_remainder(U256::from(140u64)), 20);
        ext.remove_injected_before(U256::from(150u64));
        assert_eq!(ext.injected.len(), 1);
    }
}
