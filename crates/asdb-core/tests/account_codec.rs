//! どこで: account codec性質テスト / 何を: roundtrip・末尾互換・slim sentinel / なぜ: root計算に入るbytesを凍結するため

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, Header};
use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};
use asdb_core::account::{
    from_slim_rlp, to_slim_rlp, InjectedSnft, MintDeep, NominatedSnft, StakerCut, StakerPledge,
    Validator,
};
use asdb_core::{Account, NftExt, StakerExt, WormExt};
use proptest::prelude::*;

fn encode(account: &Account) -> Vec<u8> {
    let mut out = Vec::new();
    account.encode(&mut out);
    out
}

fn worm_strategy() -> impl Strategy<Value = WormExt> {
    (
        any::<u64>(),
        any::<u64>(),
        any::<u8>(),
        any::<bool>(),
        any::<u16>(),
        ".{0,12}",
        proptest::collection::vec(any::<[u8; 20]>(), 0..3),
        any::<[u8; 20]>(),
        any::<bool>(),
    )
        .prop_map(
            |(pledged, weight, coefficient, flag, fee_rate, name, approves, agent, no_merge)| {
                WormExt {
                    pledged_balance: U256::from(pledged),
                    vote_weight: U256::from(weight),
                    coefficient,
                    exchanger_flag: flag,
                    fee_rate,
                    name,
                    approve_addresses: approves.into_iter().map(Address::from).collect(),
                    snft_agent_recipient: Address::from(agent),
                    stakers: vec![StakerPledge {
                        addr: Address::repeat_byte(0x09),
                        balance: U256::from(11u64),
                        block_number: U256::from(12u64),
                    }],
                    snft_no_merge: no_merge,
                    ..WormExt::default()
                }
            },
        )
}

fn nft_strategy() -> impl Strategy<Value = NftExt> {
    (
        any::<[u8; 20]>(),
        0..=3u8,
        any::<u32>(),
        any::<u16>(),
        ".{0,16}",
    )
        .prop_map(|(owner, level, number, royalty, meta_url)| NftExt {
            owner: Address::from(owner),
            merge_level: level,
            merge_number: number,
            royalty,
            meta_url,
            ..NftExt::default()
        })
}

fn staker_strategy() -> impl Strategy<Value = StakerExt> {
    (any::<u64>(), any::<u64>(), any::<[u8; 20]>()).prop_map(|(user, official, addr)| StakerExt {
        validators: vec![Validator {
            addr: Address::from(addr),
            balance: U256::from(17u64),
            proxy: Address::ZERO,
        }],
        stakers: vec![StakerCut {
            addr: Address::from(addr),
            balance: U256::from(3u64),
        }],
        injected: vec![InjectedSnft {
            dir: "/ipfs/x".to_string(),
            start_index: U256::from(user),
            number: 4096,
            royalty: 100,
            creator: Address::from(addr),
            address: Address::ZERO,
            vote_weight: U256::ZERO,
        }],
        nominee: NominatedSnft::default(),
        mint: MintDeep {
            user_mint: U256::from(user),
            official_mint: U256::from(official),
        },
        snft_l3_addrs: vec![Address::from(addr)],
        dividend_addrs: Vec::new(),
    })
}

fn account_strategy() -> impl Strategy<Value = Account> {
    (
        any::<u64>(),
        any::<u128>(),
        any::<[u8; 32]>(),
        proptest::option::of(worm_strategy()),
        proptest::option::of(nft_strategy()),
        proptest::option::of(staker_strategy()),
        proptest::collection::vec(any::<u8>(), 0..8),
    )
        .prop_map(|(nonce, balance, code_hash, worm, nft, staker, extra)| Account {
            nonce,
            balance: U256::from(balance),
            root: EMPTY_ROOT_HASH,
            code_hash: B256::from(code_hash),
            worm,
            nft,
            staker,
            extra: Bytes::from(extra),
        })
}

proptest! {
    #[test]
    fn roundtrip_is_byte_stable(account in account_strategy()) {
        let encoded = encode(&account);
        let decoded = Account::decode(&mut encoded.as_slice()).expect("decode");
        prop_assert_eq!(&decoded, &account);
        prop_assert_eq!(encode(&decoded), encoded);
    }

    #[test]
    fn slim_roundtrip_preserves_accounts(account in account_strategy()) {
        let slim = to_slim_rlp(&account);
        let decoded = from_slim_rlp(&slim).expect("slim decode");
        prop_assert_eq!(decoded, account);
    }

    #[test]
    fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = Account::decode(&mut bytes.as_slice());
        let _ = from_slim_rlp(&bytes);
    }
}

#[test]
fn legacy_record_without_extensions_decodes() {
    // Pre-extension records carry only the four fixed fields.
    let mut payload = Vec::new();
    7u64.encode(&mut payload);
    U256::from(1234u64).encode(&mut payload);
    EMPTY_ROOT_HASH.encode(&mut payload);
    KECCAK_EMPTY.encode(&mut payload);
    let mut raw = Vec::new();
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut raw);
    raw.extend_from_slice(&payload);

    let account = Account::decode(&mut raw.as_slice()).expect("decode");
    assert_eq!(account.nonce, 7);
    assert_eq!(account.balance, U256::from(1234u64));
    assert!(account.worm.is_none());
    assert!(account.nft.is_none());
    assert!(account.staker.is_none());
    assert!(account.extra.is_empty());
}

#[test]
fn slim_encoding_collapses_empty_sentinels() {
    let account = Account::default();
    let slim = to_slim_rlp(&account);
    let full = encode(&account);
    assert!(slim.len() < full.len());
    let decoded = from_slim_rlp(&slim).expect("slim decode");
    assert_eq!(decoded.root, EMPTY_ROOT_HASH);
    assert_eq!(decoded.code_hash, KECCAK_EMPTY);
}

#[test]
fn empty_rule_ignores_default_worm_but_not_payloads() {
    let mut account = Account::default();
    assert!(account.is_empty());
    account.worm = Some(WormExt::default());
    assert!(account.is_empty());
    account.nft = Some(NftExt {
        owner: Address::repeat_byte(1),
        ..NftExt::default()
    });
    assert!(!account.is_empty());
    account.nft = None;
    account.balance = U256::from(1u64);
    assert!(!account.is_empty());
}
