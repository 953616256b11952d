//! どこで: イベントログ / 何を: Log型とSNFTイベントの固定topic構築 / なぜ: 受信側ABIとbit単位で一致させるため

use crate::constants::{MERGE_SNFT_TOPIC, MINT_NFT_TOPIC};
use alloy_primitives::{Address, B256, U256};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub index: u64,
}

fn address_word(addr: Address) -> B256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    B256::from(word)
}

/// MergeSNFT(snft indexed, owner indexed, pieces, subNFTs[]). The snft topic
/// drops the merged node's trailing level nibbles, the way the event was
/// originally specified.
pub fn merge_snft_log(
    snft: Address,
    owner: Address,
    merge_level: u8,
    pieces: u32,
    block_number: u64,
    sub_nfts: &[(Address, u32)],
) -> Log {
    let snft_word = U256::from_be_slice(snft.as_slice()) >> (4 * merge_level as usize);
    let mut data = Vec::with_capacity(32 * (3 + 2 * sub_nfts.len()));
    data.extend_from_slice(&U256::from(pieces).to_be_bytes::<32>());
    if !sub_nfts.is_empty() {
        data.extend_from_slice(&U256::from(0x80u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(sub_nfts.len() as u64).to_be_bytes::<32>());
        for (addr, number) in sub_nfts {
            data.extend_from_slice(address_word(*addr).as_slice());
            data.extend_from_slice(&U256::from(*number).to_be_bytes::<32>());
        }
    }
    Log {
        address: Address::ZERO,
        topics: vec![
            MERGE_SNFT_TOPIC,
            B256::from(snft_word.to_be_bytes::<32>()),
            address_word(owner),
        ],
        data,
        block_number,
        ..Log::default()
    }
}

/// MintNFT(nftaddress indexed).
pub fn mint_nft_log(nft: Address, block_number: u64) -> Log {
    Log {
        address: Address::ZERO,
        topics: vec![MINT_NFT_TOPIC, address_word(nft)],
        data: Vec::new(),
        block_number,
        ..Log::default()
    }
}
