//! どこで: 共通定数 / 何を: 予約アドレス・SNFT基数・期間・topic / なぜ: 合意に効く値を一箇所に凍結するため

use alloy_primitives::{address, b256, Address, B256, U256};

/// System accounts carrying list payloads in their staker extension.
pub const MINT_DEEP_STORAGE_ADDRESS: Address =
    address!("0000000000000000000000000000000000000100");
pub const SNFT_INJECTED_STORAGE_ADDRESS: Address =
    address!("0000000000000000000000000000000000000101");
pub const VALIDATOR_STORAGE_ADDRESS: Address =
    address!("0000000000000000000000000000000000000102");
pub const STAKER_STORAGE_ADDRESS: Address =
    address!("0000000000000000000000000000000000000103");
pub const NOMINATED_STORAGE_ADDRESS: Address =
    address!("0000000000000000000000000000000000000104");
pub const SNFT_LEVEL3_ADDRESS_LIST: Address =
    address!("0000000000000000000000000000000000000105");
pub const DIVIDEND_ADDRESS_LIST: Address =
    address!("0000000000000000000000000000000000000106");

/// Sink whose whole balance rewards the elected nominee.
pub const INJECT_REWARD_SINK: Address = address!("ffffffffffffffffffffffffffffffffffffffff");

/// First official SNFT address; the top bit marks the SNFT subspace.
pub const SNFT_BASE: U256 = U256::from_limbs([0, 0, 0x8000_0000, 0]);

/// Maximum merge depth of the 16-ary SNFT tree.
pub const QUERY_DEPTH_LIMIT: u8 = 3;

/// Per-leaf exchange radix by merge level, in wei. Strictly increasing so a
/// merge never reduces value.
pub const SNFT_RADIX: [U256; 4] = [
    U256::from_limbs([30_000_000_000_000_000, 0, 0, 0]),
    U256::from_limbs([143_000_000_000_000_000, 0, 0, 0]),
    U256::from_limbs([271_000_000_000_000_000, 0, 0, 0]),
    U256::from_limbs([650_000_000_000_000_000, 0, 0, 0]),
];

/// Base validator reward per block, in wei.
pub const DRE_BLOCK_REWARD: U256 = U256::from_limbs([110_000_000_000_000_000, 0, 0, 0]);

/// Deflation ratio applied per elapsed period, as an integer fraction.
pub const DEFLATION_RATE_NUM: u64 = 85;
pub const DEFLATION_RATE_DEN: u64 = 100;

/// Blocks per reward-reduction period.
pub const REDUCE_REWARD_PERIOD: u64 = 4_204_800;

/// SNFT chunks (4096 addresses each) per exchange deflation period.
pub const EXCHANGE_PERIOD: u64 = 6_160;

/// Addresses covered by one injection chunk.
pub const SNFT_CHUNK: u64 = 4_096;

/// A fresh injection is elected once fewer than this many slots remain.
pub const INJECT_REFILL_THRESHOLD: u64 = 110;

pub const DEFAULT_INJECT_DIR: &str = "/ipfs/QmS2U6Mu2X5HaUbrbVp6JoLmdcFphXiD98avZnq1My8vef";
pub const DEFAULT_INJECT_NUMBER: u64 = 4_096;
pub const DEFAULT_INJECT_ROYALTY: u16 = 1_000;
pub const DEFAULT_INJECT_CREATOR: Address = Address::ZERO;

/// Closing threshold for a delegating exchanger: 700 * 1e18 wei.
pub const EXCHANGER_PLEDGE_FLOOR: U256 = U256::from_limbs([17_470_469_272_746_590_208, 37, 0, 0]);

/// Fresh externally-owned accounts start at this validator coefficient.
pub const DEFAULT_COEFFICIENT: u8 = 70;
pub const MAX_COEFFICIENT: u8 = 100;

/// Fixed prefix of the consensus extra-data blob.
pub const ISTANBUL_EXTRA_VANITY: usize = 32;
/// Length of a secp256k1 seal inside the extra-data blob.
pub const ISTANBUL_EXTRA_SEAL: usize = 65;

/// keccak("MergeSNFT(address,address,uint256,(address,uint256)[])")
pub const MERGE_SNFT_TOPIC: B256 =
    b256!("77415a68a0d28daf11e1308e53371f573e0920810c9cd9de7904777d5fb9d625");
/// keccak("MintNFT(address)")
pub const MINT_NFT_TOPIC: B256 =
    b256!("385e9e2ed650704f0fdc4ea7496f88a83ad457497f62b54efcb903a67c58a68f");

/// Diff layers retained in the snapshot tree; the flattened base is the next
/// one down.
pub const SNAP_DIFF_LAYERS: usize = 128;
