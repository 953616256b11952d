//! どこで: フラットストアのKey / 何を: 固定長キー定義 / なぜ: 決定的な順序を保証するため

use alloy_primitives::B256;

pub const ACCOUNT_FLAT_PREFIX: u8 = 0x01;
pub const STORAGE_FLAT_PREFIX: u8 = 0x02;
pub const ACCOUNT_FLAT_KEY_LEN: usize = 33;
pub const STORAGE_FLAT_KEY_LEN: usize = 65;

pub fn make_account_flat_key(addr_hash: B256) -> [u8; ACCOUNT_FLAT_KEY_LEN] {
    let mut out = [0u8; ACCOUNT_FLAT_KEY_LEN];
    out[0] = ACCOUNT_FLAT_PREFIX;
    out[1..33].copy_from_slice(addr_hash.as_slice());
    out
}

pub fn make_storage_flat_key(addr_hash: B256, slot_hash: B256) -> [u8; STORAGE_FLAT_KEY_LEN] {
    let mut out = [0u8; STORAGE_FLAT_KEY_LEN];
    out[0] = STORAGE_FLAT_PREFIX;
    out[1..33].copy_from_slice(addr_hash.as_slice());
    out[33..65].copy_from_slice(slot_hash.as_slice());
    out
}

/// All storage slots of one account sit behind this prefix in the flat store.
pub fn storage_flat_prefix(addr_hash: B256) -> [u8; ACCOUNT_FLAT_KEY_LEN] {
    let mut out = [0u8; ACCOUNT_FLAT_KEY_LEN];
    out[0] = STORAGE_FLAT_PREFIX;
    out[1..33].copy_from_slice(addr_hash.as_slice());
    out
}

pub fn parse_account_flat_key(raw: &[u8]) -> Option<B256> {
    if raw.len() != ACCOUNT_FLAT_KEY_LEN || raw[0] != ACCOUNT_FLAT_PREFIX {
        return None;
    }
    Some(B256::from_slice(&raw[1..33]))
}

pub fn parse_storage_flat_key(raw: &[u8]) -> Option<(B256, B256)> {
    if raw.len() != STORAGE_FLAT_KEY_LEN || raw[0] != STORAGE_FLAT_PREFIX {
        return None;
    }
    Some((B256::from_slice(&raw[1..33]), B256::from_slice(&raw[33..65])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_key_roundtrip() {
        let a = B256::repeat_byte(0x11);
        let s = B256::repeat_byte(0x22);
        assert_eq!(parse_account_flat_key(&make_account_flat_key(a)), Some(a));
        assert_eq!(
            parse_storage_flat_key(&make_storage_flat_key(a, s)),
            Some((a, s))
        );
        assert_eq!(parse_account_flat_key(&make_storage_flat_key(a, s)), None);
    }
}
