//! どこで: consensus extra-data codec / 何を: vanity+RLPの封入と seal書き込み / なぜ: 合意エンジンとの境界形式を固定するため

use crate::constants::{ISTANBUL_EXTRA_SEAL, ISTANBUL_EXTRA_VANITY};
use alloy_primitives::{Address, Bytes, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExtraError {
    /// Seal length differs from the fixed signature size.
    InvalidSignature,
    /// Empty set, or an element of the wrong length.
    InvalidCommittedSeals,
    /// The header extra is shorter than the vanity prefix.
    MissingVanity,
    Decode,
}

/// Consensus payload carried after the 32-byte vanity in a block header's
/// extra-data. Field order is consensus-critical.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct IstanbulExtra {
    pub validators: Vec<Address>,
    pub seal: Bytes,
    pub committed_seal: Vec<Bytes>,
    pub validator_addr: Vec<Address>,
    pub exchanger_addr: Vec<Address>,
    pub random_hash: B256,
}

fn vanity_of(extra: &[u8]) -> Vec<u8> {
    let mut vanity = Vec::with_capacity(ISTANBUL_EXTRA_VANITY);
    if extra.len() < ISTANBUL_EXTRA_VANITY {
        vanity.extend_from_slice(extra);
        vanity.resize(ISTANBUL_EXTRA_VANITY, 0);
    } else {
        vanity.extend_from_slice(&extra[..ISTANBUL_EXTRA_VANITY]);
    }
    vanity
}

fn seal_with_vanity(vanity: &[u8], ist: &IstanbulExtra) -> Vec<u8> {
    let mut out = Vec::with_capacity(ISTANBUL_EXTRA_VANITY + 320);
    out.extend_from_slice(vanity);
    ist.encode(&mut out);
    out
}

/// Rebuilds the header extra as vanity ‖ RLP with empty seals; anything past
/// the vanity in the incoming extra is discarded.
pub fn prepare_extra(
    extra: &[u8],
    validators: &[Address],
    validator_addrs: &[Address],
    exchanger_addrs: &[Address],
) -> Vec<u8> {
    let vanity = vanity_of(extra);
    let ist = IstanbulExtra {
        validators: validators.to_vec(),
        seal: Bytes::new(),
        committed_seal: Vec::new(),
        validator_addr: validator_addrs.to_vec(),
        exchanger_addr: exchanger_addrs.to_vec(),
        random_hash: B256::ZERO,
    };
    seal_with_vanity(&vanity, &ist)
}

pub fn extract_istanbul_extra(extra: &[u8]) -> Result<IstanbulExtra, ExtraError> {
    if extra.len() < ISTANBUL_EXTRA_VANITY {
        return Err(ExtraError::MissingVanity);
    }
    IstanbulExtra::decode(&mut &extra[ISTANBUL_EXTRA_VANITY..]).map_err(|_| ExtraError::Decode)
}

/// Replaces the proposer seal. The seal must be exactly the signature size.
pub fn write_seal(extra: &[u8], seal: &[u8]) -> Result<Vec<u8>, ExtraError> {
    if seal.len() != ISTANBUL_EXTRA_SEAL {
        return Err(ExtraError::InvalidSignature);
    }
    let mut ist = extract_istanbul_extra(extra)?;
    ist.seal = Bytes::copy_from_slice(seal);
    Ok(seal_with_vanity(&vanity_of(extra), &ist))
}

/// Replaces the committed seals; every element must be signature-sized.
pub fn write_committed_seals(extra: &[u8], seals: &[Vec<u8>]) -> Result<Vec<u8>, ExtraError> {
    if seals.is_empty() {
        return Err(ExtraError::InvalidCommittedSeals);
    }
    if seals.iter().any(|s| s.len() != ISTANBUL_EXTRA_SEAL) {
        return Err(ExtraError::InvalidCommittedSeals);
    }
    let mut ist = extract_istanbul_extra(extra)?;
    ist.committed_seal = seals.iter().map(|s| Bytes::copy_from_slice(s)).collect();
    Ok(seal_with_vanity(&vanity_of(extra), &ist))
}
