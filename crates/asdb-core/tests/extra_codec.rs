//! どこで: extra-data codec結合テスト / 何を: 参照ベクタとのbit一致 / なぜ: 合意境界の形式を固定するため

use alloy_primitives::{hex, Address, Bytes, B256};
use asdb_core::constants::{ISTANBUL_EXTRA_SEAL, ISTANBUL_EXTRA_VANITY};
use asdb_core::extra::{
    extract_istanbul_extra, prepare_extra, write_committed_seals, write_seal, ExtraError,
    IstanbulExtra,
};

fn validators() -> Vec<Address> {
    vec![
        Address::from_slice(&hex::decode("44add0ec310f115a0e603b2d7db9f067778eaf8a").unwrap()),
        Address::from_slice(&hex::decode("294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212").unwrap()),
        Address::from_slice(&hex::decode("6beaaed781d2d2ab6350f5c4566a2c6eaac407a6").unwrap()),
        Address::from_slice(&hex::decode("8be76812f765c24641ec63dc2852b378aba2b440").unwrap()),
    ]
}

fn vanity() -> Vec<u8> {
    vec![0u8; ISTANBUL_EXTRA_VANITY]
}

const PREPARED_RLP: &str = "f90125f8549444add0ec310f115a0e603b2d7db9f067778eaf8a94294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212946beaaed781d2d2ab6350f5c4566a2c6eaac407a6948be76812f765c24641ec63dc2852b378aba2b44080c0f8549444add0ec310f115a0e603b2d7db9f067778eaf8a94294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212946beaaed781d2d2ab6350f5c4566a2c6eaac407a6948be76812f765c24641ec63dc2852b378aba2b440f8549444add0ec310f115a0e603b2d7db9f067778eaf8a94294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212946beaaed781d2d2ab6350f5c4566a2c6eaac407a6948be76812f765c24641ec63dc2852b378aba2b440a00000000000000000000000000000000000000000000000000000000000000000";

const SEAL_RLP: &str = "f8bdf8549444add0ec310f115a0e603b2d7db9f067778eaf8a94294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212946beaaed781d2d2ab6350f5c4566a2c6eaac407a6948be76812f765c24641ec63dc2852b378aba2b440b8410102030000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000c0c0c0a00000000000000000000000000000000000000000000000000000000000000000";

const COMMITTED_RLP: &str = "f8bff8549444add0ec310f115a0e603b2d7db9f067778eaf8a94294fc7e8f22b3bcdcf955dd7ff3ba2ed833f8212946beaaed781d2d2ab6350f5c4566a2c6eaac407a6948be76812f765c24641ec63dc2852b378aba2b44080f843b8410102030000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000c0c0a00000000000000000000000000000000000000000000000000000000000000000";

fn seal_bytes() -> Vec<u8> {
    let mut seal = vec![1u8, 2, 3];
    seal.resize(ISTANBUL_EXTRA_SEAL, 0);
    seal
}

#[test]
fn prepare_extra_matches_the_reference_vector() {
    let mut expected = vanity();
    expected.extend_from_slice(&hex::decode(PREPARED_RLP).unwrap());

    let vals = validators();
    let payload = prepare_extra(&vanity(), &vals, &vals, &vals);
    assert_eq!(payload, expected);

    // Junk past the vanity is discarded before re-encoding.
    let mut noisy = vanity();
    noisy.extend_from_slice(&[0u8; 15]);
    let payload = prepare_extra(&noisy, &vals, &vals, &vals);
    assert_eq!(payload, expected);
}

#[test]
fn short_extra_is_padded_to_the_vanity() {
    let vals = validators();
    let payload = prepare_extra(&[0xde, 0xad], &vals, &[], &[]);
    assert_eq!(&payload[..2], &[0xde, 0xad]);
    assert!(payload.len() > ISTANBUL_EXTRA_VANITY);
    let ist = extract_istanbul_extra(&payload).expect("extract");
    assert_eq!(ist.validators, vals);
}

#[test]
fn write_seal_roundtrips_through_extraction() {
    let mut extra = vanity();
    extra.extend_from_slice(&hex::decode(SEAL_RLP).unwrap());
    let seal = seal_bytes();

    let sealed = write_seal(&extra, &seal).expect("write seal");
    let ist = extract_istanbul_extra(&sealed).expect("extract");
    let expected = IstanbulExtra {
        validators: validators(),
        seal: Bytes::from(seal),
        committed_seal: vec![],
        validator_addr: vec![],
        exchanger_addr: vec![],
        random_hash: B256::ZERO,
    };
    assert_eq!(ist, expected);
}

#[test]
fn oversized_seal_is_rejected() {
    let mut extra = vanity();
    extra.extend_from_slice(&hex::decode(SEAL_RLP).unwrap());
    let mut seal = seal_bytes();
    seal.push(0);
    assert_eq!(write_seal(&extra, &seal), Err(ExtraError::InvalidSignature));
}

#[test]
fn write_committed_seals_roundtrips_through_extraction() {
    let mut extra = vanity();
    extra.extend_from_slice(&hex::decode(COMMITTED_RLP).unwrap());
    let seal = seal_bytes();

    let sealed = write_committed_seals(&extra, &[seal.clone()]).expect("write committed");
    let ist = extract_istanbul_extra(&sealed).expect("extract");
    let expected = IstanbulExtra {
        validators: validators(),
        seal: Bytes::new(),
        committed_seal: vec![Bytes::from(seal)],
        validator_addr: vec![],
        exchanger_addr: vec![],
        random_hash: B256::ZERO,
    };
    assert_eq!(ist, expected);
}

#[test]
fn malformed_committed_seals_are_rejected() {
    let mut extra = vanity();
    extra.extend_from_slice(&hex::decode(COMMITTED_RLP).unwrap());
    let mut long = seal_bytes();
    long.push(0);
    assert_eq!(
        write_committed_seals(&extra, &[long]),
        Err(ExtraError::InvalidCommittedSeals)
    );
    assert_eq!(
        write_committed_seals(&extra, &[]),
        Err(ExtraError::InvalidCommittedSeals)
    );
}

#[test]
fn truncated_extra_is_rejected() {
    assert_eq!(
        extract_istanbul_extra(&[0u8; 16]),
        Err(ExtraError::MissingVanity)
    );
    assert_eq!(
        extract_istanbul_extra(&vanity()),
        Err(ExtraError::Decode)
    );
}
