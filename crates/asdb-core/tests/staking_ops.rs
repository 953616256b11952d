//! どこで: staking結合テスト / 何を: pledge・exchanger・投票選出・係数 / なぜ: 台帳遷移と拒否条件を固定するため

use alloy_primitives::{Address, U256};
use asdb_core::account::NominatedSnft;
use asdb_core::constants::{
    DRE_BLOCK_REWARD, INJECT_REWARD_SINK, NOMINATED_STORAGE_ADDRESS, REDUCE_REWARD_PERIOD,
    SNFT_BASE, SNFT_INJECTED_STORAGE_ADDRESS, VALIDATOR_STORAGE_ADDRESS,
};
use asdb_core::staking::{get_reward_amount, StakeError};

mod common;
use common::{addr, fresh_state};

fn coins(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

#[test]
fn pledge_moves_balance_and_registers_the_validator() {
    let mut state = fresh_state();
    let a = addr(0x10);
    state.add_balance(a, coins(1_000));

    state
        .pledge_token(a, coins(400), addr(0x11), 5)
        .expect("pledge");
    assert_eq!(state.get_balance(a), coins(600));
    assert_eq!(state.get_pledged_balance(a), coins(400));

    let validators = state.get_validators(VALIDATOR_STORAGE_ADDRESS);
    assert_eq!(validators.len(), 1);
    assert_eq!(validators[0].addr, a);
    assert_eq!(validators[0].balance, coins(400));
    assert_eq!(validators[0].proxy, addr(0x11));

    state.cancel_pledged_token(a, coins(400));
    assert_eq!(state.get_balance(a), coins(1_000));
    assert_eq!(state.get_pledged_balance(a), U256::ZERO);
    assert!(state.get_validators(VALIDATOR_STORAGE_ADDRESS).is_empty());
}

#[test]
fn duplicate_proxy_is_rejected() {
    let mut state = fresh_state();
    let proxy = addr(0x21);
    state.add_balance(addr(0x20), coins(10));
    state.add_balance(addr(0x22), coins(10));

    state
        .pledge_token(addr(0x20), coins(1), proxy, 1)
        .expect("first pledge");
    assert_eq!(
        state.pledge_token(addr(0x22), coins(1), proxy, 2),
        Err(StakeError::DuplicateProxy)
    );
    // Re-pledging with one's own proxy stays legal.
    state
        .pledge_token(addr(0x20), coins(1), proxy, 3)
        .expect("same validator again");
}

#[test]
fn consign_requires_an_existing_pledge() {
    let mut state = fresh_state();
    assert_eq!(
        state.miner_consign(addr(0x30), addr(0x31)),
        Err(StakeError::NoExistingPledge)
    );

    state.add_balance(addr(0x30), coins(5));
    state
        .pledge_token(addr(0x30), coins(2), Address::ZERO, 1)
        .expect("pledge");
    state
        .miner_consign(addr(0x30), addr(0x31))
        .expect("consign");

    state.add_balance(addr(0x32), coins(5));
    state
        .pledge_token(addr(0x32), coins(2), Address::ZERO, 2)
        .expect("pledge");
    assert_eq!(
        state.miner_consign(addr(0x32), addr(0x31)),
        Err(StakeError::DuplicateProxy)
    );
}

#[test]
fn staker_pledge_opens_and_floor_closes_the_exchanger() {
    let mut state = fresh_state();
    let staker = addr(0x40);
    let validator = addr(0x41);
    state.add_balance(staker, coins(1_000));

    state.staker_pledge(staker, validator, coins(800), 5, 250, "ex", "https://ex", None);
    assert!(state.get_exchanger_flag(staker));
    assert_eq!(state.get_fee_rate(staker), 250);
    assert_eq!(state.get_exchanger_name(staker), "ex");
    assert_eq!(
        state.get_staker_pledged_balance(staker, validator),
        coins(800)
    );
    assert_eq!(state.get_pledged_balance(validator), coins(800));

    // Dropping to 600 undercuts the 700-coin floor.
    state.cancel_staker_pledge(staker, validator, coins(200), 6);
    assert!(!state.get_exchanger_flag(staker));
    assert_eq!(
        state.get_staker_pledged_balance(staker, validator),
        coins(600)
    );
    assert_eq!(state.get_balance(staker), coins(400));
}

#[test]
fn no_proxy_repledge_resets_the_agent_recipient() {
    let mut state = fresh_state();
    let staker = addr(0x42);
    let validator = addr(0x43);
    state.add_balance(staker, coins(2_000));

    state.staker_pledge(staker, validator, coins(700), 1, 100, "ex", "u", None);
    assert_eq!(state.get_snft_agent_recipient(staker), staker);

    let agent = addr(0x44);
    state.staker_pledge(staker, validator, coins(100), 2, 100, "ex", "u", Some(agent));
    assert_eq!(state.get_snft_agent_recipient(staker), agent);

    // Re-pledging without a proxy clears the previously set recipient.
    state.staker_pledge(staker, validator, coins(100), 3, 100, "ex", "u", None);
    assert_eq!(state.get_snft_agent_recipient(staker), Address::ZERO);
}

#[test]
fn exchanger_opens_and_closes_after_the_open_block() {
    let mut state = fresh_state();
    let a = addr(0x50);
    state.add_balance(a, coins(100));

    state.open_exchanger(a, coins(60), 5, 100, "shop", "https://shop", Address::ZERO);
    assert!(state.get_exchanger_flag(a));
    assert_eq!(state.get_exchanger_balance(a), coins(60));
    assert_eq!(state.get_balance(a), coins(40));

    state.close_exchanger(a, 5);
    assert!(state.get_exchanger_flag(a));

    state.close_exchanger(a, 6);
    assert!(!state.get_exchanger_flag(a));
    assert_eq!(state.get_exchanger_balance(a), U256::ZERO);
    assert_eq!(state.get_balance(a), coins(100));
}

#[test]
fn exchanger_token_withdrawal_checks_the_balance() {
    let mut state = fresh_state();
    let a = addr(0x51);
    state.add_balance(a, coins(10));
    state.open_exchanger(a, coins(6), 1, 0, "s", "u", Address::ZERO);

    assert_eq!(
        state.sub_exchanger_token(a, coins(7)),
        Err(StakeError::InsufficientExchangerBalance)
    );
    state.sub_exchanger_token(a, coins(2)).expect("withdraw");
    assert_eq!(state.get_exchanger_balance(a), coins(4));
    assert_eq!(state.get_balance(a), coins(6));

    state.add_exchanger_token(a, coins(3));
    assert_eq!(state.get_exchanger_balance(a), coins(7));
}

#[test]
fn vote_replaces_the_nominee_only_on_a_higher_score() {
    let mut state = fresh_state();
    let strong = addr(0x60);
    let weak = addr(0x61);
    state.add_vote_weight(strong, U256::from(100u64));
    state.add_vote_weight(weak, U256::from(10u64));

    let strong_candidate = NominatedSnft {
        dir: "/ipfs/s".to_string(),
        start_index: SNFT_BASE,
        number: 4096,
        royalty: 100,
        creator: strong,
        address: strong,
    };
    state
        .vote_official_nft(&strong_candidate, 10)
        .expect("first vote");
    assert_eq!(
        state.get_nominee(NOMINATED_STORAGE_ADDRESS).address,
        strong
    );

    let weak_candidate = NominatedSnft {
        address: weak,
        ..strong_candidate.clone()
    };
    assert_eq!(
        state.vote_official_nft(&weak_candidate, 10),
        Err(StakeError::ScoreTooLow)
    );
    assert_eq!(
        state.get_nominee(NOMINATED_STORAGE_ADDRESS).address,
        strong
    );
}

#[test]
fn election_consumes_the_nominee_and_pays_the_sink() {
    let mut state = fresh_state();
    let candidate = addr(0x70);
    state.add_vote_weight(candidate, U256::from(50u64));
    state.add_balance(INJECT_REWARD_SINK, coins(9));

    let nomination = NominatedSnft {
        dir: "/ipfs/c".to_string(),
        start_index: SNFT_BASE,
        number: 4096,
        royalty: 42,
        creator: candidate,
        address: candidate,
    };
    state.vote_official_nft(&nomination, 10).expect("vote");
    state.elect_nominated_official_nft(12);

    let injected = state.get_snfts(SNFT_INJECTED_STORAGE_ADDRESS);
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].address, candidate);
    assert_eq!(injected[0].royalty, 42);

    assert_eq!(state.get_balance(candidate), coins(9));
    assert_eq!(state.get_balance(INJECT_REWARD_SINK), U256::ZERO);
    assert_eq!(state.get_vote_block_number(candidate), U256::from(12u64));

    let nominee = state.get_nominee(NOMINATED_STORAGE_ADDRESS);
    assert_eq!(nominee.address, Address::ZERO);
    assert_eq!(nominee.start_index, SNFT_BASE + U256::from(4096u64));
}

#[test]
fn election_without_a_nominee_registers_the_default_injection() {
    let mut state = fresh_state();
    state.elect_nominated_official_nft(3);
    let injected = state.get_snfts(SNFT_INJECTED_STORAGE_ADDRESS);
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].address, Address::ZERO);
    assert_eq!(injected[0].start_index, SNFT_BASE);
}

#[test]
fn seeded_election_falls_back_without_user_mints() {
    let mut state = fresh_state();
    state.elect_nominated_official_nft_2(4, b"entropy");
    let injected = state.get_snfts(SNFT_INJECTED_STORAGE_ADDRESS);
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].address, Address::ZERO);
}

#[test]
fn seeded_election_can_pick_an_owned_user_nft() {
    let mut state = fresh_state();
    let owner = addr(0x71);
    // Mint a couple of user NFTs so the keccak chain has owned targets.
    state.create_nft_by_user(addr(0x72), owner, 100, "m/a", 1);
    state.create_nft_by_user(addr(0x72), owner, 100, "m/b", 1);
    state.elect_nominated_official_nft_2(5, b"entropy");

    let injected = state.get_snfts(SNFT_INJECTED_STORAGE_ADDRESS);
    assert_eq!(injected.len(), 1);
    // user_mint space {1, 2} is fully owned, so the pick must land.
    assert_ne!(injected[0].address, Address::ZERO);
}

#[test]
fn validator_coefficient_saturates() {
    let mut state = fresh_state();
    let v = addr(0x80);
    assert_eq!(state.get_validator_coefficient(v), 0);

    state.add_validator_coefficient(v, 50);
    assert_eq!(state.get_validator_coefficient(v), 100);
    state.sub_validator_coefficient(v, 30);
    assert_eq!(state.get_validator_coefficient(v), 70);
    state.remove_validator_coefficient(v);
    assert_eq!(state.get_validator_coefficient(v), 70);
    state.sub_validator_coefficient(v, 200);
    assert_eq!(state.get_validator_coefficient(v), 0);
}

#[test]
fn block_reward_deflates_per_period() {
    assert_eq!(get_reward_amount(0, DRE_BLOCK_REWARD), DRE_BLOCK_REWARD);
    assert_eq!(
        get_reward_amount(REDUCE_REWARD_PERIOD, DRE_BLOCK_REWARD),
        DRE_BLOCK_REWARD * U256::from(85u64) / U256::from(100u64)
    );
    assert_eq!(
        get_reward_amount(REDUCE_REWARD_PERIOD - 1, DRE_BLOCK_REWARD),
        DRE_BLOCK_REWARD
    );
}

#[test]
fn mint_counters_initialise_on_first_touch() {
    let mut state = fresh_state();
    assert_eq!(state.get_user_mint(), U256::from(1u64));
    assert_eq!(state.get_official_mint(), SNFT_BASE);
}
