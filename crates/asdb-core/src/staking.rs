//! どこで: staking/vote-weight台帳 / 何を: pledge・exchanger・nominee選出・official mint / なぜ: 検証者報酬とSNFT注入を状態内で完結させるため

use crate::account::{InjectedSnft, NftExt, NominatedSnft, StakerCut, StakerPledge, Validator};
use crate::constants::{
    DEFAULT_INJECT_CREATOR, DEFAULT_INJECT_DIR, DEFAULT_INJECT_NUMBER, DEFAULT_INJECT_ROYALTY,
    DEFAULT_COEFFICIENT, DRE_BLOCK_REWARD, EXCHANGER_PLEDGE_FLOOR, INJECT_REFILL_THRESHOLD,
    INJECT_REWARD_SINK, MINT_DEEP_STORAGE_ADDRESS, NOMINATED_STORAGE_ADDRESS,
    REDUCE_REWARD_PERIOD, SNFT_INJECTED_STORAGE_ADDRESS, STAKER_STORAGE_ADDRESS,
    VALIDATOR_STORAGE_ADDRESS,
};
use crate::snft::{calc_value, deflate, u256_to_address};
use crate::state_db::{ObjectKind, StateDb};
use alloy_primitives::{keccak256, Address, U256};
use tracing::info;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StakeError {
    /// Another validator already delegates to this proxy.
    DuplicateProxy,
    /// The address never pledged, so there is nothing to consign.
    NoExistingPledge,
    InsufficientExchangerBalance,
    /// The candidate's time-weighted score does not beat the nominee's.
    ScoreTooLow,
}

/// Per-block validator reward after deflation.
pub fn get_reward_amount(block_number: u64, init_amount: U256) -> U256 {
    deflate(init_amount, block_number / REDUCE_REWARD_PERIOD)
}

impl StateDb {
    // ---- pledge / consign ----

    /// Moves `amount` from balance into the pledge and registers the
    /// validator. A proxy already delegated to by a different validator is
    /// rejected.
    pub fn pledge_token(
        &mut self,
        addr: Address,
        amount: U256,
        proxy: Address,
        block_number: u64,
    ) -> Result<(), StakeError> {
        let validators = self.get_validators(VALIDATOR_STORAGE_ADDRESS);
        for v in &validators {
            if v.proxy != Address::ZERO && v.addr != addr && v.proxy == proxy {
                info!(%addr, %proxy, "pledge rejected: proxy already delegated");
                return Err(StakeError::DuplicateProxy);
            }
        }
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_validator(addr, amount, proxy);
        });
        self.sub_balance(addr, amount);
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.pledged_balance = worm.pledged_balance.saturating_add(amount);
            worm.pledged_block_number = U256::from(block_number);
        });
        Ok(())
    }

    pub fn cancel_pledged_token(&mut self, addr: Address, amount: U256) {
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().remove_validator(addr, amount);
        });
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.pledged_balance = worm.pledged_balance.saturating_sub(amount);
        });
        self.add_balance(addr, amount);
    }

    /// Delegated pledge from `from` towards the validator `to`; opens the
    /// delegator as an exchanger.
    #[allow(clippy::too_many_arguments)]
    pub fn staker_pledge(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
        block_number: u64,
        fee_rate: u16,
        name: &str,
        url: &str,
        proxy: Option<Address>,
    ) {
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_validator(to, amount, Address::ZERO);
        });
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_staker(from, amount);
        });
        self.sub_balance(from, amount);

        // The delegator becomes its own recipient only on the first no-proxy
        // pledge; a later no-proxy re-pledge resets the recipient to zero.
        let agent = match proxy {
            Some(p) => p,
            None => {
                if self.get_snft_agent_recipient(from) == Address::ZERO {
                    from
                } else {
                    Address::ZERO
                }
            }
        };
        let block = U256::from(block_number);
        let (name, url) = (name.to_string(), url.to_string());
        self.update_object(from, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.exchanger_flag = true;
            worm.block_number = block;
            worm.fee_rate = fee_rate;
            worm.name = name;
            worm.url = url;
            worm.snft_agent_recipient = agent;
            worm.pledged_block_number = block;
            if let Some(entry) = worm.stakers.iter_mut().find(|s| s.addr == to) {
                entry.balance = entry.balance.saturating_add(amount);
                entry.block_number = block;
            } else {
                worm.stakers.push(StakerPledge {
                    addr: to,
                    balance: amount,
                    block_number: block,
                });
            }
        });
        self.update_object(to, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.pledged_balance = worm.pledged_balance.saturating_add(amount);
        });
    }

    /// Unwinds a delegated pledge. Dropping below the pledge floor closes
    /// the delegator's exchanger.
    pub fn cancel_staker_pledge(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
        block_number: u64,
    ) {
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().remove_validator(to, amount);
        });
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().remove_staker(from, amount);
        });

        let pledged = self.get_staker_pledged_balance(from, to);
        let close = EXCHANGER_PLEDGE_FLOOR > pledged.saturating_sub(amount);
        let block = U256::from(block_number);
        self.update_object(from, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            if close {
                worm.exchanger_flag = false;
                worm.block_number = block;
                worm.name.clear();
                worm.url.clear();
                worm.fee_rate = 0;
            }
            if let Some(entry) = worm.stakers.iter_mut().find(|s| s.addr == to) {
                entry.balance = entry.balance.saturating_sub(amount);
            }
            worm.stakers
                .retain(|s| s.addr != to || !s.balance.is_zero());
        });
        self.update_object(to, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.pledged_balance = worm.pledged_balance.saturating_sub(amount);
        });
        self.add_balance(from, amount);
    }

    /// Re-points an existing pledge at a proxy.
    pub fn miner_consign(&mut self, addr: Address, proxy: Address) -> Result<(), StakeError> {
        let validators = self.get_validators(VALIDATOR_STORAGE_ADDRESS);
        if !validators.iter().any(|v| v.addr == addr) {
            info!(%addr, "consign rejected: no existing pledge");
            return Err(StakeError::NoExistingPledge);
        }
        if validators
            .iter()
            .any(|v| v.proxy != Address::ZERO && v.proxy == proxy)
        {
            info!(%addr, %proxy, "consign rejected: proxy already delegated");
            return Err(StakeError::DuplicateProxy);
        }
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_validator(addr, U256::ZERO, proxy);
        });
        Ok(())
    }

    pub fn miner_become(&mut self, addr: Address, proxy: Address) {
        let pledged = self.get_pledged_balance(addr);
        self.update_object(VALIDATOR_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_validator(addr, pledged, proxy);
        });
    }

    // ---- exchanger lifecycle ----

    #[allow(clippy::too_many_arguments)]
    pub fn open_exchanger(
        &mut self,
        addr: Address,
        amount: U256,
        block_number: u64,
        fee_rate: u16,
        name: &str,
        url: &str,
        agent_recipient: Address,
    ) {
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_staker(addr, amount);
        });
        self.sub_balance(addr, amount);
        let block = U256::from(block_number);
        let (name, url) = (name.to_string(), url.to_string());
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.exchanger_balance = amount;
            worm.exchanger_flag = true;
            worm.block_number = block;
            worm.fee_rate = fee_rate;
            worm.name = name;
            worm.url = url;
            worm.snft_agent_recipient = agent_recipient;
        });
    }

    pub fn modify_open_exchanger_time(&mut self, addr: Address, block_number: u64) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().block_number = U256::from(block_number);
        });
    }

    /// Returns the exchanger balance once the open block has passed.
    pub fn close_exchanger(&mut self, addr: Address, block_number: u64) {
        let open_block = self
            .read_object(addr, |obj| obj.open_block_number())
            .unwrap_or_default();
        if U256::from(block_number) <= open_block {
            return;
        }
        let amount = self
            .read_object(addr, |obj| obj.exchanger_balance())
            .unwrap_or_default();
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().remove_staker(addr, amount);
        });
        self.add_balance(addr, amount);
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.exchanger_balance = U256::ZERO;
            worm.exchanger_flag = false;
            worm.name.clear();
            worm.url.clear();
            worm.fee_rate = 0;
        });
    }

    pub fn add_exchanger_token(&mut self, addr: Address, amount: U256) {
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_staker(addr, amount);
        });
        self.sub_balance(addr, amount);
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.exchanger_balance = worm.exchanger_balance.saturating_add(amount);
        });
    }

    pub fn sub_exchanger_token(&mut self, addr: Address, amount: U256) -> Result<(), StakeError> {
        let balance = self
            .read_object(addr, |obj| obj.exchanger_balance())
            .unwrap_or_default();
        if amount > balance {
            return Err(StakeError::InsufficientExchangerBalance);
        }
        self.update_object(STAKER_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().remove_staker(addr, amount);
        });
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.exchanger_balance = worm.exchanger_balance.saturating_sub(amount);
        });
        self.add_balance(addr, amount);
        Ok(())
    }

    // ---- vote weight ----

    pub fn add_vote_weight(&mut self, addr: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.vote_weight = worm.vote_weight.saturating_add(amount);
        });
    }

    pub fn sub_vote_weight(&mut self, addr: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            worm.vote_weight = worm.vote_weight.saturating_sub(amount);
        });
    }

    pub fn get_vote_weight(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.vote_weight())
            .unwrap_or_default()
    }

    pub fn get_vote_block_number(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.vote_block_number())
            .unwrap_or_default()
    }

    pub fn set_vote_block_number(&mut self, addr: Address, block_number: u64) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().vote_block_number = U256::from(block_number);
        });
    }

    // ---- validator coefficient ----

    pub fn add_validator_coefficient(&mut self, addr: Address, coefficient: u8) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.add_coefficient(coefficient);
        });
    }

    pub fn sub_validator_coefficient(&mut self, addr: Address, coefficient: u8) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.sub_coefficient(coefficient);
        });
    }

    pub fn remove_validator_coefficient(&mut self, addr: Address) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().coefficient = DEFAULT_COEFFICIENT;
        });
    }

    pub fn get_validator_coefficient(&mut self, addr: Address) -> u8 {
        self.read_object(addr, |obj| obj.coefficient())
            .unwrap_or_default()
    }

    // ---- reads over worm/staker payloads ----

    pub fn get_pledged_balance(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.pledged_balance())
            .unwrap_or_default()
    }

    pub fn get_staker_pledged_balance(&mut self, from: Address, validator: Address) -> U256 {
        self.read_object(from, |obj| obj.staker_pledged_balance(validator))
            .unwrap_or_default()
    }

    pub fn get_staker_pledged_block_number(&mut self, from: Address, validator: Address) -> U256 {
        self.read_object(from, |obj| obj.staker_pledged_block_number(validator))
            .unwrap_or_default()
    }

    pub fn get_exchanger_flag(&mut self, addr: Address) -> bool {
        self.read_object(addr, |obj| obj.exchanger_flag())
            .unwrap_or(false)
    }

    pub fn get_open_exchanger_time(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.open_block_number())
            .unwrap_or_default()
    }

    pub fn get_fee_rate(&mut self, addr: Address) -> u16 {
        self.read_object(addr, |obj| obj.fee_rate()).unwrap_or_default()
    }

    pub fn get_exchanger_name(&mut self, addr: Address) -> String {
        self.read_object(addr, |obj| obj.exchanger_name())
            .unwrap_or_default()
    }

    pub fn get_exchanger_url(&mut self, addr: Address) -> String {
        self.read_object(addr, |obj| obj.exchanger_url())
            .unwrap_or_default()
    }

    pub fn get_exchanger_balance(&mut self, addr: Address) -> U256 {
        self.read_object(addr, |obj| obj.exchanger_balance())
            .unwrap_or_default()
    }

    pub fn get_approve_addresses(&mut self, addr: Address) -> Vec<Address> {
        self.read_object(addr, |obj| obj.approve_addresses())
            .unwrap_or_default()
    }

    pub fn get_validators(&mut self, list_addr: Address) -> Vec<Validator> {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.validators.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_stakers(&mut self, list_addr: Address) -> Vec<StakerCut> {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.stakers.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_snfts(&mut self, list_addr: Address) -> Vec<InjectedSnft> {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.injected.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_nominee(&mut self, list_addr: Address) -> NominatedSnft {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.nominee.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// The first write materialises the mint counters: user mint starts at
    /// one, official mint at the SNFT base.
    pub fn get_official_mint(&mut self) -> U256 {
        let current = self.read_object(MINT_DEEP_STORAGE_ADDRESS, |obj| {
            obj.staker().map(|s| s.mint.official_mint)
        });
        match current.flatten() {
            Some(mint) => mint,
            None => {
                self.ensure_object(MINT_DEEP_STORAGE_ADDRESS, ObjectKind::Staker);
                self.read_object(MINT_DEEP_STORAGE_ADDRESS, |obj| {
                    obj.staker().map(|s| s.mint.official_mint).unwrap_or_default()
                })
                .unwrap_or_default()
            }
        }
    }

    pub fn get_user_mint(&mut self) -> U256 {
        let current = self.read_object(MINT_DEEP_STORAGE_ADDRESS, |obj| {
            obj.staker().map(|s| s.mint.user_mint)
        });
        match current.flatten() {
            Some(mint) => mint,
            None => {
                self.ensure_object(MINT_DEEP_STORAGE_ADDRESS, ObjectKind::Staker);
                self.read_object(MINT_DEEP_STORAGE_ADDRESS, |obj| {
                    obj.staker().map(|s| s.mint.user_mint).unwrap_or_default()
                })
                .unwrap_or_default()
            }
        }
    }

    /// First index past every registered injection.
    pub fn next_index(&mut self) -> U256 {
        self.read_object(SNFT_INJECTED_STORAGE_ADDRESS, |obj| {
            obj.staker()
                .map(|s| s.injected_max_index())
                .unwrap_or(crate::constants::SNFT_BASE)
        })
        .unwrap_or(crate::constants::SNFT_BASE)
    }

    // ---- injection and election ----

    pub fn inject_official_nft(
        &mut self,
        dir: &str,
        start_index: U256,
        number: u64,
        royalty: u16,
        creator: Address,
    ) {
        let dir = dir.to_string();
        self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_injected(InjectedSnft {
                dir,
                start_index,
                number,
                royalty,
                creator,
                address: Address::ZERO,
                vote_weight: U256::ZERO,
            });
        });
    }

    /// Replaces the nominee when the candidate's time-weighted vote score is
    /// strictly higher.
    pub fn vote_official_nft(
        &mut self,
        candidate: &NominatedSnft,
        block_number: u64,
    ) -> Result<(), StakeError> {
        let block = U256::from(block_number);
        let weight = self.get_vote_weight(candidate.address);
        let since = block.saturating_sub(self.get_vote_block_number(candidate.address));
        let score = weight.saturating_mul(since);

        let nominee = self.get_nominee(NOMINATED_STORAGE_ADDRESS);
        let nominated_score = if nominee.address != Address::ZERO {
            let weight = self.get_vote_weight(nominee.address);
            let since = block.saturating_sub(self.get_vote_block_number(nominee.address));
            weight.saturating_mul(since)
        } else {
            U256::ZERO
        };

        if score > nominated_score {
            let candidate = candidate.clone();
            self.update_object(NOMINATED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
                obj.ensure_staker().nominee = candidate;
            });
            return Ok(());
        }
        Err(StakeError::ScoreTooLow)
    }

    /// Consumes the current nominee into the injection registry, paying out
    /// the injection-reward sink; without a nominee the default injection is
    /// registered. The nominee slot is re-armed either way.
    pub fn elect_nominated_official_nft(&mut self, block_number: u64) {
        let nominee = self.get_nominee(NOMINATED_STORAGE_ADDRESS);
        if nominee.address != Address::ZERO {
            let weight = self.get_vote_weight(nominee.address);
            let since =
                U256::from(block_number).saturating_sub(self.get_vote_block_number(nominee.address));
            let record = InjectedSnft {
                dir: nominee.dir.clone(),
                start_index: nominee.start_index,
                number: nominee.number,
                royalty: nominee.royalty,
                creator: nominee.creator,
                address: nominee.address,
                vote_weight: weight.saturating_mul(since),
            };
            self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
                obj.ensure_staker().add_injected(record);
            });
            self.set_vote_block_number(nominee.address, block_number);

            let reward = self.get_balance(INJECT_REWARD_SINK);
            self.sub_balance(INJECT_REWARD_SINK, reward);
            self.add_balance(nominee.address, reward);
        } else {
            let start = self.next_index();
            self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
                obj.ensure_staker().add_injected(InjectedSnft {
                    dir: DEFAULT_INJECT_DIR.to_string(),
                    start_index: start,
                    number: DEFAULT_INJECT_NUMBER,
                    royalty: DEFAULT_INJECT_ROYALTY,
                    creator: DEFAULT_INJECT_CREATOR,
                    address: Address::ZERO,
                    vote_weight: U256::ZERO,
                });
            });
        }

        let start = self.next_index();
        self.update_object(NOMINATED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().nominee = NominatedSnft {
                dir: DEFAULT_INJECT_DIR.to_string(),
                start_index: start,
                number: DEFAULT_INJECT_NUMBER,
                royalty: DEFAULT_INJECT_ROYALTY,
                creator: DEFAULT_INJECT_CREATOR,
                address: Address::ZERO,
            };
        });
    }

    /// Seeded election: keccak-chains over the user-mint space and injects
    /// the picked NFT when it is owned; falls back to the default injection.
    pub fn elect_nominated_official_nft_2(&mut self, _block_number: u64, seed: &[u8]) {
        let user_mint = self.get_user_mint();
        if user_mint > U256::from(1u64) {
            let mut digest = keccak256(seed);
            let mut pick = U256::from_be_bytes(digest.0) % user_mint;
            while pick.is_zero() {
                digest = keccak256(digest.as_slice());
                pick = U256::from_be_bytes(digest.0) % user_mint;
            }
            let nft_addr = u256_to_address(pick);
            let (owner, meta_url, creator) = self
                .read_object(nft_addr, |obj| {
                    (obj.nft_owner(), obj.nft_meta_url(), obj.nft_creator())
                })
                .unwrap_or((Address::ZERO, String::new(), Address::ZERO));
            if owner != Address::ZERO {
                let start = self.next_index();
                self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
                    obj.ensure_staker().add_injected(InjectedSnft {
                        dir: meta_url,
                        start_index: start,
                        number: DEFAULT_INJECT_NUMBER,
                        royalty: DEFAULT_INJECT_ROYALTY,
                        creator,
                        address: nft_addr,
                        vote_weight: U256::ZERO,
                    });
                });
                return;
            }
        }

        let start = self.next_index();
        self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker().add_injected(InjectedSnft {
                dir: DEFAULT_INJECT_DIR.to_string(),
                start_index: start,
                number: DEFAULT_INJECT_NUMBER,
                royalty: DEFAULT_INJECT_ROYALTY,
                creator: DEFAULT_INJECT_CREATOR,
                address: Address::ZERO,
                vote_weight: U256::ZERO,
            });
        });
    }

    /// Per-block system minting: validators earn the deflating block reward,
    /// each exchanger mints one SNFT at the official-mint cursor, expired
    /// injections are dropped, and the registry is refilled when it runs low.
    pub fn create_nft_by_official(
        &mut self,
        validators: &[Address],
        exchangers: &[Address],
        block_number: u64,
        seed: &[u8],
    ) {
        let reward = get_reward_amount(block_number, DRE_BLOCK_REWARD);
        for validator in validators {
            self.add_balance(*validator, reward);
        }

        for awardee in exchangers {
            let mint = self.get_official_mint();
            let nft_addr = u256_to_address(mint);
            let Some(info) = self
                .read_object(SNFT_INJECTED_STORAGE_ADDRESS, |obj| {
                    obj.staker().and_then(|s| s.injected_info(mint).cloned())
                })
                .flatten()
            else {
                return;
            };
            let meta_url = format!("{}/{}", info.dir, nft_addr);
            let mut owner = self.get_snft_agent_recipient(*awardee);
            if owner == Address::ZERO {
                owner = *awardee;
            }
            let snft_recipient = *awardee;
            self.update_object(nft_addr, ObjectKind::Nft, |obj| {
                obj.set_nft_info(NftExt {
                    owner,
                    merge_level: 0,
                    merge_number: 1,
                    creator: info.creator,
                    royalty: info.royalty,
                    meta_url,
                    snft_recipient,
                    ..NftExt::default()
                })
            });

            let amount = self.get_exchange_amount(nft_addr, calc_value(0, 1));
            let increase = self.merge_nft(nft_addr, block_number);
            self.add_vote_weight(owner, amount.saturating_add(increase));

            self.update_object(MINT_DEEP_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
                let mint = &mut obj.ensure_staker().mint;
                mint.official_mint += U256::from(1u64);
            });
        }

        let mint = self.get_official_mint();
        self.update_object(SNFT_INJECTED_STORAGE_ADDRESS, ObjectKind::Staker, |obj| {
            obj.ensure_staker()
                .remove_injected_before(mint - U256::from(1u64));
        });

        let remainder = self
            .read_object(SNFT_INJECTED_STORAGE_ADDRESS, |obj| {
                obj.staker().map(|s| s.injected_remainder(mint)).unwrap_or(0)
            })
            .unwrap_or(0);
        if remainder <= INJECT_REFILL_THRESHOLD {
            self.elect_nominated_official_nft_2(block_number, seed);
        }
    }
}
