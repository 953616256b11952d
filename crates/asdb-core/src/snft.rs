//! どこで: SNFT merge/split engine / 何を: 16分木上の自動併合・分割・格納先解決 / なぜ: 所有変化後のSNFT価値を正規形に保つため

use crate::account::NftExt;
use crate::constants::{
    DEFLATION_RATE_DEN, DEFLATION_RATE_NUM, DIVIDEND_ADDRESS_LIST, EXCHANGE_PERIOD,
    QUERY_DEPTH_LIMIT, SNFT_BASE, SNFT_CHUNK, SNFT_LEVEL3_ADDRESS_LIST, SNFT_RADIX,
};
use crate::log::{merge_snft_log, mint_nft_log};
use crate::state_db::{ObjectKind, StateDb};
use alloy_primitives::{Address, U256};
use tracing::warn;

/// Official SNFT addresses carry the top bit of their first byte.
pub fn is_official_nft(addr: Address) -> bool {
    addr.as_slice()[0] & 0x80 == 0x80
}

/// Exchange value of `number` leaves merged at `level`.
pub fn calc_value(level: u8, number: u32) -> U256 {
    let radix = SNFT_RADIX[(level as usize).min(SNFT_RADIX.len() - 1)];
    U256::from(number) * radix
}

/// Applies the deflation ratio `times` over, without touching floats.
pub(crate) fn deflate(mut amount: U256, times: u64) -> U256 {
    for _ in 0..times {
        if amount.is_zero() {
            break;
        }
        amount = amount * U256::from(DEFLATION_RATE_NUM) / U256::from(DEFLATION_RATE_DEN);
    }
    amount
}

fn nibble_of(bytes: &[u8; 20], idx: usize) -> u8 {
    let byte = bytes[idx / 2];
    if idx % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0f
    }
}

fn set_nibble(bytes: &mut [u8; 20], idx: usize, value: u8) {
    let byte = &mut bytes[idx / 2];
    if idx % 2 == 0 {
        *byte = (*byte & 0x0f) | (value << 4);
    } else {
        *byte = (*byte & 0xf0) | (value & 0x0f);
    }
}

/// Addresses are 40 nibbles; a canonical level-L node has its trailing L
/// nibbles zero.
pub(crate) fn zero_trailing_nibbles(addr: Address, count: usize) -> Address {
    let mut bytes: [u8; 20] = addr.into();
    for i in 0..count.min(40) {
        set_nibble(&mut bytes, 39 - i, 0);
    }
    Address::from(bytes)
}

/// The `idx`-th child slot under `parent` for nodes at `level`.
fn sibling_address(parent: Address, level: u8, idx: u8) -> Address {
    let mut bytes: [u8; 20] = parent.into();
    set_nibble(&mut bytes, 39 - level as usize, idx);
    Address::from(bytes)
}

/// Everything before the last path separator of a meta URL.
fn meta_prefix(url: &str) -> &str {
    url.rfind('/').map(|i| &url[..i]).unwrap_or("")
}

pub(crate) fn u256_to_address(value: U256) -> Address {
    let bytes: [u8; 32] = value.to_be_bytes();
    Address::from_slice(&bytes[12..])
}

impl StateDb {
    /// Resolves the canonical address an SNFT is physically stored at,
    /// walking up the merge tree. Returns `(store_address, owner)`.
    pub fn get_nft_store_address(
        &mut self,
        addr: Address,
        depth: usize,
    ) -> Option<(Address, Address)> {
        if depth > QUERY_DEPTH_LIMIT as usize {
            return None;
        }
        let (owner, level) = self
            .read_object(addr, |obj| (obj.nft_owner(), obj.nft_merge_level()))
            .unwrap_or((Address::ZERO, 0));
        if owner != Address::ZERO && level as usize == depth {
            return Some((addr, owner));
        }
        let parent = zero_trailing_nibbles(addr, depth + 1);
        self.get_nft_store_address(parent, depth + 1)
    }

    pub fn get_nft_owner(&mut self, addr: Address) -> Address {
        self.read_object(addr, |obj| obj.nft_owner())
            .unwrap_or_default()
    }

    /// True when the parent range reaches past the official mint watermark,
    /// i.e. it still contains unminted slots.
    fn is_beyond_official_mint(&mut self, parent: Address, level: u8) -> bool {
        let mut range_top = U256::from_be_slice(parent.as_slice());
        let fill = (U256::from(1u64) << (4 * (level as usize + 1))) - U256::from(1u64);
        range_top |= fill;
        self.get_official_mint() < range_top
    }

    /// An auto-merge is allowed only when all sixteen siblings exist with the
    /// same owner, level and meta-URL prefix, the owner permits merging, and
    /// the whole parent range has been minted.
    pub fn is_can_merge(&mut self, addr: Address) -> bool {
        let Some((owner, level, meta_url)) = self.read_object(addr, |obj| {
            (obj.nft_owner(), obj.nft_merge_level(), obj.nft_meta_url())
        }) else {
            return false;
        };
        if owner == Address::ZERO {
            return false;
        }
        if self.get_snft_no_merge(owner) {
            return false;
        }
        if level >= QUERY_DEPTH_LIMIT {
            return false;
        }
        let parent = zero_trailing_nibbles(addr, level as usize + 1);
        if self.is_beyond_official_mint(parent, level) {
            return false;
        }
        let prefix = meta_prefix(&meta_url).to_string();
        for i in 0..16u8 {
            let sibling = sibling_address(parent, level, i);
            if sibling == addr {
                continue;
            }
            let (s_owner, s_level, s_meta) = self
                .read_object(sibling, |obj| {
                    (obj.nft_owner(), obj.nft_merge_level(), obj.nft_meta_url())
                })
                .unwrap_or((Address::ZERO, 0, String::new()));
            // An unowned slot at the same level is a hole in the group and
            // does not block merging; it just contributes no pieces.
            if s_owner == Address::ZERO {
                if s_level != level {
                    return false;
                }
                continue;
            }
            if s_owner != owner || s_level != level {
                return false;
            }
            if meta_prefix(&s_meta) != prefix {
                return false;
            }
        }
        true
    }

    /// Recursively merges complete sibling sets upwards, clearing the
    /// children and materialising the merged node at the parent address.
    /// Returns the cumulative increase of exchange value.
    pub fn merge_nft(&mut self, addr: Address, block_number: u64) -> U256 {
        if !self.is_can_merge(addr) {
            return U256::ZERO;
        }
        let template = self
            .read_object(addr, |obj| obj.nft().cloned())
            .flatten()
            .unwrap_or_default();
        let level = template.merge_level;
        let parent = zero_trailing_nibbles(addr, level as usize + 1);

        let mut merged: Vec<(Address, u32)> = Vec::with_capacity(16);
        let mut pieces: u32 = 0;
        for i in 0..16u8 {
            let sibling = sibling_address(parent, level, i);
            let (s_owner, s_number) = self
                .read_object(sibling, |obj| (obj.nft_owner(), obj.nft_merge_number()))
                .unwrap_or((Address::ZERO, 0));
            if s_owner != Address::ZERO {
                merged.push((sibling, s_number));
                pieces += s_number;
                self.update_object(sibling, ObjectKind::Nft, |obj| obj.clean_nft());
            }
        }

        let new_level = level + 1;
        let meta_url = format!("{}/{}", meta_prefix(&template.meta_url), parent);
        self.update_object(parent, ObjectKind::Nft, |obj| {
            obj.set_nft_info(NftExt {
                name: template.name.clone(),
                symbol: template.symbol.clone(),
                owner: template.owner,
                approve_address: template.approve_address,
                merge_level: new_level,
                merge_number: pieces,
                creator: template.creator,
                royalty: template.royalty,
                exchanger: template.exchanger,
                meta_url: meta_url.clone(),
                snft_recipient: template.snft_recipient,
            })
        });

        let merged_amount = self.get_exchange_amount(parent, calc_value(new_level, pieces));
        let unmerged_amount = self.get_exchange_amount(parent, calc_value(level, pieces));
        let mut increase = merged_amount.saturating_sub(unmerged_amount);

        let log = merge_snft_log(
            parent,
            template.owner,
            new_level,
            pieces,
            block_number,
            &merged,
        );
        self.add_log(log);

        if new_level >= QUERY_DEPTH_LIMIT {
            self.add_snft_l3_addr(SNFT_LEVEL3_ADDRESS_LIST, parent);
        }

        increase = increase.saturating_add(self.merge_nft(parent, block_number));
        increase
    }

    /// Materialises the descendants of a merged node down to `target_level`,
    /// carrying the logical owner into every piece.
    pub fn split_nft(&mut self, addr: Address, target_level: u8) {
        let Some((store, _owner)) = self.get_nft_store_address(addr, 0) else {
            return;
        };
        let template = self
            .read_object(store, |obj| obj.nft().cloned())
            .flatten()
            .unwrap_or_default();
        let store_level = template.merge_level as usize;
        let target = target_level as usize;
        if store_level <= target {
            return;
        }

        let store_bytes: [u8; 20] = store.into();
        let addr_bytes: [u8; 20] = addr.into();
        // `addr` must name a canonical target-level node inside the store's
        // subtree, else there is nothing to split towards.
        let mut expected = store_bytes;
        for idx in (40 - store_level)..(40 - target) {
            let n = nibble_of(&addr_bytes, idx);
            set_nibble(&mut expected, idx, n);
        }
        if expected != addr_bytes {
            return;
        }

        for i in 0..(store_level - target) {
            let mut base = store_bytes;
            for k in 0..i {
                let idx = 40 - store_level + k;
                set_nibble(&mut base, idx, nibble_of(&addr_bytes, idx));
            }
            let new_level = (store_level - 1 - i) as u8;
            let number = 16u32.pow(new_level as u32);
            for j in 0..16u8 {
                set_nibble(&mut base, 40 - store_level + i, j);
                let piece = Address::from(base);
                let meta_url = format!("{}/{}", meta_prefix(&template.meta_url), piece);
                self.update_object(piece, ObjectKind::Nft, |obj| {
                    obj.set_nft_info(NftExt {
                        name: template.name.clone(),
                        symbol: template.symbol.clone(),
                        owner: template.owner,
                        approve_address: template.approve_address,
                        merge_level: new_level,
                        merge_number: number,
                        creator: template.creator,
                        royalty: template.royalty,
                        exchanger: template.exchanger,
                        meta_url,
                        snft_recipient: template.snft_recipient,
                    })
                });
            }
        }
    }

    /// First owned sibling at `level`, climbing towards the root when a whole
    /// sibling set is vacant. Used to re-trigger merging after an exchange.
    pub fn get_exist_address(&mut self, addr: Address, level: u8) -> Address {
        if level >= QUERY_DEPTH_LIMIT {
            return Address::ZERO;
        }
        let parent = zero_trailing_nibbles(addr, level as usize + 1);
        for i in 0..16u8 {
            let sibling = sibling_address(parent, level, i);
            if sibling == addr {
                continue;
            }
            let (s_owner, s_level) = self
                .read_object(sibling, |obj| (obj.nft_owner(), obj.nft_merge_level()))
                .unwrap_or((Address::ZERO, 0));
            if s_owner != Address::ZERO {
                if s_level == level {
                    return sibling;
                }
                return Address::ZERO;
            }
        }
        self.get_exist_address(parent, level + 1)
    }

    /// Deflation-adjusted value of an official SNFT: the ratio compounds per
    /// elapsed exchange period of the address space.
    pub fn get_exchange_amount(&mut self, nft_addr: Address, init_amount: U256) -> U256 {
        let addr_int = U256::from_be_slice(nft_addr.as_slice());
        let offset = addr_int.checked_sub(SNFT_BASE).unwrap_or(U256::ZERO) / U256::from(SNFT_CHUNK);
        let times: u64 = (offset / U256::from(EXCHANGE_PERIOD))
            .try_into()
            .unwrap_or(u64::MAX);
        deflate(init_amount, times)
    }

    /// Burns the SNFT into currency: credits the owner, debits vote weight,
    /// then lets the vacated slot's siblings re-merge.
    pub fn exchange_nft_to_currency(
        &mut self,
        owner: Address,
        nft_addr: Address,
        block_number: u64,
    ) {
        let (level, number) = self
            .read_object(nft_addr, |obj| (obj.nft_merge_level(), obj.nft_merge_number()))
            .unwrap_or((0, 0));
        let amount = self.get_exchange_amount(nft_addr, calc_value(level, number));

        if level >= QUERY_DEPTH_LIMIT {
            self.remove_snft_l3_addr(SNFT_LEVEL3_ADDRESS_LIST, nft_addr);
            self.remove_dividend_addr(DIVIDEND_ADDRESS_LIST, nft_addr);
        }

        self.update_object(nft_addr, ObjectKind::Nft, |obj| obj.clean_nft());
        self.add_balance(owner, amount);
        self.sub_vote_weight(owner, amount);

        let exist = self.get_exist_address(nft_addr, level);
        if exist != Address::ZERO {
            let exist_owner = self.get_nft_owner(exist);
            let increase = self.merge_nft(exist, block_number);
            self.add_vote_weight(exist_owner, increase);
        }
    }

    /// Ownership transfer; official SNFTs move their deflated value between
    /// the owners' vote weights and re-merge at the new owner.
    pub fn change_nft_owner(&mut self, nft_addr: Address, new_owner: Address, block_number: u64) {
        if !is_official_nft(nft_addr) {
            self.update_object(nft_addr, ObjectKind::Nft, |obj| {
                obj.ensure_nft().owner = new_owner;
            });
            return;
        }
        let (old_owner, level, number) = self
            .read_object(nft_addr, |obj| {
                (obj.nft_owner(), obj.nft_merge_level(), obj.nft_merge_number())
            })
            .unwrap_or((Address::ZERO, 0, 0));
        let mut amount = self.get_exchange_amount(nft_addr, calc_value(level, number));
        let old_weight = self.get_vote_weight(old_owner);
        if old_weight < amount {
            warn!(%nft_addr, %old_owner, "owner vote weight below nft value");
            amount = old_weight;
        }

        self.update_object(nft_addr, ObjectKind::Nft, |obj| {
            obj.ensure_nft().owner = new_owner;
        });
        self.sub_vote_weight(old_owner, amount);
        let increase = self.merge_nft(nft_addr, block_number);
        self.add_vote_weight(new_owner, amount.saturating_add(increase));
    }

    // ---- user minting and injection ----

    /// Mints a user NFT at the next user-mint index and emits the MintNFT
    /// log. Returns the assigned address.
    pub fn create_nft_by_user(
        &mut self,
        exchanger: Address,
        owner: Address,
        royalty: u16,
        meta_url: &str,
        block_number: u64,
    ) -> Address {
        let nft_addr = u256_to_address(self.get_user_mint());
        let meta_url = meta_url.to_string();
        self.update_object(nft_addr, ObjectKind::Nft, |obj| {
            obj.set_nft_info(NftExt {
                owner,
                merge_level: 0,
                merge_number: 1,
                creator: owner,
                royalty,
                exchanger,
                meta_url,
                snft_recipient: owner,
                ..NftExt::default()
            })
        });
        self.update_object(
            crate::constants::MINT_DEEP_STORAGE_ADDRESS,
            ObjectKind::Staker,
            |obj| {
                let mint = &mut obj.ensure_staker().mint;
                mint.user_mint += U256::from(1u64);
            },
        );
        let log = mint_nft_log(nft_addr, block_number);
        self.add_log(log);
        nft_addr
    }

    // ---- nft attribute surface ----

    /// Overwrites the whole NFT record at `addr`; the seeding primitive for
    /// minting paths and genesis tooling.
    pub fn set_nft_info(&mut self, addr: Address, info: NftExt) {
        self.update_object(addr, ObjectKind::Nft, |obj| obj.set_nft_info(info));
    }

    pub fn get_nft_info(&mut self, addr: Address) -> NftExt {
        self.read_object(addr, |obj| obj.nft().cloned())
            .flatten()
            .unwrap_or_default()
    }

    pub fn get_nft_merge_level(&mut self, addr: Address) -> u8 {
        self.read_object(addr, |obj| obj.nft_merge_level())
            .unwrap_or_default()
    }

    pub fn get_nft_merge_number(&mut self, addr: Address) -> u32 {
        self.read_object(addr, |obj| obj.nft_merge_number())
            .unwrap_or_default()
    }

    pub fn get_nft_meta_url(&mut self, addr: Address) -> String {
        self.read_object(addr, |obj| obj.nft_meta_url())
            .unwrap_or_default()
    }

    pub fn is_exist_nft(&mut self, addr: Address) -> bool {
        self.get_nft_owner(addr) != Address::ZERO
    }

    pub fn change_nft_approve_address(&mut self, nft_addr: Address, approve: Address) {
        self.update_object(nft_addr, ObjectKind::Nft, |obj| {
            obj.ensure_nft().approve_address = approve;
        });
    }

    pub fn cancel_nft_approve_address(&mut self, nft_addr: Address, approve: Address) {
        self.update_object(nft_addr, ObjectKind::Nft, |obj| {
            let nft = obj.ensure_nft();
            if nft.approve_address == approve {
                nft.approve_address = Address::ZERO;
            }
        });
    }

    pub fn change_approve_address(&mut self, addr: Address, approve: Address) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            let worm = obj.ensure_worm();
            if !worm.approve_addresses.contains(&approve) {
                worm.approve_addresses.push(approve);
            }
        });
    }

    pub fn cancel_approve_address(&mut self, addr: Address, approve: Address) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().approve_addresses.retain(|a| *a != approve);
        });
    }

    pub fn is_approved_one(&mut self, nft_addr: Address, addr: Address) -> bool {
        self.read_object(nft_addr, |obj| obj.nft_approve_address() == addr)
            .unwrap_or(false)
    }

    pub fn is_approved_for_all(&mut self, owner: Address, addr: Address) -> bool {
        self.read_object(owner, |obj| obj.is_approve_address(addr))
            .unwrap_or(false)
    }

    pub fn is_approved_for_all_by_nft(&mut self, nft_addr: Address, addr: Address) -> bool {
        let owner = self.get_nft_owner(nft_addr);
        self.is_approved_for_all(owner, addr)
    }

    pub fn is_approved(&mut self, nft_addr: Address, addr: Address) -> bool {
        self.is_approved_one(nft_addr, addr) || self.is_approved_for_all_by_nft(nft_addr, addr)
    }

    // ---- owner-side snft flags ----

    pub fn get_snft_no_merge(&mut self, addr: Address) -> bool {
        self.read_object(addr, |obj| obj.snft_no_merge())
            .unwrap_or(false)
    }

    pub fn change_snft_no_merge(&mut self, addr: Address, flag: bool) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().snft_no_merge = flag;
        });
    }

    pub fn get_lock_snft_flag(&mut self, addr: Address) -> bool {
        self.read_object(addr, |obj| obj.lock_snft()).unwrap_or(false)
    }

    pub fn change_lock_snft_flag(&mut self, addr: Address, flag: bool) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().lock_snft = flag;
        });
    }

    pub fn get_snft_agent_recipient(&mut self, addr: Address) -> Address {
        self.read_object(addr, |obj| obj.snft_agent_recipient())
            .unwrap_or_default()
    }

    pub fn change_snft_agent_recipient(&mut self, addr: Address, recipient: Address) {
        self.update_object(addr, ObjectKind::Account, |obj| {
            obj.ensure_worm().snft_agent_recipient = recipient;
        });
    }

    // ---- level-3 and dividend registries ----

    pub fn get_snft_l3_addrs(&mut self, list_addr: Address) -> Vec<Address> {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.snft_l3_addrs.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn add_snft_l3_addr(&mut self, list_addr: Address, snft: Address) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            let ext = obj.ensure_staker();
            if !ext.snft_l3_addrs.contains(&snft) {
                ext.snft_l3_addrs.push(snft);
            }
        });
    }

    pub fn remove_snft_l3_addr(&mut self, list_addr: Address, snft: Address) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            obj.ensure_staker().snft_l3_addrs.retain(|a| *a != snft);
        });
    }

    pub fn get_dividend_addrs(&mut self, list_addr: Address) -> Vec<Address> {
        self.read_object(list_addr, |obj| {
            obj.staker().map(|s| s.dividend_addrs.clone()).unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn set_dividend_addrs(&mut self, list_addr: Address, addrs: Vec<Address>) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            obj.ensure_staker().dividend_addrs = addrs;
        });
    }

    pub fn add_dividend_addr(&mut self, list_addr: Address, snft: Address) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            let ext = obj.ensure_staker();
            if !ext.dividend_addrs.contains(&snft) {
                ext.dividend_addrs.push(snft);
            }
        });
    }

    pub fn remove_dividend_addr(&mut self, list_addr: Address, snft: Address) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            obj.ensure_staker().dividend_addrs.retain(|a| *a != snft);
        });
    }

    pub fn remove_dividend_addrs_all(&mut self, list_addr: Address) {
        self.update_object(list_addr, ObjectKind::Staker, |obj| {
            obj.ensure_staker().dividend_addrs.clear();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn trailing_nibbles_zeroed() {
        let addr = address!("80000000000000000000000000000000000001af");
        assert_eq!(
            zero_trailing_nibbles(addr, 1),
            address!("80000000000000000000000000000000000001a0")
        );
        assert_eq!(
            zero_trailing_nibbles(addr, 3),
            address!("8000000000000000000000000000000000000000")
        );
    }

    #[test]
    fn sibling_slots_cover_sixteen_children() {
        let parent = address!("8000000000000000000000000000000000000100");
        let last = sibling_address(parent, 0, 0x0f);
        assert_eq!(last, address!("800000000000000000000000000000000000010f"));
        let level1 = sibling_address(parent, 1, 0x0a);
        assert_eq!(level1, address!("80000000000000000000000000000000000001a0"));
    }

    #[test]
    fn value_grows_with_level() {
        for level in 0..3u8 {
            assert!(calc_value(level + 1, 16) >= calc_value(level, 16));
        }
    }

    #[test]
    fn deflation_compounds() {
        let init = U256::from(1_000_000u64);
        assert_eq!(deflate(init, 0), init);
        assert_eq!(deflate(init, 1), U256::from(850_000u64));
        assert_eq!(deflate(init, 2), U256::from(722_500u64));
    }
}
