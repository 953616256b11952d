//! どこで: tx単位のaccess list / 何を: 触れたアドレスとslotの集合 / なぜ: warm/coldガス判定を支えるため

use alloy_primitives::{Address, B256};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default)]
pub struct AccessList {
    addresses: HashMap<Address, Option<usize>>,
    slots: Vec<HashSet<B256>>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_address(&self, address: Address) -> bool {
        self.addresses.contains_key(&address)
    }

    /// Returns (address present, slot present).
    pub fn contains(&self, address: Address, slot: B256) -> (bool, bool) {
        match self.addresses.get(&address) {
            None => (false, false),
            Some(None) => (true, false),
            Some(Some(idx)) => (true, self.slots[*idx].contains(&slot)),
        }
    }

    /// Adds an address; true when it was not present before.
    pub fn add_address(&mut self, address: Address) -> bool {
        if self.addresses.contains_key(&address) {
            return false;
        }
        self.addresses.insert(address, None);
        true
    }

    /// Adds an (address, slot) pair; returns (address added, slot added).
    pub fn add_slot(&mut self, address: Address, slot: B256) -> (bool, bool) {
        match self.addresses.get(&address).copied() {
            None => {
                let idx = self.slots.len();
                let mut set = HashSet::new();
                set.insert(slot);
                self.slots.push(set);
                self.addresses.insert(address, Some(idx));
                (true, true)
            }
            Some(None) => {
                let idx = self.slots.len();
                let mut set = HashSet::new();
                set.insert(slot);
                self.slots.push(set);
                self.addresses.insert(address, Some(idx));
                (false, true)
            }
            Some(Some(idx)) => {
                let added = self.slots[idx].insert(slot);
                (false, added)
            }
        }
    }

    /// Journal-revert hook: drops one slot; an emptied slot set reverts the
    /// address back to a slotless entry.
    pub fn delete_slot(&mut self, address: Address, slot: B256) {
        let Some(Some(idx)) = self.addresses.get(&address).copied() else {
            panic!("access list: reverting slot on address with no slot set");
        };
        let set = &mut self.slots[idx];
        set.remove(&slot);
        if set.is_empty() {
            // The pairing journal entry order guarantees this was the set
            // created by the matching add.
            self.slots.pop();
            self.addresses.insert(address, None);
        }
    }

    /// Journal-revert hook: drops an address added in this transaction.
    pub fn delete_address(&mut self, address: Address) {
        self.addresses.remove(&address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_revert_roundtrip() {
        let mut al = AccessList::new();
        let a = Address::repeat_byte(0x01);
        let s = B256::repeat_byte(0x02);

        assert!(al.add_address(a));
        assert!(!al.add_address(a));
        let (addr_added, slot_added) = al.add_slot(a, s);
        assert!(!addr_added);
        assert!(slot_added);
        assert_eq!(al.contains(a, s), (true, true));

        al.delete_slot(a, s);
        assert_eq!(al.contains(a, s), (true, false));
        al.delete_address(a);
        assert!(!al.contains_address(a));
    }
}
