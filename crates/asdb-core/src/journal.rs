//! どこで: 状態journal / 何を: 巻き戻し可能な変更ログ / なぜ: snapshot/revertを任意粒度で支えるため

use crate::state_db::StateDb;
use crate::state_object::StateObject;
use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::HashMap;

/// One reversible mutation. Each variant carries exactly the prior value its
/// undo needs.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    CreateObject {
        address: Address,
    },
    ResetObject {
        prev: Box<StateObject>,
        prev_destruct: bool,
    },
    Suicide {
        address: Address,
        prev_suicided: bool,
        prev_balance: U256,
    },
    Balance {
        address: Address,
        prev: U256,
    },
    Nonce {
        address: Address,
        prev: u64,
    },
    Code {
        address: Address,
        prev_hash: B256,
        prev_code: Bytes,
    },
    Storage {
        address: Address,
        key: B256,
        prev: B256,
    },
    Refund {
        prev: u64,
    },
    AddLog {
        tx_hash: B256,
    },
    AddPreimage {
        hash: B256,
    },
    Touch {
        address: Address,
    },
    AccessListAddAccount {
        address: Address,
    },
    AccessListAddSlot {
        address: Address,
        slot: B256,
    },
}

impl JournalEntry {
    /// The address this entry dirties, if any.
    pub fn dirtied(&self) -> Option<Address> {
        match self {
            JournalEntry::CreateObject { address }
            | JournalEntry::Suicide { address, .. }
            | JournalEntry::Balance { address, .. }
            | JournalEntry::Nonce { address, .. }
            | JournalEntry::Code { address, .. }
            | JournalEntry::Storage { address, .. }
            | JournalEntry::Touch { address } => Some(*address),
            JournalEntry::ResetObject { .. }
            | JournalEntry::Refund { .. }
            | JournalEntry::AddLog { .. }
            | JournalEntry::AddPreimage { .. }
            | JournalEntry::AccessListAddAccount { .. }
            | JournalEntry::AccessListAddSlot { .. } => None,
        }
    }

    fn revert(self, state: &mut StateDb) {
        match self {
            JournalEntry::CreateObject { address } => {
                state.state_objects.remove(&address);
            }
            JournalEntry::ResetObject {
                prev,
                prev_destruct,
            } => {
                let addr_hash = prev.addr_hash();
                state.state_objects.insert(prev.address(), *prev);
                if !prev_destruct && state.snap.is_some() {
                    state.snap_destructs.remove(&addr_hash);
                }
            }
            JournalEntry::Suicide {
                address,
                prev_suicided,
                prev_balance,
            } => {
                if let Some(obj) = state.state_objects.get_mut(&address) {
                    obj.suicided = prev_suicided;
                    obj.set_balance(prev_balance);
                }
            }
            JournalEntry::Balance { address, prev } => {
                if let Some(obj) = state.state_objects.get_mut(&address) {
                    obj.set_balance(prev);
                }
            }
            JournalEntry::Nonce { address, prev } => {
                if let Some(obj) = state.state_objects.get_mut(&address) {
                    obj.set_nonce(prev);
                }
            }
            JournalEntry::Code {
                address,
                prev_hash,
                prev_code,
            } => {
                if let Some(obj) = state.state_objects.get_mut(&address) {
                    obj.set_code(prev_hash, prev_code);
                    obj.dirty_code = false;
                }
            }
            JournalEntry::Storage { address, key, prev } => {
                if let Some(obj) = state.state_objects.get_mut(&address) {
                    obj.set_storage_value(key, prev);
                }
            }
            JournalEntry::Refund { prev } => {
                state.refund = prev;
            }
            JournalEntry::AddLog { tx_hash } => {
                let drained = match state.logs.get_mut(&tx_hash) {
                    Some(logs) => {
                        logs.pop();
                        logs.is_empty()
                    }
                    None => panic!("journal: no log recorded for {tx_hash}"),
                };
                if drained {
                    state.logs.remove(&tx_hash);
                }
                state.log_size -= 1;
            }
            JournalEntry::AddPreimage { hash } => {
                state.preimages.remove(&hash);
            }
            JournalEntry::Touch { .. } => {}
            JournalEntry::AccessListAddAccount { address } => {
                // An address is journalled only when newly added, so slots
                // under it were journalled (and reverted) first.
                state.access_list.delete_address(address);
            }
            JournalEntry::AccessListAddSlot { address, slot } => {
                state.access_list.delete_slot(address, slot);
            }
        }
    }
}

#[derive(Default, Debug)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    dirties: HashMap<Address, usize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: JournalEntry) {
        if let Some(addr) = entry.dirtied() {
            *self.dirties.entry(addr).or_insert(0) += 1;
        }
        self.entries.push(entry);
    }

    pub fn length(&self) -> usize {
        self.entries.len()
    }

    pub fn dirties(&self) -> &HashMap<Address, usize> {
        &self.dirties
    }

    /// Pops entries back down to `to`, undoing each in reverse order.
    pub fn revert(&mut self, state: &mut StateDb, to: usize) {
        while self.entries.len() > to {
            let entry = self.entries.pop().expect("journal length checked");
            if let Some(addr) = entry.dirtied() {
                match self.dirties.get_mut(&addr) {
                    Some(count) if *count > 1 => *count -= 1,
                    Some(_) => {
                        self.dirties.remove(&addr);
                    }
                    None => panic!("journal: dirty count underflow for {addr}"),
                }
            }
            entry.revert(state);
        }
    }
}
