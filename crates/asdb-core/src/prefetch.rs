//! どこで: trie prefetcher / 何を: commit予定アドレスのtrie経路先読み / なぜ: commit局面のtrie walkを温めるため

use alloy_primitives::{keccak256, Address, B256};
use asdb_db::{NodeDb, Trie};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

#[derive(Clone, Default, Debug)]
struct Subfetch {
    hinted: HashSet<Address>,
    visited: HashSet<Address>,
    used: Vec<Address>,
}

#[derive(Clone, Default, Debug)]
struct Shared {
    fetches: HashMap<B256, Subfetch>,
}

/// Background warmer fed `(root, addrs)` hints. It only populates caches in
/// the shared node DB; the state database never blocks on it.
#[derive(Debug)]
pub struct TriePrefetcher {
    db: NodeDb,
    root: B256,
    namespace: String,
    shared: Arc<Mutex<Shared>>,
    closed: Arc<AtomicBool>,
    tx: Option<Sender<(B256, Vec<Address>)>>,
    handle: Option<JoinHandle<()>>,
}

impl TriePrefetcher {
    pub fn new(db: NodeDb, root: B256, namespace: &str) -> Self {
        let shared: Arc<Mutex<Shared>> = Arc::new(Mutex::new(Shared::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(B256, Vec<Address>)>();

        let worker_db = db.clone();
        let worker_shared = Arc::clone(&shared);
        let worker_closed = Arc::clone(&closed);
        let handle = std::thread::spawn(move || {
            while let Ok((fetch_root, addrs)) = rx.recv() {
                if worker_closed.load(Ordering::Acquire) {
                    break;
                }
                let trie = Trie::open(worker_db.clone(), fetch_root);
                for addr in addrs {
                    if worker_closed.load(Ordering::Acquire) {
                        return;
                    }
                    let already = {
                        let shared = worker_shared.lock().expect("prefetcher lock");
                        shared
                            .fetches
                            .get(&fetch_root)
                            .map_or(false, |f| f.visited.contains(&addr))
                    };
                    if already {
                        continue;
                    }
                    // Best effort: a miss just means nothing to warm.
                    let _ = trie.get(keccak256(addr.as_slice()));
                    let mut shared = worker_shared.lock().expect("prefetcher lock");
                    shared
                        .fetches
                        .entry(fetch_root)
                        .or_default()
                        .visited
                        .insert(addr);
                }
            }
        });

        Self {
            db,
            root,
            namespace: namespace.to_string(),
            shared,
            closed,
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn root(&self) -> B256 {
        self.root
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Queues address hints for `root`. A lookup-only copy ignores hints.
    pub fn prefetch(&self, root: B256, addrs: &[Address]) {
        let Some(tx) = &self.tx else {
            return;
        };
        {
            let mut shared = self.shared.lock().expect("prefetcher lock");
            shared
                .fetches
                .entry(root)
                .or_default()
                .hinted
                .extend(addrs.iter().copied());
        }
        let _ = tx.send((root, addrs.to_vec()));
    }

    /// The warmed trie for `root`, only once every hinted address has been
    /// visited; `None` otherwise — callers never wait.
    pub fn trie(&self, root: B256) -> Option<Trie> {
        let shared = self.shared.lock().expect("prefetcher lock");
        let fetch = shared.fetches.get(&root)?;
        if !fetch.hinted.iter().all(|addr| fetch.visited.contains(addr)) {
            return None;
        }
        Some(Trie::open(self.db.clone(), root))
    }

    /// Records which hinted addresses the commit actually consumed.
    pub fn used(&self, root: B256, addrs: &[Address]) {
        let mut shared = self.shared.lock().expect("prefetcher lock");
        let Some(fetch) = shared.fetches.get_mut(&root) else {
            return;
        };
        for addr in addrs {
            if fetch.hinted.contains(addr) {
                fetch.used.push(*addr);
            }
        }
        let wasted = fetch.hinted.len().saturating_sub(fetch.used.len());
        if wasted > 0 {
            debug!(namespace = %self.namespace, %root, wasted, "prefetched addresses went unused");
        }
    }

    pub fn used_addresses(&self, root: B256) -> Vec<Address> {
        let shared = self.shared.lock().expect("prefetcher lock");
        shared
            .fetches
            .get(&root)
            .map(|f| f.used.clone())
            .unwrap_or_default()
    }

    /// Interrupts outstanding work and joins the worker.
    pub fn close(mut self) {
        self.closed.store(true, Ordering::Release);
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Lookup-only clone: serves `trie()` from the data gathered so far but
    /// never schedules new work.
    pub fn copy(&self) -> TriePrefetcher {
        let snapshot = self.shared.lock().expect("prefetcher lock").clone();
        TriePrefetcher {
            db: self.db.clone(),
            root: self.root,
            namespace: self.namespace.clone(),
            shared: Arc::new(Mutex::new(snapshot)),
            closed: Arc::new(AtomicBool::new(true)),
            tx: None,
            handle: None,
        }
    }
}
