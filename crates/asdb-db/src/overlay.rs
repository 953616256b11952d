//! どこで: flatten書き込みバッファ / 何を: BTreeMapによる決定的反映 / なぜ: cap時の適用順序を凍結するため

use std::collections::BTreeMap;

/// Ordered write buffer for the flat store: `Some` is a write, `None` a
/// deletion. Draining applies deletions and writes in key order so a flatten
/// is reproducible regardless of how the diff layer was assembled.
#[derive(Debug, Default)]
pub struct FlatOverlay {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl FlatOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Marks every existing key beginning with `prefix` for deletion.
    pub fn delete_prefix(&mut self, base: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) {
        let keys: Vec<Vec<u8>> = base
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.writes.insert(key, None);
        }
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn drain_into(&mut self, base: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        let writes = std::mem::take(&mut self.writes);
        for (key, value) in writes {
            match value {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_applies_in_key_order_with_deletes() {
        let mut base: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        base.insert(vec![1, 1], vec![0xaa]);
        base.insert(vec![1, 2], vec![0xbb]);
        base.insert(vec![2, 1], vec![0xcc]);

        let mut overlay = FlatOverlay::new();
        overlay.delete_prefix(&base, &[1]);
        overlay.set(vec![1, 2], vec![0xdd]);
        overlay.drain_into(&mut base);

        assert_eq!(base.get(&vec![1, 1]), None);
        assert_eq!(base.get(&vec![1, 2]), Some(&vec![0xdd]));
        assert_eq!(base.get(&vec![2, 1]), Some(&vec![0xcc]));
    }
}
