//! Write-buffering storage overlay
//!
//! Handlers run against a [`StorageCache`] layered over the committed store.
//! `check_tx` drops the cache; `deliver_tx` flushes it only when the phase
//! succeeds, so a rejected transaction never leaves partial writes behind.

use std::collections::BTreeMap;

use cosmwasm_std::{Order, Record, Storage};

/// Buffered write: `Some(value)` for a set, `None` for a removal.
pub type StorageOp = (Vec<u8>, Option<Vec<u8>>);

pub struct StorageCache<'a> {
    base: &'a dyn Storage,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> StorageCache<'a> {
    pub fn new(base: &'a dyn Storage) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Consume the overlay, returning buffered writes in key order.
    pub fn into_ops(self) -> Vec<StorageOp> {
        self.writes.into_iter().collect()
    }
}

/// Flush buffered writes into a store.
pub fn apply(ops: Vec<StorageOp>, storage: &mut dyn Storage) {
    for (key, value) in ops {
        match value {
            Some(v) => storage.set(&key, &v),
            None => storage.remove(&key),
        }
    }
}

fn in_range(key: &[u8], start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
    start.map_or(true, |s| key >= s) && end.map_or(true, |e| key < e)
}

impl Storage for StorageCache<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(buffered) => buffered.clone(),
            None => self.base.get(key),
        }
    }

    fn range<'b>(
        &'b self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        order: Order,
    ) -> Box<dyn Iterator<Item = Record> + 'b> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .range(start, end, Order::Ascending)
            .collect();
        for (key, value) in &self.writes {
            if !in_range(key, start, end) {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        match order {
            Order::Ascending => Box::new(merged.into_iter()),
            Order::Descending => Box::new(merged.into_iter().rev()),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn remove(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::MemoryStorage;

    fn base() -> MemoryStorage {
        let mut s = MemoryStorage::new();
        s.set(b"a", b"1");
        s.set(b"b", b"2");
        s.set(b"c", b"3");
        s
    }

    #[test]
    fn test_reads_through_and_shadows() {
        let base = base();
        let mut cache = StorageCache::new(&base);
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));

        cache.set(b"a", b"9");
        cache.remove(b"b");
        assert_eq!(cache.get(b"a"), Some(b"9".to_vec()));
        assert_eq!(cache.get(b"b"), None);
        // base untouched until applied
        assert_eq!(base.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_range_merges_writes() {
        let base = base();
        let mut cache = StorageCache::new(&base);
        cache.remove(b"b");
        cache.set(b"bb", b"x");
        cache.set(b"z", b"outside");

        let keys: Vec<_> = cache
            .range(Some(b"a"), Some(b"d"), Order::Ascending)
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"bb".to_vec(), b"c".to_vec()]);

        let first_desc = cache.range(None, None, Order::Descending).next().unwrap();
        assert_eq!(first_desc.0, b"z".to_vec());
    }

    #[test]
    fn test_apply_flushes() {
        let mut base = base();
        let ops = {
            let mut cache = StorageCache::new(&base);
            cache.set(b"d", b"4");
            cache.remove(b"a");
            assert!(cache.is_dirty());
            cache.into_ops()
        };
        apply(ops, &mut base);
        assert_eq!(base.get(b"a"), None);
        assert_eq!(base.get(b"d"), Some(b"4".to_vec()));
    }
}
