// This file is part of Chainrelay.
//
// Chainrelay is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Chainrelay is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Chainrelay.
// If not, see https://www.gnu.org/licenses/.

//! Caching utilities

use std::{
    fmt::{self, Debug, Formatter},
    hash::Hash,
};

use derive_more::{Deref, DerefMut};
use schnellru::{ByLength, Limiter, RandomState};

/// Wrapper of [`schnellru::LruMap`] bounded by entry count.
///
/// The [`Debug`] impl reports occupancy only, values may be large JSON documents.
#[derive(Deref, DerefMut)]
pub struct LruMap<K, V, L = ByLength>(schnellru::LruMap<K, V, L, RandomState>)
where
    K: Hash + PartialEq,
    L: Limiter<K, V>;

impl<K, V, L> Debug for LruMap<K, V, L>
where
    K: Hash + PartialEq,
    L: Limiter<K, V> + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruMap")
            .field("limiter", self.limiter())
            .field("len", &self.len())
            .finish()
    }
}

impl<K, V> LruMap<K, V>
where
    K: Hash + PartialEq,
{
    /// Returns a new cache holding at most `max_length` entries
    pub fn new(max_length: u32) -> Self {
        LruMap(schnellru::LruMap::new(ByLength::new(max_length)))
    }
}

impl<K, V, L> LruMap<K, V, L>
where
    K: Hash + PartialEq,
    V: Clone,
    L: Limiter<K, V>,
{
    /// Clone out the value for `key`, promoting it to most recently used
    pub fn get_cloned(&mut self, key: &K) -> Option<V> {
        self.0.get(key).map(|v| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache: LruMap<String, u64> = LruMap::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get_cloned(&"a".to_string()), Some(1));
        cache.insert("c".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_cloned(&"b".to_string()), None);
        assert_eq!(cache.get_cloned(&"a".to_string()), Some(1));
        assert_eq!(cache.get_cloned(&"c".to_string()), Some(3));
    }

    #[test]
    fn test_debug_reports_len() {
        let mut cache: LruMap<u64, Vec<u8>> = LruMap::new(4);
        cache.insert(1, vec![0; 1024]);
        let debug = format!("{cache:?}");
        assert!(debug.contains("len: 1"));
    }
}
