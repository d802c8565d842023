//! The interface through which the broad phase reports pairs,
//! plus a simple implementation that just keeps track of them.

use thunderdome as td;

/// Receiver of pair events, usually implemented by the contact manager.
///
/// The broad phase calls these only from [`flush`][super::BroadPhase::flush]
/// (and from proxy creation and destruction, which flush internally),
/// at most once per net change of a pair within a time step.
pub trait PairCallback {
    /// Handle stored with every proxy, identifying the shape it was created for.
    type ProxyData: Clone;
    /// Handle stored with every reported pair. Never interpreted by the broad phase.
    type PairData;

    /// Two proxies started overlapping. The returned value is stored with the pair
    /// and handed back in [`pair_removed`][Self::pair_removed].
    fn pair_added(&mut self, a: &Self::ProxyData, b: &Self::ProxyData) -> Self::PairData;

    /// Two proxies that were previously reported with `pair_added` stopped overlapping
    /// or one of them was destroyed.
    fn pair_removed(&mut self, a: &Self::ProxyData, b: &Self::ProxyData, pair: Self::PairData);
}

/// Key type to look up a pair stored in a [`PairSet`][self::PairSet].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairKey(td::Index);

impl PairKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// A [`PairCallback`][self::PairCallback] that keeps the set of currently overlapping
/// proxy pairs in an arena.
///
/// Useful when the caller wants to poll the overlapping pairs every step
/// rather than react to events.
#[derive(Clone, Debug)]
pub struct PairSet<T> {
    pairs: td::Arena<[T; 2]>,
    added_since_clear: usize,
    removed_since_clear: usize,
}

impl<T> Default for PairSet<T> {
    fn default() -> Self {
        Self {
            pairs: td::Arena::new(),
            added_since_clear: 0,
            removed_since_clear: 0,
        }
    }
}

impl<T: Clone> PairSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs currently overlapping.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Access a pair by the key stored in the broad phase, if it still exists.
    #[inline]
    pub fn get(&self, key: PairKey) -> Option<&[T; 2]> {
        self.pairs.get(key.0)
    }

    /// Iterate over every overlapping pair in no particular order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (PairKey, &[T; 2])> {
        self.pairs.iter().map(|(idx, pair)| (PairKey(idx), pair))
    }

    /// Number of pairs added and removed since the last call to this method.
    pub fn take_change_counts(&mut self) -> (usize, usize) {
        let counts = (self.added_since_clear, self.removed_since_clear);
        self.added_since_clear = 0;
        self.removed_since_clear = 0;
        counts
    }
}

impl<T: Clone> PairCallback for PairSet<T> {
    type ProxyData = T;
    type PairData = PairKey;

    fn pair_added(&mut self, a: &T, b: &T) -> PairKey {
        self.added_since_clear += 1;
        PairKey(self.pairs.insert([a.clone(), b.clone()]))
    }

    fn pair_removed(&mut self, _a: &T, _b: &T, pair: PairKey) {
        self.removed_since_clear += 1;
        if self.pairs.remove(pair.0).is_none() {
            log::warn!("Removed a pair that wasn't in the pair set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_set_tracks_live_pairs() {
        let mut set: PairSet<u32> = PairSet::new();
        let k1 = set.pair_added(&1, &2);
        let k2 = set.pair_added(&3, &1);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(k2), Some(&[3, 1]));

        set.pair_removed(&1, &2, k1);
        assert_eq!(set.len(), 1);
        assert!(set.get(k1).is_none());
        itertools::assert_equal(set.iter().map(|(k, p)| (k, *p)), [(k2, [3, 1])]);
        assert_eq!(set.take_change_counts(), (2, 1));
        assert_eq!(set.take_change_counts(), (0, 0));
    }
}
