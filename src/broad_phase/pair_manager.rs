//! Hash table of proxy pairs plus the buffer of pending pair changes.
//!
//! As proxies are created and moved, the same pair may be added and removed
//! several times within a single time step. Changes are staged in the pair buffer
//! and only reported to the user once they're confirmed in a flush.

use super::BroadPhaseError;

/// Proxy ids in canonical order (`proxy_id1 < proxy_id2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BufferedPair {
    pub proxy_id1: usize,
    pub proxy_id2: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct Pair<P> {
    pub proxy_id1: usize,
    pub proxy_id2: usize,
    /// Set when the pair callback has been told about this pair.
    pub user_data: Option<P>,
    status: u8,
}

impl<P> Pair<P> {
    const BUFFERED: u8 = 0b001;
    const REMOVED: u8 = 0b010;
    const FINAL: u8 = 0b100;

    #[inline]
    pub fn is_buffered(&self) -> bool {
        self.status & Self::BUFFERED != 0
    }
    #[inline]
    pub fn set_buffered(&mut self) {
        self.status |= Self::BUFFERED;
    }
    #[inline]
    pub fn clear_buffered(&mut self) {
        self.status &= !Self::BUFFERED;
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.status & Self::REMOVED != 0
    }
    #[inline]
    pub fn set_removed(&mut self) {
        self.status |= Self::REMOVED;
    }
    #[inline]
    pub fn clear_removed(&mut self) {
        self.status &= !Self::REMOVED;
    }

    /// Whether the pair has been confirmed to the pair callback.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.status & Self::FINAL != 0
    }
    #[inline]
    pub fn set_final(&mut self) {
        self.status |= Self::FINAL;
    }

    #[inline]
    fn key(&self) -> BufferedPair {
        BufferedPair {
            proxy_id1: self.proxy_id1,
            proxy_id2: self.proxy_id2,
        }
    }
}

#[inline]
fn canonical(id1: usize, id2: usize) -> (usize, usize) {
    if id1 <= id2 {
        (id1, id2)
    } else {
        (id2, id1)
    }
}

/// Thomas Wang's 32-bit integer hash over the two ids.
/// Fixed so that pair iteration order is deterministic.
fn hash(id1: usize, id2: usize) -> u32 {
    let mut key: u32 = ((id2 as u32) << 16) | id1 as u32;
    key = (!key).wrapping_add(key << 15);
    key ^= key >> 12;
    key = key.wrapping_add(key << 2);
    key ^= key >> 4;
    key = key.wrapping_mul(2057);
    key ^= key >> 16;
    key
}

/// Open-chained hash table mapping canonical proxy id pairs to pair records.
///
/// Pair records are stored densely; removal moves the last record into the hole
/// and relinks its chain, so indices into the table are only stable
/// until the next removal. Buffered pairs refer to ids rather than indices for that reason.
#[derive(Clone, Debug)]
pub(crate) struct PairManager<P> {
    pairs: Vec<Pair<P>>,
    // chain links, parallel to `pairs`
    next: Vec<Option<usize>>,
    hash_table: Vec<Option<usize>>,
    table_mask: usize,
    max_pairs: usize,
    buffer: Vec<BufferedPair>,
}

impl<P> PairManager<P> {
    pub fn new(max_pairs: usize) -> Self {
        let table_capacity = max_pairs.next_power_of_two();
        debug_assert!(table_capacity.is_power_of_two() && table_capacity >= max_pairs);
        Self {
            pairs: Vec::with_capacity(max_pairs),
            next: Vec::with_capacity(max_pairs),
            hash_table: vec![None; table_capacity],
            table_mask: table_capacity - 1,
            max_pairs,
            buffer: Vec::with_capacity(max_pairs),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_pairs
    }

    #[inline]
    fn bucket(&self, id1: usize, id2: usize) -> usize {
        hash(id1, id2) as usize & self.table_mask
    }

    fn find_in_bucket(&self, id1: usize, id2: usize, bucket: usize) -> Option<usize> {
        let mut index = self.hash_table[bucket];
        while let Some(i) = index {
            let pair = &self.pairs[i];
            if pair.proxy_id1 == id1 && pair.proxy_id2 == id2 {
                return Some(i);
            }
            index = self.next[i];
        }
        None
    }

    /// Find the index of a pair. The order of the ids doesn't matter.
    pub fn find(&self, id1: usize, id2: usize) -> Option<usize> {
        let (id1, id2) = canonical(id1, id2);
        self.find_in_bucket(id1, id2, self.bucket(id1, id2))
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Pair<P> {
        &self.pairs[index]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut Pair<P> {
        &mut self.pairs[index]
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = &Pair<P>> {
        self.pairs.iter()
    }

    /// Add a pair and return its index.
    /// If the pair already exists, nothing is created and the existing index is returned.
    pub fn add(&mut self, id1: usize, id2: usize) -> Result<usize, BroadPhaseError> {
        debug_assert_ne!(id1, id2, "paired a proxy with itself");
        let (id1, id2) = canonical(id1, id2);
        let bucket = self.bucket(id1, id2);
        if let Some(index) = self.find_in_bucket(id1, id2, bucket) {
            return Ok(index);
        }

        if self.pairs.len() >= self.max_pairs {
            return Err(BroadPhaseError::PairCapacity {
                max: self.max_pairs,
            });
        }

        let index = self.pairs.len();
        self.pairs.push(Pair {
            proxy_id1: id1,
            proxy_id2: id2,
            user_data: None,
            status: 0,
        });
        self.next.push(self.hash_table[bucket]);
        self.hash_table[bucket] = Some(index);
        Ok(index)
    }

    fn unlink(&mut self, bucket: usize, index: usize) {
        let mut previous = None;
        let mut curr = self.hash_table[bucket];
        while let Some(i) = curr {
            if i == index {
                break;
            }
            previous = Some(i);
            curr = self.next[i];
        }
        debug_assert_eq!(curr, Some(index), "pair missing from its hash chain");
        match previous {
            Some(prev) => self.next[prev] = self.next[index],
            None => self.hash_table[bucket] = self.next[index],
        }
    }

    /// Remove a pair, returning its record. Returns `None` if the pair doesn't exist.
    ///
    /// The last pair in storage is moved into the freed slot.
    pub fn remove(&mut self, id1: usize, id2: usize) -> Option<Pair<P>> {
        let (id1, id2) = canonical(id1, id2);
        let bucket = self.bucket(id1, id2);
        let index = self.find_in_bucket(id1, id2, bucket)?;
        self.unlink(bucket, index);

        let last_index = self.pairs.len() - 1;
        if index == last_index {
            self.next.pop();
            return self.pairs.pop();
        }

        // take the last pair out of its chain, move it into the hole and put it back
        let last_key = self.pairs[last_index].key();
        let last_bucket = self.bucket(last_key.proxy_id1, last_key.proxy_id2);
        self.unlink(last_bucket, last_index);

        let removed = self.pairs.swap_remove(index);
        self.next.swap_remove(index);
        self.next[index] = self.hash_table[last_bucket];
        self.hash_table[last_bucket] = Some(index);

        Some(removed)
    }

    //
    // buffering
    //

    /// Stage a pair for addition, creating it if it doesn't exist yet.
    ///
    /// If the pair is already staged (e.g. removed earlier in the same step)
    /// only its removed flag is cleared.
    pub fn add_buffered(&mut self, id1: usize, id2: usize) -> Result<(), BroadPhaseError> {
        let index = self.add(id1, id2)?;
        let pair = &mut self.pairs[index];
        if !pair.is_buffered() {
            pair.set_buffered();
            self.buffer.push(pair.key());
        }
        pair.clear_removed();
        Ok(())
    }

    /// Stage a pair for removal. Pairs that don't exist are ignored.
    pub fn remove_buffered(&mut self, id1: usize, id2: usize) {
        let Some(index) = self.find(id1, id2) else {
            return;
        };
        let pair = &mut self.pairs[index];
        if !pair.is_buffered() {
            pair.set_buffered();
            self.buffer.push(pair.key());
        }
        pair.set_removed();
    }

    #[inline]
    pub fn buffer(&self) -> &[BufferedPair] {
        &self.buffer
    }

    /// Move the pair buffer out for processing.
    /// Hand it back with [`restore_buffer`][Self::restore_buffer] to reuse its allocation.
    #[inline]
    pub fn take_buffer(&mut self) -> Vec<BufferedPair> {
        std::mem::take(&mut self.buffer)
    }

    #[inline]
    pub fn restore_buffer(&mut self, mut buffer: Vec<BufferedPair>) {
        buffer.clear();
        self.buffer = buffer;
    }
}

//
// tests
//
