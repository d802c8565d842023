//! Sorted arrays of interval endpoints, one per axis.

use std::ops::{Deref, DerefMut};

/// One end of a proxy's projection onto an axis.
///
/// The lowest bit of `value` tells which end this is:
/// even values are lower bounds and odd values are upper bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bound {
    pub value: u32,
    pub proxy: usize,
    /// Number of intervals open after this bound, including its own if it's a lower bound.
    pub stabbing_count: u32,
}

impl Bound {
    #[inline]
    pub fn is_lower(&self) -> bool {
        self.value & 1 == 0
    }

    #[inline]
    pub fn is_upper(&self) -> bool {
        self.value & 1 == 1
    }
}

/// Bounds of every live proxy along one axis, kept sorted by value.
///
/// Storage is allocated once for the maximum proxy count and never grows.
#[derive(Clone, Debug)]
pub(crate) struct BoundArray(Vec<Bound>);

impl BoundArray {
    pub fn with_capacity(max_proxies: usize) -> Self {
        Self(Vec::with_capacity(2 * max_proxies))
    }

    /// Find the position of a value in the array.
    ///
    /// If a bound with the exact value exists, returns the index of one such bound,
    /// otherwise the index where the value would need to be inserted to keep the array sorted.
    pub fn search(&self, value: u32) -> usize {
        let mut low = 0;
        let mut high = self.0.len();
        while low < high {
            let mid = (low + high) / 2;
            let mid_value = self.0[mid].value;
            if mid_value > value {
                high = mid;
            } else if mid_value < value {
                low = mid + 1;
            } else {
                return mid;
            }
        }
        low
    }

    /// Insert a lower and upper bound for `proxy` at positions found with [`search`][Self::search].
    ///
    /// `upper_index` is the position before insertion of the lower bound.
    /// Returns the final index of the upper bound, which moves up by one
    /// because the lower bound is inserted before it.
    /// Proxies whose bounds were shifted must be re-pointed by the caller.
    pub fn insert_pair(
        &mut self,
        lower_index: usize,
        upper_index: usize,
        lower_value: u32,
        upper_value: u32,
        proxy: usize,
    ) -> usize {
        debug_assert!(lower_index <= upper_index);
        debug_assert!(self.0.len() + 2 <= self.0.capacity());

        let placeholder = Bound {
            value: upper_value,
            proxy,
            stabbing_count: 0,
        };
        self.0.insert(upper_index, placeholder);
        self.0.insert(
            lower_index,
            Bound {
                value: lower_value,
                ..placeholder
            },
        );
        let upper_index = upper_index + 1;

        self.0[lower_index].stabbing_count = if lower_index == 0 {
            0
        } else {
            self.0[lower_index - 1].stabbing_count
        };
        self.0[upper_index].stabbing_count = self.0[upper_index - 1].stabbing_count;
        // the new interval is open at every bound from its lower end up to its upper end
        for bound in &mut self.0[lower_index..upper_index] {
            bound.stabbing_count += 1;
        }

        upper_index
    }

    /// Remove the lower and upper bound at the given indices,
    /// closing the interval between them.
    /// Proxies whose bounds were shifted must be re-pointed by the caller.
    pub fn remove_pair(&mut self, lower_index: usize, upper_index: usize) {
        debug_assert!(lower_index < upper_index);
        self.0.remove(upper_index);
        self.0.remove(lower_index);
        // bounds that were between the two now sit at lower_index..upper_index - 1
        for bound in &mut self.0[lower_index..upper_index - 1] {
            bound.stabbing_count -= 1;
        }
    }
}

impl Deref for BoundArray {
    type Target = [Bound];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BoundArray {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

//
// tests
//
