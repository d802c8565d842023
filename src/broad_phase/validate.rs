//! Consistency checks over the whole broad phase state.
//! Slow, meant for debugging and tests.

use super::{BroadPhase, PairCallback};

/// Description of the first broken invariant found by
/// [`BroadPhase::validate`][super::BroadPhase::validate] or
/// [`BroadPhase::validate_pairs`][super::BroadPhase::validate_pairs].
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Axis {axis} has {count} bounds but there are {live} live proxies")]
    BoundCount {
        axis: usize,
        count: usize,
        live: usize,
    },
    #[error("Bound {index} on axis {axis} is smaller than the bound before it")]
    Unsorted { axis: usize, index: usize },
    #[error("Bound {index} on axis {axis} has stabbing count {stored}, expected {expected}")]
    StabbingCount {
        axis: usize,
        index: usize,
        stored: u32,
        expected: u32,
    },
    #[error("Bound {index} on axis {axis} belongs to proxy {proxy}, which is not live")]
    DanglingBound {
        axis: usize,
        index: usize,
        proxy: usize,
    },
    #[error("Bound {index} on axis {axis} and its proxy {proxy} don't point at each other")]
    BoundMismatch {
        axis: usize,
        index: usize,
        proxy: usize,
    },
    #[error("Pair ({proxy_id1}, {proxy_id2}) is in an invalid state: {reason}")]
    PairState {
        proxy_id1: usize,
        proxy_id2: usize,
        reason: &'static str,
    },
    #[error("Buffered pair ({proxy_id1}, {proxy_id2}) is invalid: {reason}")]
    BufferMismatch {
        proxy_id1: usize,
        proxy_id2: usize,
        reason: &'static str,
    },
}

impl<C: PairCallback> BroadPhase<C> {
    /// Check that the bound arrays are sorted, their stabbing counts are correct,
    /// and bounds and proxies refer to each other consistently.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let live = self.proxies.live_count();

        for (axis, bounds) in self.bounds.iter().enumerate() {
            if bounds.len() != 2 * live {
                return Err(ValidationError::BoundCount {
                    axis,
                    count: bounds.len(),
                    live,
                });
            }

            let mut open_intervals: u32 = 0;
            for (index, bound) in bounds.iter().enumerate() {
                if index > 0 && bound.value < bounds[index - 1].value {
                    return Err(ValidationError::Unsorted { axis, index });
                }

                let Some(proxy) = self.proxies.get(bound.proxy) else {
                    return Err(ValidationError::DanglingBound {
                        axis,
                        index,
                        proxy: bound.proxy,
                    });
                };
                let points_back = if bound.is_lower() {
                    proxy.lower_bounds[axis] == index
                } else {
                    // upper bounds must come after their lower bound
                    proxy.upper_bounds[axis] == index && proxy.lower_bounds[axis] < index
                };
                if !points_back {
                    return Err(ValidationError::BoundMismatch {
                        axis,
                        index,
                        proxy: bound.proxy,
                    });
                }

                if bound.is_lower() {
                    open_intervals += 1;
                } else {
                    open_intervals = open_intervals.saturating_sub(1);
                }
                if bound.stabbing_count != open_intervals {
                    return Err(ValidationError::StabbingCount {
                        axis,
                        index,
                        stored: bound.stabbing_count,
                        expected: open_intervals,
                    });
                }
            }
        }

        // bound counts match, so this catches proxies whose indices point past the arrays
        for (proxy_id, proxy) in self.proxies.iter_live() {
            for (axis, bounds) in self.bounds.iter().enumerate() {
                for index in [proxy.lower_bounds[axis], proxy.upper_bounds[axis]] {
                    if bounds.get(index).map(|b| b.proxy) != Some(proxy_id) {
                        return Err(ValidationError::BoundMismatch {
                            axis,
                            index,
                            proxy: proxy_id,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Check the pair table and pair buffer against each other
    /// and against the current proxy overlaps.
    pub fn validate_pairs(&self) -> Result<(), ValidationError> {
        let buffer = self.pairs.buffer();

        for (index, pair) in self.pairs.iter().enumerate() {
            let (proxy_id1, proxy_id2) = (pair.proxy_id1, pair.proxy_id2);
            let state_error = |reason| ValidationError::PairState {
                proxy_id1,
                proxy_id2,
                reason,
            };

            if proxy_id1 >= proxy_id2 {
                return Err(state_error("ids are not in ascending order"));
            }
            if self.pairs.find(proxy_id1, proxy_id2) != Some(index) {
                return Err(state_error("not reachable through the hash table"));
            }

            let overlapping = self.test_overlap(proxy_id1, proxy_id2);
            if pair.is_buffered() {
                let occurrences = buffer
                    .iter()
                    .filter(|b| b.proxy_id1 == proxy_id1 && b.proxy_id2 == proxy_id2)
                    .count();
                if occurrences != 1 {
                    return Err(ValidationError::BufferMismatch {
                        proxy_id1,
                        proxy_id2,
                        reason: "buffered pair is not in the buffer exactly once",
                    });
                }
                if pair.is_removed() == overlapping {
                    return Err(state_error("removed flag disagrees with overlap"));
                }
            } else {
                if !pair.is_final() {
                    return Err(state_error("unbuffered pair was never reported"));
                }
                if pair.is_removed() {
                    return Err(state_error("unbuffered pair is marked removed"));
                }
                if !overlapping {
                    return Err(state_error("unbuffered pair does not overlap"));
                }
            }
        }

        for entry in buffer {
            let buffer_error = |reason| ValidationError::BufferMismatch {
                proxy_id1: entry.proxy_id1,
                proxy_id2: entry.proxy_id2,
                reason,
            };
            match self.pairs.find(entry.proxy_id1, entry.proxy_id2) {
                None => return Err(buffer_error("not in the pair table")),
                Some(index) if !self.pairs.get(index).is_buffered() => {
                    return Err(buffer_error("pair is not flagged as buffered"))
                }
                Some(_) => (),
            }
        }

        Ok(())
    }
}

//
// tests
//
