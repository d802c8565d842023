//! The broad phase finds pairs of shapes whose bounding boxes overlap,
//! to be checked more closely by a narrow phase.
//!
//! This one is an incremental sweep and prune, as described in
//! Collision Detection in Interactive 3D Environments by Gino van den Bergen.
//!
//! - Bounds are kept in sorted arrays rather than linked lists.
//! - Positions are quantized to integers for fast and exact comparisons.
//! - Every bound carries a stabbing count for overlap queries in less than linear time.
//! - Proxies are time stamped to register query results on both axes without extra storage.
//! - Moving a proxy only shifts its bounds past their neighbors,
//!   so small movements are cheap but very large objects and worlds are not a good fit.

mod bound;
mod callback;
mod pair_manager;
mod proxy;
mod quantize;
mod segment;
mod validate;

pub use callback::{PairCallback, PairKey, PairSet};
pub use validate::ValidationError;

use bound::BoundArray;
use pair_manager::PairManager;
use proxy::ProxyPool;
use quantize::{BoundValues, Quantizer};

use crate::{
    collision::AABB,
    math::{Vec2, AXIS_COUNT},
};

/// Key type identifying a proxy in a [`BroadPhase`][self::BroadPhase].
///
/// Ids of destroyed proxies are reused by later ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId(usize);

impl ProxyId {
    /// Index of the proxy in the broad phase's fixed-size pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Errors returned by broad phase operations.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum BroadPhaseError {
    #[error("All {max} proxies are in use")]
    ProxyCapacity { max: usize },
    #[error("The pair table is full ({max} pairs)")]
    PairCapacity { max: usize },
    #[error("AABB is inverted or has non-finite coordinates")]
    InvalidAabb,
    #[error("Proxy {0:?} does not exist")]
    InvalidProxy(ProxyId),
    #[error("Segment has zero length or non-finite coordinates")]
    DegenerateSegment,
    #[error("Invalid broad phase parameters: {0}")]
    InvalidParams(&'static str),
}

/// Parameters for the creation of a broad phase.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BroadPhaseParams {
    /// Bounds of the simulated space. Proxies are clamped into these bounds,
    /// and proxies that leave them stop being updated.
    ///
    /// Positions are quantized over this area, so making it much larger than needed
    /// costs precision.
    pub world_bounds: AABB,
    /// Maximum number of proxies. Storage for all of them is allocated up front.
    pub max_proxies: usize,
    /// Maximum number of simultaneously overlapping pairs.
    /// Storage for all of them is allocated up front.
    pub max_pairs: usize,
    /// Check every internal invariant after every operation and panic if one is broken.
    /// Very slow, intended for tests.
    pub validate: bool,
}

impl Default for BroadPhaseParams {
    fn default() -> Self {
        Self {
            world_bounds: AABB {
                min: Vec2::new(-100.0, -100.0),
                max: Vec2::new(100.0, 100.0),
            },
            max_proxies: 2048,
            max_pairs: 8 * 2048,
            validate: false,
        }
    }
}

/// Incremental sweep and prune broad phase.
///
/// Call [`move_proxy`][Self::move_proxy] as many times as you like during a time step,
/// then [`flush`][Self::flush] once to report the resulting pair changes to the
/// [`PairCallback`][self::PairCallback].
pub struct BroadPhase<C: PairCallback> {
    quantizer: Quantizer,
    bounds: [BoundArray; AXIS_COUNT],
    proxies: ProxyPool<C::ProxyData>,
    pairs: PairManager<C::PairData>,
    // scratch space for queries, only non-empty during one
    query_results: Vec<usize>,
    time_stamp: u32,
    validate_each_step: bool,
    callback: C,
}

impl<C: PairCallback> BroadPhase<C> {
    /// Create a broad phase that reports pairs to the given callback.
    pub fn new(params: BroadPhaseParams, callback: C) -> Result<Self, BroadPhaseError> {
        let world = params.world_bounds;
        if !world.is_valid() || world.width() <= 0.0 || world.height() <= 0.0 {
            return Err(BroadPhaseError::InvalidParams(
                "world bounds must be finite and have nonzero area",
            ));
        }
        if params.max_proxies == 0 {
            return Err(BroadPhaseError::InvalidParams(
                "max_proxies must be greater than zero",
            ));
        }
        if params.max_pairs == 0 {
            return Err(BroadPhaseError::InvalidParams(
                "max_pairs must be greater than zero",
            ));
        }

        Ok(Self {
            quantizer: Quantizer::new(world),
            bounds: [
                BoundArray::with_capacity(params.max_proxies),
                BoundArray::with_capacity(params.max_proxies),
            ],
            proxies: ProxyPool::new(params.max_proxies),
            pairs: PairManager::new(params.max_pairs),
            query_results: Vec::with_capacity(params.max_proxies),
            time_stamp: 1,
            validate_each_step: params.validate,
            callback,
        })
    }

    //
    // accessors
    //

    #[inline]
    pub fn world_bounds(&self) -> &AABB {
        self.quantizer.world()
    }

    /// Number of live proxies.
    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.proxies.live_count()
    }

    #[inline]
    pub fn max_proxies(&self) -> usize {
        self.proxies.capacity()
    }

    /// Number of pairs in the pair table, including ones not yet confirmed by a flush.
    #[inline]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn max_pairs(&self) -> usize {
        self.pairs.capacity()
    }

    /// Access the user data of a proxy if it's live.
    #[inline]
    pub fn user_data(&self, id: ProxyId) -> Option<&C::ProxyData> {
        self.proxies.get(id.0).and_then(|p| p.user_data.as_ref())
    }

    /// Access the data the pair callback returned for a pair, if the pair has been reported.
    /// The order of the ids doesn't matter.
    pub fn pair_data(&self, a: ProxyId, b: ProxyId) -> Option<&C::PairData> {
        let index = self.pairs.find(a.0, b.0)?;
        self.pairs.get(index).user_data.as_ref()
    }

    #[inline]
    pub fn callback(&self) -> &C {
        &self.callback
    }

    #[inline]
    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    /// Destroy the broad phase and get back the pair callback.
    #[inline]
    pub fn into_callback(self) -> C {
        self.callback
    }

    /// Check whether an AABB lies inside the world bounds.
    ///
    /// Proxies can be created outside of them, but they don't get pairs on creation,
    /// and moves outside of them are ignored.
    #[inline]
    pub fn in_range(&self, aabb: &AABB) -> bool {
        self.quantizer.world().contains(aabb)
    }

    //
    // proxy lifecycle
    //

    /// Create a proxy for a shape. Pairs with every overlapping proxy are reported
    /// to the callback immediately, after flushing any pending pair changes.
    pub fn create_proxy(
        &mut self,
        aabb: &AABB,
        user_data: C::ProxyData,
    ) -> Result<ProxyId, BroadPhaseError> {
        let _span = tracy_span!("create proxy", "create_proxy");

        if !aabb.is_valid() {
            return Err(BroadPhaseError::InvalidAabb);
        }
        if self.proxies.is_full() {
            log::warn!(
                "Tried to create more than {} broad phase proxies",
                self.proxies.capacity()
            );
            return Err(BroadPhaseError::ProxyCapacity {
                max: self.proxies.capacity(),
            });
        }

        self.flush_pairs();

        let values = self.quantizer.compute_bounds(aabb);
        // querying one axis doesn't look at the other,
        // so both can be done before anything is inserted
        let mut insert_indices = [(0, 0); AXIS_COUNT];
        for (axis, indices) in insert_indices.iter_mut().enumerate() {
            *indices = self.query_axis(axis, values.lower[axis], values.upper[axis]);
        }

        let in_range = self.in_range(aabb);
        if in_range && self.pairs.len() + self.query_results.len() > self.pairs.capacity() {
            self.finish_query();
            log::warn!(
                "Creating a proxy would overflow the pair table ({} pairs)",
                self.pairs.capacity()
            );
            return Err(BroadPhaseError::PairCapacity {
                max: self.pairs.capacity(),
            });
        }

        let Some(proxy_id) = self.proxies.alloc(user_data) else {
            self.finish_query();
            return Err(BroadPhaseError::ProxyCapacity {
                max: self.proxies.capacity(),
            });
        };

        for (axis, &(lower_index, upper_index)) in insert_indices.iter().enumerate() {
            let bounds = &mut self.bounds[axis];
            bounds.insert_pair(
                lower_index,
                upper_index,
                values.lower[axis],
                values.upper[axis],
                proxy_id,
            );
            // everything from the new lower bound onwards moved
            for (index, bound) in bounds.iter().enumerate().skip(lower_index) {
                self.proxies[bound.proxy].set_bound_index(axis, bound.is_lower(), index);
            }
        }

        if in_range {
            // a brand new proxy has no buffered pairs, so these can be reported right away
            let candidates = std::mem::take(&mut self.query_results);
            for &other in &candidates {
                match self.pairs.add(proxy_id, other) {
                    Ok(index) => self.confirm_pair(index),
                    Err(err) => log::error!("Pair lost during proxy creation: {err}"),
                }
            }
            self.query_results = candidates;
        }
        self.finish_query();

        log::debug!("Created broad phase proxy {proxy_id}");
        self.run_validation();
        Ok(ProxyId(proxy_id))
    }

    /// Destroy a proxy, reporting the removal of every pair it was part of,
    /// and give back its user data.
    pub fn destroy_proxy(&mut self, id: ProxyId) -> Result<C::ProxyData, BroadPhaseError> {
        let _span = tracy_span!("destroy proxy", "destroy_proxy");

        let proxy_id = self.live_proxy(id)?;
        self.flush_pairs();

        for axis in 0..AXIS_COUNT {
            let lower_index = self.proxies[proxy_id].lower_bounds[axis];
            let upper_index = self.proxies[proxy_id].upper_bounds[axis];
            let bounds = &mut self.bounds[axis];
            let lower_value = bounds[lower_index].value;
            let upper_value = bounds[upper_index].value;

            bounds.remove_pair(lower_index, upper_index);
            for (index, bound) in bounds.iter().enumerate().skip(lower_index) {
                self.proxies[bound.proxy].set_bound_index(axis, bound.is_lower(), index);
            }

            // find everything that overlapped the removed proxy
            self.query_axis(axis, lower_value, upper_value);
        }

        let overlapping = std::mem::take(&mut self.query_results);
        for &other in &overlapping {
            self.pairs.remove_buffered(proxy_id, other);
        }
        self.query_results = overlapping;
        self.finish_query();

        // report removals while the proxy's user data is still around
        self.flush_pairs();

        let user_data = self
            .proxies
            .free(proxy_id)
            .ok_or(BroadPhaseError::InvalidProxy(id))?;

        log::debug!("Destroyed broad phase proxy {proxy_id}");
        self.run_validation();
        Ok(user_data)
    }

    /// Update the AABB of a proxy.
    ///
    /// Pair changes caused by the move are buffered until the next [`flush`][Self::flush].
    /// If the new AABB is not [`in_range`][Self::in_range] the move is ignored,
    /// and the proxy keeps its previous bounds.
    ///
    /// If the pair table fills up, the move still completes but the pairs that didn't fit
    /// are lost and an error is returned.
    pub fn move_proxy(&mut self, id: ProxyId, aabb: &AABB) -> Result<(), BroadPhaseError> {
        let _span = tracy_span!("move proxy", "move_proxy");

        let proxy_id = self.live_proxy(id)?;
        if !aabb.is_valid() {
            return Err(BroadPhaseError::InvalidAabb);
        }
        if !self.in_range(aabb) {
            log::trace!("Proxy {proxy_id} left the world bounds, move ignored");
            return Ok(());
        }

        let new_values = self.quantizer.compute_bounds(aabb);
        let old_values = self.stored_values(proxy_id);

        let mut outcome = Ok(());
        for axis in 0..AXIS_COUNT {
            let lower_index = self.proxies[proxy_id].lower_bounds[axis];
            let upper_index = self.proxies[proxy_id].upper_bounds[axis];
            let bounds = &mut self.bounds[axis];

            let delta_lower =
                i64::from(new_values.lower[axis]) - i64::from(bounds[lower_index].value);
            let delta_upper =
                i64::from(new_values.upper[axis]) - i64::from(bounds[upper_index].value);
            bounds[lower_index].value = new_values.lower[axis];
            bounds[upper_index].value = new_values.upper[axis];

            // expanding adds overlaps
            if delta_lower < 0 {
                outcome = outcome.and(self.move_lower_down(axis, proxy_id, &new_values));
            }
            if delta_upper > 0 {
                outcome = outcome.and(self.move_upper_up(axis, proxy_id, &new_values));
            }

            // shrinking removes overlaps
            if delta_lower > 0 {
                self.move_lower_up(axis, proxy_id, &old_values);
            }
            if delta_upper < 0 {
                self.move_upper_down(axis, proxy_id, &old_values);
            }
        }

        if let Err(err) = &outcome {
            log::error!("Pair lost while moving proxy {proxy_id}: {err}");
        }
        self.run_validation();
        outcome
    }

    //
    // moving individual bounds.
    // each of these walks one bound through the array like a step of insertion sort,
    // fixing stabbing counts and proxy indices of everything it passes.
    //

    fn move_lower_down(
        &mut self,
        axis: usize,
        proxy_id: usize,
        new_values: &BoundValues,
    ) -> Result<(), BroadPhaseError> {
        let mut outcome = Ok(());
        let value = new_values.lower[axis];
        let mut index = self.proxies[proxy_id].lower_bounds[axis];

        while index > 0 && value < self.bounds[axis][index - 1].value {
            let prev = self.bounds[axis][index - 1];
            self.bounds[axis][index - 1].stabbing_count += 1;

            if prev.is_upper() {
                if new_values.overlaps(&self.stored_values(prev.proxy)) {
                    outcome = outcome.and(self.pairs.add_buffered(proxy_id, prev.proxy));
                }
                self.proxies[prev.proxy].upper_bounds[axis] += 1;
                self.bounds[axis][index].stabbing_count += 1;
            } else {
                self.proxies[prev.proxy].lower_bounds[axis] += 1;
                self.bounds[axis][index].stabbing_count -= 1;
            }

            self.proxies[proxy_id].lower_bounds[axis] -= 1;
            self.bounds[axis].swap(index, index - 1);
            index -= 1;
        }

        outcome
    }

    fn move_upper_up(
        &mut self,
        axis: usize,
        proxy_id: usize,
        new_values: &BoundValues,
    ) -> Result<(), BroadPhaseError> {
        let mut outcome = Ok(());
        let value = new_values.upper[axis];
        let bound_count = self.bounds[axis].len();
        let mut index = self.proxies[proxy_id].upper_bounds[axis];

        while index + 1 < bound_count && self.bounds[axis][index + 1].value <= value {
            let next = self.bounds[axis][index + 1];
            self.bounds[axis][index + 1].stabbing_count += 1;

            if next.is_lower() {
                if new_values.overlaps(&self.stored_values(next.proxy)) {
                    outcome = outcome.and(self.pairs.add_buffered(proxy_id, next.proxy));
                }
                self.proxies[next.proxy].lower_bounds[axis] -= 1;
                self.bounds[axis][index].stabbing_count += 1;
            } else {
                self.proxies[next.proxy].upper_bounds[axis] -= 1;
                self.bounds[axis][index].stabbing_count -= 1;
            }

            self.proxies[proxy_id].upper_bounds[axis] += 1;
            self.bounds[axis].swap(index, index + 1);
            index += 1;
        }

        outcome
    }

    fn move_lower_up(&mut self, axis: usize, proxy_id: usize, old_values: &BoundValues) {
        let value = self.bounds[axis][self.proxies[proxy_id].lower_bounds[axis]].value;
        let bound_count = self.bounds[axis].len();
        let mut index = self.proxies[proxy_id].lower_bounds[axis];

        while index + 1 < bound_count && self.bounds[axis][index + 1].value <= value {
            let next = self.bounds[axis][index + 1];
            self.bounds[axis][index + 1].stabbing_count -= 1;

            if next.is_upper() {
                if old_values.overlaps(&self.stored_values(next.proxy)) {
                    self.pairs.remove_buffered(proxy_id, next.proxy);
                }
                self.proxies[next.proxy].upper_bounds[axis] -= 1;
                self.bounds[axis][index].stabbing_count -= 1;
            } else {
                self.proxies[next.proxy].lower_bounds[axis] -= 1;
                self.bounds[axis][index].stabbing_count += 1;
            }

            self.proxies[proxy_id].lower_bounds[axis] += 1;
            self.bounds[axis].swap(index, index + 1);
            index += 1;
        }
    }

    fn move_upper_down(&mut self, axis: usize, proxy_id: usize, old_values: &BoundValues) {
        let value = self.bounds[axis][self.proxies[proxy_id].upper_bounds[axis]].value;
        let mut index = self.proxies[proxy_id].upper_bounds[axis];

        while index > 0 && value < self.bounds[axis][index - 1].value {
            let prev = self.bounds[axis][index - 1];
            self.bounds[axis][index - 1].stabbing_count -= 1;

            if prev.is_lower() {
                if old_values.overlaps(&self.stored_values(prev.proxy)) {
                    self.pairs.remove_buffered(proxy_id, prev.proxy);
                }
                self.proxies[prev.proxy].lower_bounds[axis] += 1;
                self.bounds[axis][index].stabbing_count -= 1;
            } else {
                self.proxies[prev.proxy].upper_bounds[axis] += 1;
                self.bounds[axis][index].stabbing_count += 1;
            }

            self.proxies[proxy_id].upper_bounds[axis] -= 1;
            self.bounds[axis].swap(index, index - 1);
            index -= 1;
        }
    }

    //
    // pairs
    //

    /// Report buffered pair changes to the pair callback.
    ///
    /// A pair that was added and removed again since the last flush is never reported,
    /// and one that was removed and added again is reported at most once.
    pub fn flush(&mut self) {
        self.flush_pairs();
        self.run_validation();
    }

    /// Flush without checking invariants,
    /// for use in the middle of operations that temporarily break them.
    fn flush_pairs(&mut self) {
        let _span = tracy_span!("flush broad phase pairs", "flush");

        let buffer = self.pairs.take_buffer();
        for key in &buffer {
            let Some(index) = self.pairs.find(key.proxy_id1, key.proxy_id2) else {
                log::error!("Buffered pair {key:?} is missing from the pair table");
                continue;
            };
            let pair = self.pairs.get_mut(index);
            pair.clear_buffered();
            let marked_removed = pair.is_removed();

            if marked_removed || !self.test_overlap(key.proxy_id1, key.proxy_id2) {
                let Some(pair) = self.pairs.remove(key.proxy_id1, key.proxy_id2) else {
                    continue;
                };
                // a pair added and removed since the last flush was never reported to the user
                if let (true, Some(pair_data)) = (pair.is_final(), pair.user_data) {
                    let a = self.proxies[key.proxy_id1].user_data.as_ref();
                    let b = self.proxies[key.proxy_id2].user_data.as_ref();
                    if let (Some(a), Some(b)) = (a, b) {
                        self.callback.pair_removed(a, b, pair_data);
                    }
                }
            } else if !self.pairs.get(index).is_final() {
                self.confirm_pair(index);
            }
        }
        self.pairs.restore_buffer(buffer);
    }

    /// Report a pair to the callback and mark it final.
    fn confirm_pair(&mut self, index: usize) {
        let pair = self.pairs.get(index);
        let a = self.proxies[pair.proxy_id1].user_data.as_ref();
        let b = self.proxies[pair.proxy_id2].user_data.as_ref();
        let (Some(a), Some(b)) = (a, b) else {
            log::error!(
                "Pair ({}, {}) refers to a dead proxy",
                pair.proxy_id1,
                pair.proxy_id2
            );
            return;
        };
        let pair_data = self.callback.pair_added(a, b);
        let pair = self.pairs.get_mut(index);
        pair.user_data = Some(pair_data);
        pair.set_final();
    }

    //
    // queries
    //

    /// Find the user data of up to `max_count` proxies whose AABBs overlap the given one.
    pub fn query(
        &mut self,
        aabb: &AABB,
        max_count: usize,
    ) -> Result<Vec<C::ProxyData>, BroadPhaseError> {
        let _span = tracy_span!("broad phase aabb query", "query");

        if !aabb.is_valid() {
            return Err(BroadPhaseError::InvalidAabb);
        }

        let values = self.quantizer.compute_bounds(aabb);
        for axis in 0..AXIS_COUNT {
            self.query_axis(axis, values.lower[axis], values.upper[axis]);
        }

        let results = self
            .query_results
            .iter()
            .take(max_count)
            .filter_map(|&id| self.proxies[id].user_data.clone())
            .collect();
        self.finish_query();
        Ok(results)
    }

    /// Find the bound array positions of a quantized interval on one axis and mark every
    /// proxy overlapping it. Proxies marked on both axes within the same query pass
    /// end up in `query_results`.
    ///
    /// Returns the insertion indices of the lower and upper value.
    fn query_axis(&mut self, axis: usize, lower_value: u32, upper_value: u32) -> (usize, usize) {
        let bounds = &self.bounds[axis];
        let lower_query = bounds.search(lower_value);
        let upper_query = bounds.search(upper_value);

        // easy case: proxies starting inside the query interval
        for bound in &bounds[lower_query..upper_query] {
            if bound.is_lower() {
                increment_overlap_count(
                    &mut self.proxies,
                    &mut self.query_results,
                    self.time_stamp,
                    bound.proxy,
                );
            }
        }

        // hard case: proxies starting before the query interval and extending into it.
        // the stabbing count tells how many of those there are
        if lower_query > 0 {
            let mut index = lower_query - 1;
            let mut remaining = bounds[index].stabbing_count;
            while remaining > 0 {
                let bound = bounds[index];
                if bound.is_lower() && lower_query <= self.proxies[bound.proxy].upper_bounds[axis] {
                    increment_overlap_count(
                        &mut self.proxies,
                        &mut self.query_results,
                        self.time_stamp,
                        bound.proxy,
                    );
                    remaining -= 1;
                }
                match index.checked_sub(1) {
                    Some(prev) => index = prev,
                    None => break,
                }
            }
        }

        (lower_query, upper_query)
    }

    /// Clear query results and advance the time stamp for the next query.
    fn finish_query(&mut self) {
        self.query_results.clear();
        if self.time_stamp == u32::MAX {
            self.proxies.reset_time_stamps();
            self.time_stamp = 1;
        } else {
            self.time_stamp += 1;
        }
    }

    //
    // helpers
    //

    fn live_proxy(&self, id: ProxyId) -> Result<usize, BroadPhaseError> {
        match self.proxies.get(id.0) {
            Some(_) => Ok(id.0),
            None => Err(BroadPhaseError::InvalidProxy(id)),
        }
    }

    /// Current quantized bounds of a proxy.
    fn stored_values(&self, proxy_id: usize) -> BoundValues {
        let proxy = &self.proxies[proxy_id];
        let mut values = BoundValues::default();
        for axis in 0..AXIS_COUNT {
            values.lower[axis] = self.bounds[axis][proxy.lower_bounds[axis]].value;
            values.upper[axis] = self.bounds[axis][proxy.upper_bounds[axis]].value;
        }
        values
    }

    /// Check whether two live proxies currently overlap.
    fn test_overlap(&self, id1: usize, id2: usize) -> bool {
        if self.proxies.get(id1).is_none() || self.proxies.get(id2).is_none() {
            return false;
        }
        self.stored_values(id1).overlaps(&self.stored_values(id2))
    }

    fn run_validation(&self) {
        if !self.validate_each_step {
            return;
        }
        if let Err(err) = self.validate().and_then(|_| self.validate_pairs()) {
            panic!("Broad phase invariant violated: {err}");
        }
    }
}

fn increment_overlap_count<T>(
    proxies: &mut ProxyPool<T>,
    query_results: &mut Vec<usize>,
    time_stamp: u32,
    proxy_id: usize,
) {
    let proxy = &mut proxies[proxy_id];
    if proxy.time_stamp < time_stamp {
        proxy.time_stamp = time_stamp;
        proxy.overlap_count = 0;
    }
    proxy.overlap_count += 1;
    if proxy.overlap_count == AXIS_COUNT as u32 {
        query_results.push(proxy_id);
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn aabb(min: [f64; 2], max: [f64; 2]) -> AABB {
        AABB::new(Vec2::new(min[0], min[1]), Vec2::new(max[0], max[1]))
    }

    fn checked_params() -> BroadPhaseParams {
        BroadPhaseParams {
            validate: true,
            ..Default::default()
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    enum Event {
        Added(u32, u32),
        Removed(u32, u32),
    }

    /// Callback that logs every pair event, with pairs ordered by user data.
    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl PairCallback for Recorder {
        type ProxyData = u32;
        type PairData = (u32, u32);

        fn pair_added(&mut self, a: &u32, b: &u32) -> (u32, u32) {
            let pair = (*a.min(b), *a.max(b));
            self.events.push(Event::Added(pair.0, pair.1));
            pair
        }

        fn pair_removed(&mut self, _a: &u32, _b: &u32, pair: (u32, u32)) {
            self.events.push(Event::Removed(pair.0, pair.1));
        }
    }

    fn recorder() -> BroadPhase<Recorder> {
        BroadPhase::new(checked_params(), Recorder::default()).unwrap()
    }

    fn take_events(bp: &mut BroadPhase<Recorder>) -> Vec<Event> {
        std::mem::take(&mut bp.callback_mut().events)
    }

    #[test]
    fn invalid_params_are_rejected() {
        let zero_proxies = BroadPhaseParams {
            max_proxies: 0,
            ..Default::default()
        };
        assert!(matches!(
            BroadPhase::new(zero_proxies, Recorder::default()),
            Err(BroadPhaseError::InvalidParams(_))
        ));
        let flat_world = BroadPhaseParams {
            world_bounds: aabb([0.0, 0.0], [10.0, 0.0]),
            ..Default::default()
        };
        assert!(matches!(
            BroadPhase::new(flat_world, Recorder::default()),
            Err(BroadPhaseError::InvalidParams(_))
        ));
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn params_from_ron() {
        let params: BroadPhaseParams = ron::from_str("(max_proxies: 64, validate: true)").unwrap();
        assert_eq!(params.max_proxies, 64);
        assert!(params.validate);
        assert_eq!(params.max_pairs, BroadPhaseParams::default().max_pairs);
        assert_eq!(
            params.world_bounds,
            BroadPhaseParams::default().world_bounds
        );
    }

    #[test]
    fn move_into_overlap_and_out() {
        let mut bp = recorder();
        let a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        let b = bp.create_proxy(&aabb([2.0, 0.0], [3.0, 1.0]), 1).unwrap();
        assert!(take_events(&mut bp).is_empty());

        bp.move_proxy(b, &aabb([0.5, 0.0], [1.5, 1.0])).unwrap();
        assert!(
            take_events(&mut bp).is_empty(),
            "moves are reported on flush"
        );
        bp.flush();
        assert_eq!(take_events(&mut bp), [Event::Added(0, 1)]);
        assert_eq!(bp.pair_count(), 1);
        assert_eq!(bp.pair_data(b, a), Some(&(0, 1)));

        bp.move_proxy(b, &aabb([5.0, 5.0], [6.0, 6.0])).unwrap();
        bp.flush();
        assert_eq!(take_events(&mut bp), [Event::Removed(0, 1)]);
        assert_eq!(bp.pair_count(), 0);
        assert_eq!(bp.pair_data(a, b), None);

        assert_eq!(bp.destroy_proxy(a), Ok(0));
        assert_eq!(bp.destroy_proxy(b), Ok(1));
        assert!(take_events(&mut bp).is_empty());
        assert_eq!(bp.proxy_count(), 0);
    }

    #[test]
    fn churn_within_a_step_is_not_reported() {
        let mut bp = recorder();
        let _a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        let b = bp.create_proxy(&aabb([0.5, 0.5], [1.5, 1.5]), 1).unwrap();
        assert_eq!(take_events(&mut bp), [Event::Added(0, 1)]);

        // separate and come back before flushing
        bp.move_proxy(b, &aabb([3.0, 0.5], [4.0, 1.5])).unwrap();
        bp.move_proxy(b, &aabb([0.7, 0.5], [1.7, 1.5])).unwrap();
        bp.flush();
        assert!(take_events(&mut bp).is_empty());
        assert_eq!(bp.pair_count(), 1);

        // touch briefly from the outside
        let c = bp.create_proxy(&aabb([10.0, 10.0], [11.0, 11.0]), 2).unwrap();
        bp.move_proxy(c, &aabb([1.2, 1.2], [2.2, 2.2])).unwrap();
        bp.move_proxy(c, &aabb([10.0, 10.0], [11.0, 11.0])).unwrap();
        bp.flush();
        assert!(take_events(&mut bp).is_empty());
        assert_eq!(bp.pair_count(), 1);

        bp.move_proxy(b, &aabb([3.0, 0.5], [4.0, 1.5])).unwrap();
        bp.flush();
        assert_eq!(take_events(&mut bp), [Event::Removed(0, 1)]);
    }

    #[test]
    fn creation_among_many_overlaps() {
        let mut bp = recorder();
        let mut ids = Vec::new();
        for i in 0..4 {
            let offset = i as f64 * 0.25;
            ids.push(
                bp.create_proxy(&aabb([offset, offset], [offset + 1.0, offset + 1.0]), i)
                    .unwrap(),
            );
        }
        let added: BTreeSet<Event> = take_events(&mut bp).into_iter().collect();
        let expected: BTreeSet<Event> = [(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)]
            .into_iter()
            .map(|(a, b)| Event::Added(a, b))
            .collect();
        assert_eq!(added, expected);
        assert_eq!(bp.pair_count(), 6);

        assert_eq!(bp.destroy_proxy(ids[1]), Ok(1));
        let removed: BTreeSet<Event> = take_events(&mut bp).into_iter().collect();
        let expected: BTreeSet<Event> = [(0, 1), (1, 2), (1, 3)]
            .into_iter()
            .map(|(a, b)| Event::Removed(a, b))
            .collect();
        assert_eq!(removed, expected);
        assert_eq!(bp.pair_count(), 3);
    }

    #[test]
    fn out_of_range_proxies() {
        let mut bp = recorder();
        let a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();

        assert_eq!(bp.world_bounds(), &BroadPhaseParams::default().world_bounds);
        assert!(!bp.in_range(&aabb([99.0, 0.0], [101.0, 1.0])));
        assert!(bp.in_range(&aabb([99.0, 0.0], [100.0, 1.0])));

        // moving out of the world does nothing
        bp.move_proxy(a, &aabb([150.0, 150.0], [151.0, 151.0])).unwrap();
        bp.flush();
        assert_eq!(bp.query(&aabb([0.5, 0.5], [0.6, 0.6]), 10), Ok(vec![0]));

        // proxies created partly outside get no pairs on creation
        bp.create_proxy(&aabb([99.0, 99.0], [99.8, 99.8]), 1).unwrap();
        bp.create_proxy(&aabb([99.5, 99.5], [101.0, 101.0]), 2).unwrap();
        assert!(take_events(&mut bp).is_empty());
        assert_eq!(bp.pair_count(), 0);
        let found = bp.query(&aabb([99.6, 99.6], [99.7, 99.7]), 10).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let mut bp = recorder();
        assert_eq!(
            bp.create_proxy(&aabb([1.0, 0.0], [0.0, 1.0]), 0),
            Err(BroadPhaseError::InvalidAabb)
        );
        assert_eq!(
            bp.create_proxy(&aabb([0.0, 0.0], [f64::NAN, 1.0]), 0),
            Err(BroadPhaseError::InvalidAabb)
        );
        assert_eq!(bp.proxy_count(), 0);

        let a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        assert_eq!(
            bp.move_proxy(a, &aabb([0.0, 0.0], [f64::INFINITY, 1.0])),
            Err(BroadPhaseError::InvalidAabb)
        );
        assert_eq!(
            bp.query(&aabb([2.0, 2.0], [1.0, 1.0]), 10),
            Err(BroadPhaseError::InvalidAabb)
        );

        assert_eq!(bp.destroy_proxy(a), Ok(0));
        assert_eq!(bp.destroy_proxy(a), Err(BroadPhaseError::InvalidProxy(a)));
        assert_eq!(
            bp.move_proxy(a, &aabb([0.0, 0.0], [1.0, 1.0])),
            Err(BroadPhaseError::InvalidProxy(a))
        );
        let never_created = ProxyId(1000);
        assert_eq!(
            bp.destroy_proxy(never_created),
            Err(BroadPhaseError::InvalidProxy(never_created))
        );
        assert_eq!(bp.user_data(a), None);
    }

    #[test]
    fn proxy_ids_are_reused() {
        let params = BroadPhaseParams {
            max_proxies: 2,
            ..checked_params()
        };
        let mut bp = BroadPhase::new(params, Recorder::default()).unwrap();
        let a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        let b = bp.create_proxy(&aabb([5.0, 5.0], [6.0, 6.0]), 1).unwrap();
        assert_eq!(
            bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 2),
            Err(BroadPhaseError::ProxyCapacity { max: 2 })
        );

        assert_eq!(bp.destroy_proxy(a), Ok(0));
        let c = bp.create_proxy(&aabb([5.5, 5.5], [7.0, 7.0]), 2).unwrap();
        assert_eq!(c, a);
        assert_eq!(bp.user_data(c), Some(&2));
        assert_eq!(bp.user_data(b), Some(&1));
        assert_eq!(take_events(&mut bp), [Event::Added(1, 2)]);
    }

    #[test]
    fn pair_capacity() {
        let params = BroadPhaseParams {
            max_pairs: 1,
            ..checked_params()
        };
        let mut bp = BroadPhase::new(params, Recorder::default()).unwrap();
        let _a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        let _b = bp.create_proxy(&aabb([0.5, 0.0], [1.5, 1.0]), 1).unwrap();
        assert_eq!(take_events(&mut bp), [Event::Added(0, 1)]);

        // creation fails before touching anything
        assert_eq!(
            bp.create_proxy(&aabb([0.2, 0.2], [0.8, 0.8]), 2),
            Err(BroadPhaseError::PairCapacity { max: 1 })
        );
        assert_eq!(bp.proxy_count(), 2);
        assert_eq!(bp.validate(), Ok(()));

        // a move completes, dropping the pairs that don't fit
        let c = bp.create_proxy(&aabb([10.0, 10.0], [11.0, 11.0]), 2).unwrap();
        assert_eq!(
            bp.move_proxy(c, &aabb([0.2, 0.2], [0.8, 0.8])),
            Err(BroadPhaseError::PairCapacity { max: 1 })
        );
        bp.flush();
        assert!(take_events(&mut bp).is_empty());
        assert_eq!(bp.validate(), Ok(()));
        assert_eq!(bp.validate_pairs(), Ok(()));

        // c still sits in the bound arrays at its new place
        let mut found = bp.query(&aabb([0.6, 0.6], [0.7, 0.7]), 10).unwrap();
        found.sort_unstable();
        assert_eq!(found, [0, 1, 2]);
        let mut found = bp.query(&aabb([0.3, 0.3], [0.4, 0.4]), 10).unwrap();
        found.sort_unstable();
        assert_eq!(found, [0, 2]);
    }

    #[test]
    fn queries() {
        let mut bp = recorder();
        for i in 0..10 {
            let x = i as f64 * 2.0;
            bp.create_proxy(&aabb([x, 0.0], [x + 1.0, 1.0]), i).unwrap();
        }

        let mut found = bp.query(&aabb([2.5, 0.5], [6.5, 0.6]), 10).unwrap();
        found.sort_unstable();
        assert_eq!(found, [1, 2, 3]);

        let limited = bp.query(&aabb([2.5, 0.5], [6.5, 0.6]), 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(bp.query(&aabb([2.5, 5.0], [6.5, 6.0]), 10), Ok(vec![]));

        // a proxy spanning the whole row is found through stabbing counts
        bp.create_proxy(&aabb([-1.0, 0.25], [30.0, 0.75]), 100).unwrap();
        let mut found = bp.query(&aabb([13.2, 0.4], [13.8, 0.6]), 10).unwrap();
        found.sort_unstable();
        assert_eq!(found, [100]);
    }

    #[test]
    fn time_stamp_wraps_around() {
        let mut bp = recorder();
        bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        bp.create_proxy(&aabb([3.0, 0.0], [4.0, 1.0]), 1).unwrap();
        bp.time_stamp = u32::MAX - 1;
        for _ in 0..4 {
            let found = bp.query(&aabb([0.5, 0.5], [3.5, 0.6]), 10).unwrap();
            assert_eq!(found.len(), 2);
            assert_eq!(bp.query(&aabb([0.5, 0.5], [0.6, 0.6]), 10), Ok(vec![0]));
        }
        assert!(bp.time_stamp < 10);
    }

    #[test]
    fn pair_set_follows_overlaps() {
        let mut bp = BroadPhase::new(checked_params(), PairSet::<u32>::new()).unwrap();
        let a = bp.create_proxy(&aabb([0.0, 0.0], [1.0, 1.0]), 0).unwrap();
        let b = bp.create_proxy(&aabb([0.5, 0.5], [1.5, 1.5]), 1).unwrap();

        let key = *bp.pair_data(a, b).unwrap();
        assert_eq!(bp.callback().get(key), Some(&[0, 1]));

        bp.move_proxy(a, &aabb([-3.0, -3.0], [-2.0, -2.0])).unwrap();
        bp.flush();
        assert!(bp.callback().is_empty());
        let mut pairs = bp.into_callback();
        assert_eq!(pairs.take_change_counts(), (1, 1));
    }

    //
    // randomized test against brute force
    //

    const GRID: f64 = 0.25;

    fn random_box(rng: &mut impl Rng) -> AABB {
        let x = rng.gen_range(-32..31) as f64 * GRID;
        let y = rng.gen_range(-32..31) as f64 * GRID;
        let w = rng.gen_range(0..8) as f64 * GRID;
        let h = rng.gen_range(0..8) as f64 * GRID;
        aabb([x, y], [x + w, y + h])
    }

    fn nudged(rng: &mut impl Rng, b: &AABB) -> AABB {
        let offset = Vec2::new(
            rng.gen_range(-1..=1) as f64 * GRID,
            rng.gen_range(-1..=1) as f64 * GRID,
        );
        AABB::new(b.min + offset, b.max + offset)
    }

    fn brute_force_pairs(boxes: &[Option<(ProxyId, AABB)>]) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();
        for (i, a) in boxes.iter().enumerate() {
            for (j, b) in boxes.iter().enumerate().skip(i + 1) {
                if let (Some((_, a)), Some((_, b))) = (a, b) {
                    if a.overlaps(b) {
                        pairs.insert((i, j));
                    }
                }
            }
        }
        pairs
    }

    #[test]
    fn randomized_against_brute_force() {
        let world = aabb([-10.0, -10.0], [10.0, 10.0]);
        let params = BroadPhaseParams {
            world_bounds: world,
            max_proxies: 64,
            max_pairs: 2048,
            validate: true,
        };
        let mut bp = BroadPhase::new(params, PairSet::<usize>::new()).unwrap();
        let mut rng = StdRng::seed_from_u64(0x5a9);
        let mut boxes: Vec<Option<(ProxyId, AABB)>> = vec![None; 64];

        for step in 0..3000 {
            let slot = rng.gen_range(0..boxes.len());
            let current = boxes[slot];
            match current {
                None => {
                    let b = random_box(&mut rng);
                    let id = bp.create_proxy(&b, slot).unwrap();
                    boxes[slot] = Some((id, b));
                }
                Some((id, _)) if rng.gen_bool(0.1) => {
                    assert_eq!(bp.destroy_proxy(id), Ok(slot));
                    boxes[slot] = None;
                }
                Some((id, old)) => {
                    let mut b = if rng.gen_bool(0.7) {
                        nudged(&mut rng, &old)
                    } else {
                        random_box(&mut rng)
                    };
                    if !world.contains(&b) {
                        b = random_box(&mut rng);
                    }
                    bp.move_proxy(id, &b).unwrap();
                    boxes[slot] = Some((id, b));
                }
            }

            if step % 5 != 0 {
                continue;
            }
            bp.flush();

            let expected = brute_force_pairs(&boxes);
            let reported: BTreeSet<(usize, usize)> = bp
                .callback()
                .iter()
                .map(|(_, &[a, b])| (a.min(b), a.max(b)))
                .collect();
            assert_eq!(reported, expected, "pairs differ at step {step}");
            assert_eq!(bp.pair_count(), expected.len());

            let query_box = random_box(&mut rng);
            let mut found = bp.query(&query_box, usize::MAX).unwrap();
            found.sort_unstable();
            let expected: Vec<usize> = boxes
                .iter()
                .enumerate()
                .filter_map(|(slot, b)| match b {
                    Some((_, b)) if b.overlaps(&query_box) => Some(slot),
                    _ => None,
                })
                .collect();
            assert_eq!(found, expected, "query differs at step {step}");
        }
    }
}
