//! Segment queries, finding proxies a line segment passes through.
//!
//! The segment is walked through both bound arrays at once,
//! stepping over whichever bound comes next along the segment.
//! A proxy is hit when the walk enters its interval on one axis
//! while already being inside its interval on the other.

use super::{bound::BoundArray, proxy::ProxyPool, BroadPhase, BroadPhaseError, PairCallback};
use crate::{
    collision::Segment,
    math::{self as m, AXIS_COUNT},
};

impl<C: PairCallback> BroadPhase<C> {
    /// Find up to `max_count` proxies whose AABBs the segment passes through.
    ///
    /// Proxies containing the start point come first,
    /// followed by the rest in the order the segment reaches them.
    pub fn query_segment(
        &mut self,
        segment: &Segment,
        max_count: usize,
    ) -> Result<Vec<C::ProxyData>, BroadPhaseError> {
        let _span = tracy_span!("broad phase segment query", "query_segment");

        let (mut hits, cursor) = self.start_segment_walk(segment)?;
        hits.truncate(max_count);
        let remaining = max_count - hits.len();
        if remaining > 0 {
            hits.extend(
                cursor
                    .walk(&self.bounds, &self.proxies)
                    .map(|(proxy_id, _)| proxy_id)
                    .take(remaining),
            );
        }

        Ok(hits
            .into_iter()
            .filter_map(|proxy_id| self.proxies[proxy_id].user_data.clone())
            .collect())
    }

    /// Find up to `max_count` proxies whose AABBs the segment passes through,
    /// ordered by a key computed from their user data.
    ///
    /// Proxies with a negative key are left out. Keys are expected to grow along
    /// the segment in the same units as progress along it (0 at the start, 1 at the end),
    /// e.g. the distance at which a raycast hits the shape.
    /// This lets the walk stop as soon as it's past the worst key it has kept.
    pub fn query_segment_sorted<K>(
        &mut self,
        segment: &Segment,
        max_count: usize,
        mut sort_key: K,
    ) -> Result<Vec<C::ProxyData>, BroadPhaseError>
    where
        K: FnMut(&C::ProxyData) -> f64,
    {
        let _span = tracy_span!("broad phase sorted segment query", "query_segment_sorted");

        let (initial_hits, cursor) = self.start_segment_walk(segment)?;
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(max_count);
        for proxy_id in initial_hits {
            if let Some(data) = &self.proxies[proxy_id].user_data {
                insert_sorted(&mut sorted, max_count, sort_key(data), proxy_id);
            }
        }

        for (proxy_id, progress) in cursor.walk(&self.bounds, &self.proxies) {
            if let Some(data) = &self.proxies[proxy_id].user_data {
                insert_sorted(&mut sorted, max_count, sort_key(data), proxy_id);
            }
            let worst_kept = sorted.last().map(|&(key, _)| key);
            if sorted.len() == max_count && worst_kept.map_or(false, |key| progress > key) {
                break;
            }
        }

        Ok(sorted
            .into_iter()
            .filter_map(|(_, proxy_id)| self.proxies[proxy_id].user_data.clone())
            .collect())
    }

    /// Query the start point of the segment and set up a walk from there.
    /// Returns the proxies containing the start point along with the walk.
    fn start_segment_walk(
        &mut self,
        segment: &Segment,
    ) -> Result<(Vec<usize>, SegmentCursor), BroadPhaseError> {
        if !m::is_finite(segment.start) || !m::is_finite(segment.end) {
            return Err(BroadPhaseError::DegenerateSegment);
        }

        let start = self.quantizer.scale_point(segment.start);
        let delta = (segment.end - segment.start) * self.quantizer.factor();

        let mut cursor = SegmentCursor {
            start: [0.0; AXIS_COUNT],
            delta: [0.0; AXIS_COUNT],
            direction: [0; AXIS_COUNT],
            gaps: [0; AXIS_COUNT],
        };
        for axis in 0..AXIS_COUNT {
            let d = m::component(delta, axis);
            cursor.start[axis] = m::component(start, axis);
            cursor.delta[axis] = d;
            cursor.direction[axis] = if d > f64::EPSILON {
                1
            } else if d < -f64::EPSILON {
                -1
            } else {
                0
            };
        }
        if cursor.direction.iter().all(|&dir| dir == 0) {
            return Err(BroadPhaseError::DegenerateSegment);
        }

        for axis in 0..AXIS_COUNT {
            // saturating cast clamps start points outside the world to its edges
            let value = cursor.start[axis] as u32;
            let (lower_index, upper_index) = self.query_axis(axis, value & !1, value | 1);
            cursor.gaps[axis] = if cursor.direction[axis] >= 0 {
                upper_index
            } else {
                lower_index
            };
        }

        let hits = self.query_results.clone();
        self.finish_query();
        Ok((hits, cursor))
    }
}

/// Insert a hit into a list sorted by ascending key, keeping at most `max_count` entries.
/// Negative and NaN keys are rejected.
fn insert_sorted(sorted: &mut Vec<(f64, usize)>, max_count: usize, key: f64, proxy_id: usize) {
    if !(key >= 0.0) {
        return;
    }
    let position = sorted.partition_point(|&(k, _)| k <= key);
    if position >= max_count {
        return;
    }
    sorted.insert(position, (key, proxy_id));
    sorted.truncate(max_count);
}

/// Position of a segment walk in the bound arrays.
///
/// Each axis has a gap index `g`, meaning the walk is currently
/// between bounds `g - 1` and `g` on that axis.
#[derive(Clone, Copy, Debug)]
struct SegmentCursor {
    /// Start point in bound value space.
    start: [f64; AXIS_COUNT],
    /// Segment vector in bound value space.
    delta: [f64; AXIS_COUNT],
    direction: [i8; AXIS_COUNT],
    gaps: [usize; AXIS_COUNT],
}

impl SegmentCursor {
    fn walk<'a, T>(
        self,
        bounds: &'a [BoundArray; AXIS_COUNT],
        proxies: &'a ProxyPool<T>,
    ) -> SegmentWalk<'a, T> {
        SegmentWalk {
            cursor: self,
            bounds,
            proxies,
        }
    }
}

/// Iterator over proxies entered by a segment past its start point,
/// along with the progress along the segment at which they were entered.
struct SegmentWalk<'a, T> {
    cursor: SegmentCursor,
    bounds: &'a [BoundArray; AXIS_COUNT],
    proxies: &'a ProxyPool<T>,
}

impl<'a, T> SegmentWalk<'a, T> {
    /// Index of the next bound the walk reaches on an axis, if any.
    fn next_bound(&self, axis: usize) -> Option<usize> {
        let gap = self.cursor.gaps[axis];
        match self.cursor.direction[axis] {
            1 => (gap < self.bounds[axis].len()).then_some(gap),
            -1 => gap.checked_sub(1),
            _ => None,
        }
    }

    fn progress(&self, axis: usize, index: usize) -> f64 {
        (self.bounds[axis][index].value as f64 - self.cursor.start[axis]) / self.cursor.delta[axis]
    }
}

impl<'a, T> Iterator for SegmentWalk<'a, T> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut closest: Option<(usize, usize, f64)> = None;
            for axis in 0..AXIS_COUNT {
                let Some(index) = self.next_bound(axis) else {
                    continue;
                };
                let progress = self.progress(axis, index);
                if closest.map_or(true, |(_, _, closest_progress)| progress < closest_progress) {
                    closest = Some((axis, index, progress));
                }
            }

            let (axis, index, progress) = closest?;
            if progress > 1.0 {
                return None;
            }

            let moving_up = self.cursor.direction[axis] > 0;
            self.cursor.gaps[axis] = if moving_up { index + 1 } else { index };

            let bound = self.bounds[axis][index];
            let entering = if moving_up {
                bound.is_lower()
            } else {
                bound.is_upper()
            };
            if !entering {
                continue;
            }

            let other_axis = 1 - axis;
            let other_gap = self.cursor.gaps[other_axis];
            let proxy = &self.proxies[bound.proxy];
            if proxy.lower_bounds[other_axis] < other_gap
                && other_gap <= proxy.upper_bounds[other_axis]
            {
                return Some((bound.proxy, progress));
            }
        }
    }
}

//
// tests
//
