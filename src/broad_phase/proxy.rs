//! Fixed-capacity pool of proxies.

use std::ops::{Index, IndexMut};

use crate::math::AXIS_COUNT;

/// The broad phase's representation of one shape's AABB,
/// stored as indices into the bound arrays.
#[derive(Clone, Debug)]
pub(crate) struct Proxy<T> {
    pub lower_bounds: [usize; AXIS_COUNT],
    pub upper_bounds: [usize; AXIS_COUNT],
    /// Number of axes on which this proxy was hit during the current query pass.
    pub overlap_count: u32,
    /// Query pass in which `overlap_count` was last written.
    pub time_stamp: u32,
    /// `Some` exactly when the proxy is live.
    pub user_data: Option<T>,
    next_free: Option<usize>,
}

impl<T> Proxy<T> {
    fn vacant(next_free: Option<usize>) -> Self {
        Self {
            lower_bounds: [0; AXIS_COUNT],
            upper_bounds: [0; AXIS_COUNT],
            overlap_count: 0,
            time_stamp: 0,
            user_data: None,
            next_free,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.user_data.is_some()
    }

    /// Point the bound at the given index back to this proxy.
    #[inline]
    pub fn set_bound_index(&mut self, axis: usize, is_lower: bool, index: usize) {
        if is_lower {
            self.lower_bounds[axis] = index;
        } else {
            self.upper_bounds[axis] = index;
        }
    }
}

/// Arena of proxies with a free list threaded through vacant slots.
#[derive(Clone, Debug)]
pub(crate) struct ProxyPool<T> {
    slots: Vec<Proxy<T>>,
    free_head: Option<usize>,
    live_count: usize,
}

impl<T> ProxyPool<T> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Proxy::vacant(if i + 1 < capacity { Some(i + 1) } else { None }))
            .collect();
        Self {
            slots,
            free_head: if capacity > 0 { Some(0) } else { None },
            live_count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// Take a slot off the free list. Returns `None` if every slot is in use.
    ///
    /// Query bookkeeping is reset so that results from earlier passes
    /// can't be attributed to the new occupant.
    pub fn alloc(&mut self, user_data: T) -> Option<usize> {
        let id = self.free_head?;
        let proxy = &mut self.slots[id];
        self.free_head = proxy.next_free.take();
        proxy.overlap_count = 0;
        proxy.time_stamp = 0;
        proxy.user_data = Some(user_data);
        self.live_count += 1;
        Some(id)
    }

    /// Return a slot to the free list, giving back its user data.
    /// Returns `None` if the slot wasn't live.
    pub fn free(&mut self, id: usize) -> Option<T> {
        let proxy = self.slots.get_mut(id)?;
        let user_data = proxy.user_data.take()?;
        proxy.overlap_count = 0;
        proxy.next_free = self.free_head;
        self.free_head = Some(id);
        self.live_count -= 1;
        Some(user_data)
    }

    /// Access a proxy if it's live.
    #[inline]
    pub fn get(&self, id: usize) -> Option<&Proxy<T>> {
        self.slots.get(id).filter(|p| p.is_live())
    }

    pub fn iter_live(&self) -> impl '_ + Iterator<Item = (usize, &Proxy<T>)> {
        self.slots.iter().enumerate().filter(|(_, p)| p.is_live())
    }

    /// Zero every time stamp, used when the global stamp counter wraps around.
    pub fn reset_time_stamps(&mut self) {
        for proxy in &mut self.slots {
            proxy.time_stamp = 0;
        }
    }
}

impl<T> Index<usize> for ProxyPool<T> {
    type Output = Proxy<T>;

    #[inline]
    fn index(&self, id: usize) -> &Self::Output {
        &self.slots[id]
    }
}

impl<T> IndexMut<usize> for ProxyPool<T> {
    #[inline]
    fn index_mut(&mut self, id: usize) -> &mut Self::Output {
        &mut self.slots[id]
    }
}
