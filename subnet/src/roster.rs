//! Rank validators into active and waiting sets by power.
//!
//! The roster never stores validator records. Validators are referred to by
//! the arena index assigned by [crate::validators::ValidatorSet] and the roster
//! keeps one [Slot] per index plus two binary heaps of indices:
//!
//! - a min-heap over active validators (the weakest active validator is the
//!   first candidate for eviction)
//! - a max-heap over waiting validators (the strongest waiting validator is
//!   the first candidate for promotion)
//!
//! After every update the roster holds `|active| <= limit`, the waiting set is
//! empty unless the active set is full, and the minimum active power is at
//! least the maximum waiting power. Comparisons are strict, so validators with
//! equal power keep their current heap position.

/// Where a validator currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Active,
    Waiting,
    Inactive,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    power: u128,
    membership: Membership,
    position: usize,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            power: 0,
            membership: Membership::Inactive,
            position: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Order {
    Min,
    Max,
}

/// Binary heap of arena indices keyed by the power stored in their [Slot].
#[derive(Clone, Debug)]
struct Heap {
    order: Order,
    ids: Vec<usize>,
}

impl Heap {
    fn new(order: Order) -> Self {
        Self {
            order,
            ids: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn peek(&self) -> Option<usize> {
        self.ids.first().copied()
    }

    fn precedes(&self, a: u128, b: u128) -> bool {
        match self.order {
            Order::Min => a < b,
            Order::Max => a > b,
        }
    }

    fn swap(&mut self, i: usize, j: usize, slots: &mut [Slot]) {
        self.ids.swap(i, j);
        slots[self.ids[i]].position = i;
        slots[self.ids[j]].position = j;
    }

    fn sift_up(&mut self, mut pos: usize, slots: &mut [Slot]) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            let (child_power, parent_power) =
                (slots[self.ids[pos]].power, slots[self.ids[parent]].power);
            if !self.precedes(child_power, parent_power) {
                break;
            }
            self.swap(pos, parent, slots);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize, slots: &mut [Slot]) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < self.len()
                && self.precedes(slots[self.ids[left]].power, slots[self.ids[best]].power)
            {
                best = left;
            }
            if right < self.len()
                && self.precedes(slots[self.ids[right]].power, slots[self.ids[best]].power)
            {
                best = right;
            }
            if best == pos {
                return;
            }
            self.swap(pos, best, slots);
            pos = best;
        }
    }

    fn push(&mut self, id: usize, slots: &mut [Slot]) {
        self.ids.push(id);
        let pos = self.ids.len() - 1;
        slots[id].position = pos;
        self.sift_up(pos, slots);
    }

    fn remove(&mut self, pos: usize, slots: &mut [Slot]) -> usize {
        let last = self.ids.len() - 1;
        self.swap(pos, last, slots);
        let id = self.ids[last];
        self.ids.truncate(last);
        if pos < self.ids.len() {
            let pos = self.sift_up(pos, slots);
            self.sift_down(pos, slots);
        }
        id
    }

    fn pop(&mut self, slots: &mut [Slot]) -> Option<usize> {
        if self.ids.is_empty() {
            return None;
        }
        Some(self.remove(0, slots))
    }

    /// Restore the heap property after the power at `pos` changed.
    fn fix(&mut self, pos: usize, slots: &mut [Slot]) {
        let pos = self.sift_up(pos, slots);
        self.sift_down(pos, slots);
    }
}

/// Active and waiting validator queues ordered by power.
#[derive(Clone, Debug)]
pub struct PriorityRoster {
    limit: usize,
    slots: Vec<Slot>,
    active: Heap,
    waiting: Heap,
}

impl PriorityRoster {
    /// Create an empty roster admitting at most `limit` active validators.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            slots: Vec::new(),
            active: Heap::new(Order::Min),
            waiting: Heap::new(Order::Max),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Power last recorded for `id` (zero if unknown).
    pub fn power(&self, id: usize) -> u128 {
        self.slots.get(id).map(|s| s.power).unwrap_or_default()
    }

    /// Where `id` currently sits.
    pub fn membership(&self, id: usize) -> Membership {
        self.slots
            .get(id)
            .map(|s| s.membership)
            .unwrap_or(Membership::Inactive)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Active validator ids in heap order.
    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.ids.iter().copied()
    }

    /// Waiting validator ids in heap order.
    pub fn waiting(&self) -> impl Iterator<Item = usize> + '_ {
        self.waiting.ids.iter().copied()
    }

    /// Power of the weakest active validator.
    pub fn min_active_power(&self) -> Option<u128> {
        self.active.peek().map(|id| self.slots[id].power)
    }

    /// Power of the strongest waiting validator.
    pub fn max_waiting_power(&self) -> Option<u128> {
        self.waiting.peek().map(|id| self.slots[id].power)
    }

    /// Record the new `power` of `id`, promoting or demoting validators as needed.
    pub fn update(&mut self, id: usize, power: u128) {
        if id >= self.slots.len() {
            self.slots.resize(id + 1, Slot::default());
        }
        let Slot {
            power: old,
            membership,
            position,
        } = self.slots[id];
        if old == power && membership != Membership::Inactive {
            return;
        }
        self.slots[id].power = power;

        // Zero power never competes for a seat
        if power == 0 {
            match membership {
                Membership::Active => {
                    self.active.remove(position, &mut self.slots);
                    self.slots[id].membership = Membership::Inactive;
                    self.promote();
                }
                Membership::Waiting => {
                    self.waiting.remove(position, &mut self.slots);
                    self.slots[id].membership = Membership::Inactive;
                }
                Membership::Inactive => {}
            }
            return;
        }

        match membership {
            Membership::Inactive => self.insert(id),
            Membership::Active => {
                self.active.fix(position, &mut self.slots);
                if power < old {
                    self.rebalance();
                }
            }
            Membership::Waiting => {
                if power > old {
                    self.waiting.remove(position, &mut self.slots);
                    self.slots[id].membership = Membership::Inactive;
                    self.insert(id);
                } else {
                    self.waiting.fix(position, &mut self.slots);
                }
            }
        }
    }

    /// Change the maximum number of active validators.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        while self.active.len() > self.limit {
            let Some(evicted) = self.active.pop(&mut self.slots) else {
                break;
            };
            self.push_waiting(evicted);
        }
        while self.active.len() < self.limit && self.promote() {}
    }

    /// Seat a validator that is in neither heap.
    fn insert(&mut self, id: usize) {
        if self.active.len() < self.limit {
            self.push_active(id);
            return;
        }
        match self.min_active_power() {
            Some(min) if self.slots[id].power > min => {
                if let Some(evicted) = self.active.pop(&mut self.slots) {
                    self.push_waiting(evicted);
                }
                self.push_active(id);
            }
            _ => self.push_waiting(id),
        }
    }

    /// Move the strongest waiting validator into a free active seat.
    fn promote(&mut self) -> bool {
        if self.active.len() >= self.limit {
            return false;
        }
        let Some(id) = self.waiting.pop(&mut self.slots) else {
            return false;
        };
        self.push_active(id);
        true
    }

    /// Swap the weakest active and the strongest waiting validator while the
    /// latter is strictly stronger.
    fn rebalance(&mut self) {
        while let (Some(min), Some(max)) = (self.min_active_power(), self.max_waiting_power()) {
            if max <= min {
                return;
            }
            let (Some(demoted), Some(promoted)) = (
                self.active.pop(&mut self.slots),
                self.waiting.pop(&mut self.slots),
            ) else {
                return;
            };
            self.push_active(promoted);
            self.push_waiting(demoted);
        }
    }

    fn push_active(&mut self, id: usize) {
        self.slots[id].membership = Membership::Active;
        self.active.push(id, &mut self.slots);
    }

    fn push_waiting(&mut self, id: usize) {
        self.slots[id].membership = Membership::Waiting;
        self.waiting.push(id, &mut self.slots);
    }
}
