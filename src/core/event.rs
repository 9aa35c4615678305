use crate::core::potential::PotentialId;
use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::cmp::Ordering;

/// The other side of a predicted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partner {
    /// Pair collision with another particle.
    Particle(u32),
    /// Collision with boundary `id` (index into the integrator's boundary list).
    Boundary(u32),
    /// The subject leaves its current cell.
    Transit,
}

impl Partner {
    /// Tie-break key of an event of `subject` against this partner.
    ///
    /// A pair ranks by its lower-indexed participant, whichever side holds it, then by
    /// kind (`Particle` < `Boundary` < `Transit`), then by the other participant.
    #[inline]
    pub(crate) fn order_key(&self, subject: u32) -> (u32, u8, u32) {
        match *self {
            Partner::Particle(j) => (subject.min(j), 0, subject.max(j)),
            Partner::Boundary(b) => (subject, 1, b),
            Partner::Transit => (subject, 2, 0),
        }
    }
}

/// A scheduled event for one subject particle, ordered by time, then by
/// `Partner::order_key`, then by subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionEvent {
    pub time: NotNan<f64>,
    pub subject: u32,
    pub partner: Partner,
    /// Pair law responsible for a `Partner::Particle` event.
    pub potential: Option<PotentialId>,
}

impl CollisionEvent {
    /// Create a new event, validating that time is finite and non-NaN.
    pub fn new(
        time: f64,
        subject: u32,
        partner: Partner,
        potential: Option<PotentialId>,
    ) -> Result<Self> {
        if !time.is_finite() {
            return Err(Error::InvalidParam(format!(
                "event time must be finite, got {time}"
            )));
        }
        let time = NotNan::new(time)
            .map_err(|_| Error::InvalidParam("event time cannot be NaN".into()))?;
        Ok(Self {
            time,
            subject,
            partner,
            potential,
        })
    }

    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }

    /// Whether `id` takes part in this event.
    #[inline]
    pub fn involves(&self, id: u32) -> bool {
        self.subject == id || self.partner == Partner::Particle(id)
    }
}

impl Ord for CollisionEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| {
                self.partner
                    .order_key(self.subject)
                    .cmp(&other.partner.order_key(other.subject))
            })
            .then_with(|| self.subject.cmp(&other.subject))
            .then_with(|| self.potential.cmp(&other.potential))
    }
}

impl PartialOrd for CollisionEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle to a particle's live queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u32);

impl EventHandle {
    /// Particle whose entry this handle addresses.
    #[inline]
    pub fn subject(&self) -> u32 {
        self.0
    }
}

/// Indexed binary min-heap holding at most one event per subject particle.
///
/// `position[id]` tracks where particle `id`'s entry currently sits in `heap`, which gives
/// O(log n) update and removal without scanning.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: Vec<CollisionEvent>,
    position: Vec<Option<usize>>,
}

impl EventQueue {
    /// Empty queue with slots for particles `0..num_particles`.
    pub fn with_capacity(num_particles: usize) -> Self {
        Self {
            heap: Vec::with_capacity(num_particles),
            position: vec![None; num_particles],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry, keeping the slots.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.position.iter_mut().for_each(|p| *p = None);
    }

    /// Drop all entries and resize the id table.
    pub fn reset(&mut self, num_particles: usize) {
        self.heap.clear();
        self.position.clear();
        self.position.resize(num_particles, None);
    }

    /// Insert the subject's event, replacing any entry it already had.
    pub fn upsert(&mut self, event: CollisionEvent) -> EventHandle {
        let id = event.subject as usize;
        if id >= self.position.len() {
            self.position.resize(id + 1, None);
        }
        match self.position[id] {
            Some(pos) => {
                let old = self.heap[pos];
                self.heap[pos] = event;
                if event < old {
                    self.sift_up(pos);
                } else {
                    self.sift_down(pos);
                }
            }
            None => {
                self.heap.push(event);
                let pos = self.heap.len() - 1;
                self.position[id] = Some(pos);
                self.sift_up(pos);
            }
        }
        EventHandle(event.subject)
    }

    /// Earliest event without removing it.
    #[inline]
    pub fn peek_min(&self) -> Option<&CollisionEvent> {
        self.heap.first()
    }

    /// Time of the earliest pending event.
    #[inline]
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.first().map(CollisionEvent::time_f64)
    }

    /// Remove and return the earliest event.
    pub fn pop_min(&mut self) -> Option<CollisionEvent> {
        self.remove_at(0)
    }

    /// Remove the entry behind `handle`, if still live.
    pub fn remove(&mut self, handle: EventHandle) -> Option<CollisionEvent> {
        let pos = self.position.get(handle.0 as usize).copied().flatten()?;
        self.remove_at(pos)
    }

    /// Live entry for particle `id`.
    pub fn get(&self, id: u32) -> Option<&CollisionEvent> {
        let pos = self.position.get(id as usize).copied().flatten()?;
        self.heap.get(pos)
    }

    /// Handle for particle `id`'s live entry.
    pub fn handle_of(&self, id: u32) -> Option<EventHandle> {
        self.get(id).map(|_| EventHandle(id))
    }

    /// Iterate live entries in heap order (not time order).
    pub fn iter(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.heap.iter()
    }

    fn remove_at(&mut self, pos: usize) -> Option<CollisionEvent> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(pos, last);
        let removed = self.heap.pop()?;
        self.position[removed.subject as usize] = None;
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
        Some(removed)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.position[self.heap[a].subject as usize] = Some(a);
        self.position[self.heap[b].subject as usize] = Some(b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap[pos] < self.heap[parent] {
                self.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < n && self.heap[left] < self.heap[smallest] {
                smallest = left;
            }
            if right < n && self.heap[right] < self.heap[smallest] {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Partner::{Boundary, Particle, Transit};

    fn ev(t: f64, subject: u32, partner: Partner) -> CollisionEvent {
        CollisionEvent::new(t, subject, partner, None).unwrap()
    }

    #[test]
    fn new_event_rejects_non_finite_time() {
        let err = CollisionEvent::new(f64::NAN, 1, Particle(2), None).unwrap_err();
        assert!(err.to_string().contains("finite"));
        assert!(CollisionEvent::new(f64::INFINITY, 1, Transit, None).is_err());
    }

    #[test]
    fn ordering_by_time_then_subject() {
        assert!(ev(1.0, 5, Particle(0)) < ev(2.0, 0, Particle(1)));
        assert!(ev(3.0, 1, Particle(4)) < ev(3.0, 4, Particle(2)));
        assert!(ev(3.0, 1, Particle(9)) < ev(3.0, 1, Boundary(0)));
        assert!(ev(3.0, 1, Boundary(0)) < ev(3.0, 1, Transit));
    }

    #[test]
    fn pair_ranks_by_lower_participant_whichever_side_holds_it() {
        // {0, 2} held by 2 goes before a boundary hit of 1
        assert!(ev(3.0, 2, Particle(0)) < ev(3.0, 1, Boundary(4)));
        assert!(ev(3.0, 2, Particle(0)) < ev(3.0, 1, Transit));
        assert!(ev(3.0, 2, Particle(0)) < ev(3.0, 1, Particle(3)));
        // Same pair held from either side: subject decides
        assert!(ev(3.0, 0, Particle(2)) < ev(3.0, 2, Particle(0)));
        // Pair {0, 2} precedes 0's own wall hit and follows pair {0, 1}
        assert!(ev(3.0, 2, Particle(0)) < ev(3.0, 0, Boundary(0)));
        assert!(ev(3.0, 1, Particle(0)) < ev(3.0, 2, Particle(0)));
    }

    #[test]
    fn pops_in_time_order_with_id_tie_break() {
        let mut q = EventQueue::with_capacity(6);
        q.upsert(ev(4.0, 0, Transit));
        q.upsert(ev(1.0, 3, Particle(1)));
        q.upsert(ev(1.0, 1, Particle(3)));
        q.upsert(ev(0.5, 5, Boundary(2)));
        q.upsert(ev(2.0, 2, Transit));
        q.upsert(ev(2.0, 4, Particle(0)));

        let order: Vec<u32> = std::iter::from_fn(|| q.pop_min()).map(|e| e.subject).collect();
        assert_eq!(order, vec![5, 1, 3, 4, 2, 0]);
        assert!(q.is_empty());
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut q = EventQueue::with_capacity(3);
        q.upsert(ev(5.0, 0, Transit));
        q.upsert(ev(3.0, 1, Transit));
        q.upsert(ev(1.0, 0, Particle(2)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_min().map(|e| e.subject), Some(0));

        q.upsert(ev(9.0, 0, Transit));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_time(), Some(3.0));
        assert_eq!(q.get(0).map(|e| e.time_f64()), Some(9.0));
    }

    #[test]
    fn remove_by_handle() {
        let mut q = EventQueue::with_capacity(4);
        let h0 = q.upsert(ev(1.0, 0, Transit));
        q.upsert(ev(2.0, 1, Transit));
        q.upsert(ev(3.0, 2, Transit));
        let h3 = q.upsert(ev(0.5, 3, Transit));

        assert_eq!(q.remove(h3).map(|e| e.subject), Some(3));
        assert_eq!(q.remove(h3), None);
        assert_eq!(q.remove(h0).map(|e| e.subject), Some(0));
        assert_eq!(q.handle_of(0), None);
        assert_eq!(q.peek_time(), Some(2.0));
        assert_eq!(q.pop_min().map(|e| e.subject), Some(1));
        assert_eq!(q.pop_min().map(|e| e.subject), Some(2));
        assert_eq!(q.pop_min(), None);
    }

    #[test]
    fn heap_survives_mixed_updates() {
        let mut q = EventQueue::with_capacity(32);
        for i in 0..32u32 {
            q.upsert(ev(((i * 7) % 13) as f64, i, Transit));
        }
        for i in (0..32u32).step_by(3) {
            q.upsert(ev(100.0 - i as f64, i, Transit));
        }
        for i in (1..32u32).step_by(5) {
            if let Some(h) = q.handle_of(i) {
                q.remove(h);
            }
        }
        let mut last = f64::NEG_INFINITY;
        while let Some(e) = q.pop_min() {
            assert!(e.time_f64() >= last);
            last = e.time_f64();
        }
    }
}
