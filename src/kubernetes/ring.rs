//! Fixed-capacity ring that hands back whatever it overwrites.

/// Slots are filled in order; once full, each push overwrites the oldest
/// slot and returns its previous occupant.
#[derive(Debug, Clone)]
pub struct RetentionRing<T> {
    slots: Vec<Option<T>>,
    next: usize,
}

impl<T> RetentionRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store `item`, returning the evicted occupant.
    ///
    /// A zero-capacity ring retains nothing, so `item` itself comes back.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.is_empty() {
            return Some(item);
        }
        let evicted = self.slots[self.next].replace(item);
        self.next = (self.next + 1) % self.slots.len();
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retained items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.next);
        older.iter().chain(newer.iter()).filter_map(Option::as_ref)
    }

    /// Drop everything, e.g. before rebuilding from a fresh list.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next = 0;
    }
}
