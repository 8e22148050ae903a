use std::mem::MaybeUninit;

/// Index-addressed storage with slot reuse.
///
/// The reactor keeps one entry per registered descriptor here; the slot
/// index is half of the token handed to epoll. Freed indices are reused,
/// so callers pair them with a generation to detect stale tokens.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with `size` free slots.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        // Popped from the back: lower indices are handed out first.
        let free = (0..size).rev().collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    /// Inserts `item` and returns its index.
    ///
    /// A free slot is reused when available; otherwise the slab doubles.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.items
                    .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
                self.free.extend(((len + 1)..new_len).rev());
                self.used.resize(new_len, false);

                len
            }
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        index
    }

    /// Removes and returns the value at `index`, if the slot is in use.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !self.contains(index) {
            return None;
        }

        self.free.push(index);
        self.used[index] = false;
        self.len -= 1;

        // Safety: the slot was marked used, so it is initialized, and it
        // is marked free before anyone can read it again.
        let item = unsafe { self.items[index].assume_init_read() };
        self.items[index] = MaybeUninit::uninit();

        Some(item)
    }

    /// Returns the value at `index`, if the slot is in use.
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.contains(index) {
            return None;
        }

        // Safety: used slots are initialized.
        Some(unsafe { self.items[index].assume_init_mut() })
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Removes every value, in index order.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        (0..self.items.len())
            .filter_map(|index| self.remove(index))
            .collect()
    }
}

impl<T> Drop for Slab<T> {
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Slab;

    use std::rc::Rc;

    #[test]
    fn test_insert_reuses_freed_slots() {
        let mut slab = Slab::new(2);

        let a = slab.insert("a");
        let b = slab.insert("b");
        let c = slab.insert("c");

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(slab.remove(b), Some("b"));
        assert_eq!(slab.insert("d"), b);
        assert_eq!(slab.len(), 3);
    }

    #[test]
    fn test_stale_index_is_rejected() {
        let mut slab = Slab::new(1);
        let index = slab.insert(7);

        assert_eq!(slab.remove(index), Some(7));
        assert_eq!(slab.remove(index), None);
        assert!(slab.get_mut(index).is_none());
        assert!(slab.get_mut(99).is_none());
    }

    #[test]
    fn test_drop_releases_live_values() {
        let value = Rc::new(());
        let mut slab = Slab::new(4);

        slab.insert(value.clone());
        let removed = slab.insert(value.clone());
        slab.insert(value.clone());
        slab.remove(removed);

        assert_eq!(Rc::strong_count(&value), 3);
        drop(slab);
        assert_eq!(Rc::strong_count(&value), 1);
    }
}
