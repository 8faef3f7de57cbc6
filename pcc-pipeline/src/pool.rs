//! Slot-keyed handle pools.

use std::sync::{Mutex, MutexGuard};

/// Fixed array of lazily created handles, one per worker slot. The slot
/// mutex enforces the at-most-one-user contract; under the scheduler's
/// one-task-per-thread discipline it is never contended.
pub struct ResourcePool<T> {
    slots: Vec<Mutex<Option<T>>>,
}

impl<T> ResourcePool<T> {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Borrows slot `slot`, creating the handle on first use. The guard
    /// returns the handle to the pool on drop.
    pub fn acquire(&self, slot: usize, create: impl FnOnce() -> T) -> PoolGuard<'_, T> {
        let mut guard = self.slots[slot].lock().unwrap();
        if guard.is_none() {
            *guard = Some(create());
        }
        PoolGuard { guard }
    }

    /// Visits every handle created so far. Used by the scheduler's terminal
    /// step, after all workers have finished.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
        for slot in &self.slots {
            if let Some(handle) = slot.lock().unwrap().as_mut() {
                f(handle);
            }
        }
    }
}

pub struct PoolGuard<'a, T> {
    guard: MutexGuard<'a, Option<T>>,
}

impl<T> std::ops::Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_once_per_slot() {
        let pool: ResourcePool<Vec<u32>> = ResourcePool::new(2);
        {
            let mut handle = pool.acquire(0, Vec::new);
            handle.push(1);
        }
        {
            let handle = pool.acquire(0, || panic!("slot 0 already populated"));
            assert_eq!(*handle, vec![1]);
        }
        let mut seen = 0;
        pool.for_each(|_| seen += 1);
        assert_eq!(seen, 1); // slot 1 was never touched
    }
}
