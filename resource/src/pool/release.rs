//! Append-only release lists drained in one pass.

struct ReleaseEntry<R> {
    resource: R,
    release: fn(&mut R),
}

/// Resources awaiting bulk release, addressed by insertion index.
pub(crate) struct ReleaseList<R> {
    entries: Vec<ReleaseEntry<R>>,
}

impl<R> ReleaseList<R> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a resource with the function that releases it; returns its index.
    pub fn push(&mut self, resource: R, release: fn(&mut R)) -> usize {
        self.entries.push(ReleaseEntry { resource, release });
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.entries.get(index).map(|entry| &entry.resource)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut R> {
        self.entries.get_mut(index).map(|entry| &mut entry.resource)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Release every resource in insertion order and empty the list.
    ///
    /// Capacity is kept for the next batch.
    pub fn drain(&mut self) -> usize {
        let count = self.entries.len();
        for mut entry in self.entries.drain(..) {
            (entry.release)(&mut entry.resource);
        }
        count
    }
}

impl<R> Default for ReleaseList<R> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_releases_in_order() {
        let mut list = ReleaseList::with_capacity(4);
        let a = list.push(vec![1], |v: &mut Vec<i32>| v.clear());
        let b = list.push(vec![2, 3], |v: &mut Vec<i32>| v.clear());
        assert_eq!((a, b), (0, 1));
        assert_eq!(list.get(1), Some(&vec![2, 3]));

        list.get_mut(0).unwrap().push(4);
        assert_eq!(list.get(0), Some(&vec![1, 4]));

        assert_eq!(list.drain(), 2);
        assert_eq!(list.len(), 0);
        assert!(list.get(0).is_none());
    }

    #[test]
    fn test_release_fn_runs_before_drop() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let mut list = ReleaseList::default();
        list.push(Arc::clone(&calls), |calls: &mut Arc<AtomicUsize>| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        list.drain();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Arc::strong_count(&calls), 1);
    }
}
