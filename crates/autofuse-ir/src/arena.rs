//! Arena storage with typed handles.
//!
//! The solver keeps its per-solve records (fusion units, side tables) in
//! arenas so that identity is a stable integer index rather than a
//! pointer, which keeps ordering deterministic across runs.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`].
///
/// Handles are lightweight u32 indices that provide type-safe access to
/// arena-allocated values. They implement `Ord` on the index, so handle
/// pairs can key `BTreeMap`/`BTreeSet` side tables deterministically.
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An append-only arena with typed [`Handle`]-based access.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the number of elements in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the arena contains no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let index = u32::try_from(self.data.len()).unwrap_or_else(|_| {
            panic!("arena overflow: {} items exceeds u32::MAX", self.data.len())
        });
        self.data.push(value);
        Handle::new(index)
    }

    /// Returns a reference to the value if the handle is valid.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Iterates over `(handle, &value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // Arena size is bounded by u32::MAX (enforced in append).
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    /// Iterates over `(handle, &mut value)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_access() {
        let mut arena = Arena::new();
        let h0 = arena.append("alpha");
        let h1 = arena.append("beta");
        assert_eq!(arena[h0], "alpha");
        assert_eq!(arena[h1], "beta");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn iter_yields_insertion_order() {
        let mut arena = Arena::new();
        arena.append(10);
        arena.append(20);
        let items: Vec<_> = arena.iter().map(|(h, &v)| (h.index(), v)).collect();
        assert_eq!(items, vec![(0, 10), (1, 20)]);
    }

    #[test]
    fn handle_ordering() {
        let h0: Handle<u32> = Handle::new(0);
        let h1: Handle<u32> = Handle::new(1);
        assert!(h0 < h1);
        assert_eq!(h0, h0);
    }

    #[test]
    fn try_get_out_of_bounds() {
        let mut arena = Arena::new();
        let h0 = arena.append(7);
        assert_eq!(arena.try_get(h0), Some(&7));
        assert_eq!(arena.try_get(Handle::new(42)), None);
    }

    #[test]
    fn iter_mut_updates_in_place() {
        let mut arena = Arena::new();
        arena.append(1);
        arena.append(2);
        for (_, v) in arena.iter_mut() {
            *v *= 10;
        }
        let items: Vec<_> = arena.iter().map(|(_, &v)| v).collect();
        assert_eq!(items, vec![10, 20]);
    }
}
