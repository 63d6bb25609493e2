use crate::SmallKeyBuildHasher;

use core::hash::{BuildHasher, Hash};
use std::collections::{hash_map, HashMap};

/// A cache holding at most `capacity` values, evicting the Least Recently Used value when a new key would exceed that bound.
///
/// `get` counts as a use. `peek` does not.
#[derive(Clone, Debug)]
pub struct LruCache<K, V, H> {
    store: HashMap<K, (V, usize), H>,
    order: LruList<K>,
    capacity: usize,
}

/// An `LruCache` using the aHash hashing algorithm.
pub type SmallKeyLruCache<K, V> = LruCache<K, V, SmallKeyBuildHasher>;

impl<K, V, H> LruCache<K, V, H>
where
    K: Hash + Eq,
    H: Default,
{
    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: HashMap::with_hasher(Default::default()),
            order: LruList::new(),
            capacity: capacity.max(1),
        }
    }
}

impl<K, V, H> LruCache<K, V, H>
where
    K: Hash + Eq + Clone,
    H: BuildHasher,
{
    /// Borrow the value for `key`, marking it most recently used.
    #[inline]
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let Self { store, order, .. } = self;

        store.get(key).map(|(val, i)| {
            order.move_to_front(*i);

            val
        })
    }

    /// Borrow the value for `key` without updating the LRU order.
    #[inline]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.store.get(key).map(|(val, _)| val)
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    /// Inserts `new_val` for `key` as the most recently used value. Returns whatever was displaced: the old value for `key`, or
    /// the least recently used entry if the cache was full.
    pub fn insert(&mut self, key: K, new_val: V) -> Option<(K, V)> {
        let Self { store, order, .. } = self;
        match store.entry(key.clone()) {
            hash_map::Entry::Occupied(occupied) => {
                let (old_val, i) = occupied.into_mut();
                order.move_to_front(*i);

                return Some((key, std::mem::replace(old_val, new_val)));
            }
            hash_map::Entry::Vacant(vacant) => {
                let i = order.push_front(key);
                vacant.insert((new_val, i));
            }
        }

        if self.store.len() > self.capacity {
            self.remove_lru()
        } else {
            None
        }
    }

    #[inline]
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.store.remove(key).map(|(val, i)| {
            self.order.remove(i);

            val
        })
    }

    /// Removes the least recently used value.
    pub fn remove_lru(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_back()?;
        let (val, _) = self.store.remove(&key)?;

        Some((key, val))
    }

    #[inline]
    pub fn clear(&mut self) {
        self.store.clear();
        self.order.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys in no particular order.
    pub fn keys(&self) -> hash_map::Keys<'_, K, (V, usize)> {
        self.store.keys()
    }
}

/// A doubly linked list threaded through a `Vec`. Slot 0 anchors the list of free slots and slot 1 anchors the list of occupied
/// slots, most recently used first.
#[derive(Clone, Debug)]
struct LruList<T> {
    entries: Vec<ListEntry<T>>,
}

#[derive(Clone, Debug)]
struct ListEntry<T> {
    value: Option<T>,
    next: usize,
    prev: usize,
}

impl<T> LruList<T> {
    const FREE: usize = 0;
    const OCCUPIED: usize = 1;

    fn new() -> Self {
        let mut list = Self {
            entries: Vec::with_capacity(2),
        };
        list.clear();

        list
    }

    fn clear(&mut self) {
        self.entries.clear();
        for anchor in [Self::FREE, Self::OCCUPIED].iter() {
            self.entries.push(ListEntry {
                value: None,
                next: *anchor,
                prev: *anchor,
            });
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.entries[index].prev, self.entries[index].next);
        self.entries[prev].next = next;
        self.entries[next].prev = prev;
    }

    fn link_after(&mut self, index: usize, prev: usize) {
        let next = self.entries[prev].next;
        self.entries[index].prev = prev;
        self.entries[index].next = next;
        self.entries[prev].next = index;
        self.entries[next].prev = index;
    }

    fn move_to_front(&mut self, index: usize) {
        self.unlink(index);
        self.link_after(index, Self::OCCUPIED);
    }

    fn push_front(&mut self, value: T) -> usize {
        let index = if self.entries[Self::FREE].next == Self::FREE {
            self.entries.push(ListEntry {
                value: None,
                next: Self::FREE,
                prev: Self::FREE,
            });

            self.entries.len() - 1
        } else {
            let index = self.entries[Self::FREE].next;
            self.unlink(index);

            index
        };
        self.entries[index].value = Some(value);
        self.link_after(index, Self::OCCUPIED);

        index
    }

    fn remove(&mut self, index: usize) -> Option<T> {
        self.unlink(index);
        self.link_after(index, Self::FREE);

        self.entries[index].value.take()
    }

    fn pop_back(&mut self) -> Option<T> {
        let back = self.entries[Self::OCCUPIED].prev;
        if back == Self::OCCUPIED {
            return None;
        }

        self.remove(back)
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
