//! Arena storage for IR nodes and analysis records.
//!
//! Items are addressed by [`Id`] handles that carry a slot index and a
//! generation. Removing an item bumps the slot generation so stale handles
//! are rejected by [`Arena::get`] instead of silently aliasing the item that
//! later reuses the slot.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe, generation-checked handle into an [`Arena`].
///
/// Traits are implemented by hand so that `Id<T>` is always `Copy`/`Eq`/`Hash`
/// regardless of what `T` implements.
pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Id<T> {
    /// Create a first-generation ID from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            generation: 0,
            _marker: PhantomData,
        }
    }

    #[inline]
    const fn with_generation(index: u32, generation: u32) -> Self {
        Id {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Get the raw slot index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the slot generation.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Get the slot index as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Invalid/null ID.
    pub const INVALID: Self = Id {
        index: u32::MAX,
        generation: 0,
        _marker: PhantomData,
    };

    /// Check if this ID is valid.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            write!(f, "#INVALID")
        } else if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}'{}", self.index, self.generation)
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot arena for homogeneous items.
///
/// Allocation reuses freed slots. Every reuse happens under a new generation,
/// so handles to removed items never resolve again.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    /// Create a new empty arena.
    #[inline]
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Create a new arena with the given initial capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a new item and return its ID.
    pub fn alloc(&mut self, item: T) -> Id<T> {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(item);
            return Id::with_generation(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        debug_assert!(index != u32::MAX, "arena exhausted");
        self.slots.push(Slot {
            generation: 0,
            value: Some(item),
        });
        Id::with_generation(index, 0)
    }

    /// Remove an item, returning it if the handle was still live.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let slot = self.slots.get_mut(id.as_usize())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    /// Get a reference to an item by ID.
    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        match self.slots.get(id.as_usize()) {
            Some(slot) if slot.generation == id.generation => slot.value.as_ref(),
            _ => None,
        }
    }

    /// Get a mutable reference to an item by ID.
    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        match self.slots.get_mut(id.as_usize()) {
            Some(slot) if slot.generation == id.generation => slot.value.as_mut(),
            _ => None,
        }
    }

    /// Check whether a handle still resolves.
    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    /// Number of live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if the arena holds no live items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the largest slot index ever handed out.
    ///
    /// Side tables indexed by slot ([`SecondaryMap`], [`BitSet`]) size
    /// themselves with this.
    #[inline]
    pub fn slot_bound(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live items with their IDs, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|item| (Id::with_generation(i as u32, slot.generation), item))
        })
    }

    /// Iterate over live items mutably with their IDs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id<T>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|item| (Id::with_generation(i as u32, generation), item))
        })
    }

    /// Collect the IDs of all live items.
    pub fn ids(&self) -> Vec<Id<T>> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Reserve capacity for at least `additional` more items.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        match self.get(id) {
            Some(item) => item,
            None => panic!("stale or invalid arena handle {:?}", id),
        }
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(item) => item,
            None => panic!("stale or invalid arena handle {:?}", id),
        }
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Side table keyed by arena slot index.
///
/// Entries are not generation checked; owners clear an entry when they free
/// the slot it belongs to.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    /// Create a new empty secondary map.
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create a map with a default entry for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Get a value by ID.
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Get a mutable value by ID, growing the table if needed.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        &mut self.values[idx]
    }

    /// Set a value by ID.
    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }

    /// Reset an entry to the default value.
    pub fn reset(&mut self, id: Id<K>) {
        if let Some(slot) = self.values.get_mut(id.as_usize()) {
            *slot = V::default();
        }
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// A compact growable bit set over slot indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    /// Create a new empty bit set.
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    /// Create a bit set able to hold `n` bits without growing.
    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Set a bit. Returns `true` if it was not set before.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }

    /// Clear a bit.
    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    /// Check if a bit is set.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Count the number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over set bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| word_idx * 64 + bit)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        value: i32,
    }

    #[test]
    fn test_alloc_and_index() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 10 });
        let b = arena.alloc(Item { value: 20 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a].value, 10);

        arena[b].value = 200;
        assert_eq!(arena[b].value, 200);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_removed_handle_is_stale() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 1 });
        assert_eq!(arena.remove(a).map(|i| i.value), Some(1));
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());

        // The slot is reused under a new generation.
        let b = arena.alloc(Item { value: 2 });
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!arena.contains(a));
        assert_eq!(arena[b].value, 2);
        assert_eq!(format!("{:?}", b), "#0'1");
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut arena: Arena<Item> = Arena::new();
        let ids: Vec<_> = (0..4).map(|v| arena.alloc(Item { value: v })).collect();
        arena.remove(ids[1]);
        arena.remove(ids[2]);

        let values: Vec<_> = arena.iter().map(|(_, item)| item.value).collect();
        assert_eq!(values, vec![0, 3]);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.slot_bound(), 4);
    }

    #[test]
    fn test_secondary_map() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 10 });
        let b = arena.alloc(Item { value: 20 });

        let mut map: SecondaryMap<Item, Vec<u32>> = SecondaryMap::new();
        map.entry(b).push(7);
        assert!(map.get(a).map_or(true, |v| v.is_empty()));
        assert_eq!(map[b], vec![7]);

        map.reset(b);
        assert!(map[b].is_empty());
    }

    #[test]
    fn test_bit_set() {
        let mut set = BitSet::new();
        assert!(set.insert(0));
        assert!(set.insert(63));
        assert!(set.insert(64));
        assert!(!set.insert(64));

        assert!(set.contains(63));
        assert!(!set.contains(65));
        assert_eq!(set.count(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 63, 64]);

        set.remove(63);
        assert!(!set.contains(63));
    }

    #[test]
    fn test_id_invalid() {
        let id: Id<Item> = Id::INVALID;
        assert!(!id.is_valid());
        assert!(Id::<Item>::new(0).is_valid());
    }
}
