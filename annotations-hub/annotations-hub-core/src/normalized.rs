//! Ordered-ID + by-ID container used for both annotations and lists.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedState<K, V>
where
    K: Eq + Hash,
{
    all_ids: Vec<K>,
    by_id: HashMap<K, V>,
}

impl<K, V> Default for NormalizedState<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            all_ids: Vec::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<K, V> NormalizedState<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container from records in iteration order.
    pub fn from_seed(seed: impl IntoIterator<Item = V>, get_id: impl Fn(&V) -> K) -> Self {
        let mut state = Self::new();
        for value in seed {
            state.push(get_id(&value), value);
        }
        state
    }

    pub fn len(&self) -> usize {
        self.all_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_ids.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &K) -> Option<&V> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &K) -> Option<&mut V> {
        self.by_id.get_mut(id)
    }

    pub fn ids(&self) -> &[K] {
        &self.all_ids
    }

    /// Records in iteration order.
    pub fn iter(&self) -> impl Iterator<Item = &V> + '_ {
        self.all_ids.iter().filter_map(move |id| self.by_id.get(id))
    }

    /// Mutable access to every record, in no particular order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.by_id.values_mut()
    }

    /// Append at the end of iteration order, replacing any record under `id`.
    pub fn push(&mut self, id: K, value: V) {
        if self.by_id.insert(id, value).is_none() {
            self.all_ids.push(id);
        }
    }

    /// Insert at the front of iteration order, replacing any record under `id`.
    pub fn push_front(&mut self, id: K, value: V) {
        if self.by_id.insert(id, value).is_some() {
            self.all_ids.retain(|existing| existing != &id);
        }
        self.all_ids.insert(0, id);
    }

    /// Replace an existing record in place. Returns the previous value.
    pub fn replace(&mut self, id: K, value: V) -> Option<V> {
        match self.by_id.get_mut(&id) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => None,
        }
    }

    pub fn remove(&mut self, id: &K) -> Option<V> {
        let removed = self.by_id.remove(id)?;
        self.all_ids.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn sort_by(&mut self, mut compare: impl FnMut(&V, &V) -> Ordering) {
        let by_id = &self.by_id;
        self.all_ids.sort_by(|a, b| match (by_id.get(a), by_id.get(b)) {
            (Some(a), Some(b)) => compare(a, b),
            _ => Ordering::Equal,
        });
    }
}
