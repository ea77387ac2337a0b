//! A set supporting O(1) insert/remove/contains *and* uniform random pick —
//! a dense vector of members plus a map from member to its vector index,
//! with remove-by-swap-with-last (spec.md §9, "Random eviction's FlatSet").

use std::collections::HashMap;

use rand::Rng;

#[derive(Default)]
pub struct FlatSet {
    members: Vec<u64>,
    index: HashMap<u64, usize>,
}

impl FlatSet {
    #[must_use]
    pub fn new() -> Self {
        Self { members: Vec::new(), index: HashMap::new() }
    }

    pub fn insert(&mut self, value: u64) -> bool {
        if self.index.contains_key(&value) {
            return false;
        }
        self.index.insert(value, self.members.len());
        self.members.push(value);
        true
    }

    pub fn remove(&mut self, value: u64) -> bool {
        let Some(idx) = self.index.remove(&value) else { return false };
        let last = self.members.len() - 1;
        if idx != last {
            let moved = self.members[last];
            self.members[idx] = moved;
            self.index.insert(moved, idx);
        }
        self.members.pop();
        true
    }

    #[must_use]
    pub fn contains(&self, value: u64) -> bool {
        self.index.contains_key(&value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Picks a uniformly random member, or `None` if empty.
    pub fn random_pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        if self.members.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..self.members.len());
        Some(self.members[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn insert_remove_contains_are_consistent() {
        let mut s = FlatSet::new();
        assert!(s.insert(1));
        assert!(!s.insert(1));
        assert!(s.contains(1));
        assert!(s.insert(2));
        assert!(s.insert(3));
        assert_eq!(s.len(), 3);
        assert!(s.remove(2));
        assert!(!s.contains(2));
        assert_eq!(s.len(), 2);
        assert!(s.contains(1));
        assert!(s.contains(3));
    }

    #[test]
    fn remove_by_swap_keeps_remaining_members_intact() {
        let mut s = FlatSet::new();
        for v in 0..10 {
            s.insert(v);
        }
        s.remove(0);
        let mut remaining: Vec<u64> = (1..10).collect();
        let mut got: Vec<u64> = s.members.clone();
        got.sort_unstable();
        remaining.sort_unstable();
        assert_eq!(got, remaining);
    }

    #[test]
    fn random_pick_is_none_when_empty() {
        let s = FlatSet::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(s.random_pick(&mut rng), None);
    }

    #[test]
    fn random_pick_only_ever_returns_members() {
        let mut s = FlatSet::new();
        for v in [5, 10, 15] {
            s.insert(v);
        }
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let picked = s.random_pick(&mut rng).unwrap();
            assert!([5, 10, 15].contains(&picked));
        }
    }
}
