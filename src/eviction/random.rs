//! Random-with-clean-preference eviction policy (spec.md §4.2.1): prefers
//! evicting a clean page over a dirty one, picked uniformly at random from
//! whichever set is non-empty.

use std::cell::RefCell;

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::EvictionPolicy;
use super::flat_set::FlatSet;

/// Two disjoint sets, `clean` and `dirty`. `GetPageToEvict` picks uniformly
/// from `clean` if non-empty, else from `dirty`, else returns `None`.
///
/// The PRNG is explicitly seeded so traces are reproducible in tests; the
/// spec leaves seed handling as an implementation choice. It lives behind
/// a `RefCell` since the `EvictionPolicy::page_to_evict` contract takes
/// `&self` — drawing a sample still advances the generator's state.
pub struct RandomCleanPreferencePolicy {
    clean: FlatSet,
    dirty: FlatSet,
    rng: RefCell<StdRng>,
}

impl RandomCleanPreferencePolicy {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            clean: FlatSet::new(),
            dirty: FlatSet::new(),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl EvictionPolicy for RandomCleanPreferencePolicy {
    fn read(&mut self, page: u64) {
        if !self.dirty.contains(page) {
            self.clean.insert(page);
        }
    }

    fn written(&mut self, page: u64) {
        self.clean.remove(page);
        self.dirty.insert(page);
    }

    fn removed(&mut self, page: u64) {
        self.clean.remove(page);
        self.dirty.remove(page);
    }

    fn page_to_evict(&self) -> Option<u64> {
        let mut rng = self.rng.borrow_mut();
        if !self.clean.is_empty() {
            return self.clean.random_pick(&mut *rng);
        }
        if !self.dirty.is_empty() {
            return self.dirty.random_pick(&mut *rng);
        }
        None
    }
}
