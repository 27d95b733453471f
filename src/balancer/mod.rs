use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Picks one item out of a non-empty slice of candidates.
///
/// Implementations must be safe for concurrent callers; the policy is fixed
/// at construction.
pub trait LoadBalance<T>: Send + Sync {
    /// # Panics
    ///
    /// Panics if `items` is empty. Callers (the router) guarantee
    /// non-emptiness before selecting.
    fn resolve<'a>(&self, items: &'a [T]) -> &'a T;
}

/// Selection policy, chosen through [`RouterConfig`](crate::RouterConfig).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerPolicy {
    #[default]
    RoundRobin,
    Random,
}

impl LoadBalancerPolicy {
    pub(crate) fn build<T>(self) -> Box<dyn LoadBalance<T>>
    where
        T: Send + Sync,
    {
        match self {
            LoadBalancerPolicy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancerPolicy::Random => Box::new(Random),
        }
    }
}

/// Cyclic selection with an atomic cursor. Fair under concurrency, no
/// starvation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl<T: Send + Sync> LoadBalance<T> for RoundRobin {
    fn resolve<'a>(&self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "cannot balance over zero backends");
        &items[self.next_index(items.len())]
    }
}

/// Uniform random selection.
#[derive(Debug, Default)]
pub struct Random;

impl<T: Send + Sync> LoadBalance<T> for Random {
    fn resolve<'a>(&self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "cannot balance over zero backends");
        if items.len() == 1 {
            return &items[0];
        }
        &items[rand::thread_rng().gen_range(0..items.len())]
    }
}
