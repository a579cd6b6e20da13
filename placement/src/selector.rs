//! Weighted random selection.
//!
//! A key with weight `w` is drawn with probability `w / Σw`. Iteration order
//! of the underlying map does not matter: the draw is compared against the
//! running sum of weights, so each key owns a slice of `[0, Σw)` exactly as
//! wide as its weight.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

/// Picks one key from `weights` in proportion to its weight.
///
/// Non-positive and non-finite weights are never selected. Returns `None`
/// when nothing is selectable, which callers should check for up front.
pub fn choose<'a, K, R>(weights: &'a HashMap<K, f64>, rng: &mut R) -> Option<&'a K>
where
  R: Rng,
{
  choose_from(weights.iter().map(|(k, w)| (k, *w)), rng)
}

fn choose_from<'a, K, I, R>(entries: I, rng: &mut R) -> Option<&'a K>
where
  I: Iterator<Item = (&'a K, f64)> + Clone,
  R: Rng,
{
  let selectable = |w: f64| w.is_finite() && w > 0.0;
  let total: f64 = entries.clone().filter(|(_, w)| selectable(*w)).map(|(_, w)| w).sum();
  if !(total > 0.0) {
    return None;
  }

  let draw = rng.random::<f64>() * total;
  let mut upto = 0.0;
  let mut last = None;
  for (key, weight) in entries.filter(|(_, w)| selectable(*w)) {
    upto += weight;
    if upto > draw {
      return Some(key);
    }
    last = Some(key);
  }
  // Rounding can leave the draw at the very top of the range.
  last
}

/// A pool of weighted keys drawn without replacement.
#[derive(Debug, Clone)]
pub struct WeightedPool<K> {
  weights: HashMap<K, f64>,
}

impl<K> Default for WeightedPool<K> {
  fn default() -> Self {
    Self {
      weights: HashMap::new(),
    }
  }
}

impl<K: Eq + Hash + Clone> WeightedPool<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds or replaces a key. Keys without a positive, finite weight are ignored.
  pub fn insert(&mut self, key: K, weight: f64) {
    if weight.is_finite() && weight > 0.0 {
      self.weights.insert(key, weight);
    }
  }

  pub fn remove(&mut self, key: &K) -> Option<f64> {
    self.weights.remove(key)
  }

  pub fn get(&self, key: &K) -> Option<f64> {
    self.weights.get(key).copied()
  }

  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  pub fn total_weight(&self) -> f64 {
    self.weights.values().sum()
  }

  /// Draws one key without removing it.
  pub fn peek<R: Rng>(&self, rng: &mut R) -> Option<&K> {
    choose(&self.weights, rng)
  }

  /// Draws one key and removes it from the pool.
  pub fn draw<R: Rng>(&mut self, rng: &mut R) -> Option<K> {
    let key = self.peek(rng)?.clone();
    self.weights.remove(&key);
    Some(key)
  }

  pub fn as_map(&self) -> &HashMap<K, f64> {
    &self.weights
  }
}

impl<K: Eq + Hash + Clone> FromIterator<(K, f64)> for WeightedPool<K> {
  fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
    let mut pool = Self::new();
    for (key, weight) in iter {
      pool.insert(key, weight);
    }
    pool
  }
}
