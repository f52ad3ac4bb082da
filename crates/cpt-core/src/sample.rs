//! Discrete weighted sampling used for transitions, observations and initial states.

use rand::Rng;
use thiserror::Error;

/// Result of a single draw.
///
/// `Fallback` marks a draw where accumulated weights never reached the uniform
/// threshold (weights summing slightly below one). The last positive-weight
/// item is returned in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Draw<T> {
    Hit(T),
    Fallback(T),
}

impl<T> Draw<T> {
    pub fn into_item(self) -> T {
        match self {
            Draw::Hit(item) | Draw::Fallback(item) => item,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Draw::Fallback(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Draw<U> {
        match self {
            Draw::Hit(item) => Draw::Hit(f(item)),
            Draw::Fallback(item) => Draw::Fallback(f(item)),
        }
    }
}

/// Errors raised when a distribution cannot produce any item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplingError {
    #[error("distribution has no item with positive weight")]
    Empty,
    #[error("{items} items paired with {weights} weights")]
    LengthMismatch { items: usize, weights: usize },
}

/// Parallel item/weight sequences sampled by cumulative walk.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSampler<T> {
    items: Vec<T>,
    weights: Vec<f64>,
}

impl<T> Default for DistributionSampler<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            weights: Vec::new(),
        }
    }
}

impl<T> DistributionSampler<T> {
    pub fn new(items: Vec<T>, weights: Vec<f64>) -> Result<Self, SamplingError> {
        if items.len() != weights.len() {
            return Err(SamplingError::LengthMismatch {
                items: items.len(),
                weights: weights.len(),
            });
        }
        Ok(Self { items, weights })
    }

    pub fn push(&mut self, item: T, weight: f64) {
        self.items.push(item);
        self.weights.push(weight);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Draws an item, reporting whether the drift fallback was taken.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Draw<&T>, SamplingError> {
        sample_parallel(&self.items, &self.weights, rng)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<T, SamplingError>
    where
        T: Clone,
    {
        self.draw(rng).map(|draw| draw.into_item().clone())
    }
}

/// Samples from borrowed parallel sequences without building a sampler.
pub fn sample_parallel<'a, T, R: Rng + ?Sized>(
    items: &'a [T],
    weights: &[f64],
    rng: &mut R,
) -> Result<Draw<&'a T>, SamplingError> {
    if items.len() != weights.len() {
        return Err(SamplingError::LengthMismatch {
            items: items.len(),
            weights: weights.len(),
        });
    }
    sample_index(weights, rng).map(|draw| draw.map(|index| &items[index]))
}

/// Samples an index into `weights`.
///
/// A single entry is returned without consuming randomness, whatever its weight.
/// Entries with non-positive weight are never selected otherwise.
pub fn sample_index<R: Rng + ?Sized>(
    weights: &[f64],
    rng: &mut R,
) -> Result<Draw<usize>, SamplingError> {
    match weights.len() {
        0 => return Err(SamplingError::Empty),
        1 => return Ok(Draw::Hit(0)),
        _ => {}
    }

    let threshold: f64 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    let mut last_positive = None;

    for (index, &weight) in weights.iter().enumerate() {
        if !(weight > 0.0) {
            continue;
        }
        cumulative += weight;
        last_positive = Some(index);
        if threshold <= cumulative {
            return Ok(Draw::Hit(index));
        }
    }

    last_positive.map(Draw::Fallback).ok_or(SamplingError::Empty)
}
