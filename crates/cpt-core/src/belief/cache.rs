//! Marginals cache keyed by model identity and the exact contents of a belief vector.

use super::point::ObservationMarginals;
use crate::model::ModelId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Bit pattern of a belief vector. Signed zeros are folded together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BeliefKey(Vec<u64>);

impl BeliefKey {
    pub fn from_probabilities(probabilities: &[f64]) -> Self {
        Self(
            probabilities
                .iter()
                .map(|p| if *p == 0.0 { 0 } else { p.to_bits() })
                .collect(),
        )
    }
}

/// Stores prepared marginals, evicting the oldest insertion first.
#[derive(Debug)]
pub struct MarginalCache {
    entries: HashMap<(ModelId, BeliefKey), Arc<ObservationMarginals>>,
    order: VecDeque<(ModelId, BeliefKey)>,
    capacity: usize,
}

impl MarginalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, model: ModelId, key: &BeliefKey) -> Option<Arc<ObservationMarginals>> {
        self.entries.get(&(model, key.clone())).cloned()
    }

    pub fn insert(&mut self, model: ModelId, key: BeliefKey, marginals: Arc<ObservationMarginals>) {
        if self.capacity == 0 {
            return;
        }
        let key = (model, key);
        if self.entries.insert(key.clone(), marginals).is_none() {
            self.order.push_back(key);
        }
        self.evict_if_needed();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_if_needed(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}
