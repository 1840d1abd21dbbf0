use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

use crate::ai::Experience;
use crate::env::AlphaState;

/// A sampled minibatch. `indices` identify the slots for priority updates and
/// `weights` are importance-sampling corrections (all 1.0 for uniform replay).
pub struct SampledBatch {
    pub experiences: Vec<Experience>,
    pub indices: Vec<usize>,
    pub weights: Vec<f32>,
}

pub trait ReplayMemory {
    fn push(&mut self, experience: Experience);

    /// Panics when fewer than `batch_size` experiences are stored.
    fn sample(&mut self, batch_size: usize) -> SampledBatch;

    /// Feed back per-sample TD errors. Uniform replay ignores them.
    fn update_priorities(&mut self, _indices: &[usize], _priorities: &[f32]) {}

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity ring buffer with uniform sampling.
pub struct ReplayBuffer {
    buffer: Vec<Experience>,
    capacity: usize,
    position: usize,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, rng: StdRng) -> Self {
        ReplayBuffer {
            buffer: Vec::with_capacity(capacity),
            capacity,
            position: 0,
            rng,
        }
    }
}

impl ReplayMemory for ReplayBuffer {
    fn push(&mut self, experience: Experience) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(experience);
        } else {
            self.buffer[self.position] = experience;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    fn sample(&mut self, batch_size: usize) -> SampledBatch {
        assert!(batch_size <= self.buffer.len(), "Not enough experiences to sample");
        let indices = index::sample(&mut self.rng, self.buffer.len(), batch_size).into_vec();
        SampledBatch {
            experiences: indices.iter().map(|&i| self.buffer[i].clone()).collect(),
            weights: vec![1.0; batch_size],
            indices,
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Binary sum tree over leaf priorities, laid out as an implicit heap with the
/// leaves at `capacity - 1 ..= 2 * capacity - 2`.
struct SumTree {
    nodes: Vec<f64>,
    capacity: usize,
}

impl SumTree {
    fn new(capacity: usize) -> Self {
        SumTree {
            nodes: vec![0.0; 2 * capacity - 1],
            capacity,
        }
    }

    fn total(&self) -> f64 {
        self.nodes[0]
    }

    fn get(&self, slot: usize) -> f64 {
        self.nodes[slot + self.capacity - 1]
    }

    fn set(&mut self, slot: usize, priority: f64) {
        let mut idx = slot + self.capacity - 1;
        let change = priority - self.nodes[idx];
        self.nodes[idx] = priority;
        while idx > 0 {
            idx = (idx - 1) / 2;
            self.nodes[idx] += change;
        }
    }

    /// Slot whose cumulative priority range contains `value`.
    fn find(&self, mut value: f64) -> usize {
        let mut idx = 0;
        while idx < self.capacity - 1 {
            let left = 2 * idx + 1;
            if value <= self.nodes[left] || self.nodes[left + 1] <= 0.0 {
                idx = left;
            } else {
                value -= self.nodes[left];
                idx = left + 1;
            }
        }
        idx + 1 - self.capacity
    }
}

/// Proportional prioritized replay (Schaul et al.), with importance-sampling
/// exponent `beta` annealed linearly towards 1.
pub struct PrioritizedReplayBuffer {
    buffer: Vec<Experience>,
    tree: SumTree,
    capacity: usize,
    position: usize,
    alpha: f64,
    beta: f64,
    beta_increment: f64,
    max_priority: f64,
    rng: StdRng,
}

impl PrioritizedReplayBuffer {
    pub const EPSILON: f64 = 1e-6;

    pub fn new(capacity: usize, alpha: f64, beta: f64, beta_increment: f64, rng: StdRng) -> Self {
        assert!(capacity > 0, "replay capacity must be positive");
        PrioritizedReplayBuffer {
            buffer: Vec::with_capacity(capacity),
            tree: SumTree::new(capacity),
            capacity,
            position: 0,
            alpha,
            beta,
            beta_increment,
            max_priority: 1.0,
            rng,
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl ReplayMemory for PrioritizedReplayBuffer {
    fn push(&mut self, experience: Experience) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(experience);
        } else {
            self.buffer[self.position] = experience;
        }
        // new transitions are replayed at least once
        self.tree
            .set(self.position, self.max_priority.powf(self.alpha));
        self.position = (self.position + 1) % self.capacity;
    }

    fn sample(&mut self, batch_size: usize) -> SampledBatch {
        let len = self.buffer.len();
        assert!(batch_size <= len, "Not enough experiences to sample");
        let total = self.tree.total();
        let segment = total / batch_size as f64;
        let min_prob = (0..len)
            .map(|i| self.tree.get(i))
            .fold(f64::INFINITY, f64::min)
            / total;
        let max_weight = (len as f64 * min_prob).powf(-self.beta);

        let mut experiences = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let value = segment * (i as f64 + self.rng.random::<f64>());
            let slot = self.tree.find(value).min(len - 1);
            let prob = self.tree.get(slot) / total;
            let weight = (len as f64 * prob).powf(-self.beta) / max_weight;
            experiences.push(self.buffer[slot].clone());
            indices.push(slot);
            weights.push(weight as f32);
        }
        self.beta = (self.beta + self.beta_increment).min(1.0);
        SampledBatch {
            experiences,
            indices,
            weights,
        }
    }

    fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) {
        for (&slot, &p) in indices.iter().zip(priorities) {
            let p = (p.abs() as f64) + Self::EPSILON;
            self.max_priority = self.max_priority.max(p);
            self.tree.set(slot, p.powf(self.alpha));
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Folds consecutive single-step transitions into n-step transitions.
///
/// Rewards are summed with discount `gamma`; the emitted `discount` is
/// `gamma^k` for the k steps actually folded. Everything pending is flushed when
/// an episode ends.
pub struct MultiStepAccumulator {
    n: usize,
    gamma: f32,
    pending: VecDeque<(AlphaState, usize, f32)>,
}

impl MultiStepAccumulator {
    pub fn new(n: usize, gamma: f32) -> Self {
        MultiStepAccumulator {
            n: n.max(1),
            gamma,
            pending: VecDeque::with_capacity(n.max(1)),
        }
    }

    /// Drop transitions left over from an interrupted episode.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn push(
        &mut self,
        state: AlphaState,
        action: usize,
        reward: f32,
        next_state: &AlphaState,
        done: bool,
    ) -> Vec<Experience> {
        self.pending.push_back((state, action, reward));
        let mut out = Vec::new();
        if done {
            while !self.pending.is_empty() {
                out.push(self.fold_front(next_state, true));
                self.pending.pop_front();
            }
        } else if self.pending.len() == self.n {
            out.push(self.fold_front(next_state, false));
            self.pending.pop_front();
        }
        out
    }

    fn fold_front(&self, next_state: &AlphaState, done: bool) -> Experience {
        let mut ret = 0.0;
        let mut discount = 1.0;
        for (_, _, r) in &self.pending {
            ret += discount * r;
            discount *= self.gamma;
        }
        let (state, action, _) = &self.pending[0];
        Experience {
            state: state.clone(),
            action: *action,
            reward: ret,
            next_state: next_state.clone(),
            done,
            discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn state(tokens: &[usize]) -> AlphaState {
        AlphaState {
            tokens: tokens.to_vec(),
            mask: vec![true; crate::expr::SIZE_ACTION],
        }
    }

    fn experience(action: usize) -> Experience {
        Experience {
            state: state(&[]),
            action,
            reward: 0.0,
            next_state: state(&[action + 1]),
            done: false,
            discount: 1.0,
        }
    }

    #[test]
    fn test_ring_buffer_overwrites() {
        let mut buf = ReplayBuffer::new(5, StdRng::seed_from_u64(0));
        assert!(buf.is_empty());
        for a in 0..10 {
            buf.push(experience(a));
        }
        assert_eq!(buf.len(), 5);
        let batch = buf.sample(5);
        let mut actions: Vec<usize> = batch.experiences.iter().map(|e| e.action).collect();
        actions.sort();
        assert_eq!(actions, vec![5, 6, 7, 8, 9]);
        assert!(batch.weights.iter().all(|&w| w == 1.0));
    }

    #[test]
    #[should_panic(expected = "Not enough experiences")]
    fn test_sample_too_many() {
        let mut buf = ReplayBuffer::new(10, StdRng::seed_from_u64(0));
        buf.push(experience(0));
        buf.sample(5);
    }

    #[test]
    fn test_sum_tree_find() {
        let mut tree = SumTree::new(5);
        for (slot, p) in [1.0, 2.0, 3.0, 4.0, 0.0].into_iter().enumerate() {
            tree.set(slot, p);
        }
        assert_eq!(tree.total(), 10.0);
        // each slot owns a share of [0, total) proportional to its priority
        let mut hits = [0usize; 5];
        for k in 0..100 {
            hits[tree.find(k as f64 * 0.1 + 0.05)] += 1;
        }
        assert_eq!(hits, [10, 20, 30, 40, 0]);
        tree.set(1, 0.0);
        assert_eq!(tree.total(), 8.0);
    }

    #[test]
    fn test_prioritized_sampling_prefers_high_error() {
        let mut buf = PrioritizedReplayBuffer::new(4, 1.0, 0.4, 0.1, StdRng::seed_from_u64(7));
        for a in 0..4 {
            buf.push(experience(a));
        }
        buf.update_priorities(&[0, 1, 2, 3], &[0.0, 0.0, 0.0, 100.0]);
        let batch = buf.sample(4);
        let hits = batch.experiences.iter().filter(|e| e.action == 3).count();
        assert!(hits >= 3, "got {hits}");
        for (&slot, &w) in batch.indices.iter().zip(&batch.weights) {
            assert!(w > 0.0 && w <= 1.0 + 1e-6, "slot {slot} weight {w}");
        }
        assert!((buf.beta() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_multi_step_folds_rewards() {
        let mut acc = MultiStepAccumulator::new(3, 0.5);
        let s: Vec<AlphaState> = (0..5).map(|i| state(&vec![1; i])).collect();

        assert!(acc.push(s[0].clone(), 0, 1.0, &s[1], false).is_empty());
        assert!(acc.push(s[1].clone(), 1, 1.0, &s[2], false).is_empty());
        let out = acc.push(s[2].clone(), 2, 1.0, &s[3], false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].state, s[0]);
        assert_eq!(out[0].next_state, s[3]);
        assert!((out[0].reward - 1.75).abs() < 1e-6);
        assert!((out[0].discount - 0.125).abs() < 1e-6);

        let out = acc.push(s[3].clone(), 3, 4.0, &s[4], true);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|e| e.done && e.next_state == s[4]));
        assert_eq!(out[0].action, 1);
        assert!((out[0].reward - (1.0 + 0.5 + 1.0)).abs() < 1e-6);
        assert_eq!(out[2].action, 3);
        assert!((out[2].reward - 4.0).abs() < 1e-6);
    }
}
