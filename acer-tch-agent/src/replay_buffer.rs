//! Replay buffer of transition sequences.
use crate::acer::Transition;
use acer_core::{ExperienceBufferBase, ReplayBufferBase};
use anyhow::{bail, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Configuration of [`SequenceBuffer`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SequenceBufferConfig {
    pub(super) capacity: usize,
    pub(super) max_use: usize,
    pub(super) seed: u64,
}

impl Default for SequenceBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            max_use: 16,
            seed: 42,
        }
    }
}

impl SequenceBufferConfig {
    /// Sets the maximum number of sequences in the buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of times a sequence can be sampled before it is evicted.
    pub fn max_use(mut self, max_use: usize) -> Self {
        self.max_use = max_use;
        self
    }

    /// Sets the seed of the random number generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

struct Entry {
    seq: Vec<Transition>,
    n_uses: usize,
}

/// FIFO buffer of transition sequences.
///
/// When the buffer is full, pushing a sequence evicts the oldest one. A
/// sequence is also evicted once it has been sampled `max_use` times.
pub struct SequenceBuffer {
    capacity: usize,
    max_use: usize,
    entries: VecDeque<Entry>,
    rng: fastrand::Rng,
}

impl SequenceBuffer {
    /// The number of sequences in the buffer.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the buffer holds no sequence.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExperienceBufferBase for SequenceBuffer {
    type Item = Vec<Transition>;

    fn push(&mut self, seq: Self::Item) -> Result<()> {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry { seq, n_uses: 0 });
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl ReplayBufferBase for SequenceBuffer {
    type Config = SequenceBufferConfig;
    type Batch = Vec<Vec<Transition>>;

    fn build(config: &Self::Config) -> Self {
        Self {
            capacity: config.capacity.max(1),
            max_use: config.max_use.max(1),
            entries: VecDeque::with_capacity(config.capacity),
            rng: fastrand::Rng::with_seed(config.seed),
        }
    }

    /// Samples `size` distinct sequences uniformly.
    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        if size > self.entries.len() {
            bail!(
                "Cannot sample {} sequences from a buffer of {}",
                size,
                self.entries.len()
            );
        }

        let mut ixs = (0..self.entries.len()).collect::<Vec<_>>();
        self.rng.shuffle(&mut ixs);
        ixs.truncate(size);

        let batch = ixs
            .iter()
            .map(|&ix| {
                let entry = &mut self.entries[ix];
                entry.n_uses += 1;
                entry.seq.clone()
            })
            .collect();

        let max_use = self.max_use;
        let len = self.entries.len();
        self.entries.retain(|entry| entry.n_uses < max_use);
        if self.entries.len() < len {
            trace!("Evict {} sequences", len - self.entries.len());
        }

        Ok(batch)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::acer::{BehaviorLogit, Transition};
    use tch::Tensor;

    fn sequence(id: f32) -> Vec<Transition> {
        vec![Transition {
            obs: Tensor::from_slice(&[id]),
            next_obs: Tensor::from_slice(&[id]),
            logit: BehaviorLogit::Discrete(Tensor::zeros([2], tch::kind::FLOAT_CPU)),
            action: Tensor::from(0i64),
            reward: id,
            done: false,
            weight: None,
        }]
    }

    fn buffer(capacity: usize, max_use: usize) -> SequenceBuffer {
        let config = SequenceBufferConfig::default()
            .capacity(capacity)
            .max_use(max_use);
        SequenceBuffer::build(&config)
    }

    #[test]
    fn test_fifo_eviction() -> Result<()> {
        let mut buffer = buffer(3, 16);
        for i in 0..5 {
            buffer.push(sequence(i as f32))?;
        }
        assert_eq!(buffer.len(), 3);

        let mut rewards = buffer
            .batch(3)?
            .iter()
            .map(|seq| seq[0].reward)
            .collect::<Vec<_>>();
        rewards.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_distinct_samples() -> Result<()> {
        let mut buffer = buffer(10, 16);
        for i in 0..10 {
            buffer.push(sequence(i as f32))?;
        }

        let mut rewards = buffer
            .batch(6)?
            .iter()
            .map(|seq| seq[0].reward as i64)
            .collect::<Vec<_>>();
        rewards.sort();
        rewards.dedup();
        assert_eq!(rewards.len(), 6);
        Ok(())
    }

    #[test]
    fn test_max_use() -> Result<()> {
        let mut buffer = buffer(10, 2);
        for i in 0..4 {
            buffer.push(sequence(i as f32))?;
        }
        buffer.batch(4)?;
        assert_eq!(buffer.len(), 4);
        buffer.batch(4)?;
        assert!(buffer.is_empty());
        Ok(())
    }

    #[test]
    fn test_batch_larger_than_buffer() -> Result<()> {
        let mut buffer = buffer(10, 16);
        buffer.push(sequence(0.0))?;
        assert!(buffer.batch(2).is_err());
        Ok(())
    }
}
