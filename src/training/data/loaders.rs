//! Batching data loader with per-epoch shuffling

use std::sync::Arc;

use candle_core::Device;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Batch, Example, MultiTaskDataset};
use crate::error::{Error, Result};

/// Configuration for [`DataLoader`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to reshuffle the example order at the start of every epoch
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Seed for the shuffling RNG
    pub seed: u64,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 2023,
        }
    }
}

impl DataLoaderConfig {
    /// Shuffled loader configuration for training
    pub fn train(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: false,
            seed,
        }
    }

    /// Sequential loader configuration for validation
    pub fn validation(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Yields [`Batch`]es of a shared dataset, one epoch at a time
pub struct DataLoader {
    dataset: Arc<MultiTaskDataset>,
    config: DataLoaderConfig,
    device: Device,
    rng: StdRng,
    epoch: usize,
}

impl DataLoader {
    /// Create a new loader
    pub fn new(dataset: Arc<MultiTaskDataset>, config: DataLoaderConfig, device: Device) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        debug!(
            batch_size = config.batch_size,
            shuffle = config.shuffle,
            examples = dataset.len(),
            "creating data loader"
        );
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            dataset,
            config,
            device,
            rng,
            epoch: 0,
        })
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &MultiTaskDataset {
        &self.dataset
    }

    /// Number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    /// Number of epochs started so far
    pub fn epochs_started(&self) -> usize {
        self.epoch
    }

    /// Start a new epoch. The order is fixed for the whole epoch; shuffled
    /// loaders draw a fresh permutation each call, sequential ones never do.
    pub fn epoch(&mut self) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }
        self.epoch += 1;

        BatchIter {
            dataset: &self.dataset,
            device: &self.device,
            order,
            batch_size: self.config.batch_size,
            drop_last: self.config.drop_last,
            cursor: 0,
        }
    }
}

/// Iterator over the batches of one epoch
pub struct BatchIter<'a> {
    dataset: &'a MultiTaskDataset,
    device: &'a Device,
    order: Vec<usize>,
    batch_size: usize,
    drop_last: bool,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len().saturating_sub(self.cursor);
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let examples: Vec<&Example> = self.order[self.cursor..end]
            .iter()
            .filter_map(|&i| self.dataset.get(i))
            .collect();
        self.cursor = end;
        Some(Batch::from_examples(&examples, self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::LabelPair;

    fn dataset(n: usize) -> Arc<MultiTaskDataset> {
        let examples = (0..n)
            .map(|i| Example::new(vec![i as u32; 2], vec![1, 1], LabelPair::disaster((i % 2) as u32)))
            .collect();
        Arc::new(MultiTaskDataset::new(examples).unwrap())
    }

    fn first_tokens(loader: &mut DataLoader) -> Vec<u32> {
        loader
            .epoch()
            .flat_map(|b| {
                let ids = b.unwrap().input_ids.to_vec2::<u32>().unwrap();
                ids.into_iter().map(|row| row[0]).collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_sequential_loader_is_deterministic() {
        let mut loader = DataLoader::new(dataset(10), DataLoaderConfig::validation(4), Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 3);
        let first = first_tokens(&mut loader);
        let second = first_tokens(&mut loader);
        assert_eq!(first, (0..10).collect::<Vec<_>>());
        assert_eq!(first, second);
    }

    #[test]
    fn test_shuffled_loader_visits_every_example_once() {
        let mut loader = DataLoader::new(dataset(17), DataLoaderConfig::train(5, 7), Device::Cpu).unwrap();
        let mut seen = first_tokens(&mut loader);
        seen.sort_unstable();
        assert_eq!(seen, (0..17).collect::<Vec<_>>());
        assert_eq!(loader.epochs_started(), 1);
    }

    #[test]
    fn test_drop_last() {
        let config = DataLoaderConfig {
            drop_last: true,
            ..DataLoaderConfig::validation(4)
        };
        let mut loader = DataLoader::new(dataset(10), config, Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.epoch().count(), 2);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = DataLoaderConfig::validation(0);
        assert!(DataLoader::new(dataset(3), config, Device::Cpu).is_err());
    }
}
