//! Mock data shared by the integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use hydra::training::data::{Example, LabelPair, MultiTaskDataset};

/// Sequence length of every mock example
pub const SEQ_LEN: usize = 6;

/// `n` disaster-labelled examples with alternating labels
pub fn disaster_examples(n: usize) -> Vec<Example> {
    (0..n)
        .map(|i| {
            let label = (i % 2) as u32;
            let ids = vec![0, 5 + label * 20, 7 + (i % 11) as u32, 9, 1, 1];
            Example::new(ids, vec![1, 1, 1, 1, 0, 0], LabelPair::disaster(label))
        })
        .collect()
}

/// `n` sentiment-labelled examples cycling through the three classes
pub fn sentiment_examples(n: usize) -> Vec<Example> {
    (0..n)
        .map(|i| {
            let label = (i % 3) as u32;
            let ids = vec![0, 60 + label * 15, 61 + (i % 7) as u32, 2, 3, 1];
            Example::new(ids, vec![1, 1, 1, 1, 1, 0], LabelPair::sentiment(label))
        })
        .collect()
}

/// Dataset of the given examples
pub fn dataset(examples: Vec<Example>) -> MultiTaskDataset {
    MultiTaskDataset::new(examples).unwrap()
}

/// Write examples as JSONL to `path`
pub fn write_jsonl(path: &Path, examples: &[Example]) {
    let mut file = std::fs::File::create(path).unwrap();
    for example in examples {
        writeln!(file, "{}", serde_json::to_string(example).unwrap()).unwrap();
    }
}
