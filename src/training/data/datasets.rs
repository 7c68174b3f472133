//! In-memory datasets of tokenized multi-task examples

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use super::Example;
use crate::error::{Error, Result};
use crate::task::Task;

/// A dataset of fixed-length examples, each labelled for one or both tasks
#[derive(Debug, Clone, Default)]
pub struct MultiTaskDataset {
    examples: Vec<Example>,
}

impl MultiTaskDataset {
    /// Build a dataset, checking lengths and label ranges
    pub fn new(examples: Vec<Example>) -> Result<Self> {
        let dataset = Self { examples };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Load one JSON object per line:
    /// `{"input_ids": [...], "attention_mask": [...], "disaster": 1, "sentiment": null}`
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut examples = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let example: Example = serde_json::from_str(&line).map_err(|e| {
                Error::data(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            examples.push(example);
        }

        let dataset = Self::new(examples)?;
        info!(
            path = %path.display(),
            examples = dataset.len(),
            disaster = dataset.count_labelled(Task::Disaster),
            sentiment = dataset.count_labelled(Task::Sentiment),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Concatenate two datasets into one mixed-task dataset
    pub fn concat(first: Self, second: Self) -> Result<Self> {
        let mut examples = first.examples;
        examples.extend(second.examples);
        Self::new(examples)
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Whether the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Example at `index`
    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    /// All examples in storage order
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Fixed sequence length, if the dataset is non-empty
    pub fn seq_len(&self) -> Option<usize> {
        self.examples.first().map(Example::len)
    }

    /// Number of examples carrying a label for `task`
    pub fn count_labelled(&self, task: Task) -> usize {
        self.examples
            .iter()
            .filter(|e| e.labels.get(task).is_some())
            .count()
    }

    /// Keep only the examples labelled for `task`, dropping the other task's labels
    pub fn only(&self, task: Task) -> Self {
        let examples = self
            .examples
            .iter()
            .filter_map(|e| {
                e.labels.get(task).map(|label| {
                    let labels = match task {
                        Task::Disaster => super::LabelPair::disaster(label),
                        Task::Sentiment => super::LabelPair::sentiment(label),
                    };
                    Example::new(e.input_ids.clone(), e.attention_mask.clone(), labels)
                })
            })
            .collect();
        Self { examples }
    }

    fn validate(&self) -> Result<()> {
        let Some(seq_len) = self.seq_len() else {
            return Ok(());
        };

        for (i, example) in self.examples.iter().enumerate() {
            if example.input_ids.len() != seq_len || example.attention_mask.len() != seq_len {
                return Err(Error::data(format!(
                    "example {} has length {}, dataset length is {}",
                    i,
                    example.input_ids.len(),
                    seq_len
                )));
            }
            if example.labels.disaster.is_none() && example.labels.sentiment.is_none() {
                return Err(Error::data(format!("example {} has no label for either task", i)));
            }
            for task in Task::ALL {
                if let Some(label) = example.labels.get(task) {
                    if label as usize >= task.num_classes() {
                        return Err(Error::data(format!(
                            "example {} has {} label {}, expected < {}",
                            i,
                            task,
                            label,
                            task.num_classes()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::LabelPair;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_jsonl() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"input_ids": [5, 6, 0], "attention_mask": [1, 1, 0], "disaster": 1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"input_ids": [7, 0, 0], "attention_mask": [1, 0, 0], "disaster": null, "sentiment": 2}}"#
        )
        .unwrap();

        let dataset = MultiTaskDataset::from_jsonl(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.seq_len(), Some(3));
        assert_eq!(dataset.get(0).unwrap().labels, LabelPair::disaster(1));
        assert_eq!(dataset.get(1).unwrap().labels, LabelPair::sentiment(2));
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let bad = Example::new(vec![1], vec![1], LabelPair::disaster(2));
        assert!(matches!(MultiTaskDataset::new(vec![bad]), Err(Error::Data(_))));
    }

    #[test]
    fn test_unlabelled_example_rejected() {
        let bad = Example::new(vec![1], vec![1], LabelPair::default());
        assert!(MultiTaskDataset::new(vec![bad]).is_err());
    }

    #[test]
    fn test_concat_and_only() {
        let d = MultiTaskDataset::new(vec![
            Example::new(vec![1, 2], vec![1, 1], LabelPair::disaster(0)),
            Example::new(vec![3, 4], vec![1, 1], LabelPair::disaster(1)),
        ])
        .unwrap();
        let s = MultiTaskDataset::new(vec![Example::new(vec![5, 6], vec![1, 0], LabelPair::sentiment(1))])
            .unwrap();

        let mixed = MultiTaskDataset::concat(d, s).unwrap();
        assert_eq!(mixed.len(), 3);
        assert_eq!(mixed.count_labelled(Task::Disaster), 2);
        assert_eq!(mixed.count_labelled(Task::Sentiment), 1);

        let disaster_only = mixed.only(Task::Disaster);
        assert_eq!(disaster_only.len(), 2);
        assert_eq!(disaster_only.count_labelled(Task::Sentiment), 0);
    }
}
