//! Batch collation and per-task splitting

use candle_core::{DType, Device, Tensor};
use tracing::debug;

use super::{Example, LabelPair};
use crate::error::{Error, Result};
use crate::task::Task;

/// A mixed-task batch with its input tensors on the target device
#[derive(Debug, Clone)]
pub struct Batch {
    /// Token ids [batch_size, seq_len], u32
    pub input_ids: Tensor,
    /// Attention mask [batch_size, seq_len], u32
    pub attention_mask: Tensor,
    /// Labels in batch order
    pub labels: Vec<LabelPair>,
}

impl Batch {
    /// Collate examples into a batch. All examples must share one sequence length.
    pub fn from_examples(examples: &[&Example], device: &Device) -> Result<Self> {
        let seq_len = examples.first().map(|e| e.len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(examples.len() * seq_len);
        let mut mask = Vec::with_capacity(examples.len() * seq_len);
        let mut labels = Vec::with_capacity(examples.len());

        for (i, example) in examples.iter().enumerate() {
            if example.input_ids.len() != seq_len || example.attention_mask.len() != seq_len {
                return Err(Error::data(format!(
                    "example {} has length {} (mask {}), expected fixed length {}",
                    i,
                    example.input_ids.len(),
                    example.attention_mask.len(),
                    seq_len
                )));
            }
            ids.extend_from_slice(&example.input_ids);
            mask.extend_from_slice(&example.attention_mask);
            labels.push(example.labels);
        }

        let shape = (examples.len(), seq_len);
        Ok(Self {
            input_ids: Tensor::from_vec(ids, shape, device)?,
            attention_mask: Tensor::from_vec(mask, shape, device)?,
            labels,
        })
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no examples
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Sub-batch of the examples labelled for `task`, in original order
    pub fn split(&self, task: Task) -> SubBatch {
        let (positions, targets): (Vec<u32>, Vec<u32>) = self
            .labels
            .iter()
            .enumerate()
            .filter_map(|(i, labels)| labels.get(task).map(|label| (i as u32, label)))
            .unzip();

        debug!(%task, selected = positions.len(), batch = self.len(), "split batch");
        SubBatch {
            task,
            positions,
            targets,
        }
    }
}

/// The examples of one [`Batch`] that carry a label for a given task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBatch {
    /// Task the sub-batch belongs to
    pub task: Task,
    /// Row positions in the parent batch, ascending
    pub positions: Vec<u32>,
    /// Class targets aligned with `positions`
    pub targets: Vec<u32>,
}

impl SubBatch {
    /// Number of selected examples
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no example of the parent batch is labelled for this task
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Select this sub-batch's rows from a tensor whose first dimension is the
    /// parent batch. An empty sub-batch yields a `[0, ...]` tensor of the same
    /// dtype instead of touching the source.
    pub fn select_rows(&self, source: &Tensor) -> Result<Tensor> {
        if self.is_empty() {
            let mut dims = source.dims().to_vec();
            if dims.is_empty() {
                return Err(Error::data("cannot select rows from a scalar tensor"));
            }
            dims[0] = 0;
            return Ok(Tensor::zeros(dims, source.dtype(), source.device())?);
        }
        let index = Tensor::new(self.positions.as_slice(), source.device())?;
        Ok(source.index_select(&index, 0)?)
    }

    /// Targets as a u32 tensor of shape [len]
    pub fn targets_tensor(&self, device: &Device) -> Result<Tensor> {
        if self.is_empty() {
            return Ok(Tensor::zeros(0, DType::U32, device)?);
        }
        Ok(Tensor::new(self.targets.as_slice(), device)?)
    }

    /// Token ids and attention mask of the selected examples
    pub fn inputs(&self, batch: &Batch) -> Result<(Tensor, Tensor)> {
        Ok((
            self.select_rows(&batch.input_ids)?,
            self.select_rows(&batch.attention_mask)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn example(token: u32, labels: LabelPair) -> Example {
        Example::new(vec![token; 4], vec![1, 1, 1, 0], labels)
    }

    fn batch_of(labels: &[LabelPair]) -> Batch {
        let examples: Vec<Example> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| example(i as u32, *l))
            .collect();
        let refs: Vec<&Example> = examples.iter().collect();
        Batch::from_examples(&refs, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_mixed_batch_split() {
        // three disaster rows and one sentiment-only row
        let batch = batch_of(&[
            LabelPair::disaster(0),
            LabelPair::disaster(1),
            LabelPair::sentiment(2),
            LabelPair::disaster(0),
        ]);

        let d1 = batch.split(Task::Disaster);
        assert_eq!(d1.len(), 3);
        assert_eq!(d1.positions, vec![0, 1, 3]);
        assert_eq!(d1.targets, vec![0, 1, 0]);

        let d2 = batch.split(Task::Sentiment);
        assert_eq!(d2.len(), 1);
        assert_eq!(d2.positions, vec![2]);
        assert_eq!(d2.targets, vec![2]);
    }

    #[test]
    fn test_split_keeps_inputs_aligned() {
        let batch = batch_of(&[
            LabelPair::sentiment(1),
            LabelPair::disaster(1),
            LabelPair::sentiment(0),
        ]);
        let sub = batch.split(Task::Sentiment);
        let (ids, mask) = sub.inputs(&batch).unwrap();
        let ids = ids.to_vec2::<u32>().unwrap();
        assert_eq!(ids, vec![vec![0; 4], vec![2; 4]]);
        assert_eq!(mask.dims(), &[2, 4]);
    }

    #[test]
    fn test_all_absent_gives_empty_sub_batch() {
        let batch = batch_of(&[LabelPair::disaster(1), LabelPair::disaster(0)]);
        let sub = batch.split(Task::Sentiment);
        assert!(sub.is_empty());

        let logits = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let selected = sub.select_rows(&logits).unwrap();
        assert_eq!(selected.dims(), &[0, 3]);
        assert_eq!(sub.targets_tensor(&Device::Cpu).unwrap().dims(), &[0]);
    }

    #[test]
    fn test_ragged_examples_rejected() {
        let a = Example::new(vec![1, 2, 3], vec![1, 1, 1], LabelPair::disaster(0));
        let b = Example::new(vec![1, 2], vec![1, 1], LabelPair::disaster(1));
        let err = Batch::from_examples(&[&a, &b], &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    fn arb_labels() -> impl Strategy<Value = LabelPair> {
        prop_oneof![
            (0u32..2).prop_map(LabelPair::disaster),
            (0u32..3).prop_map(LabelPair::sentiment),
            ((0u32..2), (0u32..3)).prop_map(|(d, s)| LabelPair {
                disaster: Some(d),
                sentiment: Some(s),
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_sub_batch_matches_present_labels(labels in prop::collection::vec(arb_labels(), 1..24)) {
            let batch = batch_of(&labels);
            for task in Task::ALL {
                let sub = batch.split(task);
                let present = labels.iter().filter(|l| l.get(task).is_some()).count();
                prop_assert_eq!(sub.len(), present);
                for (pos, target) in sub.positions.iter().zip(&sub.targets) {
                    prop_assert_eq!(labels[*pos as usize].get(task), Some(*target));
                }
                prop_assert!(sub.positions.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
