//! The Hydra network: shared encoder plus disaster and sentiment heads

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::bert::Config as BertConfig;
use tracing::{info, instrument, warn};

use super::{ClassificationHead, HeadLogits, MultiTaskModel};
use crate::encoder::SharedEncoder;
use crate::error::{Error, Result};
use crate::task::Task;

/// Shared encoder with one classification head per task
pub struct HydraNet {
    encoder: SharedEncoder,
    disaster_head: ClassificationHead,
    sentiment_head: ClassificationHead,
    var_map: VarMap,
    device: Device,
}

impl HydraNet {
    /// Build a freshly initialised network on `device`
    pub fn new(config: &BertConfig, head_dropout: f32, device: &Device) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let encoder = SharedEncoder::load(vb.clone(), config)?;
        let hidden = encoder.hidden_size();
        let disaster_head = ClassificationHead::new(
            vb.pp("disaster_head"),
            hidden,
            Task::Disaster.num_classes(),
            head_dropout,
        )?;
        let sentiment_head = ClassificationHead::new(
            vb.pp("sentiment_head"),
            hidden,
            Task::Sentiment.num_classes(),
            head_dropout,
        )?;

        Ok(Self {
            encoder,
            disaster_head,
            sentiment_head,
            var_map,
            device: device.clone(),
        })
    }

    /// Device holding the parameters
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.var_map.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Parameters with their names (`embeddings.*`, `encoder.layer.N.*`,
    /// `disaster_head.*`, `sentiment_head.*`), sorted by name
    pub fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        let vars = self
            .var_map
            .data()
            .lock()
            .map_err(|_| Error::model("parameter map lock poisoned"))?;
        let mut named: Vec<(String, Var)> = vars.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    /// Overwrite encoder parameters from a pretrained safetensors file.
    /// Tensor names are matched after prepending `prefix` (e.g. `roberta`);
    /// head parameters are left at their fresh initialisation.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_pretrained(&self, path: impl AsRef<Path>, prefix: Option<&str>) -> Result<usize> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)?;
        let vars = self
            .var_map
            .data()
            .lock()
            .map_err(|_| Error::model("parameter map lock poisoned"))?;

        let mut loaded = 0;
        for (name, var) in vars.iter() {
            let key = match prefix {
                Some(prefix) => format!("{prefix}.{name}"),
                None => name.clone(),
            };
            if let Some(tensor) = tensors.get(&key) {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                loaded += 1;
            }
        }

        if loaded == 0 {
            return Err(Error::model("no pretrained tensor matched a model parameter"));
        }
        if loaded < vars.len() {
            warn!(loaded, total = vars.len(), "some parameters keep their random initialisation");
        }
        info!(loaded, "loaded pretrained weights");
        Ok(loaded)
    }

    /// Save all parameters as safetensors
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.var_map.save(path.as_ref())?;
        info!(path = %path.as_ref().display(), "saved model parameters");
        Ok(())
    }
}

impl MultiTaskModel for HydraNet {
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<HeadLogits> {
        let batch_size = input_ids.dim(0)?;
        if batch_size == 0 {
            return Ok(HeadLogits {
                disaster: Tensor::zeros((0, Task::Disaster.num_classes()), DType::F32, &self.device)?,
                sentiment: Tensor::zeros((0, Task::Sentiment.num_classes()), DType::F32, &self.device)?,
            });
        }

        let pooled = self.encoder.forward(input_ids, attention_mask, train)?;
        Ok(HeadLogits {
            disaster: self.disaster_head.forward(&pooled, train)?,
            sentiment: self.sentiment_head.forward(&pooled, train)?,
        })
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.var_map.all_vars()
    }
}
