//! Shared transformer encoder
//!
//! The encoder is a BERT-family model configured from a HuggingFace
//! `config.json` and pooled on the first (`<s>` / `[CLS]`) token, producing
//! one `[batch, hidden]` row per example.

mod bert;

pub use bert::{BertEncoder, PositionScheme};

use std::path::Path;

use candle_core::{IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::Config as BertConfig;
use serde_json::json;
use tracing::{debug, info};

use crate::error::Result;

/// Load an encoder configuration from `path`, or fall back to roberta-base
/// dimensions when no path is given.
pub fn load_encoder_config(path: Option<&Path>) -> Result<BertConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let config: BertConfig = serde_json::from_str(&content)?;
            info!(path = %path.display(), hidden = config.hidden_size, layers = config.num_hidden_layers, "loaded encoder config");
            Ok(config)
        }
        None => roberta_base_config(),
    }
}

/// roberta-base dimensions
pub fn roberta_base_config() -> Result<BertConfig> {
    bert_config("roberta", 50265, 768, 12, 12, 3072, 514, 1, 1)
}

/// A small randomly initialised encoder, useful for smoke runs and tests
pub fn tiny_config() -> Result<BertConfig> {
    bert_config("bert", 128, 32, 2, 2, 64, 64, 1, 0)
}

#[allow(clippy::too_many_arguments)]
fn bert_config(
    model_type: &str,
    vocab_size: usize,
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    type_vocab_size: usize,
    pad_token_id: usize,
) -> Result<BertConfig> {
    let value = json!({
        "vocab_size": vocab_size,
        "hidden_size": hidden_size,
        "num_hidden_layers": num_hidden_layers,
        "num_attention_heads": num_attention_heads,
        "intermediate_size": intermediate_size,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "max_position_embeddings": max_position_embeddings,
        "type_vocab_size": type_vocab_size,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-5,
        "pad_token_id": pad_token_id,
        "position_embedding_type": "absolute",
        "use_cache": false,
        "classifier_dropout": null,
        "model_type": model_type,
    });
    Ok(serde_json::from_value(value)?)
}

/// BERT-family encoder pooled on the first token
pub struct SharedEncoder {
    model: BertEncoder,
    hidden_size: usize,
}

impl SharedEncoder {
    /// Build the encoder under `vb`, registering its parameters there
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let model = BertEncoder::load(vb, config)?;
        debug!(hidden = config.hidden_size, layers = config.num_hidden_layers, "encoder built");
        Ok(Self {
            model,
            hidden_size: config.hidden_size,
        })
    }

    /// Width of the pooled representation
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Encode `[batch, seq_len]` ids and mask into `[batch, hidden]`
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.model.forward(input_ids, attention_mask, train)?;
        Ok(hidden.i((.., 0))?.contiguous()?)
    }
}
