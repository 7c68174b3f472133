//! BERT-family transformer encoder
//!
//! Every operation between the parameters and the pooled output has a
//! backward pass: layer normalisation and attention softmax are written
//! with plain tensor ops rather than fused kernels. Parameter names follow
//! the HuggingFace layout (`embeddings.*`, `encoder.layer.N.*`) so pretrained
//! checkpoints load by name.

use candle_core::{DType, Module, Tensor, D};
use candle_nn::{embedding, linear, Dropout, Embedding, Init, Linear, VarBuilder};
use candle_transformers::models::bert::{Config as BertConfig, HiddenAct};
use tracing::debug;

use crate::error::{Error, Result};

/// How token positions are numbered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionScheme {
    /// `0..seq_len` for every row (BERT)
    Absolute,
    /// Non-padding tokens count up from `padding_idx + 1`, padding keeps
    /// `padding_idx` (RoBERTa)
    PaddingOffset {
        /// Id of the padding token
        padding_idx: u32,
    },
}

impl PositionScheme {
    /// Scheme used by a model of the given `model_type`
    pub fn for_config(config: &BertConfig) -> Self {
        match config.model_type.as_deref() {
            Some("roberta" | "xlm-roberta" | "camembert") => Self::PaddingOffset {
                padding_idx: config.pad_token_id as u32,
            },
            _ => Self::Absolute,
        }
    }

    /// Position ids of one row of token ids
    pub fn positions(&self, row: &[u32]) -> Vec<u32> {
        match *self {
            Self::Absolute => (0..row.len() as u32).collect(),
            Self::PaddingOffset { padding_idx } => {
                let mut count = 0;
                row.iter()
                    .map(|&id| {
                        if id == padding_idx {
                            padding_idx
                        } else {
                            count += 1;
                            padding_idx + count
                        }
                    })
                    .collect()
            }
        }
    }
}

/// `(x - mean) / sqrt(var + eps) * weight + bias` over the last dimension
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(vb: VarBuilder, size: usize, eps: f64) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
            eps,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        Ok(normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)?)
    }
}

/// Softmax over the last dimension. The row maximum is only a numerical
/// shift, so it is taken off the graph.
fn softmax_last_dim(xs: &Tensor) -> Result<Tensor> {
    let max = xs.max_keepdim(D::Minus1)?.detach();
    let exp = xs.broadcast_sub(&max)?.exp()?;
    let sum = exp.sum_keepdim(D::Minus1)?;
    Ok(exp.broadcast_div(&sum)?)
}

fn activate(act: HiddenAct, xs: &Tensor) -> Result<Tensor> {
    Ok(match act {
        HiddenAct::Gelu => xs.gelu_erf()?,
        HiddenAct::GeluApproximate => xs.gelu()?,
        HiddenAct::Relu => xs.relu()?,
    })
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
    positions: PositionScheme,
    max_positions: usize,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            word: embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"))?,
            position: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: embedding(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: LayerNorm::load(vb.pp("LayerNorm"), config.hidden_size, config.layer_norm_eps)?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            positions: PositionScheme::for_config(config),
            max_positions: config.max_position_embeddings,
        })
    }

    fn position_ids(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        let rows = input_ids.to_vec2::<u32>()?;
        let ids: Vec<u32> = rows.iter().flat_map(|row| self.positions.positions(row)).collect();
        if let Some(&max) = ids.iter().max() {
            if max as usize >= self.max_positions {
                return Err(Error::model(format!(
                    "position {} exceeds the encoder's {} position embeddings",
                    max, self.max_positions
                )));
            }
        }
        Ok(Tensor::from_vec(ids, (batch_size, seq_len), input_ids.device())?)
    }

    fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let token_type_ids = input_ids.zeros_like()?;
        let position_ids = self.position_ids(input_ids)?;
        let xs = ((self.word.forward(input_ids)? + self.token_type.forward(&token_type_ids)?)?
            + self.position.forward(&position_ids)?)?;
        let xs = self.layer_norm.forward(&xs)?;
        Ok(self.dropout.forward(&xs, train)?)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dropout: Dropout,
    num_heads: usize,
    head_size: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            query: linear(hidden, hidden, vb.pp("query"))?,
            key: linear(hidden, hidden, vb.pp("key"))?,
            value: linear(hidden, hidden, vb.pp("value"))?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            num_heads: config.num_attention_heads,
            head_size: hidden / config.num_attention_heads,
        })
    }

    /// `[b, s, h]` to `[b, heads, s, head_size]`
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        Ok(xs
            .reshape((batch_size, seq_len, self.num_heads, self.head_size))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, seq_len, hidden) = xs.dims3()?;
        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? / (self.head_size as f64).sqrt())?;
        let probs = softmax_last_dim(&scores.broadcast_add(mask)?)?;
        let probs = self.dropout.forward(&probs, train)?;

        Ok(probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch_size, seq_len, hidden))?)
    }
}

/// `LayerNorm(dropout(dense(x)) + residual)`
struct ResidualOutput {
    dense: Linear,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl ResidualOutput {
    fn load(vb: VarBuilder, in_dim: usize, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            dense: linear(in_dim, config.hidden_size, vb.pp("dense"))?,
            layer_norm: LayerNorm::load(vb.pp("LayerNorm"), config.hidden_size, config.layer_norm_eps)?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    fn forward(&self, xs: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.dropout.forward(&self.dense.forward(xs)?, train)?;
        self.layer_norm.forward(&(xs + residual)?)
    }
}

struct Layer {
    attention: SelfAttention,
    attention_output: ResidualOutput,
    intermediate: Linear,
    activation: HiddenAct,
    output: ResidualOutput,
}

impl Layer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention").pp("self"), config)?,
            attention_output: ResidualOutput::load(
                vb.pp("attention").pp("output"),
                config.hidden_size,
                config,
            )?,
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            activation: config.hidden_act,
            output: ResidualOutput::load(vb.pp("output"), config.intermediate_size, config)?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(xs, mask, train)?;
        let attended = self.attention_output.forward(&attended, xs, train)?;
        let inner = activate(self.activation, &self.intermediate.forward(&attended)?)?;
        self.output.forward(&inner, &attended, train)
    }
}

/// Embeddings followed by a stack of transformer layers
pub struct BertEncoder {
    embeddings: Embeddings,
    layers: Vec<Layer>,
}

impl BertEncoder {
    /// Build the encoder under `vb`
    pub fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
            return Err(Error::config(format!(
                "hidden size {} is not divisible into {} attention heads",
                config.hidden_size, config.num_attention_heads
            )));
        }

        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| Layer::load(vb.pp(format!("encoder.layer.{i}")), config))
            .collect::<Result<Vec<_>>>()?;
        debug!(positions = ?embeddings.positions, layers = layers.len(), "bert encoder built");
        Ok(Self { embeddings, layers })
    }

    /// `[batch, seq_len]` ids and 0/1 mask to `[batch, seq_len, hidden]`.
    /// Dropout is active only when `train` is set.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mask = extended_attention_mask(attention_mask)?;
        let mut xs = self.embeddings.forward(input_ids, train)?;
        for layer in &self.layers {
            xs = layer.forward(&xs, &mask, train)?;
        }
        Ok(xs)
    }
}

/// `[b, s]` 0/1 mask to an additive `[b, 1, 1, s]` bias: 0 to attend, a
/// large negative value to ignore
fn extended_attention_mask(mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(DType::F32)?;
    let ignore = ((mask.ones_like()? - &mask)? * f64::from(f32::MIN))?;
    Ok(ignore.unsqueeze(1)?.unsqueeze(1)?)
}
