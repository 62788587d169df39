// ============================================================
// Layer 5 - m/z-Conditioned Multi-Head Attention
// ============================================================
// Standard scaled dot-product attention, except that queries and
// keys are rotated by the m/z of their peaks before the dot product:
//
//   Q, K, V = x·Wq, x·Wk, x·Wv        split into h heads of d_k
//   scores  = rope(Q, mz) · rope(K, mz)ᵀ / √d_k
//   scores  = -1e9 where the key peak is padding
//   attn    = dropout(softmax(scores))
//   out     = concat_heads(attn · V) · Wo
//
// Burn's MultiHeadAttention has no hook between the projections and
// the score computation, so the projections are owned here.
//
// Reference: Vaswani et al. (2017) §3.2, Su et al. (2021)

use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

use crate::domain::error::{SpectraError, SpectraResult};
use crate::ml::encoding::MzRotaryEncoding;

const MASKED_SCORE: f32 = -1.0e9;

#[derive(Config, Debug)]
pub struct MzMultiHeadAttentionConfig {
    pub d_model:   usize,
    pub num_heads: usize,
    #[config(default = 0.1)]
    pub dropout:   f64,
    #[config(default = 10000.0)]
    pub rope_base: f64,
}

impl MzMultiHeadAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpectraResult<MzMultiHeadAttention<B>> {
        if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            return Err(SpectraError::InvalidConfiguration(format!(
                "d_model {} is not divisible by {} heads",
                self.d_model, self.num_heads
            )));
        }
        let head_dim = self.d_model / self.num_heads;
        let rotary = MzRotaryEncoding::new(head_dim, self.rope_base)?;

        let projection = || {
            LinearConfig::new(self.d_model, self.d_model)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device)
        };

        Ok(MzMultiHeadAttention {
            query:     projection(),
            key:       projection(),
            value:     projection(),
            output:    projection(),
            dropout:   DropoutConfig::new(self.dropout).init(),
            rotary,
            num_heads: self.num_heads,
            head_dim,
        })
    }
}

#[derive(Module, Debug)]
pub struct MzMultiHeadAttention<B: Backend> {
    pub query:  Linear<B>,
    pub key:    Linear<B>,
    pub value:  Linear<B>,
    pub output: Linear<B>,
    dropout:    Dropout,
    rotary:     MzRotaryEncoding,
    num_heads:  usize,
    head_dim:   usize,
}

pub struct MzAttentionOutput<B: Backend> {
    /// [batch, peaks, d_model]
    pub context: Tensor<B, 3>,
    /// [batch, heads, peaks, peaks], rows sum to 1
    pub weights: Tensor<B, 4>,
}

impl<B: Backend> MzMultiHeadAttention<B> {
    /// [batch, peaks, d_model] -> [batch, heads, peaks, head_dim]
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, peaks, _] = x.dims();
        x.reshape([batch, peaks, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }

    /// Self-attention over the peaks of `x`.
    ///
    /// `mz` is [batch, peaks]; `mask` is [batch, peaks] with `true` on
    /// real peaks. Padded keys receive no attention weight.
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        mz:   &Tensor<B, 2>,
        mask: Option<&Tensor<B, 2, Bool>>,
    ) -> SpectraResult<MzAttentionOutput<B>> {
        let [batch, peaks, d_model] = x.dims();

        let q = self.split_heads(self.query.forward(x.clone()));
        let k = self.split_heads(self.key.forward(x.clone()));
        let v = self.split_heads(self.value.forward(x));

        let scores = self
            .rotary
            .scores(q, k, mz)?
            .div_scalar((self.head_dim as f64).sqrt());

        let scores = match mask {
            Some(mask) => {
                if mask.dims() != [batch, peaks] {
                    return Err(SpectraError::InvalidConfiguration(format!(
                        "peak mask {:?} does not match input [{batch}, {peaks}]",
                        mask.dims()
                    )));
                }
                let padded = mask
                    .clone()
                    .bool_not()
                    .reshape([batch, 1, 1, peaks])
                    .expand([batch, self.num_heads, peaks, peaks]);
                scores.mask_fill(padded, MASKED_SCORE)
            }
            None => scores,
        };

        let weights = softmax(scores, 3);
        let context = self
            .dropout
            .forward(weights.clone())
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, peaks, d_model]);

        Ok(MzAttentionOutput { context: self.output.forward(context), weights })
    }
}
