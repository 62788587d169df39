use burn::{
    nn::{
        Dropout, DropoutConfig,
        Initializer,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{log_softmax, relu},
};

use crate::data::batcher::SpectrumBatch;
use crate::domain::error::{SpectraError, SpectraResult};
use crate::domain::vocab::DEFAULT_TOKENS;
use crate::ml::attention::{MzMultiHeadAttention, MzMultiHeadAttentionConfig};
use crate::ml::encoding::{MzPositionalEncoding, MzPositionalEncodingConfig};
use crate::ml::loss::SpectrumLoss;

const NORM_EPSILON: f64 = 1e-6;

fn xavier() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct SpectrumTransformerConfig {
    /// Features per peak: (m/z, intensity)
    #[config(default = 2)]
    pub input_dim:  usize,
    #[config(default = 27)]
    pub vocab_size: usize,
    #[config(default = 6)]
    pub num_layers: usize,
    #[config(default = 512)]
    pub d_model:    usize,
    #[config(default = 2048)]
    pub d_ff:       usize,
    #[config(default = 8)]
    pub num_heads:  usize,
    #[config(default = 0.1)]
    pub dropout:    f64,
    #[config(default = 10000.0)]
    pub rope_base:  f64,
}

impl SpectrumTransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpectraResult<SpectrumTransformer<B>> {
        if self.input_dim == 0 || self.d_model == 0 {
            return Err(SpectraError::InvalidConfiguration(format!(
                "input_dim and d_model must be positive, got {} and {}",
                self.input_dim, self.d_model
            )));
        }
        if self.vocab_size < DEFAULT_TOKENS.len() {
            return Err(SpectraError::InvalidConfiguration(format!(
                "vocab_size {} cannot hold the {} peptide tokens",
                self.vocab_size,
                DEFAULT_TOKENS.len()
            )));
        }

        let embedding = LinearConfig::new(self.input_dim, self.d_model)
            .with_initializer(xavier())
            .init(device);
        let positional = MzPositionalEncodingConfig::new(self.d_model)
            .with_dropout(self.dropout)
            .init();
        let layers = (0..self.num_layers)
            .map(|_| self.build_encoder_layer(device))
            .collect::<SpectraResult<Vec<_>>>()?;
        let final_norm = LayerNormConfig::new(self.d_model)
            .with_epsilon(NORM_EPSILON)
            .init(device);
        let generator = LinearConfig::new(self.d_model, self.vocab_size)
            .with_initializer(xavier())
            .init(device);

        Ok(SpectrumTransformer {
            embedding, positional, layers, final_norm, generator,
            d_model: self.d_model,
        })
    }

    fn build_encoder_layer<B: Backend>(&self, device: &B::Device) -> SpectraResult<EncoderLayer<B>> {
        let self_attn = MzMultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .with_rope_base(self.rope_base)
            .init(device)?;
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff)
            .with_initializer(xavier())
            .init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model)
            .with_initializer(xavier())
            .init(device);
        let norm1   = LayerNormConfig::new(self.d_model).with_epsilon(NORM_EPSILON).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).with_epsilon(NORM_EPSILON).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        Ok(EncoderLayer { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout })
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:   MzMultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderLayer<B> {
    /// Pre-norm residual blocks: x + dropout(sublayer(norm(x))).
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        mz:   &Tensor<B, 2>,
        mask: Option<&Tensor<B, 2, Bool>>,
    ) -> SpectraResult<Tensor<B, 3>> {
        let attn_output = self.self_attn.forward(self.norm1.forward(x.clone()), mz, mask)?.context;
        let x = x + self.dropout.forward(attn_output);

        let hidden  = self.dropout.forward(relu(self.ffn_linear1.forward(self.norm2.forward(x.clone()))));
        let ffn_out = self.ffn_linear2.forward(hidden);
        Ok(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct SpectrumTransformer<B: Backend> {
    pub embedding:  Linear<B>,
    pub positional: MzPositionalEncoding,
    pub layers:     Vec<EncoderLayer<B>>,
    pub final_norm: LayerNorm<B>,
    pub generator:  Linear<B>,
    pub d_model:    usize,
}

impl<B: Backend> SpectrumTransformer<B> {
    /// spectra: [batch, peaks, input_dim], mz: [batch, peaks]
    /// → log-probabilities [batch, peaks, vocab_size]
    pub fn forward(
        &self,
        spectra: Tensor<B, 3>,
        mz:      &Tensor<B, 2>,
        mask:    Option<&Tensor<B, 2, Bool>>,
    ) -> SpectraResult<Tensor<B, 3>> {
        let [_, _, input_dim] = spectra.dims();
        let expected = self.embedding.weight.val().dims()[0];
        if input_dim != expected {
            return Err(SpectraError::InvalidConfiguration(format!(
                "model expects {expected} features per peak, got {input_dim}"
            )));
        }

        let embedded = self
            .embedding
            .forward(spectra)
            .mul_scalar((self.d_model as f64).sqrt());
        let mut x = self.positional.forward(embedded, mz)?;
        for layer in &self.layers {
            x = layer.forward(x, mz, mask)?;
        }
        let x = self.final_norm.forward(x);

        Ok(log_softmax(self.generator.forward(x), 2))
    }

    /// Forward pass over a batch, keyed on its own m/z channel.
    pub fn forward_batch(
        &self,
        batch:       &SpectrumBatch<B>,
        mask_padded: bool,
    ) -> SpectraResult<Tensor<B, 3>> {
        let mz = batch.mz();
        let mask = mask_padded.then_some(&batch.peak_mask);
        self.forward(batch.spectra.clone(), &mz, mask)
    }

    pub fn forward_loss(
        &self,
        batch:       &SpectrumBatch<B>,
        loss:        &SpectrumLoss,
        mask_padded: bool,
    ) -> SpectraResult<(Tensor<B, 1>, Tensor<B, 3>)> {
        let output = self.forward_batch(batch, mask_padded)?;
        let value  = loss.forward(output.clone(), batch.targets.clone())?;
        Ok((value, output))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    type TestBackend = burn::backend::NdArray;

    fn tiny_config() -> SpectrumTransformerConfig {
        SpectrumTransformerConfig::new()
            .with_num_layers(2)
            .with_d_model(16)
            .with_d_ff(32)
            .with_num_heads(2)
            .with_dropout(0.0)
    }

    #[test]
    fn test_forward_emits_log_probabilities_per_peak() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let spectra = Tensor::<TestBackend, 3>::random([3, 7, 2], Distribution::Uniform(0.0, 1000.0), &device);
        let mz = spectra.clone().slice([0..3, 0..7, 0..1]).reshape([3, 7]);

        let out = model.forward(spectra, &mz, None).unwrap();
        assert_eq!(out.dims(), [3, 7, 27]);

        let row_sums = out.exp().sum_dim(2).into_data().to_vec::<f32>().unwrap();
        for s in row_sums {
            assert!((s - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_layers_have_independent_parameters() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        assert_eq!(model.layers.len(), 2);
        let w0 = model.layers[0].ffn_linear1.weight.val();
        let w1 = model.layers[1].ffn_linear1.weight.val();
        let diff = (w0 - w1).abs().sum().into_scalar();
        assert!(diff > 0.0);
    }

    #[test]
    fn test_wrong_feature_count_is_rejected() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let spectra = Tensor::<TestBackend, 3>::zeros([1, 4, 3], &device);
        let mz = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        assert!(matches!(
            model.forward(spectra, &mz, None),
            Err(SpectraError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bad_head_count_fails_at_init() {
        let device = Default::default();
        let result = tiny_config().with_num_heads(3).init::<TestBackend>(&device);
        assert!(matches!(result, Err(SpectraError::InvalidConfiguration(_))));
    }
}
