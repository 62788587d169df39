// ============================================================
// Layer 5 - m/z Positional Encodings
// ============================================================
// Peaks in a spectrum are not a sequence: their order carries no
// meaning, but the distance between two m/z values does (it is a
// residue mass when both are fragment ions of the same series).
// Both encodings below therefore use the physical m/z of a peak
// where a language model would use the token index.
//
// The m/z tensor [batch, peaks] is an explicit argument of every
// forward call. Nothing is cached on the modules, so one model can
// serve concurrent forward passes.
//
//   MzPositionalEncoding (additive, applied once to the embeddings)
//     freq_p = exp(-(2 * floor(p / 2)) * ln(base) / d_model)
//     pe[p]  = sin(mz[p] * freq_p)   p even
//              cos(mz[p] * freq_p)   p odd
//     the value is broadcast over all d_model features
//
//   MzRotaryEncoding (per attention layer, per head)
//     theta_i = base^(-2i / head_dim),  i < head_dim / 2
//     angle   = mz[p] * theta_i, duplicated as [angles, angles]
//     x_rot   = x * cos(angle) + rotate_half(x) * sin(angle)
//     scores  = q_rot · k_rotᵀ
//
// Element i and its rotation partner i + head_dim/2 share one
// angle, so the rotation is orthogonal and preserves norms.
//
// Reference: Su et al. (2021) RoFormer, Vaswani et al. (2017)

use burn::{
    nn::{Dropout, DropoutConfig},
    prelude::*,
};

use crate::domain::error::{SpectraError, SpectraResult};

/// The m/z tensor must be [batch, peaks] of the tensor it encodes.
fn check_mz<B: Backend>(mz: &Tensor<B, 2>, batch: usize, peaks: usize) -> SpectraResult<()> {
    let found = mz.dims();
    if found != [batch, peaks] {
        return Err(SpectraError::PrecursorNotSet { expected: [batch, peaks], found });
    }
    Ok(())
}

// ─── Additive stage ───────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct MzPositionalEncodingConfig {
    pub d_model: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 10000.0)]
    pub base: f64,
}

impl MzPositionalEncodingConfig {
    pub fn init(&self) -> MzPositionalEncoding {
        MzPositionalEncoding {
            dropout: DropoutConfig::new(self.dropout).init(),
            d_model: self.d_model,
            base:    self.base,
        }
    }
}

#[derive(Module, Clone, Debug)]
pub struct MzPositionalEncoding {
    dropout: Dropout,
    d_model: usize,
    base:    f64,
}

impl MzPositionalEncoding {
    /// x: [batch, peaks, d_model], mz: [batch, peaks]
    pub fn forward<B: Backend>(&self, x: Tensor<B, 3>, mz: &Tensor<B, 2>) -> SpectraResult<Tensor<B, 3>> {
        let [batch, peaks, d_model] = x.dims();
        check_mz(mz, batch, peaks)?;
        let pe = self.encoding(mz, d_model);
        Ok(self.dropout.forward(x + pe))
    }

    /// The encoding alone, [batch, peaks, d_model].
    pub fn encoding<B: Backend>(&self, mz: &Tensor<B, 2>, d_model: usize) -> Tensor<B, 3> {
        let [batch, peaks] = mz.dims();
        let device = mz.device();
        let log_base = self.base.ln();

        let mut freqs = Vec::with_capacity(peaks);
        let mut even  = Vec::with_capacity(peaks);
        for p in 0..peaks {
            let pair = (p - p % 2) as f64;
            freqs.push((-pair * log_base / self.d_model as f64).exp() as f32);
            even.push(if p % 2 == 0 { 1.0f32 } else { 0.0 });
        }

        let freqs = Tensor::<B, 1>::from_data(TensorData::new(freqs, [peaks]), &device)
            .reshape([1, peaks])
            .expand([batch, peaks]);
        let even = Tensor::<B, 1>::from_data(TensorData::new(even, [peaks]), &device)
            .reshape([1, peaks])
            .expand([batch, peaks]);
        let odd = even.clone().neg().add_scalar(1.0);

        let angles = mz.clone().detach() * freqs;
        let pe = angles.clone().sin() * even + angles.cos() * odd;

        pe.unsqueeze_dim::<3>(2).expand([batch, peaks, d_model])
    }
}

// ─── Rotary stage ─────────────────────────────────────────────────────────────

#[derive(Module, Clone, Debug)]
pub struct MzRotaryEncoding {
    head_dim: usize,
    base:     f64,
}

impl MzRotaryEncoding {
    pub fn new(head_dim: usize, base: f64) -> SpectraResult<Self> {
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(SpectraError::InvalidConfiguration(format!(
                "rotary encoding needs an even, non-zero head dimension, got {head_dim}"
            )));
        }
        Ok(Self { head_dim, base })
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Per-peak sin and cos tables, each [batch, 1, peaks, head_dim].
    fn sin_cos<B: Backend>(&self, mz: &Tensor<B, 2>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, peaks] = mz.dims();
        let half = self.head_dim / 2;

        let theta: Vec<f32> = (0..half)
            .map(|i| self.base.powf(-2.0 * i as f64 / self.head_dim as f64) as f32)
            .collect();
        let theta = Tensor::<B, 1>::from_data(TensorData::new(theta, [half]), &mz.device())
            .reshape([1, 1, half])
            .expand([batch, peaks, half]);

        let angles = mz
            .clone()
            .detach()
            .unsqueeze_dim::<3>(2)
            .expand([batch, peaks, half])
            * theta;
        let angles = Tensor::cat(vec![angles.clone(), angles], 2);

        let sin = angles.clone().sin().unsqueeze_dim::<4>(1);
        let cos = angles.cos().unsqueeze_dim::<4>(1);
        (sin, cos)
    }

    fn apply<B: Backend>(x: Tensor<B, 4>, sin: Tensor<B, 4>, cos: Tensor<B, 4>) -> Tensor<B, 4> {
        let dims = x.dims();
        let sin = sin.expand(dims);
        let cos = cos.expand(dims);
        x.clone() * cos + rotate_half(x) * sin
    }

    fn check_heads<B: Backend>(&self, x: &Tensor<B, 4>, mz: &Tensor<B, 2>) -> SpectraResult<()> {
        let [batch, _, peaks, head_dim] = x.dims();
        if head_dim != self.head_dim {
            return Err(SpectraError::InvalidConfiguration(format!(
                "rotary encoding built for head dimension {}, got {head_dim}",
                self.head_dim
            )));
        }
        check_mz(mz, batch, peaks)
    }

    /// Rotate x: [batch, heads, peaks, head_dim] by its peaks' m/z.
    pub fn rotate<B: Backend>(&self, x: Tensor<B, 4>, mz: &Tensor<B, 2>) -> SpectraResult<Tensor<B, 4>> {
        self.check_heads(&x, mz)?;
        let (sin, cos) = self.sin_cos(mz);
        Ok(Self::apply(x, sin, cos))
    }

    /// Unscaled attention scores from rotated queries and keys,
    /// [batch, heads, peaks, peaks].
    pub fn scores<B: Backend>(
        &self,
        q:  Tensor<B, 4>,
        k:  Tensor<B, 4>,
        mz: &Tensor<B, 2>,
    ) -> SpectraResult<Tensor<B, 4>> {
        self.check_heads(&q, mz)?;
        self.check_heads(&k, mz)?;
        let (sin, cos) = self.sin_cos(mz);
        let q_rot = Self::apply(q, sin.clone(), cos.clone());
        let k_rot = Self::apply(k, sin, cos);
        Ok(q_rot.matmul(k_rot.swap_dims(2, 3)))
    }
}

/// [x1, x2] -> [-x2, x1] along the last dimension.
pub fn rotate_half<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, heads, peaks, dim] = x.dims();
    let half = dim / 2;
    let x1 = x.clone().slice([0..batch, 0..heads, 0..peaks, 0..half]);
    let x2 = x.slice([0..batch, 0..heads, 0..peaks, half..dim]);
    Tensor::cat(vec![x2.neg(), x1], 3)
}
