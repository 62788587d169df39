// ============================================================
// Layer 5 - Sequence Loss
// ============================================================
// Class-weighted cross-entropy over every (sample, position) pair:
//
//   w      = [pad_weight, 1, 1, ..., 1]      (weight per class)
//   loss_i = -w[y_i] · log_softmax(logits_i)[y_i]
//   loss   = mean_i loss_i
//
// <PAD> positions still contribute, just with a tiny weight. With
// `mask_padding` they are dropped instead and the mean is taken
// over the non-<PAD> positions only.
//
// Reference: PyTorch CrossEntropyLoss(reduction='none'), Burn Book §5

use burn::{prelude::*, tensor::activation::log_softmax};
use serde::{Deserialize, Serialize};

use crate::domain::error::{SpectraError, SpectraResult};
use crate::domain::vocab::PAD_IDX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    CrossEntropy,
    NegativeLogLikelihood,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumLoss {
    pub kind:         LossKind,
    pub pad_weight:   f32,
    pub mask_padding: bool,
}

impl Default for SpectrumLoss {
    fn default() -> Self {
        Self {
            kind:         LossKind::CrossEntropy,
            pad_weight:   0.001,
            mask_padding: false,
        }
    }
}

impl SpectrumLoss {
    pub fn new(kind: LossKind) -> Self {
        Self { kind, ..Self::default() }
    }

    pub fn with_pad_weight(mut self, pad_weight: f32) -> Self {
        self.pad_weight = pad_weight;
        self
    }

    pub fn with_mask_padding(mut self, mask_padding: bool) -> Self {
        self.mask_padding = mask_padding;
        self
    }

    /// output: [batch, seq, classes], targets: [batch, seq] -> scalar [1]
    pub fn forward<B: Backend>(
        &self,
        output:  Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
    ) -> SpectraResult<Tensor<B, 1>> {
        let [batch, seq, classes] = output.dims();
        if targets.dims() != [batch, seq] {
            return Err(SpectraError::InvalidConfiguration(format!(
                "targets {:?} do not match output [{batch}, {seq}, _]",
                targets.dims()
            )));
        }
        self.forward_flat(output.reshape([batch * seq, classes]), targets.reshape([batch * seq]))
    }

    /// output: [n, classes], targets: [n] -> scalar [1]
    pub fn forward_flat<B: Backend>(
        &self,
        output:  Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> SpectraResult<Tensor<B, 1>> {
        match self.kind {
            LossKind::CrossEntropy => self.cross_entropy(output, targets),
            LossKind::NegativeLogLikelihood => Err(SpectraError::InvalidConfiguration(
                "negative log-likelihood loss is not supported".to_string(),
            )),
        }
    }

    fn cross_entropy<B: Backend>(
        &self,
        logits:  Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> SpectraResult<Tensor<B, 1>> {
        let [n, classes] = logits.dims();
        if classes <= PAD_IDX {
            return Err(SpectraError::InvalidConfiguration(format!(
                "loss needs at least {} classes, got {classes}",
                PAD_IDX + 1
            )));
        }
        let device = logits.device();

        let mut class_weights = vec![1.0f32; classes];
        class_weights[PAD_IDX] = self.pad_weight;
        let weights = Tensor::<B, 1>::from_data(TensorData::new(class_weights, [classes]), &device)
            .select(0, targets.clone());

        let picked = log_softmax(logits, 1)
            .gather(1, targets.clone().reshape([n, 1]))
            .reshape([n]);
        let losses = picked.neg() * weights;

        if self.mask_padding {
            let keep = targets.equal_elem(PAD_IDX as i64).bool_not().float();
            let count = keep.clone().sum().clamp_min(1.0);
            Ok((losses * keep).sum() / count)
        } else {
            Ok(losses.mean())
        }
    }
}
