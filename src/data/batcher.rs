// ============================================================
// Layer 4 - Spectrum Batcher
// ============================================================
// Implements Burn's Batcher trait: stacks a Vec<SpectrumItem> of
// variable-length spectra into one padded SpectrumBatch.
//
// How batching works here:
//   max_peaks = longest spectrum in the batch (at least 1)
//
//   spectra   [batch, max_peaks, 2]  zero-padded along dim 1
//   peak_mask [batch, max_peaks]     true on real peaks
//   targets   [batch, max_peaks]     token indices, padded with <PAD>
//                                    or truncated to max_peaks
//
// The target length follows the peak axis because the encoder
// emits one class distribution per peak; the loss compares
// position p of the output with position p of the target.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::SpectrumItem;
use crate::domain::vocab::{pad_truncate, PAD_IDX};

/// A padded batch of spectra ready for the forward pass.
#[derive(Debug, Clone)]
pub struct SpectrumBatch<B: Backend> {
    /// [batch, max_peaks, 2]: (m/z, intensity) per peak
    pub spectra: Tensor<B, 3>,

    /// [batch, max_peaks]: false where the peak is padding
    pub peak_mask: Tensor<B, 2, Bool>,

    /// [batch]
    pub precursor_mass: Tensor<B, 1>,

    /// [batch]
    pub charge: Tensor<B, 1>,

    /// [batch, max_peaks]
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> SpectrumBatch<B> {
    /// The m/z channel of the spectra, [batch, max_peaks].
    /// This is what every positional encoding of the model is keyed on.
    pub fn mz(&self) -> Tensor<B, 2> {
        let [batch_size, max_peaks, _] = self.spectra.dims();
        self.spectra
            .clone()
            .slice([0..batch_size, 0..max_peaks, 0..1])
            .reshape([batch_size, max_peaks])
    }
}

#[derive(Clone, Debug)]
pub struct SpectrumBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> SpectrumBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SpectrumItem, SpectrumBatch<B>> for SpectrumBatcher<B> {
    fn batch(&self, items: Vec<SpectrumItem>) -> SpectrumBatch<B> {
        let batch_size = items.len();
        let max_peaks = items
            .iter()
            .map(SpectrumItem::peak_count)
            .max()
            .unwrap_or(0)
            .max(1);

        let mut spectra_flat = Vec::with_capacity(batch_size * max_peaks * 2);
        let mut mask_flat    = Vec::with_capacity(batch_size * max_peaks);
        let mut targets_flat = Vec::with_capacity(batch_size * max_peaks);

        for item in &items {
            for p in 0..max_peaks {
                match item.peaks.get(p) {
                    Some(&[mz, intensity]) => {
                        spectra_flat.extend_from_slice(&[mz, intensity]);
                        mask_flat.push(true);
                    }
                    None => {
                        spectra_flat.extend_from_slice(&[0.0, 0.0]);
                        mask_flat.push(false);
                    }
                }
            }

            let (targets, _) = pad_truncate(&item.tokens, max_peaks, PAD_IDX);
            targets_flat.extend(targets.into_iter().map(|t| t as i64));
        }

        let precursors: Vec<f32> = items.iter().map(|s| s.precursor_mass).collect();
        let charges:    Vec<f32> = items.iter().map(|s| s.charge).collect();

        let spectra = Tensor::<B, 3>::from_data(
            TensorData::new(spectra_flat, [batch_size, max_peaks, 2]),
            &self.device,
        );
        let peak_mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(mask_flat, [batch_size, max_peaks]),
            &self.device,
        );
        let targets = Tensor::<B, 2, Int>::from_data(
            TensorData::new(targets_flat, [batch_size, max_peaks]),
            &self.device,
        );
        let precursor_mass = Tensor::<B, 1>::from_data(
            TensorData::new(precursors, [batch_size]),
            &self.device,
        );
        let charge = Tensor::<B, 1>::from_data(
            TensorData::new(charges, [batch_size]),
            &self.device,
        );

        SpectrumBatch { spectra, peak_mask, precursor_mass, charge, targets }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vocab::{EOS_IDX, SOS_IDX};

    type TestBackend = burn::backend::NdArray;

    fn item(peaks: Vec<[f32; 2]>, tokens: Vec<usize>) -> SpectrumItem {
        SpectrumItem { peaks, precursor_mass: 500.0, charge: 2.0, tokens }
    }

    #[test]
    fn test_pads_to_longest_spectrum() {
        let batcher = SpectrumBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![
            item(vec![[100.0, 5.0], [200.0, 6.0], [300.0, 7.0]], vec![SOS_IDX, 1, EOS_IDX]),
            item(vec![[150.0, 1.0]], vec![SOS_IDX, 1, 8, 8, 8, EOS_IDX]),
        ]);

        assert_eq!(batch.spectra.dims(), [2, 3, 2]);
        assert_eq!(batch.targets.dims(), [2, 3]);
        assert_eq!(batch.precursor_mass.dims(), [2]);
        assert_eq!(batch.charge.dims(), [2]);

        let spectra = batch.spectra.clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(
            spectra,
            vec![100.0, 5.0, 200.0, 6.0, 300.0, 7.0, 150.0, 1.0, 0.0, 0.0, 0.0, 0.0]
        );

        let mask = batch.peak_mask.clone().into_data().to_vec::<bool>().unwrap();
        assert_eq!(mask, vec![true, true, true, true, false, false]);

        // first target padded, second truncated to the peak count
        let targets = batch.targets.clone().into_data().to_vec::<i64>().unwrap();
        assert_eq!(
            targets,
            vec![SOS_IDX as i64, 1, EOS_IDX as i64, SOS_IDX as i64, 1, 8]
        );

        let mz = batch.mz().into_data().to_vec::<f32>().unwrap();
        assert_eq!(mz, vec![100.0, 200.0, 300.0, 150.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_spectra_get_one_padded_peak() {
        let batcher = SpectrumBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(vec![item(vec![], vec![SOS_IDX, EOS_IDX])]);
        assert_eq!(batch.spectra.dims(), [1, 1, 2]);
        let mask = batch.peak_mask.into_data().to_vec::<bool>().unwrap();
        assert_eq!(mask, vec![false]);
    }
}
