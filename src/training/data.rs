//! Multi-crop batches for self-distillation training.
//!
//! Augmentation itself happens outside this crate; the training loop
//! consumes already-cropped views as flat `(batch, d_input)` tensors.

use anyhow::ensure;
use burn::prelude::*;

use crate::model::dino::GLOBAL_CROPS;

/// An ordered crop set for one batch of samples.
///
/// The first [`GLOBAL_CROPS`] entries are the global views seen by both
/// networks; the remainder are local views seen only by the student.
#[derive(Debug, Clone)]
pub struct MultiCropBatch<B: Backend> {
    crops: Vec<Tensor<B, 2>>,
}

impl<B: Backend> MultiCropBatch<B> {
    /// Validate and wrap a crop set.
    ///
    /// Fails if the global crops are missing (fewer than [`GLOBAL_CROPS`]
    /// entries) or if any crop disagrees on batch size or feature dimension.
    pub fn new(crops: Vec<Tensor<B, 2>>) -> anyhow::Result<Self> {
        ensure!(
            crops.len() >= GLOBAL_CROPS,
            "a multi-crop batch needs at least {GLOBAL_CROPS} crops (the global views), got {}",
            crops.len()
        );
        let [batch, dim] = crops[0].dims();
        for (i, crop) in crops.iter().enumerate().skip(1) {
            let [b, d] = crop.dims();
            ensure!(
                b == batch && d == dim,
                "crop {i} has shape [{b}, {d}], expected [{batch}, {dim}]"
            );
        }
        Ok(Self { crops })
    }

    /// All crops, global views first.
    pub fn crops(&self) -> &[Tensor<B, 2>] {
        &self.crops
    }

    pub fn n_crops(&self) -> usize {
        self.crops.len()
    }

    pub fn n_local_crops(&self) -> usize {
        self.crops.len() - GLOBAL_CROPS
    }

    pub fn batch_size(&self) -> usize {
        self.crops[0].dims()[0]
    }
}
