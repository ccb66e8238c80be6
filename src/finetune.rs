//! Fine-tuning head for downstream classification.
//!
//! Wraps a pretrained student pipeline (backbone + projection head) and
//! attaches a linear classifier. The pretrained sub-network is frozen at
//! construction, permanently: its parameters never receive gradients, and
//! there is no unfreezing path. Training is standard supervised
//! cross-entropy over the classifier logits.

use std::path::Path;

use anyhow::{bail, ensure};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{Linear, LinearConfig};
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::model::dino::{DinoModel, DinoModelConfig};
use crate::training::metrics::{MetricsSink, RunningAvg};
use crate::training::trainer::{load_checkpoint, OptimizerKind, TrainState};

/// Configuration for the fine-tuning head.
#[derive(Config, Debug)]
pub struct FineTuneConfig {
    /// Architecture of the pretrained pair; must match the checkpoint.
    pub model: DinoModelConfig,
    /// Number of target classes.
    pub num_classes: usize,
}

/// Frozen pretrained pipeline plus trainable linear classifier.
#[derive(Module, Debug)]
pub struct FineTune<B: Backend> {
    pretrained: DinoModel<B>,
    classifier: Linear<B>,
}

impl FineTuneConfig {
    /// Build the fine-tune model.
    ///
    /// With `checkpoint = Some(path)` the pretrained weights are loaded
    /// before freezing; a parameter shape mismatch between the checkpoint
    /// and the configured architecture fails here, immediately.
    pub fn init<B: Backend>(
        &self,
        checkpoint: Option<&Path>,
        device: &B::Device,
    ) -> anyhow::Result<FineTune<B>> {
        ensure!(self.num_classes > 0, "fine-tuning requires at least one class");

        let pretrained = match checkpoint {
            Some(path) => load_checkpoint(path, &self.model, device)?,
            None => self.model.init(device),
        };
        let d_features = pretrained.embedding_dim();

        Ok(FineTune {
            // Frozen for good: gradients are disabled here and nothing
            // re-enables them.
            pretrained: pretrained.no_grad(),
            classifier: LinearConfig::new(d_features, self.num_classes).init(device),
        })
    }
}

impl<B: Backend> FineTune<B> {
    /// Classifier logits: student backbone → student head → linear layer.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.classifier.forward(self.pretrained.embed(input))
    }

    /// Features from the frozen pipeline, without the classifier.
    pub fn embed(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.pretrained.embed(input)
    }

    pub fn pretrained(&self) -> &DinoModel<B> {
        &self.pretrained
    }

    pub fn classifier(&self) -> &Linear<B> {
        &self.classifier
    }
}

/// One labeled batch: inputs `(batch, d_input)` and integer class labels
/// `(batch,)`.
#[derive(Debug, Clone)]
pub struct LabeledBatch<B: Backend> {
    inputs: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
}

impl<B: Backend> LabeledBatch<B> {
    pub fn new(inputs: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> anyhow::Result<Self> {
        let batch = inputs.dims()[0];
        let n_labels = labels.dims()[0];
        ensure!(
            batch == n_labels,
            "batch has {batch} inputs but {n_labels} labels"
        );
        Ok(Self { inputs, labels })
    }

    pub fn inputs(&self) -> Tensor<B, 2> {
        self.inputs.clone()
    }

    pub fn labels(&self) -> Tensor<B, 1, Int> {
        self.labels.clone()
    }
}

/// Configuration for supervised fine-tuning.
#[derive(Config, Debug)]
pub struct FineTuneTrainerConfig {
    /// Number of training epochs.
    pub epochs: usize,
    /// Learning rate for the classifier optimizer.
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Classifier optimizer.
    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,
    /// Iterations between interval log lines. 0 disables interval logging.
    #[config(default = 50)]
    pub log_interval: usize,
}

/// Train the classifier with cross-entropy; the pretrained pipeline stays
/// frozen throughout.
pub fn train_classifier<B: AutodiffBackend>(
    config: &FineTuneTrainerConfig,
    model: FineTune<B>,
    batches: &[LabeledBatch<B>],
    val_batches: Option<&[LabeledBatch<B>]>,
    sink: &mut dyn MetricsSink,
) -> anyhow::Result<(FineTune<B>, TrainState)> {
    ensure!(config.epochs > 0, "training requires at least one epoch");
    ensure!(!batches.is_empty(), "training requires at least one batch");

    match config.optimizer {
        OptimizerKind::Adam => classifier_loop(
            config, model, batches, val_batches, sink,
            AdamConfig::new().init(),
        ),
        OptimizerKind::AdamW => classifier_loop(
            config, model, batches, val_batches, sink,
            AdamWConfig::new().init(),
        ),
        OptimizerKind::Sgd => classifier_loop(
            config, model, batches, val_batches, sink,
            SgdConfig::new().init(),
        ),
    }
}

fn classifier_loop<B: AutodiffBackend, O: Optimizer<FineTune<B>, B>>(
    config: &FineTuneTrainerConfig,
    mut model: FineTune<B>,
    batches: &[LabeledBatch<B>],
    val_batches: Option<&[LabeledBatch<B>]>,
    sink: &mut dyn MetricsSink,
    mut optimizer: O,
) -> anyhow::Result<(FineTune<B>, TrainState)> {
    let mut state = TrainState::default();

    for _ in 0..config.epochs {
        for batch in batches {
            let device = batch.inputs().device();
            let logits = model.forward(batch.inputs());
            let loss = CrossEntropyLossConfig::new()
                .init(&device)
                .forward(logits, batch.labels());
            let loss_val: f64 = loss.clone().into_scalar().elem();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.lr, model, grads);

            let iteration = state.iteration;
            state.iteration += 1;
            sink.scalar("train/loss", iteration, loss_val);
            if config.log_interval > 0 && (iteration + 1) % config.log_interval == 0 {
                tracing::info!(
                    epoch = state.epoch,
                    iteration,
                    loss = format!("{loss_val:.4}"),
                    "finetune"
                );
            }
        }

        if let Some(val) = val_batches {
            let mut val_avg = RunningAvg::new();
            for batch in val {
                let device = batch.inputs().device();
                let logits = model.forward(batch.inputs());
                let loss = CrossEntropyLossConfig::new()
                    .init(&device)
                    .forward(logits, batch.labels());
                let loss_val: f64 = loss.into_scalar().elem();
                sink.scalar("val/loss", state.iteration, loss_val);
                val_avg.update(loss_val);
            }
            if let Some(mean) = val_avg.mean() {
                tracing::info!(
                    epoch = state.epoch,
                    avg_loss = format!("{mean:.4}"),
                    "finetune validation"
                );
            }
        }

        state.epoch += 1;
    }

    Ok((model, state))
}

/// Guard used by tests and callers that construct models manually: verify
/// the pretrained pipeline matches an expected embedding width before
/// attaching data.
pub fn check_feature_dim<B: Backend>(model: &FineTune<B>, expected: usize) -> anyhow::Result<()> {
    let actual = model.pretrained().embedding_dim();
    if actual != expected {
        bail!("pretrained pipeline emits {actual} features, expected {expected}");
    }
    Ok(())
}
