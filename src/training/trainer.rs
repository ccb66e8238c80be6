//! DINO training loop controller.
//!
//! Orchestrates the per-batch step (forward → loss → backward → optimizer
//! step → EMA teacher update → logging) and the per-epoch boundary
//! (validation pass, epoch counter increment). Counters live on an explicit
//! [`TrainState`] owned by the loop, never in ambient globals. No retry
//! logic: any failure propagates and aborts the run.

use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{anyhow, bail, ensure};
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::model::dino::{DinoModel, DinoModelConfig};
use crate::training::data::MultiCropBatch;
use crate::training::loss::DinoLoss;
use crate::training::metrics::{MetricsSink, RunningAvg};
use crate::training::schedule::MomentumSchedule;

/// Optimizer selection. The name → constructor mapping is this enum; an
/// unknown name fails when parsing configuration, before any training runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "adamw" => Ok(Self::AdamW),
            "sgd" => Ok(Self::Sgd),
            other => bail!("unknown optimizer {other:?}; expected one of: adam, adamw, sgd"),
        }
    }
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Adam => "adam",
            Self::AdamW => "adamw",
            Self::Sgd => "sgd",
        };
        write!(f, "{name}")
    }
}

/// Iteration/epoch bookkeeping, serialized into checkpoint metadata.
///
/// `iteration` counts processed batches across all epochs; `epoch` counts
/// completed epochs.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrainState {
    pub epoch: usize,
    pub iteration: usize,
}

/// Configuration for DINO pretraining.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Number of training epochs.
    pub epochs: usize,
    /// Learning rate for the student optimizer.
    #[config(default = 1e-4)]
    pub lr: f64,
    /// Student optimizer.
    #[config(default = "OptimizerKind::AdamW")]
    pub optimizer: OptimizerKind,
    /// EMA momentum at the start of training.
    #[config(default = 0.996)]
    pub momentum_start: f64,
    /// EMA momentum at the end of training.
    #[config(default = 1.0)]
    pub momentum_end: f64,
    /// Iterations between interval log lines. 0 disables interval logging.
    #[config(default = 50)]
    pub log_interval: usize,
    /// Directory for the final checkpoint. Empty = no checkpoint.
    #[config(default = "String::new()")]
    pub checkpoint_dir: String,
    /// Reshuffle batch order every epoch.
    #[config(default = true)]
    pub shuffle: bool,
    /// Seed for the batch-order RNG.
    #[config(default = 42)]
    pub seed: u64,
}

/// Run DINO pretraining.
///
/// The momentum schedule is precomputed to cover exactly
/// `epochs * batches.len()` iterations. Returns the trained pair and the
/// final counters.
pub fn train<B: AutodiffBackend>(
    config: &TrainerConfig,
    model: DinoModel<B>,
    dino_loss: DinoLoss<B>,
    batches: &[MultiCropBatch<B>],
    val_batches: Option<&[MultiCropBatch<B>]>,
    sink: &mut dyn MetricsSink,
) -> anyhow::Result<(DinoModel<B>, TrainState)> {
    ensure!(config.epochs > 0, "training requires at least one epoch");
    ensure!(!batches.is_empty(), "training requires at least one batch");
    ensure!(
        (0.0..=1.0).contains(&config.momentum_start)
            && (0.0..=1.0).contains(&config.momentum_end),
        "EMA momentum bounds must lie in [0, 1]"
    );

    let schedule = MomentumSchedule::cosine(
        config.momentum_start,
        config.momentum_end,
        config.epochs,
        batches.len(),
    )?;

    tracing::info!(
        epochs = config.epochs,
        batches_per_epoch = batches.len(),
        optimizer = %config.optimizer,
        lr = config.lr,
        "Starting DINO pretraining"
    );

    match config.optimizer {
        OptimizerKind::Adam => train_loop(
            config, model, dino_loss, batches, val_batches, sink, schedule,
            AdamConfig::new().init(),
        ),
        OptimizerKind::AdamW => train_loop(
            config, model, dino_loss, batches, val_batches, sink, schedule,
            AdamWConfig::new().init(),
        ),
        OptimizerKind::Sgd => train_loop(
            config, model, dino_loss, batches, val_batches, sink, schedule,
            SgdConfig::new().init(),
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn train_loop<B: AutodiffBackend, O: Optimizer<DinoModel<B>, B>>(
    config: &TrainerConfig,
    mut model: DinoModel<B>,
    mut dino_loss: DinoLoss<B>,
    batches: &[MultiCropBatch<B>],
    val_batches: Option<&[MultiCropBatch<B>]>,
    sink: &mut dyn MetricsSink,
    schedule: MomentumSchedule,
    mut optimizer: O,
) -> anyhow::Result<(DinoModel<B>, TrainState)> {
    let mut state = TrainState::default();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..batches.len()).collect();
    let mut running = RunningAvg::new();
    let train_start = Instant::now();

    for _ in 0..config.epochs {
        if config.shuffle {
            order.shuffle(&mut rng);
        }

        for &index in &order {
            let batch = &batches[index];
            let (student_out, teacher_out) = model.forward(batch.crops());
            let loss = dino_loss.forward(student_out, teacher_out, state.epoch);
            let loss_val: f64 = loss.clone().into_scalar().elem();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.lr, model, grads);

            // Counter moves once per batch, before the EMA update reads the
            // schedule entry for the batch just processed.
            let iteration = state.iteration;
            state.iteration += 1;
            model = model.ema_update(schedule.get(iteration));

            sink.scalar("train/loss", iteration, loss_val);
            running.update(loss_val);
            if config.log_interval > 0 && (iteration + 1) % config.log_interval == 0 {
                if let Some(mean) = running.mean() {
                    tracing::info!(
                        epoch = state.epoch,
                        iteration,
                        avg_loss = format!("{mean:.4}"),
                        "train"
                    );
                }
                running.reset();
            }
        }

        if let Some(val) = val_batches {
            let mut val_avg = RunningAvg::new();
            for batch in val {
                let (student_out, teacher_out) = model.forward(batch.crops());
                let loss = dino_loss.forward(student_out, teacher_out, state.epoch);
                let loss_val: f64 = loss.into_scalar().elem();
                sink.scalar("val/loss", state.iteration, loss_val);
                val_avg.update(loss_val);
            }
            if let Some(mean) = val_avg.mean() {
                tracing::info!(
                    epoch = state.epoch,
                    avg_loss = format!("{mean:.4}"),
                    "validation"
                );
            }
        }

        // Epoch boundary: all batches of this epoch are done.
        state.epoch += 1;
    }

    tracing::info!(
        epochs = state.epoch,
        iterations = state.iteration,
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        "Training loop finished"
    );

    if !config.checkpoint_dir.is_empty() {
        save_checkpoint(&config.checkpoint_dir, &model, &state)?;
    }

    Ok((model, state))
}

/// Save the pair plus counter metadata under `dir` (`model.mpk` and
/// `meta.json`).
pub fn save_checkpoint<B: Backend>(
    dir: &str,
    model: &DinoModel<B>,
    state: &TrainState,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    model
        .clone()
        .save_file(format!("{dir}/model"), &recorder)
        .map_err(|e| anyhow!("failed to save model checkpoint to {dir}: {e}"))?;

    let meta_path = format!("{dir}/meta.json");
    serde_json::to_writer(std::fs::File::create(&meta_path)?, state)?;

    tracing::info!(dir, epoch = state.epoch, iteration = state.iteration, "Checkpoint saved");
    Ok(())
}

/// Load a pretrained pair from a checkpoint file (the `model` base path
/// written by [`save_checkpoint`]).
///
/// Creates a fresh pair from `config`, loads saved weights on top, and
/// verifies that every loaded parameter shape matches the configured
/// architecture. A mismatch fails here, at construction time.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    config: &DinoModelConfig,
    device: &B::Device,
) -> anyhow::Result<DinoModel<B>> {
    let expected = config.init::<B>(device).param_shapes();

    let model = config
        .init::<B>(device)
        .load_file(
            path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow!("failed to load checkpoint from {}: {e}", path.display()))?;

    let loaded = model.param_shapes();
    if loaded != expected {
        bail!(
            "checkpoint parameter shapes do not match the configured network: \
             expected {expected:?}, loaded {loaded:?}"
        );
    }
    Ok(model)
}
