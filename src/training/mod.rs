//! Training pipeline: multi-crop batches, the momentum schedule, the DINO
//! distillation loss, metrics sinks, and the training loop controller.

pub mod data;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;
