//! DINO-style self-distillation pretraining on burn.
//!
//! Provides a student/teacher network pair trained with a multi-crop
//! distillation loss, where the teacher is updated as an exponential moving
//! average of the student, plus a fine-tuning head that freezes the
//! pretrained student pipeline and trains a linear classifier on top.

pub mod finetune;
pub mod model;
pub mod training;
