//! DINO distillation loss.
//!
//! Cross-entropy between a sharpened, centered teacher distribution and the
//! student distribution, averaged over all (teacher view, student view)
//! pairs except same-view pairs. The teacher temperature follows a per-epoch
//! warmup schedule, and the running center is an EMA of teacher batch means,
//! so the caller must supply an accurate epoch index.

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};

use crate::model::dino::GLOBAL_CROPS;

/// Configuration for [`DinoLoss`].
#[derive(Config, Debug)]
pub struct DinoLossConfig {
    /// Dimension of the distillation space (projection head output).
    pub d_output: usize,
    /// Total training epochs, sizing the teacher temperature schedule.
    pub n_epochs: usize,
    /// Student softmax temperature.
    #[config(default = 0.1)]
    pub student_temp: f64,
    /// Teacher temperature at the start of warmup.
    #[config(default = 0.04)]
    pub warmup_teacher_temp: f64,
    /// Teacher temperature after warmup.
    #[config(default = 0.07)]
    pub teacher_temp: f64,
    /// Epochs over which the teacher temperature ramps linearly.
    #[config(default = 0)]
    pub warmup_teacher_temp_epochs: usize,
    /// EMA momentum for the center update.
    #[config(default = 0.9)]
    pub center_momentum: f64,
}

/// Stateful distillation loss: holds the running center and the epoch-indexed
/// teacher temperature schedule.
pub struct DinoLoss<B: Backend> {
    center: Tensor<B, 2>,
    teacher_temp_schedule: Vec<f64>,
    student_temp: f64,
    center_momentum: f64,
}

impl DinoLossConfig {
    /// Initialize the loss with a zero center on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DinoLoss<B> {
        let n_epochs = self.n_epochs.max(1);
        let warmup = self.warmup_teacher_temp_epochs.min(n_epochs);
        let mut schedule = Vec::with_capacity(n_epochs);
        for epoch in 0..n_epochs {
            if epoch < warmup {
                // Inclusive linear ramp, matching linspace semantics.
                let t = if warmup > 1 {
                    epoch as f64 / (warmup - 1) as f64
                } else {
                    1.0
                };
                schedule
                    .push(self.warmup_teacher_temp + t * (self.teacher_temp - self.warmup_teacher_temp));
            } else {
                schedule.push(self.teacher_temp);
            }
        }

        DinoLoss {
            center: Tensor::zeros([1, self.d_output], device),
            teacher_temp_schedule: schedule,
            student_temp: self.student_temp,
            center_momentum: self.center_momentum,
        }
    }
}

impl<B: Backend> DinoLoss<B> {
    /// Compute the distillation loss for one multi-crop batch.
    ///
    /// `student_out` is `(n_crops * batch, d)`, `teacher_out` is
    /// `(GLOBAL_CROPS * batch, d)`, both concatenated per crop along dim 0.
    /// Teacher targets are detached; gradients flow only into the student.
    /// As a side effect, the running center absorbs the teacher batch mean.
    pub fn forward(
        &mut self,
        student_out: Tensor<B, 2>,
        teacher_out: Tensor<B, 2>,
        epoch: usize,
    ) -> Tensor<B, 1> {
        let [t_rows, d] = teacher_out.dims();
        let [s_rows, s_d] = student_out.dims();
        assert_eq!(s_d, d, "student/teacher output dimensions differ: {s_d} vs {d}");
        assert!(
            t_rows > 0 && t_rows % GLOBAL_CROPS == 0,
            "teacher output rows ({t_rows}) must be a positive multiple of {GLOBAL_CROPS}"
        );
        let batch = t_rows / GLOBAL_CROPS;
        assert!(
            s_rows % batch == 0 && s_rows / batch >= GLOBAL_CROPS,
            "student output rows ({s_rows}) must cover at least the {GLOBAL_CROPS} global crops of batch size {batch}"
        );
        let n_crops = s_rows / batch;

        let temp = self.teacher_temp(epoch);
        let teacher_detached = teacher_out.detach();
        let centered = (teacher_detached.clone() - self.center.clone()).div_scalar(temp);
        let teacher_probs = softmax(centered, 1).chunk(GLOBAL_CROPS, 0);
        let student_logp =
            log_softmax(student_out.div_scalar(self.student_temp), 1).chunk(n_crops, 0);

        let mut total: Option<Tensor<B, 1>> = None;
        let mut terms = 0usize;
        for (j, target) in teacher_probs.iter().enumerate() {
            for (i, logp) in student_logp.iter().enumerate() {
                if i == j {
                    // A view should not be distilled into itself.
                    continue;
                }
                let ce = (target.clone() * logp.clone()).sum_dim(1).neg().mean();
                total = Some(match total {
                    Some(acc) => acc + ce,
                    None => ce,
                });
                terms += 1;
            }
        }
        let loss = total
            .expect("GLOBAL_CROPS >= 2 guarantees at least one cross-view pair")
            .div_scalar(terms as f64);

        let batch_center = teacher_detached.mean_dim(0);
        self.center = self.center.clone().mul_scalar(self.center_momentum)
            + batch_center.mul_scalar(1.0 - self.center_momentum);

        loss
    }

    /// Teacher temperature for an epoch; epochs past the schedule clamp to
    /// the final value.
    pub fn teacher_temp(&self, epoch: usize) -> f64 {
        self.teacher_temp_schedule[epoch.min(self.teacher_temp_schedule.len() - 1)]
    }

    /// Current running center, shape `(1, d_output)`.
    pub fn center(&self) -> Tensor<B, 2> {
        self.center.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_uniform_outputs_give_log_d() {
        let device = Default::default();
        let mut loss = DinoLossConfig::new(4, 1).init::<TestBackend>(&device);

        // Two global crops, batch 2, all logits zero: every distribution is
        // uniform, so cross-entropy is ln(d) regardless of temperature.
        let student = Tensor::<TestBackend, 2>::zeros([4, 4], &device);
        let teacher = Tensor::<TestBackend, 2>::zeros([4, 4], &device);

        let value: f32 = loss.forward(student, teacher, 0).into_scalar().elem();
        let expected = (4.0_f32).ln();
        assert!(
            (value - expected).abs() < 1e-4,
            "expected ln(4) = {expected}, got {value}"
        );
    }

    #[test]
    fn test_aligned_student_scores_lower_than_misaligned() {
        let device = Default::default();
        let mut loss_a = DinoLossConfig::new(3, 1).init::<TestBackend>(&device);
        let mut loss_b = DinoLossConfig::new(3, 1).init::<TestBackend>(&device);

        let teacher = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0_f32, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            &device,
        );
        let aligned = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0_f32, 0.0, 0.0], [1.0, 0.0, 0.0]]),
            &device,
        );
        let misaligned = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.0_f32, 1.0, 0.0], [0.0, 1.0, 0.0]]),
            &device,
        );

        let good: f32 = loss_a.forward(aligned, teacher.clone(), 0).into_scalar().elem();
        let bad: f32 = loss_b.forward(misaligned, teacher, 0).into_scalar().elem();
        assert!(
            good < bad,
            "aligned student should score lower: aligned={good}, misaligned={bad}"
        );
    }

    #[test]
    fn test_center_absorbs_teacher_mean() {
        let device = Default::default();
        let mut loss = DinoLossConfig::new(2, 1).init::<TestBackend>(&device);

        let student = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let teacher = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        let _ = loss.forward(student, teacher, 0);

        // center = 0.9 * 0 + 0.1 * mean(teacher) = 0.1
        let center: Vec<f32> = loss.center().into_data().to_vec().unwrap();
        for &c in &center {
            assert!((c - 0.1).abs() < 1e-6, "expected center 0.1, got {c}");
        }
    }

    #[test]
    fn test_teacher_temperature_warmup() {
        let device = Default::default();
        let loss = DinoLossConfig::new(2, 5)
            .with_warmup_teacher_temp(0.04)
            .with_teacher_temp(0.07)
            .with_warmup_teacher_temp_epochs(3)
            .init::<TestBackend>(&device);

        assert!((loss.teacher_temp(0) - 0.04).abs() < 1e-12);
        assert!((loss.teacher_temp(1) - 0.055).abs() < 1e-12);
        assert!((loss.teacher_temp(2) - 0.07).abs() < 1e-12);
        assert!((loss.teacher_temp(4) - 0.07).abs() < 1e-12);
        // Past the schedule: clamp to the final temperature.
        assert!((loss.teacher_temp(100) - 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_reach_student_only() {
        let device = Default::default();
        let mut loss = DinoLossConfig::new(4, 1).init::<TestAutodiffBackend>(&device);

        let student = Tensor::<TestAutodiffBackend, 2>::random(
            [4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        )
        .require_grad();
        let teacher = Tensor::<TestAutodiffBackend, 2>::random(
            [4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        )
        .require_grad();

        let out = loss.forward(student.clone(), teacher.clone(), 0);
        let grads = out.backward();

        assert!(student.grad(&grads).is_some(), "student must receive gradients");
        assert!(
            teacher.grad(&grads).is_none(),
            "teacher targets must be detached from the graph"
        );
    }

    #[test]
    fn test_local_crops_increase_pair_count_but_stay_finite() {
        let device = Default::default();
        let mut loss = DinoLossConfig::new(4, 1).init::<TestBackend>(&device);

        // 2 global + 3 local crops, batch 2.
        let student = Tensor::<TestBackend, 2>::random(
            [10, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let teacher = Tensor::<TestBackend, 2>::random(
            [4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let value: f32 = loss.forward(student, teacher, 0).into_scalar().elem();
        assert!(value.is_finite(), "loss must be finite, got {value}");
        assert!(value > 0.0, "cross-entropy of random outputs should be positive");
    }

    #[test]
    #[should_panic(expected = "dimensions differ")]
    fn test_dimension_mismatch_rejected() {
        let device = Default::default();
        let mut loss = DinoLossConfig::new(4, 1).init::<TestBackend>(&device);
        let student = Tensor::<TestBackend, 2>::zeros([4, 4], &device);
        let teacher = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        let _ = loss.forward(student, teacher, 0);
    }
}
