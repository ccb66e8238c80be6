//! Student/teacher network pair for DINO self-distillation.
//!
//! Both networks are structurally identical backbone+head stacks with
//! independent parameters. The student sees every crop; the teacher sees
//! only the two global crops. The teacher is never a gradient target: its
//! sub-modules are constructed `no_grad`, and its parameters move only via
//! [`DinoModel::ema_update`], a convex combination with the student's
//! freshly stepped parameters.

use burn::module::Param;
use burn::nn::Linear;
use burn::prelude::*;

use crate::model::backbone::{Backbone, BackboneConfig};
use crate::model::head::{ProjectionHead, ProjectionHeadConfig};

/// Number of global crops. The teacher always receives exactly the first
/// `GLOBAL_CROPS` entries of a crop set.
pub const GLOBAL_CROPS: usize = 2;

/// Configuration for the student/teacher pair.
#[derive(Config, Debug)]
pub struct DinoModelConfig {
    /// Backbone configuration, shared by student and teacher. Any classifier
    /// layer is stripped for pretraining.
    pub backbone: BackboneConfig,
    /// Projection head hidden width.
    #[config(default = 2048)]
    pub d_proj: usize,
    /// Projection head output dimension (the distillation space).
    #[config(default = 256)]
    pub d_out: usize,
    /// Number of projection head layers. 0 = identity head.
    #[config(default = 3)]
    pub proj_layers: usize,
}

/// The student/teacher pair.
#[derive(Module, Debug)]
pub struct DinoModel<B: Backend> {
    student_backbone: Backbone<B>,
    teacher_backbone: Backbone<B>,
    student_head: ProjectionHead<B>,
    teacher_head: ProjectionHead<B>,
}

impl DinoModelConfig {
    /// Initialize the pair. Student and teacher heads share an architecture
    /// but are initialized independently; the teacher converges toward the
    /// student through the EMA update.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DinoModel<B> {
        let student_backbone = self.backbone.init(device).strip_classifier();
        let teacher_backbone = self.backbone.init(device).strip_classifier().no_grad();

        let head_config = ProjectionHeadConfig::new(student_backbone.feature_dim())
            .with_d_proj(self.d_proj)
            .with_d_output(self.d_out)
            .with_n_layers(self.proj_layers);
        let student_head = head_config.init(device);
        let teacher_head = head_config.init::<B>(device).no_grad();

        DinoModel {
            student_backbone,
            teacher_backbone,
            student_head,
            teacher_head,
        }
    }
}

/// In-place convex combination of a teacher layer toward a student layer.
///
/// Both sides are detached so the replacement parameters carry no autodiff
/// history.
fn ema_linear<B: Backend>(teacher: &mut Linear<B>, student: &Linear<B>, momentum: f64) {
    let weight = (teacher.weight.val().detach() * momentum
        + student.weight.val().detach() * (1.0 - momentum))
    .detach();
    teacher.weight = Param::from_tensor(weight);

    match (&mut teacher.bias, &student.bias) {
        (Some(tb), Some(sb)) => {
            let bias =
                (tb.val().detach() * momentum + sb.val().detach() * (1.0 - momentum)).detach();
            *tb = Param::from_tensor(bias);
        }
        (None, None) => {}
        _ => panic!("student/teacher bias layout diverged"),
    }
}

impl<B: Backend> DinoModel<B> {
    /// Multi-crop forward pass.
    ///
    /// The student processes every crop, the teacher only the first
    /// [`GLOBAL_CROPS`]; per-crop outputs are concatenated along dim 0, so
    /// the student output is `(n_crops * batch, d_out)` and the teacher
    /// output `(GLOBAL_CROPS * batch, d_out)`.
    ///
    /// # Panics
    /// Panics if fewer than [`GLOBAL_CROPS`] crops are supplied.
    pub fn forward(&self, crops: &[Tensor<B, 2>]) -> (Tensor<B, 2>, Tensor<B, 2>) {
        assert!(
            crops.len() >= GLOBAL_CROPS,
            "multi-crop forward needs at least {GLOBAL_CROPS} crops (the global views), got {}",
            crops.len()
        );

        let student: Vec<Tensor<B, 2>> = crops
            .iter()
            .map(|crop| {
                self.student_head
                    .forward(self.student_backbone.forward(crop.clone()))
            })
            .collect();
        let teacher: Vec<Tensor<B, 2>> = crops[..GLOBAL_CROPS]
            .iter()
            .map(|crop| {
                self.teacher_head
                    .forward(self.teacher_backbone.forward(crop.clone()))
            })
            .collect();

        (Tensor::cat(student, 0), Tensor::cat(teacher, 0))
    }

    /// EMA teacher update: `teacher = m * teacher + (1 - m) * student` for
    /// every matched parameter pair, backbone first, then head.
    ///
    /// Must run after the optimizer step so the blend uses the freshly
    /// updated student parameters.
    ///
    /// # Panics
    /// Panics if `momentum` lies outside `[0, 1]`.
    pub fn ema_update(mut self, momentum: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&momentum),
            "EMA momentum must lie in [0, 1], got {momentum}"
        );

        {
            let teacher = self.teacher_backbone.linears_mut();
            let student = self.student_backbone.linears();
            assert_eq!(
                teacher.len(),
                student.len(),
                "student/teacher backbone parameter pairs diverged"
            );
            for (t, s) in teacher.into_iter().zip(student) {
                ema_linear(t, s, momentum);
            }
        }
        {
            let teacher = self.teacher_head.linears_mut();
            let student = self.student_head.linears();
            assert_eq!(
                teacher.len(),
                student.len(),
                "student/teacher head parameter pairs diverged"
            );
            for (t, s) in teacher.into_iter().zip(student) {
                ema_linear(t, s, momentum);
            }
        }
        self
    }

    /// Student pipeline applied to a single view: backbone then head.
    pub fn embed(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.student_head
            .forward(self.student_backbone.forward(input))
    }

    /// Dimension of [`Self::embed`] output.
    pub fn embedding_dim(&self) -> usize {
        self.student_head
            .output_dim()
            .unwrap_or_else(|| self.student_backbone.feature_dim())
    }

    /// Weight shapes of every linear layer, in a fixed traversal order.
    /// Used to verify that a loaded checkpoint matches the configured
    /// architecture.
    pub fn param_shapes(&self) -> Vec<[usize; 2]> {
        self.student_backbone
            .linears()
            .into_iter()
            .chain(self.teacher_backbone.linears())
            .chain(self.student_head.linears())
            .chain(self.teacher_head.linears())
            .map(|layer| layer.weight.dims())
            .collect()
    }

    pub fn student_backbone(&self) -> &Backbone<B> {
        &self.student_backbone
    }

    pub fn teacher_backbone(&self) -> &Backbone<B> {
        &self.teacher_backbone
    }

    pub fn student_head(&self) -> &ProjectionHead<B> {
        &self.student_head
    }

    pub fn teacher_head(&self) -> &ProjectionHead<B> {
        &self.teacher_head
    }
}
