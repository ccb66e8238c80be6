//! DINO projection head: an MLP of bias-free linear layers projecting
//! backbone features into the distillation output space.
//!
//! Default shape is the 3-layer variant with GELU after the first two
//! layers. `n_layers = 0` gives an identity head, used by tests and
//! ablations.

use burn::nn::{Gelu, Linear, LinearConfig};
use burn::prelude::*;

/// Configuration for the projection head.
///
/// ```text
/// (batch, d_input)
///   → Linear(d_input→d_proj, no bias) → GELU
///   → Linear(d_proj→d_proj, no bias) → GELU
///   → Linear(d_proj→d_output, no bias)
///   → (batch, d_output)
/// ```
#[derive(Config, Debug)]
pub struct ProjectionHeadConfig {
    /// Backbone feature dimension.
    pub d_input: usize,
    /// Hidden projection width.
    #[config(default = 2048)]
    pub d_proj: usize,
    /// Output dimension of the distillation space.
    #[config(default = 256)]
    pub d_output: usize,
    /// Number of linear layers. 0 = identity head.
    #[config(default = 3)]
    pub n_layers: usize,
}

/// Bias-free MLP projection head.
#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: Gelu,
    d_output: usize,
}

impl ProjectionHeadConfig {
    /// Initialize a ProjectionHead with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ProjectionHead<B> {
        let mut layers = Vec::with_capacity(self.n_layers);
        for i in 0..self.n_layers {
            let d_in = if i == 0 { self.d_input } else { self.d_proj };
            let d_out = if i + 1 == self.n_layers {
                self.d_output
            } else {
                self.d_proj
            };
            layers.push(LinearConfig::new(d_in, d_out).with_bias(false).init(device));
        }
        ProjectionHead {
            layers,
            activation: Gelu::new(),
            d_output: self.d_output,
        }
    }
}

impl<B: Backend> ProjectionHead<B> {
    /// Forward pass. GELU follows the first two layers, never the last.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let n_layers = self.layers.len();
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < 2 && i + 1 < n_layers {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// Output dimension, or `None` for the identity head (whose output
    /// dimension is whatever comes in).
    pub fn output_dim(&self) -> Option<usize> {
        if self.layers.is_empty() {
            None
        } else {
            Some(self.d_output)
        }
    }

    /// Linear layers in forward order.
    pub fn layers(&self) -> &[Linear<B>] {
        &self.layers
    }

    pub(crate) fn linears(&self) -> Vec<&Linear<B>> {
        self.layers.iter().collect()
    }

    pub(crate) fn linears_mut(&mut self) -> Vec<&mut Linear<B>> {
        self.layers.iter_mut().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(32)
            .with_d_proj(16)
            .with_d_output(8)
            .init::<TestBackend>(&device);

        assert_eq!(head.layers().len(), 3);
        assert_eq!(head.output_dim(), Some(8));

        let input = Tensor::<TestBackend, 2>::random(
            [4, 32],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = head.forward(input);
        assert_eq!(output.dims(), [4, 8]);
    }

    #[test]
    fn test_no_bias_maps_zero_to_zero() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(16)
            .with_d_proj(8)
            .with_d_output(4)
            .init::<TestBackend>(&device);

        for layer in head.layers() {
            assert!(layer.bias.is_none(), "projection layers must be bias-free");
        }

        let zero = Tensor::<TestBackend, 2>::zeros([2, 16], &device);
        let output = head.forward(zero);
        let max_val: f32 = output.abs().max().into_scalar().elem();
        assert!(
            max_val < 1e-6,
            "bias-free head should map zero to zero, got max {max_val}"
        );
    }

    #[test]
    fn test_identity_head() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(8)
            .with_n_layers(0)
            .init::<TestBackend>(&device);

        assert_eq!(head.output_dim(), None);
        let input = Tensor::<TestBackend, 2>::random(
            [3, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = head.forward(input.clone());
        let diff: f32 = (output - input).abs().max().into_scalar().elem();
        assert!(diff < 1e-7, "identity head changed its input, diff={diff}");
    }

    #[test]
    fn test_single_layer_head_dims() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(16)
            .with_d_output(4)
            .with_n_layers(1)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 2>::random(
            [2, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(head.forward(input).dims(), [2, 4]);
    }

    #[test]
    fn test_head_is_nonlinear() {
        // GELU between layers: f(2x) must differ from 2*f(x).
        let device = Default::default();
        let head = ProjectionHeadConfig::new(8)
            .with_d_proj(8)
            .with_d_output(8)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 2>::random(
            [4, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let doubled = head.forward(input.clone() * 2.0);
        let scaled = head.forward(input) * 2.0;
        let diff: f32 = (doubled - scaled).abs().max().into_scalar().elem();
        assert!(diff > 1e-4, "head behaved linearly, diff={diff}");
    }
}
