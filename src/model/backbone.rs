//! Backbone construction: a config-driven MLP feature extractor with an
//! optional final classification layer.
//!
//! Stands in for the usual vision backbones (ResNet/ViT). For supervised use
//! the backbone ends in a classification layer; for self-supervised
//! pretraining that layer is stripped ([`Backbone::strip_classifier`]) so the
//! backbone emits raw features for the projection head.

use anyhow::bail;
use burn::nn::{Gelu, Linear, LinearConfig};
use burn::prelude::*;

/// Configuration for the MLP backbone.
///
/// `d_hidden` lists the hidden layer widths; the last entry is the feature
/// dimension. An empty `d_hidden` gives an identity feature extractor.
/// `num_classes = 0` means no classification layer is constructed.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Input dimension (flattened crop size).
    pub d_input: usize,
    /// Hidden layer widths. Empty = identity backbone.
    #[config(default = "vec![512, 256]")]
    pub d_hidden: Vec<usize>,
    /// Width of the final classification layer. 0 = none.
    #[config(default = 0)]
    pub num_classes: usize,
}

/// Resolve a backbone identifier to its configuration.
///
/// Unknown identifiers fail at configuration time.
pub fn backbone_preset(name: &str, d_input: usize) -> anyhow::Result<BackboneConfig> {
    let config = match name {
        "identity" => BackboneConfig::new(d_input).with_d_hidden(vec![]),
        "mlp-small" => BackboneConfig::new(d_input).with_d_hidden(vec![256, 128]),
        "mlp-base" => BackboneConfig::new(d_input).with_d_hidden(vec![512, 256]),
        other => bail!(
            "unknown backbone {other:?}; expected one of: identity, mlp-small, mlp-base"
        ),
    };
    Ok(config)
}

/// MLP feature extractor with GELU activations and an optional classifier.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    /// Hidden layers, each followed by GELU.
    layers: Vec<Linear<B>>,
    /// Final classification layer. `None` once stripped for pretraining.
    classifier: Option<Linear<B>>,
    activation: Gelu,
    /// Feature dimension emitted before the classifier.
    d_features: usize,
}

impl BackboneConfig {
    /// Initialize a Backbone with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut layers = Vec::with_capacity(self.d_hidden.len());
        let mut d_prev = self.d_input;
        for &d in &self.d_hidden {
            layers.push(LinearConfig::new(d_prev, d).init(device));
            d_prev = d;
        }
        let classifier = if self.num_classes > 0 {
            Some(LinearConfig::new(d_prev, self.num_classes).init(device))
        } else {
            None
        };
        Backbone {
            layers,
            classifier,
            activation: Gelu::new(),
            d_features: d_prev,
        }
    }
}

impl<B: Backend> Backbone<B> {
    /// Forward pass. With a classifier present the output has `num_classes`
    /// columns, otherwise `feature_dim()` columns.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for layer in &self.layers {
            x = self.activation.forward(layer.forward(x));
        }
        match &self.classifier {
            Some(classifier) => classifier.forward(x),
            None => x,
        }
    }

    /// Replace the classification layer with identity, exposing features.
    pub fn strip_classifier(mut self) -> Self {
        self.classifier = None;
        self
    }

    /// Dimension of the feature output (before any classifier).
    pub fn feature_dim(&self) -> usize {
        self.d_features
    }

    /// Hidden layers, in forward order.
    pub fn hidden_layers(&self) -> &[Linear<B>] {
        &self.layers
    }

    /// All linear layers in forward order (hidden layers then classifier).
    pub(crate) fn linears(&self) -> Vec<&Linear<B>> {
        self.layers.iter().chain(self.classifier.iter()).collect()
    }

    /// Mutable view of all linear layers, same order as [`Self::linears`].
    pub(crate) fn linears_mut(&mut self) -> Vec<&mut Linear<B>> {
        self.layers
            .iter_mut()
            .chain(self.classifier.iter_mut())
            .collect()
    }
}
