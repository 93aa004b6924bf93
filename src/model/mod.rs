//! Forward-pass contract consumed by the frame scheduler.

use crate::registry::Stage;
use crate::tensor::{IntermediatesBundle, Tensor};

mod tiny;

pub use tiny::TinyConvNet;

pub trait Model {
    /// Runs one `1 x C x H x W` sample and returns every stage it produced.
    ///
    /// Stages the model cannot compute for this sample are left out of the
    /// bundle rather than reported as errors.
    fn forward_with_intermediates(&self, sample: &Tensor) -> IntermediatesBundle;

    /// Class probabilities only.
    fn forward(&self, sample: &Tensor) -> Option<Tensor> {
        self.forward_with_intermediates(sample).remove(Stage::Softmax)
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / logits.len().max(1) as f32; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
