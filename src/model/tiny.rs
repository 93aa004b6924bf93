use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::prng::Prng;
use crate::registry::Stage;
use crate::tensor::{IntermediatesBundle, Tensor};

use super::{softmax, Model};

const FILTERS: usize = 8;
const KERNEL: usize = 3;
const CLASSES: usize = 10;

/// Reference network: 8 same-padded 3x3 filters, ReLU, 2x2 max pool, one
/// dense layer and softmax. Weights are seeded, not trained;
/// [`TinyConvNet::calibrate`] turns the dense layer into class templates.
#[derive(Debug, Clone)]
pub struct TinyConvNet {
    height: usize,
    width: usize,
    kernels: Vec<f32>,
    conv_bias: Vec<f32>,
    dense: Vec<f32>,
    dense_bias: Vec<f32>,
}

impl TinyConvNet {
    pub fn new(height: usize, width: usize, seed: u64) -> Self {
        let mut rng = Prng::new(seed);

        let mut kernels = vec![0.0; FILTERS * KERNEL * KERNEL];
        let k_scale = 1.0 / (KERNEL * KERNEL) as f32;
        rng.fill_uniform(&mut kernels, -3.0 * k_scale, 3.0 * k_scale);
        let mut conv_bias = vec![0.0; FILTERS];
        rng.fill_uniform(&mut conv_bias, -0.05, 0.05);

        let inputs = FILTERS * (height / 2) * (width / 2);
        let d_scale = 1.0 / (inputs.max(1) as f32).sqrt();
        let mut dense = vec![0.0; CLASSES * inputs];
        rng.fill_uniform(&mut dense, -d_scale, d_scale);
        let dense_bias = vec![0.0; CLASSES];

        Self {
            height,
            width,
            kernels,
            conv_bias,
            dense,
            dense_bias,
        }
    }

    pub fn flattened_len(&self) -> usize {
        FILTERS * (self.height / 2) * (self.width / 2)
    }

    fn conv(&self, plane: &[f32]) -> Vec<f32> {
        let (h, w) = (self.height, self.width);
        let mut out = vec![0.0; FILTERS * h * w];
        for f in 0..FILTERS {
            let k = &self.kernels[f * KERNEL * KERNEL..(f + 1) * KERNEL * KERNEL];
            let map = &mut out[f * h * w..(f + 1) * h * w];
            for y in 0..h {
                for x in 0..w {
                    let mut acc = self.conv_bias[f];
                    for ky in 0..KERNEL {
                        let sy = y as isize + ky as isize - 1;
                        if sy < 0 || sy >= h as isize {
                            continue;
                        }
                        for kx in 0..KERNEL {
                            let sx = x as isize + kx as isize - 1;
                            if sx < 0 || sx >= w as isize {
                                continue;
                            }
                            acc += k[ky * KERNEL + kx] * plane[sy as usize * w + sx as usize];
                        }
                    }
                    map[y * w + x] = acc;
                }
            }
        }
        out
    }

    fn relu_pool(&self, conv: &[f32]) -> Vec<f32> {
        let (h, w) = (self.height, self.width);
        let (ph, pw) = (h / 2, w / 2);
        let mut out = vec![0.0; FILTERS * ph * pw];
        for f in 0..FILTERS {
            let map = &conv[f * h * w..(f + 1) * h * w];
            for y in 0..ph {
                for x in 0..pw {
                    let mut best = 0.0f32;
                    for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                        best = best.max(map[(2 * y + dy) * w + 2 * x + dx]);
                    }
                    out[(f * ph + y) * pw + x] = best;
                }
            }
        }
        out
    }

    fn dense(&self, features: &[f32]) -> Vec<f32> {
        let n = features.len();
        (0..CLASSES)
            .map(|c| {
                let row = &self.dense[c * n..(c + 1) * n];
                self.dense_bias[c] + row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>()
            })
            .collect()
    }

    fn features(&self, plane: &[f32]) -> Vec<f32> {
        self.relu_pool(&self.conv(plane))
    }

    /// Replaces the dense layer with per-class mean feature vectors, centered
    /// on the overall mean, from up to `max_samples` samples.
    ///
    /// Returns the number of samples used.
    pub fn calibrate(&mut self, dataset: &dyn Dataset, max_samples: usize) -> usize {
        let n = self.flattened_len();
        let mut sums = vec![0.0f32; CLASSES * n];
        let mut counts = [0usize; CLASSES];

        let mut used = 0;
        for i in 0..dataset.len().min(max_samples) {
            let Some((sample, label)) = dataset.get(i) else {
                continue;
            };
            let Some(plane) = self.plane_of(&sample) else {
                continue;
            };
            if label >= CLASSES {
                continue;
            }
            let feats = self.features(plane);
            for (acc, v) in sums[label * n..(label + 1) * n].iter_mut().zip(&feats) {
                *acc += v;
            }
            counts[label] += 1;
            used += 1;
        }
        if used == 0 {
            return 0;
        }

        let mut overall = vec![0.0f32; n];
        for c in 0..CLASSES {
            for (o, s) in overall.iter_mut().zip(&sums[c * n..(c + 1) * n]) {
                *o += s / used as f32;
            }
        }
        for c in 0..CLASSES {
            let row = &mut self.dense[c * n..(c + 1) * n];
            if counts[c] == 0 {
                row.fill(0.0);
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            for ((w, s), o) in row.iter_mut().zip(&sums[c * n..(c + 1) * n]).zip(&overall) {
                *w = s * inv - o;
            }
            let norm = row.iter().map(|w| w * w).sum::<f32>().sqrt().max(1e-6);
            row.iter_mut().for_each(|w| *w *= 4.0 / norm);
        }
        self.dense_bias.fill(0.0);
        info!("Calibrated dense layer from {} samples", used);
        used
    }

    fn plane_of<'t>(&self, sample: &'t Tensor) -> Option<&'t [f32]> {
        let (h, w, plane) = sample.plane()?;
        (h == self.height && w == self.width).then_some(plane)
    }
}

fn insert(bundle: &mut IntermediatesBundle, stage: Stage, shape: Vec<usize>, data: Vec<f32>) {
    match Tensor::new(shape, data) {
        Ok(t) => {
            bundle.insert(stage, t);
        }
        Err(e) => debug!("{stage} dropped: {e}"),
    }
}

impl Model for TinyConvNet {
    fn forward_with_intermediates(&self, sample: &Tensor) -> IntermediatesBundle {
        let mut bundle = IntermediatesBundle::new();
        let Some(plane) = self.plane_of(sample) else {
            debug!(
                "sample {:?} does not match {}x{} input, forward skipped",
                sample.shape(),
                self.height,
                self.width
            );
            if let Some((h, w, plane)) = sample.plane() {
                insert(&mut bundle, Stage::Input, vec![1, h, w], plane.to_vec());
            }
            return bundle;
        };
        let (h, w) = (self.height, self.width);

        let conv = self.conv(plane);
        let pooled = self.relu_pool(&conv);
        let logits = self.dense(&pooled);
        let probs = softmax(&logits);

        let (ph, pw) = (h / 2, w / 2);
        insert(&mut bundle, Stage::Input, vec![1, h, w], plane.to_vec());
        insert(&mut bundle, Stage::Conv, vec![1, FILTERS, h, w], conv);
        insert(&mut bundle, Stage::ReluPool, vec![1, FILTERS, ph, pw], pooled.clone());
        insert(&mut bundle, Stage::Flatten, vec![1, pooled.len()], pooled);
        bundle.insert(Stage::Fc, Tensor::row(logits));
        bundle.insert(Stage::Softmax, Tensor::row(probs));
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic;

    fn sample(value: f32) -> Tensor {
        Tensor::full(vec![1, 1, 28, 28], value)
    }

    #[test]
    fn bundle_has_every_stage_with_expected_shapes() {
        let net = TinyConvNet::new(28, 28, 1);
        let b = net.forward_with_intermediates(&sample(0.3));

        assert_eq!(b.stages(), Stage::ALL.to_vec());
        assert_eq!(b.get(Stage::Input).unwrap().shape(), &[1, 28, 28]);
        assert_eq!(b.get(Stage::Conv).unwrap().shape(), &[1, 8, 28, 28]);
        assert_eq!(b.get(Stage::ReluPool).unwrap().shape(), &[1, 8, 14, 14]);
        assert_eq!(b.get(Stage::Flatten).unwrap().shape(), &[1, 1568]);
        assert_eq!(b.get(Stage::Fc).unwrap().shape(), &[1, 10]);

        let probs = net.forward(&sample(0.3)).unwrap();
        assert!((probs.data().iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mismatched_sample_yields_input_only() {
        let net = TinyConvNet::new(28, 28, 1);
        let b = net.forward_with_intermediates(&Tensor::zeros(vec![1, 1, 10, 10]));
        assert_eq!(b.stages(), vec![Stage::Input]);
        assert!(net.forward(&Tensor::zeros(vec![1, 1, 10, 10])).is_none());
    }

    #[test]
    fn relu_pool_is_non_negative() {
        let net = TinyConvNet::new(28, 28, 5);
        let b = net.forward_with_intermediates(&sample(0.9));
        assert!(b.get(Stage::ReluPool).unwrap().data().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn calibration_uses_labelled_samples() {
        let data = synthetic::digits(40, 2);
        let mut net = TinyConvNet::new(28, 28, 3);
        assert_eq!(net.calibrate(&data, 30), 30);

        let (img, label) = data.get(0).unwrap();
        let probs = net.forward(&img).unwrap();
        let best = crate::update::argmax(probs.data()).unwrap();
        assert!(best < 10);
        assert!(label < 10);
    }
}
