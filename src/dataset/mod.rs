//! Ordered `(image, label)` sources for the frame scheduler.
//!
//! Images come out as `1 x 1 x H x W` tensors with pixels in `[0, 1]`.

use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::tensor::Tensor;

pub mod mnist;
pub mod synthetic;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset i/o: {0}")]
    Io(#[from] io::Error),
    #[error("bad IDX magic: expected {expected}, found {found}")]
    BadMagic { expected: u32, found: u32 },
    #[error("{what} truncated: need {expected} bytes, have {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("image buffer holds {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

pub trait Dataset {
    fn len(&self) -> usize;

    /// Sample `index` and its label, or `None` past the end.
    fn get(&self, index: usize) -> Option<(Tensor, usize)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Images stored back to back in one buffer.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    height: usize,
    width: usize,
    pixels: Vec<f32>,
    labels: Vec<u8>,
}

impl InMemoryDataset {
    pub fn new(height: usize, width: usize, pixels: Vec<f32>, labels: Vec<u8>) -> Result<Self, DatasetError> {
        let expected = labels
            .len()
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width));
        if expected != Some(pixels.len()) {
            return Err(DatasetError::ShapeMismatch {
                expected: expected.unwrap_or(usize::MAX),
                actual: pixels.len(),
            });
        }
        Ok(Self {
            height,
            width,
            pixels,
            labels,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Option<(Tensor, usize)> {
        let label = *self.labels.get(index)?;
        let size = self.height.checked_mul(self.width)?;
        let start = index.checked_mul(size)?;
        let pixels = self.pixels.get(start..start.checked_add(size)?)?.to_vec();
        let image = Tensor::new(vec![1, 1, self.height, self.width], pixels).ok()?;
        Some((image, label as usize))
    }
}

/// MNIST training split from `dir` when present, synthetic digits otherwise.
pub fn load_or_synthesize(dir: Option<&Path>, limit: usize, seed: u64) -> InMemoryDataset {
    if let Some(dir) = dir {
        match mnist::load_dir(dir, limit) {
            Ok(ds) => {
                info!("Loaded {} MNIST samples from {:?}", ds.len(), dir);
                return ds;
            }
            Err(e) => warn!("Could not load MNIST from {:?}: {}", dir, e),
        }
    }
    let count = limit.clamp(1, 1000);
    info!("Using {} synthetic digit samples", count);
    synthetic::digits(count, seed)
}
