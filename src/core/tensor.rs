use hashbrown::HashMap;
use thiserror::Error;

use crate::registry::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shape {shape:?} needs {expected} values, got {actual}")]
pub struct ShapeError {
    pub shape: Vec<usize>,
    pub expected: usize,
    pub actual: usize,
}

/// Dense row-major f32 array with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeError {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// A `1 x n` row.
    pub fn row(values: Vec<f32>) -> Self {
        Self {
            shape: vec![1, values.len()],
            data: values,
        }
    }

    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            data: vec![value; n],
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// First `h x w` plane, taking the last two dims as height and width.
    pub fn plane(&self) -> Option<(usize, usize, &[f32])> {
        let n = self.shape.len();
        if n < 2 {
            return None;
        }
        let (h, w) = (self.shape[n - 2], self.shape[n - 1]);
        Some((h, w, self.data.get(..h * w)?))
    }

    /// Values of the leading row of a `1 x n` (or any-rank) tensor.
    pub fn leading_row(&self) -> &[f32] {
        let n = self.shape.last().copied().unwrap_or(0);
        &self.data[..n.min(self.data.len())]
    }

    /// Channel maps of a `1 x C x H x W` tensor.
    pub fn channels(&self) -> Option<ChannelMaps<'_>> {
        if self.shape.len() != 4 {
            return None;
        }
        let (c, h, w) = (self.shape[1], self.shape[2], self.shape[3]);
        let data = self.data.get(..c * h * w)?;
        Some(ChannelMaps {
            count: c,
            height: h,
            width: w,
            data,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelMaps<'a> {
    pub count: usize,
    pub height: usize,
    pub width: usize,
    data: &'a [f32],
}

impl<'a> ChannelMaps<'a> {
    pub fn get(&self, channel: usize) -> Option<&'a [f32]> {
        if channel >= self.count {
            return None;
        }
        let size = self.height * self.width;
        self.data.get(channel * size..(channel + 1) * size)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        (0..self.count).filter_map(move |i| self.get(i))
    }
}

/// `(min, max)` of a slice, or `None` when empty.
pub fn min_max(values: &[f32]) -> Option<(f32, f32)> {
    let mut iter = values.iter().copied();
    let first = iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

/// Intermediate tensors produced by one forward pass, keyed by stage.
#[derive(Debug, Clone, Default)]
pub struct IntermediatesBundle {
    stages: HashMap<Stage, Tensor>,
}

impl IntermediatesBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: Stage, tensor: Tensor) -> Option<Tensor> {
        self.stages.insert(stage, tensor)
    }

    pub fn with(mut self, stage: Stage, tensor: Tensor) -> Self {
        self.insert(stage, tensor);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<&Tensor> {
        self.stages.get(&stage)
    }

    pub fn remove(&mut self, stage: Stage) -> Option<Tensor> {
        self.stages.remove(&stage)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains_key(&stage)
    }

    /// Present stages in pipeline order.
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.stages.contains_key(s))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_match_data() {
        assert!(Tensor::new(vec![1, 2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new(vec![2, 2], vec![0.0; 3]).unwrap_err();
        assert_eq!(err.expected, 4);
        assert_eq!(err.actual, 3);
    }

    #[test]
    fn channels_split_a_4d_map() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let t = Tensor::new(vec![1, 3, 2, 2], data).unwrap();
        let maps = t.channels().unwrap();
        assert_eq!((maps.count, maps.height, maps.width), (3, 2, 2));
        assert_eq!(maps.get(1).unwrap(), &[4.0, 5.0, 6.0, 7.0]);
        assert!(maps.get(3).is_none());
        assert_eq!(maps.iter().count(), 3);
        assert!(Tensor::row(vec![1.0]).channels().is_none());
    }

    #[test]
    fn plane_and_mean() {
        let t = Tensor::new(vec![1, 1, 2, 2], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let (h, w, px) = t.plane().unwrap();
        assert_eq!((h, w, px.len()), (2, 2, 4));
        assert_eq!(t.mean(), 0.5);
        assert_eq!(Tensor::zeros(vec![0]).mean(), 0.0);
    }

    #[test]
    fn min_max_of_slice() {
        assert_eq!(min_max(&[3.0, -1.0, 2.0]), Some((-1.0, 3.0)));
        assert_eq!(min_max(&[]), None);
    }

    #[test]
    fn bundle_reports_stages_in_pipeline_order() {
        let b = IntermediatesBundle::new()
            .with(Stage::Softmax, Tensor::row(vec![1.0]))
            .with(Stage::Input, Tensor::zeros(vec![1, 2, 2]));
        assert_eq!(b.stages(), vec![Stage::Input, Stage::Softmax]);
        assert!(!b.contains(Stage::Conv));
    }
}
