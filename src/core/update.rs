use core::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::geometry;
use crate::layout::Diagram;
use crate::registry::{Role, SlotKey, Stage};
use crate::surface::{Color, GrayImage, Outline, Surface};
use crate::tensor::{min_max, ChannelMaps, IntermediatesBundle, Tensor};

/// Gray level used for a feature map with no variation.
pub const FLAT_MAP_FALLBACK: u8 = 127;

/// Linear map of `values` onto `0..=255`; flat maps become [`FLAT_MAP_FALLBACK`].
pub fn normalize_map(values: &[f32]) -> Vec<u8> {
    match min_max(values) {
        Some((lo, hi)) if hi > lo => {
            let range = hi - lo;
            values
                .iter()
                .map(|&v| ((v - lo) / range * 255.0).clamp(0.0, 255.0) as u8)
                .collect()
        }
        _ => vec![FLAT_MAP_FALLBACK; values.len()],
    }
}

/// Gray intensity per neuron. When every activation is equal the
/// denominator is 1, which collapses all neurons to 0.
pub fn neuron_intensities(values: &[f32]) -> Vec<u8> {
    let Some((lo, hi)) = min_max(values) else {
        return Vec::new();
    };
    let range = if hi > lo { hi - lo } else { 1.0 };
    values
        .iter()
        .map(|&v| ((v - lo) / range * 255.0).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        match best {
            Some(b) if v.total_cmp(&values[b]).is_le() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Indices of the `k` largest values, descending. Equal values keep
/// index order.
pub fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order.truncate(k);
    order
}

/// Input sample as a display bitmap: `value * 255` clamped, nearest-resized
/// to a `display x display` square.
pub fn input_bitmap(input: &Tensor, display: usize) -> Option<GrayImage> {
    let (h, w, plane) = input.plane()?;
    let pixels = plane
        .iter()
        .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
        .collect();
    Some(GrayImage::new(w, h, pixels)?.resize_nearest(display, display))
}

/// One normalized channel, scaled uniformly to fit a `display` square.
pub fn filter_bitmap(map: &[f32], height: usize, width: usize, display: usize) -> Option<GrayImage> {
    let img = GrayImage::new(width, height, normalize_map(map))?;
    let (w, h) = geometry::fitted_size(display, width, height);
    Some(img.resize_nearest(w, h))
}

#[cfg(feature = "parallel")]
fn filter_bitmaps(maps: ChannelMaps<'_>, display: usize) -> Vec<Option<GrayImage>> {
    use rayon::prelude::*;

    (0..maps.count)
        .into_par_iter()
        .map(|i| filter_bitmap(maps.get(i)?, maps.height, maps.width, display))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn filter_bitmaps(maps: ChannelMaps<'_>, display: usize) -> Vec<Option<GrayImage>> {
    maps.iter()
        .map(|map| filter_bitmap(map, maps.height, maps.width, display))
        .collect()
}

/// Outline state the FC column should show for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Highlight {
    Correct { neuron: usize },
    Wrong { predicted: usize, truth: usize },
}

impl Highlight {
    pub fn plan(predicted: usize, label: usize) -> Self {
        if predicted == label {
            Highlight::Correct { neuron: predicted }
        } else {
            Highlight::Wrong {
                predicted,
                truth: label,
            }
        }
    }

    pub fn is_correct(self) -> bool {
        matches!(self, Highlight::Correct { .. })
    }

    /// Neuron outlines to apply on top of the default.
    pub fn outlines(self, affirmative: Color, negative: Color, truth: Color, width: f32) -> Vec<(usize, Outline)> {
        match self {
            Highlight::Correct { neuron } => vec![(neuron, Outline::new(affirmative, width))],
            Highlight::Wrong { predicted, truth: t } => vec![
                (predicted, Outline::new(negative, width)),
                (t, Outline::new(truth, width)),
            ],
        }
    }
}

/// What one `apply` call did; for logging and tests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReport {
    pub stages: Vec<Stage>,
    pub label: usize,
    pub input_mean: Option<f32>,
    pub prediction: Option<usize>,
    pub highlight: Option<Highlight>,
    /// `(class, probability)` in rank order.
    pub top_k: Vec<(usize, f32)>,
}

impl FrameReport {
    pub fn correct(&self) -> Option<bool> {
        self.highlight.map(Highlight::is_correct)
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prediction {
            Some(p) => write!(f, "predicted={p} label={}", self.label)?,
            None => write!(f, "predicted=- label={}", self.label)?,
        }
        if let Some(correct) = self.correct() {
            write!(f, " {}", if correct { "ok" } else { "miss" })?;
        }
        if let Some(mean) = self.input_mean {
            write!(f, " mean={mean:.2}")?;
        }
        if let Some((class, p)) = self.top_k.first() {
            write!(f, " top1={class}@{:.2}%", p * 100.0)?;
        }
        Ok(())
    }
}

/// Refreshes a built diagram from one forward pass.
///
/// Every stage is independent: a stage missing from the bundle is skipped
/// and its slots keep their previous content. Slots the diagram never
/// registered are ignored.
pub struct UpdateEngine<'a> {
    diagram: &'a Diagram,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(diagram: &'a Diagram) -> Self {
        Self { diagram }
    }

    pub fn apply<S: Surface + ?Sized>(&self, surface: &mut S, bundle: &IntermediatesBundle, label: usize) -> FrameReport {
        let mut report = FrameReport {
            label,
            ..FrameReport::default()
        };

        if let Some(input) = bundle.get(Stage::Input) {
            report.input_mean = Some(self.update_input(surface, input));
            report.stages.push(Stage::Input);
        }
        if let Some(conv) = bundle.get(Stage::Conv) {
            if self.update_conv(surface, conv) {
                report.stages.push(Stage::Conv);
            }
        }
        if let Some(fc) = bundle.get(Stage::Fc) {
            self.update_fc(surface, fc.leading_row());
            report.stages.push(Stage::Fc);
        }
        if let Some(softmax) = bundle.get(Stage::Softmax) {
            if self.update_softmax(surface, softmax.leading_row(), label, &mut report) {
                report.stages.push(Stage::Softmax);
            }
        }

        debug!("frame applied: {report}");
        report
    }

    fn key(stage: Stage, role: Role) -> SlotKey {
        SlotKey::new(stage, role)
    }

    fn set_text<S: Surface + ?Sized>(&self, surface: &mut S, key: SlotKey, text: &str) {
        if let Some(id) = self.diagram.registry().text(key) {
            surface.set_text(id, text);
        }
    }

    fn set_outline<S: Surface + ?Sized>(&self, surface: &mut S, neuron: usize, outline: Outline) {
        if let Some(id) = self.diagram.registry().shape(Self::key(Stage::Fc, Role::Neuron(neuron))) {
            surface.set_outline(id, outline);
        }
    }

    fn reset_outlines<S: Surface + ?Sized>(&self, surface: &mut S) {
        let c = self.diagram.constants();
        for i in 0..c.neuron_count {
            self.set_outline(surface, i, c.default_outline());
        }
    }

    fn update_input<S: Surface + ?Sized>(&self, surface: &mut S, input: &Tensor) -> f32 {
        let c = self.diagram.constants();
        let registry = self.diagram.registry();
        if let Some(id) = registry.image(Self::key(Stage::Input, Role::Image)) {
            match input_bitmap(input, c.input_display) {
                Some(img) => surface.set_image(id, Arc::new(img)),
                None => debug!("input tensor {:?} has no plane", input.shape()),
            }
        }
        let mean = input.mean();
        self.set_text(surface, Self::key(Stage::Input, Role::Text), &format!("Val={mean:.2}"));
        mean
    }

    fn update_conv<S: Surface + ?Sized>(&self, surface: &mut S, conv: &Tensor) -> bool {
        let Some(maps) = conv.channels() else {
            debug!("conv tensor {:?} is not 1xCxHxW, skipped", conv.shape());
            return false;
        };
        let display = self.diagram.constants().filter_display;
        let registry = self.diagram.registry();
        for (i, bitmap) in filter_bitmaps(maps, display).into_iter().enumerate() {
            let slot = registry.image(Self::key(Stage::Conv, Role::Filter(i)));
            if let (Some(bitmap), Some(id)) = (bitmap, slot) {
                surface.set_image(id, Arc::new(bitmap));
            }
        }
        true
    }

    fn update_fc<S: Surface + ?Sized>(&self, surface: &mut S, values: &[f32]) {
        self.reset_outlines(surface);
        for (i, level) in neuron_intensities(values).into_iter().enumerate() {
            if let Some(id) = self.diagram.registry().shape(Self::key(Stage::Fc, Role::Neuron(i))) {
                surface.set_fill(id, Color::gray(level));
            }
        }
    }

    fn update_softmax<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        probs: &[f32],
        label: usize,
        report: &mut FrameReport,
    ) -> bool {
        let Some(predicted) = argmax(probs) else {
            return false;
        };
        let c = self.diagram.constants();
        self.set_text(surface, Self::key(Stage::Softmax, Role::ClassText), &format!("Predicted: {predicted}"));
        self.set_text(surface, Self::key(Stage::Softmax, Role::LabelText), &format!("Label: {label}"));

        for (rank, class) in top_k(probs, c.top_k).into_iter().enumerate() {
            let p = probs[class];
            report.top_k.push((class, p));
            let key = Self::key(Stage::Softmax, Role::TopK(rank));
            if let Some(id) = self.diagram.registry().text(key) {
                surface.set_text(id, &format!("Top {}: Class {class}, {:.2}%", rank + 1, p * 100.0));
                surface.set_font(id, c.label_font.emphasized(rank == 0));
            }
        }

        let highlight = Highlight::plan(predicted, label);
        self.reset_outlines(surface);
        let p = &c.palette;
        for (neuron, outline) in highlight.outlines(p.affirmative, p.negative, p.ground_truth, c.highlight_width) {
            self.set_outline(surface, neuron, outline);
        }

        report.prediction = Some(predicted);
        report.highlight = Some(highlight);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConstants;
    use crate::layout::LayoutBuilder;
    use crate::surface::Scene;

    fn setup() -> (Diagram, Scene) {
        let mut scene = Scene::new();
        let diagram = LayoutBuilder::new(RenderConstants::default())
            .build(&mut scene)
            .unwrap();
        (diagram, scene)
    }

    fn neuron(diagram: &Diagram, i: usize) -> crate::surface::ItemId {
        diagram
            .registry()
            .shape(SlotKey::new(Stage::Fc, Role::Neuron(i)))
            .unwrap()
    }

    fn text(diagram: &Diagram, scene: &Scene, role: Role) -> String {
        let id = diagram.registry().text(SlotKey::new(Stage::Softmax, role)).unwrap();
        scene.text(id).unwrap().to_string()
    }

    fn highlighted(diagram: &Diagram, scene: &Scene, color: Color) -> Vec<usize> {
        (0..10)
            .filter(|&i| {
                let o = scene.outline(neuron(diagram, i)).unwrap();
                o.color == color && o.width == 2.0
            })
            .collect()
    }

    #[test]
    fn normalize_hits_both_ends() {
        let px = normalize_map(&[-1.0, 0.0, 3.0]);
        assert_eq!(px[0], 0);
        assert_eq!(px[2], 255);
        assert_eq!(px[1], 63);
    }

    #[test]
    fn flat_map_uses_fallback() {
        assert_eq!(normalize_map(&[2.0; 5]), vec![127; 5]);
        assert!(normalize_map(&[]).is_empty());
    }

    #[test]
    fn flat_activations_collapse_to_zero() {
        assert_eq!(neuron_intensities(&[0.4; 10]), vec![0; 10]);
        assert_eq!(neuron_intensities(&[0.0, 0.5, 1.0]), vec![0, 127, 255]);
    }

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.0; 10]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn top_k_is_a_stable_descending_prefix() {
        let probs = [0.05, 0.2, 0.05, 0.3, 0.2, 0.0, 0.1, 0.05, 0.05, 0.0];
        let top = top_k(&probs, 3);
        assert_eq!(top, vec![3, 1, 4]);

        let full = top_k(&probs, 10);
        assert_eq!(&full[..3], top.as_slice());
        assert!(full.windows(2).all(|w| probs[w[0]] >= probs[w[1]]));
        assert_eq!(top_k(&[0.1; 10], 3), vec![0, 1, 2]);
    }

    #[test]
    fn highlight_plan_counts() {
        let ok = Highlight::plan(4, 4).outlines(Color::GREEN, Color::RED, Color::BLUE, 2.0);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].1.color, Color::GREEN);

        let miss = Highlight::plan(1, 6).outlines(Color::GREEN, Color::RED, Color::BLUE, 2.0);
        assert_eq!(miss.len(), 2);
        assert_ne!(miss[0].0, miss[1].0);
        assert_eq!((miss[0].1.color, miss[1].1.color), (Color::RED, Color::BLUE));
    }

    #[test]
    fn scenario_a_flat_fc_and_tied_softmax() {
        let (diagram, mut scene) = setup();
        let bundle = IntermediatesBundle::new()
            .with(Stage::Fc, Tensor::row(vec![0.0; 10]))
            .with(Stage::Softmax, Tensor::row(vec![0.1; 10]));

        let report = UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 3);

        let fills: Vec<Color> = (0..10).map(|i| scene.fill(neuron(&diagram, i)).unwrap()).collect();
        assert!(fills.iter().all(|&c| c == fills[0]));
        assert_eq!(report.prediction, Some(0));
        assert_eq!(report.correct(), Some(false));
        assert_eq!(highlighted(&diagram, &scene, Color::RED), vec![0]);
        assert_eq!(highlighted(&diagram, &scene, Color::BLUE), vec![3]);
    }

    #[test]
    fn scenario_b_correct_prediction() {
        let (diagram, mut scene) = setup();
        let mut probs = vec![0.05; 9];
        probs.push(0.55);
        let bundle = IntermediatesBundle::new().with(Stage::Softmax, Tensor::row(probs));

        let report = UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 9);

        assert_eq!(report.prediction, Some(9));
        assert_eq!(text(&diagram, &scene, Role::ClassText), "Predicted: 9");
        assert_eq!(text(&diagram, &scene, Role::LabelText), "Label: 9");
        assert_eq!(text(&diagram, &scene, Role::TopK(0)), "Top 1: Class 9, 55.00%");
        assert_eq!(text(&diagram, &scene, Role::TopK(1)), "Top 2: Class 0, 5.00%");
        assert_eq!(highlighted(&diagram, &scene, Color::GREEN), vec![9]);
        assert!(highlighted(&diagram, &scene, Color::BLUE).is_empty());
        assert!(highlighted(&diagram, &scene, Color::RED).is_empty());

        let top1 = diagram.registry().text(SlotKey::new(Stage::Softmax, Role::TopK(0))).unwrap();
        let top2 = diagram.registry().text(SlotKey::new(Stage::Softmax, Role::TopK(1))).unwrap();
        assert!(scene.font(top1).unwrap().bold);
        assert!(!scene.font(top2).unwrap().bold);
    }

    #[test]
    fn scenario_c_flat_conv_channel_is_mid_gray() {
        let (diagram, mut scene) = setup();
        let mut data = vec![2.0; 14 * 14];
        data.extend((0..14 * 14).map(|v| v as f32));
        let conv = Tensor::new(vec![1, 2, 14, 14], data).unwrap();
        let bundle = IntermediatesBundle::new().with(Stage::Conv, conv);

        let report = UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 0);
        assert_eq!(report.stages, vec![Stage::Conv]);

        let flat = diagram.registry().image(SlotKey::new(Stage::Conv, Role::Filter(0))).unwrap();
        let img = scene.image(flat).unwrap();
        assert_eq!((img.width(), img.height()), (140, 140));
        assert!(img.is_uniform(FLAT_MAP_FALLBACK));

        let ramp = diagram.registry().image(SlotKey::new(Stage::Conv, Role::Filter(1))).unwrap();
        let img = scene.image(ramp).unwrap();
        assert_eq!(img.get(0, 0), Some(0));
        assert_eq!(img.get(139, 139), Some(255));
    }

    #[test]
    fn repeated_apply_is_idempotent_and_clears_stale_highlight() {
        let (diagram, mut scene) = setup();
        let engine = UpdateEngine::new(&diagram);

        let wrong = IntermediatesBundle::new().with(
            Stage::Softmax,
            Tensor::row(vec![0.0, 0.0, 0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        );
        engine.apply(&mut scene, &wrong, 5);
        engine.apply(&mut scene, &wrong, 5);
        assert_eq!(highlighted(&diagram, &scene, Color::RED), vec![2]);
        assert_eq!(highlighted(&diagram, &scene, Color::BLUE), vec![5]);

        let right = IntermediatesBundle::new().with(
            Stage::Softmax,
            Tensor::row(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
        );
        engine.apply(&mut scene, &right, 7);
        assert!(highlighted(&diagram, &scene, Color::RED).is_empty());
        assert!(highlighted(&diagram, &scene, Color::BLUE).is_empty());
        assert_eq!(highlighted(&diagram, &scene, Color::GREEN), vec![7]);
    }

    #[test]
    fn absent_stages_leave_slots_untouched() {
        let (diagram, mut scene) = setup();
        let engine = UpdateEngine::new(&diagram);
        let report = engine.apply(&mut scene, &IntermediatesBundle::new(), 1);
        assert!(report.stages.is_empty());
        assert_eq!(scene.mutations(), 0);
    }

    #[test]
    fn partial_diagram_ignores_missing_slots() {
        let mut scene = Scene::new();
        let diagram = LayoutBuilder::new(RenderConstants::default())
            .without(Stage::Fc)
            .build(&mut scene)
            .unwrap();
        let bundle = IntermediatesBundle::new()
            .with(Stage::Fc, Tensor::row(vec![1.0; 10]))
            .with(Stage::Softmax, Tensor::row(vec![0.1; 10]));

        let report = UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 4);
        assert_eq!(report.stages, vec![Stage::Fc, Stage::Softmax]);
        // only the softmax texts changed: class, label and three top-k lines
        // (text + font each)
        assert_eq!(scene.mutations(), 2 + 3 * 2);
    }

    #[test]
    fn input_updates_image_and_mean() {
        let (diagram, mut scene) = setup();
        let input = Tensor::new(vec![1, 28, 28], vec![0.5; 28 * 28]).unwrap();
        let bundle = IntermediatesBundle::new().with(Stage::Input, input);

        let report = UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 0);
        assert_eq!(report.input_mean, Some(0.5));

        let reg = diagram.registry();
        let img = scene.image(reg.image(SlotKey::new(Stage::Input, Role::Image)).unwrap()).unwrap();
        assert_eq!(img.width(), 280);
        assert!(img.is_uniform(127));
        let val = reg.text(SlotKey::new(Stage::Input, Role::Text)).unwrap();
        assert_eq!(scene.text(val), Some("Val=0.50"));
    }
}
