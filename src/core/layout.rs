use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RenderConstants;
use crate::geometry::{self, Point, Rect, Size};
use crate::prng::Prng;
use crate::registry::{Handle, RegistryError, Role, SlotKey, SlotRegistry, Stage};
use crate::surface::{Anchor, Color, GrayImage, ItemId, Outline, Shape, Stroke, Surface, TextStyle};

/// Every slot a complete diagram registers for `constants`, in pipeline order.
pub fn expected_keys(constants: &RenderConstants) -> Vec<SlotKey> {
    Stage::ALL
        .into_iter()
        .flat_map(|stage| stage_roles(stage, constants).map(move |role| SlotKey::new(stage, role)))
        .collect()
}

fn stage_roles(stage: Stage, c: &RenderConstants) -> Box<dyn Iterator<Item = Role>> {
    match stage {
        Stage::Input => Box::new([Role::Image, Role::Text].into_iter()),
        Stage::Conv => Box::new((0..c.filter_count).map(Role::Filter)),
        Stage::ReluPool | Stage::Flatten => Box::new(std::iter::empty()),
        Stage::Fc => Box::new((0..c.neuron_count).map(Role::Neuron)),
        Stage::Softmax => Box::new(
            [Role::ClassText, Role::LabelText]
                .into_iter()
                .chain((0..c.top_k).map(Role::TopK)),
        ),
    }
}

/// A built diagram: the slot registry plus the constants it was laid out with.
#[derive(Debug, Clone)]
pub struct Diagram {
    registry: SlotRegistry,
    constants: RenderConstants,
    omitted: Vec<Stage>,
}

impl Diagram {
    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn constants(&self) -> &RenderConstants {
        &self.constants
    }

    /// Stages drawn without registering their slots.
    pub fn omitted(&self) -> &[Stage] {
        &self.omitted
    }

    pub fn is_omitted(&self, stage: Stage) -> bool {
        self.omitted.contains(&stage)
    }

    /// Expected keys the registry does not hold.
    pub fn missing_keys(&self) -> Vec<SlotKey> {
        expected_keys(&self.constants)
            .into_iter()
            .filter(|k| !self.registry.contains(*k))
            .collect()
    }
}

/// Where a stage ended up on the surface; used to route static edges.
#[derive(Debug, Clone)]
struct StageExtent {
    bounds: Rect,
    /// Attachment points for dense edges, one per drawn node.
    nodes: Vec<Point>,
}

impl StageExtent {
    fn boxed(bounds: Rect) -> Self {
        Self {
            bounds,
            nodes: Vec::new(),
        }
    }
}

pub struct LayoutBuilder {
    constants: RenderConstants,
    omit: Vec<Stage>,
}

impl LayoutBuilder {
    pub fn new(constants: RenderConstants) -> Self {
        Self {
            constants,
            omit: Vec::new(),
        }
    }

    /// Draw `stage` but leave its slots unregistered.
    pub fn without(mut self, stage: Stage) -> Self {
        if !self.omit.contains(&stage) {
            self.omit.push(stage);
        }
        self
    }

    /// Draws the whole skeleton once and returns the populated registry.
    pub fn build<S: Surface + ?Sized>(self, surface: &mut S) -> Result<Diagram, RegistryError> {
        let mut b = Builder {
            c: &self.constants,
            omit: &self.omit,
            registry: SlotRegistry::new(),
            surface,
        };

        let input = b.input_stage()?;
        let conv = b.conv_stage()?;
        let pool = b.relu_pool_stage();
        let flatten = b.flatten_stage();
        let fc = b.fc_stage()?;
        let output = b.output_stage()?;

        for (from, to) in [(&input, &conv), (&conv, &pool), (&pool, &flatten), (&flatten, &fc), (&fc, &output)] {
            b.arrow(from, to);
        }
        b.dense(&flatten, &fc);
        b.dense(&fc, &output);
        b.legend();

        let registry = b.registry;
        info!(
            "Diagram built: {} slots registered, {} stage(s) omitted",
            registry.len(),
            self.omit.len()
        );
        Ok(Diagram {
            registry,
            constants: self.constants,
            omitted: self.omit,
        })
    }
}

struct Builder<'a, S: ?Sized> {
    c: &'a RenderConstants,
    omit: &'a [Stage],
    registry: SlotRegistry,
    surface: &'a mut S,
}

impl<S: Surface + ?Sized> Builder<'_, S> {
    fn commit(&mut self, stage: Stage, entries: Vec<(SlotKey, Handle)>) -> Result<(), RegistryError> {
        if self.omit.contains(&stage) {
            debug!("stage {stage} omitted, {} slot(s) not registered", entries.len());
            return Ok(());
        }
        self.registry.register_all(entries)
    }

    fn x(&self, stage: Stage) -> f32 {
        self.c.columns.x(stage)
    }

    fn title(&mut self, stage: Stage, text: &str) {
        let at = Point::new(self.x(stage), self.c.title_y);
        let style = TextStyle::new(self.c.title_font, self.c.palette.title);
        self.surface.add_text(at, text, style);
    }

    fn input_stage(&mut self) -> Result<StageExtent, RegistryError> {
        let [ch, h, w] = self.c.input_dims;
        self.title(Stage::Input, &format!("Input\n{ch}x{h}x{w}"));

        let x = self.x(Stage::Input);
        let side = self.c.input_display;
        let center = Point::new(x, self.c.y_center);

        let mut rng = Prng::new(self.c.placeholder_seed);
        let noise: Vec<u8> = (0..h * w).map(|_| rng.next_u8()).collect();
        let placeholder = GrayImage::new(w, h, noise)
            .unwrap_or_else(|| GrayImage::filled(w, h, 0))
            .resize_nearest(side, side);
        let image = self.surface.add_image(center, Arc::new(placeholder));

        let half = side as f32 / 2.0;
        let text_at = Point::new(x, self.c.y_center + half + self.c.edge_margin);
        let style = TextStyle::new(self.c.label_font, self.c.palette.text);
        let text = self.surface.add_text(text_at, "Val=...", style);

        self.commit(
            Stage::Input,
            vec![
                (SlotKey::new(Stage::Input, Role::Image), Handle::Image(image)),
                (SlotKey::new(Stage::Input, Role::Text), Handle::Text(text)),
            ],
        )?;
        Ok(StageExtent::boxed(Rect::centered(center, Size::square(side as f32))))
    }

    fn conv_stage(&mut self) -> Result<StageExtent, RegistryError> {
        let n = self.c.filter_count;
        self.title(Stage::Conv, &format!("Conv\n({n} filters)"));

        let x = self.x(Stage::Conv);
        let side = self.c.filter_display;
        let half = side as f32 / 2.0;
        let blank = Arc::new(GrayImage::filled(side, side, 0));
        let small = TextStyle::new(self.c.small_font, self.c.palette.text).anchored(Anchor::West);

        let centers = geometry::stack_centers(n, side as f32, self.c.filter_spacing, self.c.y_center);
        let mut entries = Vec::with_capacity(n);
        let mut bounds: Option<Rect> = None;
        for (i, &cy) in centers.iter().enumerate() {
            let center = Point::new(x, cy);
            let id = self.surface.add_image(center, Arc::clone(&blank));
            let label_at = Point::new(x + half + 4.0, cy - half + 6.0);
            self.surface.add_text(label_at, &format!("F{}", i + 1), small);
            entries.push((SlotKey::new(Stage::Conv, Role::Filter(i)), Handle::Image(id)));

            let r = Rect::centered(center, Size::square(side as f32));
            bounds = Some(bounds.map_or(r, |b| b.union(&r)));
        }

        self.commit(Stage::Conv, entries)?;
        let bounds = bounds.unwrap_or_else(|| Rect::centered(Point::new(x, self.c.y_center), Size::square(0.0)));
        Ok(StageExtent::boxed(bounds))
    }

    fn relu_pool_stage(&mut self) -> StageExtent {
        let [ch, h, w] = self.c.pooled_dims;
        self.title(Stage::ReluPool, &format!("ReLU/Pool\n{ch}x{h}x{w}"));

        let size = geometry::map_box(h, w, self.c.box_scale, self.c.box_density, self.c.min_box_size);
        let rect = Rect::centered(Point::new(self.x(Stage::ReluPool), self.c.y_center), size);
        self.surface
            .add_shape(Shape::Rect(rect), self.c.palette.relu_pool_box, self.c.default_outline());
        StageExtent::boxed(rect)
    }

    fn flatten_stage(&mut self) -> StageExtent {
        let dims = self.c.pooled_dims;
        let [ch, h, w] = dims;
        self.title(
            Stage::Flatten,
            &format!("Flatten\n{ch}x{h}x{w}={}", self.c.flattened_len()),
        );

        let center = Point::new(self.x(Stage::Flatten), self.c.y_center);
        let circles = geometry::flatten_circles(
            center,
            dims,
            self.c.flatten_base_radius,
            self.c.flatten_radius_eps,
            self.c.flatten_gap,
        );
        let label = TextStyle::new(self.c.label_font, self.c.palette.text);
        let mut extent = StageExtent::boxed(circles[0].bounds());
        for circle in &circles {
            let shape = Shape::Circle {
                center: circle.center,
                radius: circle.radius,
            };
            self.surface
                .add_shape(shape, self.c.palette.flatten_circle, self.c.default_outline());
            self.surface.add_text(circle.center, &circle.label.to_string(), label);
            extent.bounds = extent.bounds.union(&circle.bounds());
            extent.nodes.push(circle.center);
        }
        extent
    }

    /// A column of neuron circles; returns their ids in index order.
    fn neuron_column(&mut self, x: f32, fill: Color, extent: &mut StageExtent) -> Vec<ItemId> {
        let r = self.c.neuron_radius;
        let centers =
            geometry::stack_centers(self.c.neuron_count, 2.0 * r, self.c.neuron_spacing, self.c.y_center);
        let mut ids = Vec::with_capacity(centers.len());
        for cy in centers {
            let center = Point::new(x, cy);
            let shape = Shape::Circle { center, radius: r };
            ids.push(self.surface.add_shape(shape, fill, self.c.default_outline()));
            extent.bounds = extent.bounds.union(&shape.bounds());
            extent.nodes.push(center);
        }
        ids
    }

    fn fc_stage(&mut self) -> Result<StageExtent, RegistryError> {
        let n = self.c.neuron_count;
        self.title(Stage::Fc, &format!("FC\n({n} neurons)"));

        let x = self.x(Stage::Fc);
        let mut extent = StageExtent::boxed(Rect::centered(Point::new(x, self.c.y_center), Size::square(0.0)));
        let ids = self.neuron_column(x, self.c.palette.neuron_fill, &mut extent);
        let entries = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| (SlotKey::new(Stage::Fc, Role::Neuron(i)), Handle::Shape(id)))
            .collect();
        self.commit(Stage::Fc, entries)?;
        Ok(extent)
    }

    fn output_stage(&mut self) -> Result<StageExtent, RegistryError> {
        self.title(Stage::Softmax, "Output\n(Softmax)");

        let x = self.x(Stage::Softmax);
        let mut extent = StageExtent::boxed(Rect::centered(Point::new(x, self.c.y_center), Size::square(0.0)));
        self.neuron_column(x, self.c.palette.neuron_fill, &mut extent);

        let small = TextStyle::new(self.c.small_font, self.c.palette.text).anchored(Anchor::West);
        let class_x = x + self.c.neuron_radius + 6.0;
        for (class, node) in extent.nodes.clone().into_iter().enumerate() {
            self.surface
                .add_text(Point::new(class_x, node.y), &class.to_string(), small);
        }

        let label = TextStyle::new(self.c.label_font, self.c.palette.text);
        let mut y = self.c.y_center + self.c.output_text_offset;
        let class_text = self.surface.add_text(Point::new(x, y), "Predicted: ...", label);
        y += self.c.text_line;
        let label_text = self.surface.add_text(Point::new(x, y), "Label: ...", label);

        let mut entries = vec![
            (SlotKey::new(Stage::Softmax, Role::ClassText), Handle::Text(class_text)),
            (SlotKey::new(Stage::Softmax, Role::LabelText), Handle::Text(label_text)),
        ];
        y += self.c.text_line;
        for k in 0..self.c.top_k {
            let id = self.surface.add_text(Point::new(x, y), &format!("Top {}: ...", k + 1), label);
            entries.push((SlotKey::new(Stage::Softmax, Role::TopK(k)), Handle::Text(id)));
            y += self.c.topk_line;
        }

        self.commit(Stage::Softmax, entries)?;
        Ok(extent)
    }

    fn arrow(&mut self, from: &StageExtent, to: &StageExtent) {
        let m = self.c.edge_margin;
        let y = self.c.y_center;
        let start = Point::new(from.bounds.right() + m, y);
        let end = Point::new(to.bounds.x - m, y);
        if end.x <= start.x {
            return;
        }
        self.surface
            .add_line(start, end, Stroke::arrow(self.c.palette.arrow, 2.0));
    }

    /// All-pairs edges between the nodes of two columns.
    fn dense(&mut self, from: &StageExtent, to: &StageExtent) {
        let m = self.c.edge_margin;
        let stroke = Stroke::line(self.c.palette.edge, 1.0);
        for a in &from.nodes {
            for b in &to.nodes {
                let start = Point::new(from.bounds.right() + m, a.y);
                let end = Point::new(to.bounds.x - m, b.y);
                self.surface.add_line(start, end, stroke);
            }
        }
    }

    fn legend(&mut self) {
        let origin = self.c.legend_origin;
        let p = self.c.palette;
        let heading = TextStyle::new(self.c.title_font, p.text).anchored(Anchor::West);
        self.surface.add_text(origin, "Legend:", heading);

        let entries = [
            (p.input_box, "Input Image"),
            (p.conv_box, "Convolution Filters"),
            (p.relu_pool_box, "ReLU / Max Pooling"),
            (p.flatten_circle, "Flattened Dimensions"),
            (p.neuron_fill, "Fully Connected / Output Neurons"),
        ];
        let style = TextStyle::new(self.c.label_font, p.text).anchored(Anchor::West);
        let swatch = 20.0;
        let mut y = origin.y + 30.0;
        for (color, text) in entries {
            let rect = Rect::new(origin.x, y - swatch / 2.0, swatch, swatch);
            self.surface
                .add_shape(Shape::Rect(rect), color, Outline::new(Color::BLACK, 1.0));
            self.surface
                .add_text(Point::new(origin.x + swatch + 10.0, y), text, style);
            y += 30.0;
        }
    }
}
