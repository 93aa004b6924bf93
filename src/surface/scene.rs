use std::sync::Arc;

use crate::geometry::{Point, Rect};

use super::{Anchor, Color, Font, GrayImage, ItemId, Outline, Shape, Stroke, Surface, TextStyle};

#[derive(Debug, Clone)]
pub enum ItemKind {
    Image {
        at: Point,
        image: Arc<GrayImage>,
    },
    Shape {
        shape: Shape,
        fill: Color,
        outline: Outline,
    },
    Text {
        at: Point,
        text: String,
        style: TextStyle,
    },
    Line {
        from: Point,
        to: Point,
        stroke: Stroke,
    },
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
}

/// Retained display list.
///
/// Items are kept in creation order, which is also paint order. Ids are
/// indices into that list and are never reused.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    items: Vec<Item>,
    mutations: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of setter calls that hit an item.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id.0 as usize)
    }

    pub fn image(&self, id: ItemId) -> Option<&Arc<GrayImage>> {
        match &self.get(id)?.kind {
            ItemKind::Image { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn text(&self, id: ItemId) -> Option<&str> {
        match &self.get(id)?.kind {
            ItemKind::Text { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn font(&self, id: ItemId) -> Option<Font> {
        match &self.get(id)?.kind {
            ItemKind::Text { style, .. } => Some(style.font),
            _ => None,
        }
    }

    pub fn fill(&self, id: ItemId) -> Option<Color> {
        match &self.get(id)?.kind {
            ItemKind::Shape { fill, .. } => Some(*fill),
            _ => None,
        }
    }

    pub fn outline(&self, id: ItemId) -> Option<Outline> {
        match &self.get(id)?.kind {
            ItemKind::Shape { outline, .. } => Some(*outline),
            _ => None,
        }
    }

    /// Rough bounding box of everything drawn; used as a scroll region.
    ///
    /// Text is measured at ~0.6em per glyph.
    pub fn bounds(&self) -> Option<Rect> {
        self.items
            .iter()
            .map(|item| item_bounds(&item.kind))
            .reduce(|a, b| a.union(&b))
    }

    fn push(&mut self, kind: ItemKind) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        self.items.push(Item { id, kind });
        id
    }

    fn kind_mut(&mut self, id: ItemId) -> Option<&mut ItemKind> {
        let item = self.items.get_mut(id.0 as usize)?;
        Some(&mut item.kind)
    }
}

fn item_bounds(kind: &ItemKind) -> Rect {
    match kind {
        ItemKind::Image { at, image } => Rect::new(
            at.x - image.width() as f32 / 2.0,
            at.y - image.height() as f32 / 2.0,
            image.width() as f32,
            image.height() as f32,
        ),
        ItemKind::Shape { shape, .. } => shape.bounds(),
        ItemKind::Text { at, text, style } => {
            let lines = text.lines().count().max(1) as f32;
            let widest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0) as f32;
            let w = widest * style.font.size * 0.6;
            let h = lines * style.font.size * 1.2;
            let left = match style.anchor {
                Anchor::Center => at.x - w / 2.0,
                Anchor::West => at.x,
            };
            Rect::new(left, at.y - h / 2.0, w, h)
        }
        ItemKind::Line { from, to, .. } => Rect::new(
            from.x.min(to.x),
            from.y.min(to.y),
            (from.x - to.x).abs(),
            (from.y - to.y).abs(),
        ),
    }
}

impl Surface for Scene {
    fn add_image(&mut self, at: Point, image: Arc<GrayImage>) -> ItemId {
        self.push(ItemKind::Image { at, image })
    }

    fn set_image(&mut self, id: ItemId, new_image: Arc<GrayImage>) {
        let Some(ItemKind::Image { image, .. }) = self.kind_mut(id) else {
            return;
        };
        // The new bitmap is attached before the old reference is released.
        let previous = std::mem::replace(image, new_image);
        self.mutations += 1;
        drop(previous);
    }

    fn add_shape(&mut self, shape: Shape, fill: Color, outline: Outline) -> ItemId {
        self.push(ItemKind::Shape {
            shape,
            fill,
            outline,
        })
    }

    fn set_fill(&mut self, id: ItemId, new_fill: Color) {
        if let Some(ItemKind::Shape { fill, .. }) = self.kind_mut(id) {
            *fill = new_fill;
            self.mutations += 1;
        }
    }

    fn set_outline(&mut self, id: ItemId, new_outline: Outline) {
        if let Some(ItemKind::Shape { outline, .. }) = self.kind_mut(id) {
            *outline = new_outline;
            self.mutations += 1;
        }
    }

    fn add_text(&mut self, at: Point, text: &str, style: TextStyle) -> ItemId {
        self.push(ItemKind::Text {
            at,
            text: text.to_string(),
            style,
        })
    }

    fn set_text(&mut self, id: ItemId, new_text: &str) {
        if let Some(ItemKind::Text { text, .. }) = self.kind_mut(id) {
            text.clear();
            text.push_str(new_text);
            self.mutations += 1;
        }
    }

    fn set_font(&mut self, id: ItemId, new_font: Font) {
        if let Some(ItemKind::Text { style, .. }) = self.kind_mut(id) {
            style.font = new_font;
            self.mutations += 1;
        }
    }

    fn add_line(&mut self, from: Point, to: Point, stroke: Stroke) -> ItemId {
        self.push(ItemKind::Line { from, to, stroke })
    }
}
