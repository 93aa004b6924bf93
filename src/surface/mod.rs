//! Rendering-surface contract.
//!
//! The layout and update code only talks to a [`Surface`]. The retained
//! [`Scene`] is the in-process implementation; windowed front-ends paint a
//! `Scene` each frame instead of implementing the trait themselves.

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

mod scene;

pub use scene::{Item, ItemKind, Scene};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// 8-bit grayscale bitmap, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    pub fn is_uniform(&self, value: u8) -> bool {
        self.pixels.iter().all(|&p| p == value)
    }

    /// Nearest-neighbor resample to `width x height`.
    ///
    /// Samples the source at pixel centers, so integer upscales replicate
    /// each source pixel into an exact block.
    pub fn resize_nearest(&self, width: usize, height: usize) -> GrayImage {
        if self.width == 0 || self.height == 0 {
            return GrayImage::filled(width, height, 0);
        }
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            let sy = (((y as f32 + 0.5) * self.height as f32 / height as f32) as usize)
                .min(self.height - 1);
            let row = &self.pixels[sy * self.width..(sy + 1) * self.width];
            for x in 0..width {
                let sx = (((x as f32 + 0.5) * self.width as f32 / width as f32) as usize)
                    .min(self.width - 1);
                pixels.push(row[sx]);
            }
        }
        GrayImage {
            width,
            height,
            pixels,
        }
    }

    /// Expand to RGBA8 for texture upload.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for &p in &self.pixels {
            out.extend_from_slice(&[p, p, p, 255]);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 128, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(v: u8) -> Self {
        Self { r: v, g: v, b: v }
    }

    /// Parses `#rrggbb`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Color::from_hex(&s).ok_or_else(|| format!("invalid color {s:?}, expected #rrggbb"))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Font {
    pub size: f32,
    pub bold: bool,
}

impl Font {
    pub const fn plain(size: f32) -> Self {
        Self { size, bold: false }
    }

    pub const fn bold(size: f32) -> Self {
        Self { size, bold: true }
    }

    pub const fn emphasized(self, bold: bool) -> Self {
        Self {
            size: self.size,
            bold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub color: Color,
    pub width: f32,
}

impl Outline {
    pub const fn new(color: Color, width: f32) -> Self {
        Self { color, width }
    }
}

/// Which point of the text block `at` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    Center,
    /// Vertically centered, left edge at `at`.
    West,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub font: Font,
    pub color: Color,
    pub anchor: Anchor,
}

impl TextStyle {
    pub const fn new(font: Font, color: Color) -> Self {
        Self {
            font,
            color,
            anchor: Anchor::Center,
        }
    }

    pub const fn anchored(self, anchor: Anchor) -> Self {
        Self {
            font: self.font,
            color: self.color,
            anchor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Rect(Rect),
    Circle { center: Point, radius: f32 },
}

impl Shape {
    pub fn bounds(&self) -> Rect {
        match *self {
            Shape::Rect(r) => r,
            Shape::Circle { center, radius } => Rect::new(
                center.x - radius,
                center.y - radius,
                radius * 2.0,
                radius * 2.0,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
    pub arrow: bool,
}

impl Stroke {
    pub const fn line(color: Color, width: f32) -> Self {
        Self {
            color,
            width,
            arrow: false,
        }
    }

    pub const fn arrow(color: Color, width: f32) -> Self {
        Self {
            color,
            width,
            arrow: true,
        }
    }
}

/// Anything the diagram can be drawn on.
///
/// Setters addressing an unknown item, or an item of another kind, are
/// no-ops.
pub trait Surface {
    /// Image centered on `at`.
    fn add_image(&mut self, at: Point, image: Arc<GrayImage>) -> ItemId;
    fn set_image(&mut self, id: ItemId, image: Arc<GrayImage>);

    fn add_shape(&mut self, shape: Shape, fill: Color, outline: Outline) -> ItemId;
    fn set_fill(&mut self, id: ItemId, fill: Color);
    fn set_outline(&mut self, id: ItemId, outline: Outline);

    /// Text placed at `at` per the style's anchor; newlines start new lines.
    fn add_text(&mut self, at: Point, text: &str, style: TextStyle) -> ItemId;
    fn set_text(&mut self, id: ItemId, text: &str);
    fn set_font(&mut self, id: ItemId, font: Font);

    fn add_line(&mut self, from: Point, to: Point, stroke: Stroke) -> ItemId;
}
