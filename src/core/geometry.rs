//! Pure layout math: semantic sizes in, pixel geometry out.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub w: f32,
    pub h: f32,
}

impl Size {
    pub const fn new(w: f32, h: f32) -> Self {
        Self { w, h }
    }

    pub const fn square(side: f32) -> Self {
        Self { w: side, h: side }
    }
}

/// Axis-aligned rectangle, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn centered(center: Point, size: Size) -> Self {
        Self::new(
            center.x - size.w / 2.0,
            center.y - size.h / 2.0,
            size.w,
            size.h,
        )
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Rect::new(x, y, r - x, b - y)
    }
}

/// Side length of a box for one dimension of a feature map.
///
/// `min_box` is a hard floor so tiny maps stay legible.
pub fn box_extent(dim: usize, box_scale: f32, density: f32, min_box: f32) -> f32 {
    let scaled = (dim as f32 * box_scale * density).floor();
    scaled.max(min_box)
}

/// Box for an `h x w` feature map.
pub fn map_box(h: usize, w: usize, box_scale: f32, density: f32, min_box: f32) -> Size {
    Size::new(
        box_extent(w, box_scale, density, min_box),
        box_extent(h, box_scale, density, min_box),
    )
}

/// Total vertical span of `count` stacked items.
pub fn stack_span(count: usize, item: f32, spacing: f32) -> f32 {
    count as f32 * (item + spacing)
}

/// Centers of `count` items of height `item`, stacked around `center`.
pub fn stack_centers(count: usize, item: f32, spacing: f32, center: f32) -> Vec<f32> {
    let start = center - stack_span(count, item, spacing) / 2.0;
    (0..count)
        .map(|i| start + i as f32 * (item + spacing) + item / 2.0)
        .collect()
}

/// Near-constant radius that grows only slightly with the dimension.
pub fn dimension_radius(base: f32, dim: usize, eps: f32) -> f32 {
    base + dim as f32 * eps
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub label: char,
    pub center: Point,
    pub radius: f32,
}

impl Circle {
    pub fn bounds(&self) -> Rect {
        Rect::centered(self.center, Size::square(self.radius * 2.0))
    }
}

/// Three circles (C, H, W) stacked vertically around `center`.
pub fn flatten_circles(center: Point, dims: [usize; 3], base: f32, eps: f32, gap: f32) -> [Circle; 3] {
    let [rc, rh, rw] = dims.map(|d| dimension_radius(base, d, eps));
    let total = 2.0 * (rc + rh + rw) + 2.0 * gap;
    let start = center.y - total / 2.0;

    let cy_c = start + rc;
    let cy_h = cy_c + rc + gap + rh;
    let cy_w = cy_h + rh + gap + rw;

    [
        Circle {
            label: 'C',
            center: Point::new(center.x, cy_c),
            radius: rc,
        },
        Circle {
            label: 'H',
            center: Point::new(center.x, cy_h),
            radius: rh,
        },
        Circle {
            label: 'W',
            center: Point::new(center.x, cy_w),
            radius: rw,
        },
    ]
}

/// Uniform scale that fits a `w x h` map inside a `target` square.
pub fn fit_scale(target: usize, w: usize, h: usize) -> f32 {
    if w == 0 || h == 0 {
        return 0.0;
    }
    let t = target as f32;
    (t / w as f32).min(t / h as f32)
}

/// Pixel size of a `w x h` map scaled by [`fit_scale`].
pub fn fitted_size(target: usize, w: usize, h: usize) -> (usize, usize) {
    let s = fit_scale(target, w, h);
    ((w as f32 * s) as usize, (h as f32 * s) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_extent_respects_floor() {
        assert_eq!(box_extent(2, 4.0, 0.1, 50.0), 50.0);
        assert_eq!(box_extent(280, 4.0, 0.1, 50.0), 112.0);
        // int() truncation of the scaled size
        assert_eq!(box_extent(149, 4.0, 0.1, 10.0), 59.0);
    }

    #[test]
    fn geometry_is_deterministic() {
        let a = stack_centers(8, 140.0, 20.0, 300.0);
        let b = stack_centers(8, 140.0, 20.0, 300.0);
        assert_eq!(a, b);

        let c1 = flatten_circles(Point::new(700.0, 300.0), [8, 14, 14], 20.0, 0.05, 30.0);
        let c2 = flatten_circles(Point::new(700.0, 300.0), [8, 14, 14], 20.0, 0.05, 30.0);
        assert_eq!(c1, c2);
        assert_eq!(map_box(14, 14, 4.0, 0.1, 100.0), map_box(14, 14, 4.0, 0.1, 100.0));
    }

    #[test]
    fn stack_is_centered_on_midline() {
        let centers = stack_centers(10, 30.0, 10.0, 300.0);
        assert_eq!(centers.len(), 10);
        // span 400 -> first item top at 100
        assert!((centers[0] - 115.0).abs() < 1e-4);
        assert!((centers[1] - centers[0] - 40.0).abs() < 1e-4);
        let mid = (centers[0] + centers[9]) / 2.0;
        // trailing spacing shifts the visual midline up by spacing/2
        assert!((mid - 295.0).abs() < 1e-4);
    }

    #[test]
    fn radius_grows_slowly() {
        assert_eq!(dimension_radius(20.0, 0, 0.05), 20.0);
        assert!((dimension_radius(20.0, 1568, 0.05) - 98.4).abs() < 1e-3);
        let small = dimension_radius(20.0, 8, 0.05);
        let large = dimension_radius(20.0, 14, 0.05);
        assert!(large > small && large - small < 1.0);
    }

    #[test]
    fn flatten_circles_do_not_overlap() {
        let [c, h, w] = flatten_circles(Point::new(0.0, 0.0), [8, 14, 14], 20.0, 0.05, 30.0);
        assert_eq!((c.label, h.label, w.label), ('C', 'H', 'W'));
        assert!(h.center.y - c.center.y >= c.radius + h.radius + 30.0 - 1e-4);
        assert!(w.center.y - h.center.y >= h.radius + w.radius + 30.0 - 1e-4);
    }

    #[test]
    fn fit_scale_preserves_aspect() {
        assert_eq!(fit_scale(140, 28, 28), 5.0);
        assert_eq!(fitted_size(140, 28, 14), (140, 70));
        assert_eq!(fitted_size(140, 0, 14), (0, 0));
    }
}
