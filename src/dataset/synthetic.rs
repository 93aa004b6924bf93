//! Seven-segment digits on a 28x28 canvas.
//!
//! Stand-in samples when no MNIST files are available. Each sample gets a
//! random offset, stroke width and a little background noise so the
//! visualization has something to show.

use crate::prng::Prng;

use super::InMemoryDataset;

pub const SIDE: usize = 28;

// Segment bits: a=top, b=top right, c=bottom right, d=bottom, e=bottom left,
// f=top left, g=middle.
const SEGMENTS: [u8; 10] = [63, 6, 91, 79, 102, 109, 125, 7, 127, 111];

fn fill_rect(canvas: &mut [f32], x0: i32, y0: i32, x1: i32, y1: i32) {
    for y in y0.max(0)..y1.min(SIDE as i32) {
        for x in x0.max(0)..x1.min(SIDE as i32) {
            canvas[y as usize * SIDE + x as usize] = 1.0;
        }
    }
}

/// Renders `digit` (0..=9) into a fresh canvas.
pub fn render_digit(digit: usize, rng: &mut Prng) -> Vec<f32> {
    let mut canvas = vec![0.0f32; SIDE * SIDE];
    for px in canvas.iter_mut() {
        *px = rng.gen_range_f32(0.0, 0.08);
    }

    let dx = rng.gen_range_usize(0, 5) as i32 - 2;
    let dy = rng.gen_range_usize(0, 5) as i32 - 2;
    let t = rng.gen_range_usize(2, 4) as i32;
    let (left, right) = (8 + dx, 19 + dx);
    let (top, mid, bottom) = (4 + dy, 13 + dy, 22 + dy);

    let mask = SEGMENTS[digit % 10];
    let on = |bit: u8| mask & (1 << bit) != 0;
    if on(0) {
        fill_rect(&mut canvas, left, top, right + t, top + t);
    }
    if on(1) {
        fill_rect(&mut canvas, right, top, right + t, mid + t);
    }
    if on(2) {
        fill_rect(&mut canvas, right, mid, right + t, bottom + t);
    }
    if on(3) {
        fill_rect(&mut canvas, left, bottom, right + t, bottom + t);
    }
    if on(4) {
        fill_rect(&mut canvas, left, mid, left + t, bottom + t);
    }
    if on(5) {
        fill_rect(&mut canvas, left, top, left + t, mid + t);
    }
    if on(6) {
        fill_rect(&mut canvas, left, mid, right + t, mid + t);
    }
    canvas
}

/// `count` labelled samples from a seeded stream.
pub fn digits(count: usize, seed: u64) -> InMemoryDataset {
    let mut rng = Prng::new(seed);
    let mut pixels = Vec::with_capacity(count * SIDE * SIDE);
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        let digit = rng.gen_range_usize(0, 10);
        pixels.extend(render_digit(digit, &mut rng));
        labels.push(digit as u8);
    }
    InMemoryDataset {
        height: SIDE,
        width: SIDE,
        pixels,
        labels,
    }
}
