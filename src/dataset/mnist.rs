// IDX reader for the MNIST distribution files.
//
// Layout (all header fields big-endian u32):
//   images: magic 2051, count, rows, cols, then count*rows*cols u8 pixels
//   labels: magic 2049, count, then count u8 labels

use std::fs;
use std::path::Path;

use super::{DatasetError, InMemoryDataset};

pub const IMAGES_MAGIC: u32 = 2051;
pub const LABELS_MAGIC: u32 = 2049;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

fn read_be_u32(data: &[u8], offset: &mut usize, what: &'static str) -> Result<u32, DatasetError> {
    let bytes = data.get(*offset..*offset + 4).ok_or(DatasetError::Truncated {
        what,
        expected: *offset + 4,
        actual: data.len(),
    })?;
    *offset += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn expect_magic(data: &[u8], offset: &mut usize, expected: u32, what: &'static str) -> Result<(), DatasetError> {
    let found = read_be_u32(data, offset, what)?;
    if found != expected {
        return Err(DatasetError::BadMagic { expected, found });
    }
    Ok(())
}

/// Parsed image file: `(rows, cols, pixels)` with pixels scaled to `[0, 1]`.
pub fn parse_images(data: &[u8], limit: usize) -> Result<(usize, usize, Vec<f32>), DatasetError> {
    let mut offset = 0;
    expect_magic(data, &mut offset, IMAGES_MAGIC, "image header")?;
    let total = read_be_u32(data, &mut offset, "image header")? as usize;
    let rows = read_be_u32(data, &mut offset, "image header")? as usize;
    let cols = read_be_u32(data, &mut offset, "image header")? as usize;

    let count = total.min(limit);
    let end = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .and_then(|n| n.checked_add(offset));
    let src = end.and_then(|end| data.get(offset..end)).ok_or(DatasetError::Truncated {
        what: "image file",
        expected: end.unwrap_or(usize::MAX),
        actual: data.len(),
    })?;
    let pixels = src.iter().map(|&px| px as f32 / 255.0).collect();
    Ok((rows, cols, pixels))
}

pub fn parse_labels(data: &[u8], limit: usize) -> Result<Vec<u8>, DatasetError> {
    let mut offset = 0;
    expect_magic(data, &mut offset, LABELS_MAGIC, "label header")?;
    let total = read_be_u32(data, &mut offset, "label header")? as usize;

    let count = total.min(limit);
    let end = count.checked_add(offset);
    let src = end.and_then(|end| data.get(offset..end)).ok_or(DatasetError::Truncated {
        what: "label file",
        expected: end.unwrap_or(usize::MAX),
        actual: data.len(),
    })?;
    Ok(src.to_vec())
}

/// Pairs an image buffer with a label buffer, keeping at most `limit` samples.
pub fn from_idx(images: &[u8], labels: &[u8], limit: usize) -> Result<InMemoryDataset, DatasetError> {
    let (rows, cols, pixels) = parse_images(images, limit)?;
    let labels = parse_labels(labels, limit)?;
    let image_count = match rows.checked_mul(cols) {
        Some(0) => 0,
        Some(size) => pixels.len() / size,
        None => {
            return Err(DatasetError::ShapeMismatch {
                expected: usize::MAX,
                actual: pixels.len(),
            })
        }
    };
    if image_count != labels.len() {
        return Err(DatasetError::CountMismatch {
            images: image_count,
            labels: labels.len(),
        });
    }
    InMemoryDataset::new(rows, cols, pixels, labels)
}

pub fn load_idx(images: &Path, labels: &Path, limit: usize) -> Result<InMemoryDataset, DatasetError> {
    let image_bytes = fs::read(images)?;
    let label_bytes = fs::read(labels)?;
    from_idx(&image_bytes, &label_bytes, limit)
}

/// Loads the training split from a directory holding the unpacked files.
pub fn load_dir(dir: &Path, limit: usize) -> Result<InMemoryDataset, DatasetError> {
    load_idx(&dir.join(TRAIN_IMAGES), &dir.join(TRAIN_LABELS), limit)
}
