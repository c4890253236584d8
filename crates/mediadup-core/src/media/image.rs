//! Image attributes and the grid color signature.
//!
//! The signature partitions the frame into a `rows x cols` grid and records
//! the mean of each color channel per cell, scaled by 256 and truncated into
//! a `u16`. A flat image of value 128 therefore yields 32768 everywhere.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ImageConfig;
use crate::pipeline::decode::ImageDecoder;

/// Decoded raster in RGB order, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    height: u32,
    width: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGB bytes. Returns `None` when the length does not match.
    pub fn new(height: u32, width: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == height as usize * width as usize * 3).then_some(Self {
            height,
            width,
            data,
        })
    }

    /// A buffer filled with one color.
    pub fn solid(height: u32, width: u32, rgb: [u8; 3]) -> Self {
        let pixels = height as usize * width as usize;
        let data = rgb.iter().copied().cycle().take(pixels * 3).collect();
        Self {
            height,
            width,
            data,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Raw RGB bytes, `height * width * 3` of them.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn pixel(&self, y: usize, x: usize) -> &[u8] {
        let start = (y * self.width as usize + x) * 3;
        &self.data[start..start + 3]
    }
}

/// A `rows x cols x 3` grid of scaled channel means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    rows: usize,
    cols: usize,
    values: Vec<u16>,
}

impl Signature {
    /// All-zero signature, used when an image cannot be decoded.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0; rows * cols * 3],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Flat values in (row, col, channel) order.
    pub fn values(&self) -> &[u16] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize, channel: usize) -> u16 {
        self.values[(row * self.cols + col) * 3 + channel]
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0)
    }

    /// Little-endian `u16` blob, row-major.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Rebuild from a stored blob. Returns `None` if the blob does not hold
    /// exactly `rows * cols * 3` values.
    pub fn from_bytes(rows: usize, cols: usize, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != rows * cols * 3 * 2 {
            return None;
        }
        let values = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(Self { rows, cols, values })
    }
}

/// Image-only attributes. Zero dimensions mean "unknown or undecodable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    pub height: u32,
    pub width: u32,
    /// Mean R, G, B over the whole image (0..=255)
    pub average_color: [f64; 3],
    /// Grid signature; `None` until computed
    pub signature: Option<Signature>,
}

/// Computes [`ImageAttributes`] from decoded pixels.
#[derive(Debug, Clone)]
pub struct ImageFingerprinter {
    rows: usize,
    cols: usize,
}

impl ImageFingerprinter {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.grid_rows, config.grid_cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Grid signature plus dimensions and average color.
    ///
    /// Cell `(i, j)` covers rows `h*i/Y .. h*(i+1)/Y` and columns
    /// `w*j/X .. w*(j+1)/X` (integer bounds). Cells that end up empty
    /// because the image is smaller than the grid contribute 0.
    pub fn fingerprint(&self, pixels: &PixelBuffer) -> ImageAttributes {
        let h = pixels.height() as usize;
        let w = pixels.width() as usize;
        let mut values = Vec::with_capacity(self.rows * self.cols * 3);
        let mut totals = [0u64; 3];

        for i in 0..self.rows {
            let (y0, y1) = (h * i / self.rows, h * (i + 1) / self.rows);
            for j in 0..self.cols {
                let (x0, x1) = (w * j / self.cols, w * (j + 1) / self.cols);
                let mut sums = [0u64; 3];
                for y in y0..y1 {
                    for x in x0..x1 {
                        for (sum, &channel) in sums.iter_mut().zip(pixels.pixel(y, x)) {
                            *sum += u64::from(channel);
                        }
                    }
                }
                let count = ((y1 - y0) * (x1 - x0)) as u64;
                for (total, sum) in totals.iter_mut().zip(sums) {
                    *total += sum;
                    values.push(scaled_mean(sum, count));
                }
            }
        }

        let pixel_count = (h * w) as u64;
        let average_color = totals.map(|t| {
            if pixel_count == 0 {
                0.0
            } else {
                t as f64 / pixel_count as f64
            }
        });

        ImageAttributes {
            height: pixels.height(),
            width: pixels.width(),
            average_color,
            signature: Some(Signature {
                rows: self.rows,
                cols: self.cols,
                values,
            }),
        }
    }

    /// Decode `path` and fingerprint it. A decode failure is logged and
    /// yields zero dimensions, zero color and an all-zero signature.
    pub fn compute(&self, path: &Path, decoder: &dyn ImageDecoder) -> ImageAttributes {
        match decoder.decode(path) {
            Ok(pixels) => self.fingerprint(&pixels),
            Err(e) => {
                tracing::warn!("Could not decode image {:?}: {e}", path);
                ImageAttributes {
                    signature: Some(Signature::zeros(self.rows, self.cols)),
                    ..ImageAttributes::default()
                }
            }
        }
    }
}

fn scaled_mean(sum: u64, count: u64) -> u16 {
    if count == 0 {
        return 0;
    }
    // `as` truncates toward zero and saturates at u16::MAX.
    (sum as f64 / count as f64 * 256.0) as u16
}
