// Frame-differencing motion detector
//
// Per frame: grayscale → gaussian blur → |current - previous| → threshold →
// dilate → connected regions (holes filled) → sum of region areas above
// `min_area`. Only the immediately preceding frame is compared.

use image::{imageops, GrayImage, RgbImage};

use crate::config::MotionConfig;

/// Result of comparing one frame with its predecessor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub is_motion: bool,
    /// Summed pixel area of all regions larger than the minimum area
    pub area: f64,
}

impl MotionSample {
    pub fn none() -> Self {
        Self {
            is_motion: false,
            area: 0.0,
        }
    }

    fn from_area(area: f64) -> Self {
        Self {
            is_motion: area > 0.0,
            area,
        }
    }
}

/// Stateful detector, one per camera
pub struct MotionDetector {
    threshold: u8,
    min_area: f64,
    blur_sigma: f32,
    dilate_iterations: u32,
    previous: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_area: config.min_area,
            blur_sigma: config.blur_sigma,
            dilate_iterations: config.dilate_iterations,
            previous: None,
        }
    }

    /// Compare `frame` with the previous one and remember it for next time.
    ///
    /// The first frame, or the first after a resolution change, only seeds the
    /// detector and never reports motion.
    pub fn detect(&mut self, frame: &RgbImage) -> MotionSample {
        let gray = imageops::grayscale(frame);
        let current = if self.blur_sigma > 0.0 {
            imageops::blur(&gray, self.blur_sigma)
        } else {
            gray
        };

        let sample = match &self.previous {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                let (width, height) = current.dimensions();
                let mut mask = difference_mask(previous, &current, self.threshold);
                for _ in 0..self.dilate_iterations {
                    mask = dilate(&mask, width as usize, height as usize);
                }
                let area = region_areas(&mask, width as usize, height as usize)
                    .into_iter()
                    .filter(|&a| a as f64 > self.min_area)
                    .map(|a| a as f64)
                    .sum();
                MotionSample::from_area(area)
            }
            _ => MotionSample::none(),
        };

        self.previous = Some(current);
        sample
    }
}

fn difference_mask(previous: &GrayImage, current: &GrayImage, threshold: u8) -> Vec<bool> {
    previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .map(|(&a, &b)| a.abs_diff(b) > threshold)
        .collect()
}

/// One pass of 3x3 binary dilation
fn dilate(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            if !mask[y * width + x] {
                continue;
            }
            let (y0, y1) = (y.saturating_sub(1), (y + 1).min(height - 1));
            let (x0, x1) = (x.saturating_sub(1), (x + 1).min(width - 1));
            for ny in y0..=y1 {
                let row = ny * width;
                out[row + x0..=row + x1].fill(true);
            }
        }
    }
    out
}

/// Pixel areas of the outer regions of `mask`, with enclosed holes counted
/// as part of the region that surrounds them
fn region_areas(mask: &[bool], width: usize, height: usize) -> Vec<usize> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    // Background reachable from the border (4-connected) is outside every region
    let mut outside = vec![false; mask.len()];
    let mut stack = Vec::new();
    for x in 0..width {
        stack.push(x);
        stack.push((height - 1) * width + x);
    }
    for y in 0..height {
        stack.push(y * width);
        stack.push(y * width + width - 1);
    }
    while let Some(idx) = stack.pop() {
        if mask[idx] || outside[idx] {
            continue;
        }
        outside[idx] = true;
        let (x, y) = (idx % width, idx / width);
        if x > 0 {
            stack.push(idx - 1);
        }
        if x + 1 < width {
            stack.push(idx + 1);
        }
        if y > 0 {
            stack.push(idx - width);
        }
        if y + 1 < height {
            stack.push(idx + width);
        }
    }

    // Label 8-connected filled regions
    let mut visited = vec![false; mask.len()];
    let mut areas = Vec::new();
    for start in 0..mask.len() {
        if outside[start] || visited[start] {
            continue;
        }
        let mut area = 0;
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            area += 1;
            let (x, y) = (idx % width, idx / width);
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = ny * width + nx;
                    if !outside[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        areas.push(area);
    }
    areas
}
