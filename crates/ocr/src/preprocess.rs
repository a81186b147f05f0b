use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::RecognizeOptions;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image has no pixels")]
    EmptyImage,
    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

const WHITE: u8 = 255;
const BLACK: u8 = 0;

/// Search window and step for tilt correction, in degrees.
const MAX_SKEW_DEGREES: f32 = 5.0;
const SKEW_STEP_DEGREES: f32 = 0.5;
/// Below this the image is treated as already straight.
const MIN_DESKEW_DEGREES: f32 = 0.3;
/// Skew is estimated on a copy no larger than this.
const SKEW_ESTIMATE_MAX: u32 = 900;

/// Load an image file and produce the normalized canvas.
pub fn preprocess_file(path: &Path, options: &RecognizeOptions) -> Result<GrayImage, PreprocessError> {
    let img = image::open(path)?;
    preprocess_image(img, options)
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …) and produce the normalized canvas.
pub fn preprocess(data: &[u8], options: &RecognizeOptions) -> Result<GrayImage, PreprocessError> {
    let img = image::load_from_memory(data)?;
    preprocess_image(img, options)
}

/// Resize → grayscale → Otsu binarization → optional denoise → optional deskew.
pub fn preprocess_image(img: DynamicImage, options: &RecognizeOptions) -> Result<GrayImage, PreprocessError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(PreprocessError::EmptyImage);
    }

    let img = resize_to_fit(img, options.max_dimension);
    let gray = to_grayscale(&img);
    let threshold = otsu_threshold(&histogram(&gray));
    debug!(threshold, width = gray.width(), height = gray.height(), "binarizing");
    let mut canvas = binarize(&gray, threshold);

    if options.enable_noise_reduction {
        canvas = remove_noise(&canvas);
    }
    if options.enable_tilt_correction {
        canvas = deskew(&canvas);
    }
    Ok(canvas)
}

/// Down-scale so the longer side is at most `max_dimension`. Never upscales.
pub fn resize_to_fit(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if max_dimension > 0 && (img.width() > max_dimension || img.height() > max_dimension) {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    }
}

/// Grayscale with the `0.299R + 0.587G + 0.114B` luma weights.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

pub fn histogram(gray: &GrayImage) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    hist
}

/// Otsu's threshold: the level maximizing between-class variance
/// `w_b·w_f·(μ_b−μ_f)²`. When several levels tie, the middle of the tied
/// run is returned. A single-level histogram yields 0.
pub fn otsu_threshold(hist: &[u32; 256]) -> u8 {
    let total: f64 = hist.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }
    let sum_total: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_b = 0f64;
    let mut weight_b = 0f64;
    let mut best_variance = 0f64;
    let mut best: Option<(usize, usize)> = None;

    for (t, &count) in hist.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }
        sum_b += t as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum_total - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best = Some((t, t));
        } else if variance == best_variance {
            if let Some((first, _)) = best {
                best = Some((first, t));
            }
        }
    }

    best.map(|(first, last)| ((first + last) / 2) as u8).unwrap_or(0)
}

/// Pixels above `threshold` become white, everything else black.
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([WHITE])
        } else {
            Luma([BLACK])
        }
    })
}

/// 3×3 majority vote on a binary image. Border pixels are left unchanged.
pub fn remove_noise(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();
    let mut out = binary.clone();
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut white = 0;
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if binary.get_pixel(nx, ny)[0] == WHITE {
                        white += 1;
                    }
                }
            }
            out.put_pixel(x, y, Luma([if white > 4 { WHITE } else { BLACK }]));
        }
    }
    out
}

/// Rotate `img` by `angle_deg` (counter-clockwise in image coordinates)
/// around its center onto a canvas large enough to hold every source pixel.
/// Uncovered area is filled with `background`.
pub fn rotate(img: &GrayImage, angle_deg: f32, background: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let new_w = ((w as f32 * cos.abs() + h as f32 * sin.abs()).round() as u32).max(1);
    let new_h = ((w as f32 * sin.abs() + h as f32 * cos.abs()).round() as u32).max(1);

    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (ncx, ncy) = (new_w as f32 / 2.0, new_h as f32 / 2.0);

    ImageBuffer::from_fn(new_w, new_h, |x, y| {
        let dx = x as f32 + 0.5 - ncx;
        let dy = y as f32 + 0.5 - ncy;
        // Inverse mapping back into the source.
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        if sx >= 0.0 && sy >= 0.0 && sx < w as f32 && sy < h as f32 {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([background])
        }
    })
}

/// Variance of the per-row black-pixel counts.
fn projection_variance(img: &GrayImage) -> f64 {
    let rows: Vec<f64> = img
        .rows()
        .map(|row| row.filter(|p| p[0] == BLACK).count() as f64)
        .collect();
    if rows.is_empty() {
        return 0.0;
    }
    let mean = rows.iter().sum::<f64>() / rows.len() as f64;
    rows.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rows.len() as f64
}

/// Angle (degrees) that, applied with [`rotate`], makes text lines most
/// horizontal. Ties keep the smaller magnitude.
pub fn estimate_skew(binary: &GrayImage) -> f32 {
    let sample = if binary.width() > SKEW_ESTIMATE_MAX || binary.height() > SKEW_ESTIMATE_MAX {
        DynamicImage::ImageLuma8(binary.clone())
            .resize(SKEW_ESTIMATE_MAX, SKEW_ESTIMATE_MAX, FilterType::Nearest)
            .to_luma8()
    } else {
        binary.clone()
    };

    let steps = (MAX_SKEW_DEGREES / SKEW_STEP_DEGREES).round() as i32;
    let mut best_angle = 0f32;
    let mut best_variance = projection_variance(&sample);

    // 0, +0.5, -0.5, +1.0, … so that ties resolve toward the smaller angle.
    for i in 1..=steps {
        for sign in [1.0f32, -1.0] {
            let angle = sign * i as f32 * SKEW_STEP_DEGREES;
            let variance = projection_variance(&rotate(&sample, angle, WHITE));
            if variance > best_variance {
                best_variance = variance;
                best_angle = angle;
            }
        }
    }
    best_angle
}

/// Straighten a binary canvas. Already-straight images are returned as-is.
pub fn deskew(binary: &GrayImage) -> GrayImage {
    let angle = estimate_skew(binary);
    if angle.abs() < MIN_DESKEW_DEGREES {
        return binary.clone();
    }
    debug!(angle, "correcting tilt");
    rotate(binary, angle, WHITE)
}
