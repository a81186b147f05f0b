//! Receipt outline detection on a binarized canvas.

use image::{imageops, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::gradients::sobel_gradients;
use tracing::debug;

use crate::types::BoundingBox;

/// Where the receipt sits on the canvas.
pub type ReceiptBounds = BoundingBox;

/// Sobel magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: u16 = 128;
/// Shorter borders are specks, not outlines.
const MIN_CONTOUR_LEN: usize = 50;
/// Share of the canvas a receipt outline must cover.
const AREA_FRACTION: std::ops::RangeInclusive<f32> = 0.1..=0.9;

/// Locate the receipt on `canvas`. `None` when nothing plausible was found.
pub fn locate(canvas: &GrayImage) -> Option<ReceiptBounds> {
    let (width, height) = canvas.dimensions();
    let edges = edge_map(canvas);
    let contours = trace_contours(&edges);
    debug!(contours = contours.len(), "traced contours");
    best_bounds(&contours, width, height)
}

pub fn crop(canvas: &GrayImage, bounds: ReceiptBounds) -> GrayImage {
    imageops::crop_imm(canvas, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}

/// Edge pixels (255) from the Sobel gradient magnitude; everything else 0.
pub fn edge_map(canvas: &GrayImage) -> GrayImage {
    let gradients = sobel_gradients(canvas);
    GrayImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        if gradients.get_pixel(x, y)[0] > EDGE_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Outer borders of the 8-connected edge regions, each at least
/// 50 points long.
pub fn trace_contours(edges: &GrayImage) -> Vec<Vec<(u32, u32)>> {
    find_contours::<u32>(edges)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= MIN_CONTOUR_LEN)
        .map(|c| c.points.into_iter().map(|p| (p.x, p.y)).collect())
        .collect()
}

fn contour_bounds(contour: &[(u32, u32)]) -> Option<BoundingBox> {
    let min_x = contour.iter().map(|p| p.0).min()?;
    let max_x = contour.iter().map(|p| p.0).max()?;
    let min_y = contour.iter().map(|p| p.1).min()?;
    let max_y = contour.iter().map(|p| p.1).max()?;
    Some(BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

fn area_fraction(bounds: &BoundingBox, width: u32, height: u32) -> f32 {
    bounds.area() as f32 / (width as f32 * height as f32)
}

/// How receipt-like a box is: `0.4·aspect + 0.4·area + 0.2·position`.
///
/// Aspect scores 1 for `height/width` in `[0.5, 3.0]`, area scores 1 for a
/// canvas fraction in `[0.1, 0.9]`, position falls linearly from 1 at the
/// canvas center to 0 at a corner.
pub fn score_bounds(bounds: &BoundingBox, width: u32, height: u32) -> f32 {
    if bounds.width == 0 || bounds.height == 0 || width == 0 || height == 0 {
        return 0.0;
    }
    let aspect = bounds.height as f32 / bounds.width as f32;
    let aspect_score = if (0.5..=3.0).contains(&aspect) { 1.0 } else { 0.0 };

    let area_score = if AREA_FRACTION.contains(&area_fraction(bounds, width, height)) { 1.0 } else { 0.0 };

    let (cx, cy) = bounds.center();
    let (icx, icy) = (width as f32 / 2.0, height as f32 / 2.0);
    let half_diagonal = icx.hypot(icy);
    let position_score = (1.0 - (cx - icx).hypot(cy - icy) / half_diagonal).max(0.0);

    0.4 * aspect_score + 0.4 * area_score + 0.2 * position_score
}

/// Highest-scoring contour box; earlier contours win ties.
///
/// Only boxes covering a plausible share of the canvas qualify, so a text
/// line on a full-frame scan never passes for the receipt.
fn best_bounds(contours: &[Vec<(u32, u32)>], width: u32, height: u32) -> Option<BoundingBox> {
    if width == 0 || height == 0 {
        return None;
    }
    let mut best: Option<(BoundingBox, f32)> = None;
    for bounds in contours.iter().filter_map(|c| contour_bounds(c)) {
        if !AREA_FRACTION.contains(&area_fraction(&bounds, width, height)) {
            continue;
        }
        let score = score_bounds(&bounds, width, height);
        if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((bounds, score));
        }
    }
    best.map(|(b, _)| b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    /// One-pixel square outline with corners at `(x0, y0)` and `(x1, y1)`.
    fn ring(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let inside = (x0..=x1).contains(&x) && (y0..=y1).contains(&y);
            if inside && (x == x0 || x == x1 || y == y0 || y == y1) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    /// White page with dark 320 px text lines from top to bottom.
    fn text_page() -> GrayImage {
        ImageBuffer::from_fn(400, 600, |x, y| {
            if (40..360).contains(&x) && y >= 40 && y < 560 && (y - 40) % 40 < 8 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn traces_a_closed_outline() {
        let contours = trace_contours(&ring(40, 40, 10, 10, 29, 29));
        assert_eq!(contours.len(), 1);
        assert!(contours[0].len() >= MIN_CONTOUR_LEN);
        assert_eq!(contour_bounds(&contours[0]), Some(BoundingBox::new(10, 10, 20, 20)));
    }

    #[test]
    fn short_traces_are_dropped() {
        assert!(trace_contours(&ring(20, 20, 5, 5, 9, 9)).is_empty());
    }

    #[test]
    fn edge_map_is_binary() {
        let edges = edge_map(&text_page());
        assert_eq!(edges.dimensions(), (400, 600));
        assert!(edges.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(edges.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn centered_square_half_the_canvas_scores_one() {
        let score = score_bounds(&BoundingBox::new(50, 0, 100, 100), 200, 100);
        assert!((score - 1.0).abs() < 1e-6, "{score}");
    }

    #[test]
    fn implausible_boxes_score_low() {
        // A thin strip in the corner.
        let score = score_bounds(&BoundingBox::new(0, 0, 100, 2), 200, 200);
        assert!(score < 0.2, "{score}");
        assert_eq!(score_bounds(&BoundingBox::new(0, 0, 0, 10), 200, 200), 0.0);
    }

    #[test]
    fn locates_dark_receipt_on_light_background() {
        let canvas: GrayImage = ImageBuffer::from_fn(200, 300, |x, y| {
            if (50..150).contains(&x) && (75..225).contains(&y) {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        let bounds = locate(&canvas).unwrap();
        // The Sobel band straddles the transition by one pixel.
        assert_eq!(bounds, BoundingBox::new(49, 74, 102, 152));

        let cropped = crop(&canvas, bounds);
        assert_eq!(cropped.dimensions(), (102, 152));
    }

    #[test]
    fn text_lines_on_a_full_page_are_not_a_receipt() {
        assert_eq!(locate(&text_page()), None);
    }

    #[test]
    fn small_boxes_never_win_on_position_alone() {
        // A centered strip scores 0.2 on position but covers 1% of the canvas.
        let strip = vec![(40, 299), (361, 299), (361, 308), (40, 308)];
        assert!(score_bounds(&contour_bounds(&strip).unwrap(), 400, 600) > 0.0);
        assert_eq!(best_bounds(&[strip], 400, 600), None);
    }

    #[test]
    fn uniform_canvas_has_no_bounds() {
        let canvas: GrayImage = ImageBuffer::from_fn(120, 80, |_, _| Luma([255]));
        assert_eq!(locate(&canvas), None);
    }
}
