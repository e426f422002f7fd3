//! In-process pixel differ for screenshot comparison.
//!
//! Decodes two image buffers, normalizes them to a common size, counts
//! pixels whose channels differ beyond a color tolerance, and renders an
//! overlay highlighting the differing pixels. Results come back as an
//! explicit [`DiffResult`]; nothing is inferred from exit codes or parsed
//! out of error text.

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage, imageops::FilterType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("failed to encode diff overlay: {0}")]
    Encode(image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tuning for a single diff computation.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Per-channel color tolerance as a fraction of full scale (0.0–1.0).
    /// A pixel counts as different only when some channel deviates by more
    /// than this.
    pub fuzz: f64,
    /// Highlight color for differing pixels in the overlay.
    pub highlight: [u8; 3],
    /// Skip overlay generation entirely (counting only).
    pub generate_overlay: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            fuzz: 0.05,
            highlight: [255, 0, 0],
            generate_overlay: true,
        }
    }
}

/// Outcome of a diff computation.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub diff_pixels: u64,
    /// Percentage of differing pixels (0.0–100.0), rounded to 4 decimals.
    pub diff_percentage: f64,
    /// 100 − diff_percentage.
    pub match_percentage: f64,
    /// PNG bytes highlighting the differing pixels, present when there is
    /// any difference and overlay generation was requested.
    pub diff_image: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

/// Compare two encoded images.
///
/// Mismatched dimensions are reconciled by stretching both images to the
/// element-wise maximum, without preserving aspect ratio. Comparisons made
/// before this implementation relied on that behavior, so it is kept
/// as the compatibility contract.
pub fn compare(a: &[u8], b: &[u8], options: &DiffOptions) -> Result<DiffResult> {
    let image_a = image::load_from_memory(a).map_err(Error::Decode)?;
    let image_b = image::load_from_memory(b).map_err(Error::Decode)?;

    let width = image_a.width().max(image_b.width());
    let height = image_a.height().max(image_b.height());

    if width == 0 || height == 0 {
        return Ok(DiffResult {
            diff_pixels: 0,
            diff_percentage: 0.0,
            match_percentage: 100.0,
            diff_image: None,
            width,
            height,
        });
    }

    let image_a = normalize(image_a, width, height);
    let image_b = normalize(image_b, width, height);

    let tolerance = (options.fuzz * 255.0).round() as i16;
    let mut diff_pixels = 0u64;
    let mut overlay = options
        .generate_overlay
        .then(|| RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])));

    for y in 0..height {
        for x in 0..width {
            let pa = image_a.get_pixel(x, y);
            let pb = image_b.get_pixel(x, y);

            if pixels_differ(&pa, &pb, tolerance) {
                diff_pixels += 1;
                if let Some(ref mut img) = overlay {
                    let [r, g, b] = options.highlight;
                    img.put_pixel(x, y, Rgba([r, g, b, 255]));
                }
            }
        }
    }

    let total = u64::from(width) * u64::from(height);
    let diff_percentage = round4(100.0 * diff_pixels as f64 / total as f64);
    let match_percentage = round4(100.0 - diff_percentage);

    let diff_image = match overlay {
        Some(img) if diff_pixels > 0 => Some(encode_png(&img)?),
        _ => None,
    };

    tracing::debug!(
        width,
        height,
        diff_pixels,
        diff_percentage,
        "computed image diff"
    );

    Ok(DiffResult {
        diff_pixels,
        diff_percentage,
        match_percentage,
        diff_image,
        width,
        height,
    })
}

fn normalize(image: DynamicImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        image.into_rgba8()
    } else {
        // Non-preserving stretch to the common size.
        image.resize_exact(width, height, FilterType::Triangle).into_rgba8()
    }
}

fn pixels_differ(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: i16) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(&ca, &cb)| (i16::from(ca) - i16::from(cb)).abs() > tolerance)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(Error::Encode)?;
    Ok(bytes)
}
