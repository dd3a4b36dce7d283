//! Simple image cleanup before OCR.

use image::{DynamicImage, GrayImage, Luma, imageops};
use imageproc::filter::median_filter;

/// The 3×3 "smooth" kernel. Sharpening pushes each pixel away from this.
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    5.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
];

/// Grayscale, contrast, sharpness and denoising filter for scanned pages.
///
/// The output is always a single-channel image with the same dimensions as
/// the input. A factor of 1.0 leaves contrast or sharpness unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageEnhancer {
    /// Contrast factor.
    pub contrast: f32,
    /// Sharpness factor.
    pub sharpness: f32,
}

impl Default for ImageEnhancer {
    fn default() -> Self {
        Self {
            contrast: 2.0,
            sharpness: 2.0,
        }
    }
}

impl ImageEnhancer {
    /// Enhance `image` for OCR.
    pub fn enhance(&self, image: &DynamicImage) -> DynamicImage {
        let gray = image.to_luma8();
        if gray.width() == 0 || gray.height() == 0 {
            return DynamicImage::ImageLuma8(gray);
        }
        let gray = adjust_contrast(&gray, self.contrast);
        let gray = adjust_sharpness(&gray, self.sharpness);
        DynamicImage::ImageLuma8(median_filter(&gray, 1, 1))
    }
}

/// Scale each pixel's distance from the mean gray level by `factor`.
fn adjust_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let pixel_count = f64::from(image.width()) * f64::from(image.height());
    let total = image.pixels().map(|p| f64::from(p[0])).sum::<f64>();
    let mean = (total / pixel_count).round() as f32;
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        *pixel = Luma([blend(mean, f32::from(pixel[0]), factor)]);
    }
    out
}

/// Blend between a smoothed copy of the image and the image itself.
///
/// `filter3x3` has no neighbours to work with on the 1-pixel border, so
/// border pixels are left as they are.
fn adjust_sharpness(image: &GrayImage, factor: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let smoothed = imageops::filter3x3(image, &SMOOTH_KERNEL);
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            continue;
        }
        let smooth = smoothed.get_pixel(x, y)[0];
        *pixel = Luma([blend(f32::from(smooth), f32::from(pixel[0]), factor)]);
    }
    out
}

/// Interpolate (or extrapolate) from `from` towards `to`, clamped to `u8`.
fn blend(from: f32, to: f32, factor: f32) -> u8 {
    (from + factor * (to - from)).round().clamp(0.0, 255.0) as u8
}
