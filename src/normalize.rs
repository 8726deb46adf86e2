use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::inference::InputTensor;

/// Network input width in pixels.
pub const TARGET_WIDTH: u32 = 200;
/// Network input height in pixels.
pub const TARGET_HEIGHT: u32 = 50;

pub const DEFAULT_CONTRAST_BOOST: f32 = 1.5;

/// How the source image is fitted onto the target canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Scale to exactly fill the canvas, ignoring aspect ratio.
    Stretch,
    /// Uniform scale, centered on white.
    #[default]
    Letterbox,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizeOptions {
    pub width: u32,
    pub height: u32,
    pub policy: ResizePolicy,
    /// Apply the grayscale + contrast filter before drawing.
    pub enhance: bool,
    pub contrast_boost: f32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            width: TARGET_WIDTH,
            height: TARGET_HEIGHT,
            policy: ResizePolicy::default(),
            enhance: false,
            contrast_boost: DEFAULT_CONTRAST_BOOST,
        }
    }
}

/// Converts to single-channel luma, compositing transparent pixels over white.
pub fn flatten_to_luma(img: &DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut output = ImageBuffer::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as f32 / 255.0;
        let over_white = |c: u8| c as f32 * alpha + 255.0 * (1.0 - alpha);
        let r = over_white(pixel[0]);
        let g = over_white(pixel[1]);
        let b = over_white(pixel[2]);
        // Rec. 601 luma, same weights as image's own grayscale conversion
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        output.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }

    output
}

/// Stretches contrast around mid-gray: `v' = (v - 0.5) * boost + 0.5`.
pub fn boost_contrast(img: &mut GrayImage, boost: f32) {
    for pixel in img.pixels_mut() {
        let v = pixel[0] as f32 / 255.0;
        let boosted = ((v - 0.5) * boost + 0.5).clamp(0.0, 1.0);
        pixel[0] = (boosted * 255.0).round() as u8;
    }
}

/// Size of the image after uniform scaling into the target box.
pub fn letterbox_size(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let scale = f64::min(
        target_w as f64 / src_w as f64,
        target_h as f64 / src_h as f64,
    );
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, target_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, target_h);
    (w, h)
}

/// Fits the source image onto a `width × height` grayscale canvas.
pub fn resize_image(img: &DynamicImage, options: &NormalizeOptions) -> GrayImage {
    let mut gray = flatten_to_luma(img);
    if options.enhance {
        boost_contrast(&mut gray, options.contrast_boost);
    }

    if gray.width() == 0 || gray.height() == 0 {
        return ImageBuffer::from_pixel(options.width, options.height, Luma([255u8]));
    }

    match options.policy {
        ResizePolicy::Stretch => {
            imageops::resize(&gray, options.width, options.height, FilterType::Triangle)
        }
        ResizePolicy::Letterbox => {
            let (w, h) = letterbox_size(gray.width(), gray.height(), options.width, options.height);
            let scaled = imageops::resize(&gray, w, h, FilterType::Triangle);
            let mut canvas = ImageBuffer::from_pixel(options.width, options.height, Luma([255u8]));
            let x = (options.width - w) / 2;
            let y = (options.height - h) / 2;
            imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
            canvas
        }
    }
}

/// Scales pixel values into `[0, 1]`.
pub fn to_input_tensor(img: &GrayImage) -> InputTensor {
    InputTensor {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.pixels().map(|p| p[0] as f32 / 255.0).collect(),
    }
}

/// Full normalization: fit, filter, and convert to a network input.
pub fn prepare_input(img: &DynamicImage, options: &NormalizeOptions) -> InputTensor {
    to_input_tensor(&resize_image(img, options))
}
