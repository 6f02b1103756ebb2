use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;

pub const PAD_VALUE: u8 = 114;
pub const STRIDE: u32 = 32;
pub const MAX_IMAGE_SIZE: u32 = 4096;

/// Rounds an inference size up to the model stride. `None` above `MAX_IMAGE_SIZE`.
pub fn stride_aligned(size: u32) -> Option<u32> {
    let aligned = size.div_ceil(STRIDE).max(1).checked_mul(STRIDE)?;
    (aligned <= MAX_IMAGE_SIZE).then_some(aligned)
}

/// Geometry of a letterbox resize, used to map boxes back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub gain: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let gain = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = (width as f32 * gain).round() as u32;
        let new_height = (height as f32 * gain).round() as u32;
        Self {
            gain,
            pad_x: ((size - new_width.min(size)) as f32 / 2.0 - 0.1).round().max(0.0),
            pad_y: ((size - new_height.min(size)) as f32 / 2.0 - 0.1).round().max(0.0),
            width,
            height,
        }
    }

    fn scaled_size(&self) -> (u32, u32) {
        (
            ((self.width as f32 * self.gain).round() as u32).max(1),
            ((self.height as f32 * self.gain).round() as u32).max(1),
        )
    }

    /// Maps a corner-form box from model input space to a clipped
    /// center-form box `(cx, cy, w, h)` in source pixels.
    pub fn restore(&self, [x1, y1, x2, y2]: [f32; 4]) -> (f32, f32, f32, f32) {
        let max_x = self.width as f32;
        let max_y = self.height as f32;
        let x1 = ((x1 - self.pad_x) / self.gain).clamp(0.0, max_x);
        let y1 = ((y1 - self.pad_y) / self.gain).clamp(0.0, max_y);
        let x2 = ((x2 - self.pad_x) / self.gain).clamp(0.0, max_x);
        let y2 = ((y2 - self.pad_y) / self.gain).clamp(0.0, max_y);
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1)
    }
}

/// Letterboxes `image` into a `size` x `size` canvas and returns it as a
/// normalized NCHW tensor.
pub fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let geometry = Letterbox::new(image.width(), image.height(), size);
    let (new_width, new_height) = geometry.scaled_size();
    let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );

    let side = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
        }
    }
    (input, geometry)
}
