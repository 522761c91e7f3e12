//! Image transforms for training and evaluation
//!
//! - **Training**: resize, random horizontal flip, bounded rotation, mild
//!   color jitter.
//! - **Validation/Test/Inference**: resize then center-crop. No randomness.
//!
//! Both paths emit CHW floats in `[0, 1]`; channel normalization happens in
//! [`ImageBatcher`](super::burn_dataset::ImageBatcher) so every consumer
//! shares the same statistics.

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Random augmentation parameters for the training view
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Rotation angle is drawn uniformly from ±rotation_degrees
    pub rotation_degrees: f32,
    /// Brightness factor is drawn from 1.0 ± brightness
    pub brightness: f32,
    /// Contrast factor is drawn from 1.0 ± contrast
    pub contrast: f32,
    /// Saturation factor is drawn from 1.0 ± saturation
    pub saturation: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_degrees: 15.0,
            brightness: 0.1,
            contrast: 0.1,
            saturation: 0.1,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
        }
    }
}

/// Stochastic transform used by the train view
#[derive(Clone, Debug)]
pub struct TrainTransform {
    config: AugmentationConfig,
    image_size: u32,
}

impl TrainTransform {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Resize, augment, convert to CHW
    pub fn apply(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let resized = resize(&img, self.image_size);
        let augmented = self.augment(resized, rng);
        to_chw(&augmented)
    }

    /// Apply flip, rotation and color jitter. Output keeps the input dimensions.
    pub fn augment(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let mut result = img;

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = result.fliph();
        }

        if self.config.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-self.config.rotation_degrees..=self.config.rotation_degrees);
            result = rotate(&result, angle);
        }

        let brightness = jitter_factor(rng, self.config.brightness);
        let contrast = jitter_factor(rng, self.config.contrast);
        let saturation = jitter_factor(rng, self.config.saturation);

        if brightness != 1.0 || contrast != 1.0 || saturation != 1.0 {
            result = color_jitter(&result, brightness, contrast, saturation);
        }

        result
    }
}

fn jitter_factor(rng: &mut ChaCha8Rng, amount: f32) -> f32 {
    if amount > 0.0 {
        1.0 + rng.gen_range(-amount..=amount)
    } else {
        1.0
    }
}

/// Deterministic transform used by val/test views and inference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalTransform {
    /// Side length after the resize step
    resize_size: u32,
    /// Side length of the center crop fed to the model
    image_size: u32,
}

impl EvalTransform {
    /// Resize straight to `image_size`; the crop is then a no-op
    pub fn new(image_size: u32) -> Self {
        Self {
            resize_size: image_size,
            image_size,
        }
    }

    /// Resize to `resize_size`, then center-crop to `image_size`.
    /// `resize_size` is raised to `image_size` if smaller.
    pub fn with_resize(image_size: u32, resize_size: u32) -> Self {
        Self {
            resize_size: resize_size.max(image_size),
            image_size,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        let resized = resize(img, self.resize_size);
        let cropped = center_crop(&resized, self.image_size);
        to_chw(&cropped)
    }
}

/// Transform owned by a batched view
#[derive(Clone, Debug)]
pub enum ImageTransform {
    Train(TrainTransform),
    Eval(EvalTransform),
}

impl ImageTransform {
    pub fn image_size(&self) -> u32 {
        match self {
            ImageTransform::Train(t) => t.image_size(),
            ImageTransform::Eval(t) => t.image_size(),
        }
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self, ImageTransform::Train(_))
    }

    /// Run the transform; the RNG is only consumed by the train path
    pub fn apply(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        match self {
            ImageTransform::Train(t) => t.apply(img, rng),
            ImageTransform::Eval(t) => t.apply(&img),
        }
    }
}

/// Resize to a square of side `size`
pub fn resize(img: &DynamicImage, size: u32) -> DynamicImage {
    img.resize_exact(size, size, image::imageops::FilterType::Triangle)
}

/// Crop a centered square of side `size`; images smaller than `size` are returned unchanged
pub fn center_crop(img: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= size && height <= size {
        return img.clone();
    }
    let crop_w = size.min(width);
    let crop_h = size.min(height);
    let x = (width - crop_w) / 2;
    let y = (height - crop_h) / 2;
    img.crop_imm(x, y, crop_w, crop_h)
}

/// Convert image to CHW float data in [0, 1]
pub fn to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Rotate around the center; uncovered corners are filled with black
fn rotate(img: &DynamicImage, angle_degrees: f32) -> DynamicImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }

    let angle_rad = angle_degrees.to_radians();
    let (width, height) = img.dimensions();
    let rgb = img.to_rgb8();

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();

    let mut output = ImageBuffer::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;

            let src_x = cx + dx * cos_a + dy * sin_a;
            let src_y = cy - dx * sin_a + dy * cos_a;

            output.put_pixel(x, y, bilinear_sample(&rgb, src_x, src_y));
        }
    }

    DynamicImage::ImageRgb8(output)
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// Brightness scales pixels, contrast scales around the mean luminance,
/// saturation blends each pixel with its gray value.
fn color_jitter(img: &DynamicImage, brightness: f32, contrast: f32, saturation: f32) -> DynamicImage {
    let mut rgb = img.to_rgb8();

    for pixel in rgb.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * brightness).round().clamp(0.0, 255.0) as u8;
        }
    }

    let count = (rgb.width() * rgb.height()).max(1) as f32;
    let mean = rgb.pixels().map(luminance).sum::<f32>() / count;

    for pixel in rgb.pixels_mut() {
        let gray = luminance(pixel);
        for c in 0..3 {
            let v = pixel[c] as f32;
            let v = mean + contrast * (v - mean);
            let v = gray + saturation * (v - gray);
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let mut img = ImageBuffer::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, 128]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_train_output_shape() {
        let transform = TrainTransform::new(AugmentationConfig::default(), 32);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let data = transform.apply(create_test_image(64, 48), &mut rng);

        assert_eq!(data.len(), 3 * 32 * 32);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_train_is_reproducible_for_same_seed() {
        let transform = TrainTransform::new(AugmentationConfig::default(), 32);
        let img = create_test_image(64, 64);

        let a = transform.apply(img.clone(), &mut ChaCha8Rng::seed_from_u64(9));
        let b = transform.apply(img, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_augmentation_matches_plain_resize() {
        let transform = TrainTransform::new(AugmentationConfig::none(), 32);
        let img = create_test_image(64, 64);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let augmented = transform.apply(img.clone(), &mut rng);
        let plain = to_chw(&resize(&img, 32));
        assert_eq!(augmented, plain);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let transform = EvalTransform::with_resize(32, 40);
        let img = create_test_image(100, 80);

        let first = transform.apply(&img);
        let second = transform.apply(&img);
        assert_eq!(first.len(), 3 * 32 * 32);
        assert_eq!(first, second);
    }

    #[test]
    fn test_eval_ignores_rng() {
        let transform = ImageTransform::Eval(EvalTransform::new(16));
        let img = create_test_image(64, 64);

        let a = transform.apply(img.clone(), &mut ChaCha8Rng::seed_from_u64(1));
        let b = transform.apply(img, &mut ChaCha8Rng::seed_from_u64(2));
        assert_eq!(a, b);
        assert!(!transform.is_stochastic());
    }

    #[test]
    fn test_center_crop() {
        let img = create_test_image(40, 30);
        let cropped = center_crop(&img, 20);
        assert_eq!(cropped.dimensions(), (20, 20));

        let small = center_crop(&img, 64);
        assert_eq!(small.dimensions(), (40, 30));
    }

    #[test]
    fn test_chw_layout() {
        let mut img = ImageBuffer::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        let data = to_chw(&DynamicImage::ImageRgb8(img));

        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_brightness_jitter_direction() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([100, 100, 100])));
        let brighter = color_jitter(&img, 1.1, 1.0, 1.0).to_rgb8();
        let darker = color_jitter(&img, 0.9, 1.0, 1.0).to_rgb8();

        assert_eq!(brighter.get_pixel(0, 0)[0], 110);
        assert_eq!(darker.get_pixel(0, 0)[0], 90);
    }
}
