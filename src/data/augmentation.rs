use crate::data::dataset::SegmentationItem;

use color_eyre::{Result, eyre::eyre};
use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use imageproc::{
    geometric_transformations::{Interpolation, rotate_about_center},
    noise::gaussian_noise,
};
use rand::prelude::*;
use std::f32::consts::PI;

/// Rebuilds the image (and mask, if any) buffers of a decoded item.
pub fn item_to_images(item: &SegmentationItem) -> Result<(RgbImage, Option<GrayImage>)> {
    let (w, h) = (item.width as u32, item.height as u32);
    let image = RgbImage::from_raw(w, h, item.image.clone())
        .ok_or_else(|| eyre!("Pixel buffer does not match {}x{}", w, h))?;
    let mask = match &item.mask {
        Some(mask) => Some(
            GrayImage::from_raw(w, h, mask.clone())
                .ok_or_else(|| eyre!("Mask buffer does not match {}x{}", w, h))?,
        ),
        None => None,
    };
    Ok((image, mask))
}

#[derive(Clone, Debug)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip
    pub flip_prob: f32,
    /// Rotation range in degrees, sampled symmetrically around zero
    pub rotation_range: i16,
    /// Probability of rotating at all
    pub rotation_prob: f32,
    /// Contrast adjustment range: (min, max multiplier)
    pub contrast_range: (f32, f32),
    /// Brightness adjustment range: (min, max delta) as a fraction of 255
    pub brightness_range: (f32, f32),
    /// Probability of applying Gaussian noise
    pub gaussian_prob: f32,
    pub gaussian_noise_mean: f64,
    pub gaussian_noise_std: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        AugmentationConfig {
            flip_prob: 0.5,
            rotation_range: 15,
            rotation_prob: 0.5,
            contrast_range: (0.8, 1.2),
            brightness_range: (-0.1, 0.1),
            gaussian_prob: 0.3,
            gaussian_noise_mean: 0.0,
            gaussian_noise_std: 4.0,
        }
    }
}

/// Geometric transforms are applied to image and mask together; photometric
/// ones touch the image only.
#[derive(Clone, Debug)]
pub struct SegmentationAugmenter {
    config: AugmentationConfig,
}

impl SegmentationAugmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        SegmentationAugmenter { config }
    }

    pub fn augment(
        &self,
        image: &RgbImage,
        mask: Option<&GrayImage>,
    ) -> (RgbImage, Option<GrayImage>) {
        let mut rng = rand::rng();
        let mut image = image.clone();
        let mut mask = mask.cloned();

        if rng.random::<f32>() < self.config.flip_prob {
            image = imageops::flip_horizontal(&image);
            mask = mask.map(|m| imageops::flip_horizontal(&m));
        }

        if self.config.rotation_range > 0 && rng.random::<f32>() < self.config.rotation_prob {
            let degrees: i16 =
                rng.random_range(-self.config.rotation_range..=self.config.rotation_range);
            let theta = degrees as f32 * PI / 180.0;
            image = rotate_about_center(&image, theta, Interpolation::Bilinear, Rgb([0, 0, 0]));
            // Nearest keeps class ids intact; uncovered corners become background.
            mask = mask.map(|m| rotate_about_center(&m, theta, Interpolation::Nearest, Luma([0])));
        }

        if rng.random::<f32>() < self.config.gaussian_prob {
            image = gaussian_noise(
                &image,
                self.config.gaussian_noise_mean,
                self.config.gaussian_noise_std,
                rng.random::<u64>(),
            );
        }

        let image = self.random_contrast_brightness(&image, &mut rng);
        (image, mask)
    }

    /// Contrast is multiplicative around the 128 midpoint, brightness an
    /// additive delta.
    fn random_contrast_brightness(&self, img: &RgbImage, rng: &mut impl Rng) -> RgbImage {
        let (lo, hi) = self.config.contrast_range;
        let contrast = if lo < hi { rng.random_range(lo..=hi) } else { lo };
        let (lo, hi) = self.config.brightness_range;
        let brightness = if lo < hi { rng.random_range(lo..=hi) } else { lo };
        let brightness_delta = brightness * 255.0;

        let mut out = img.clone();
        for pixel in out.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                let v = (*channel as f32 - 128.0) * contrast + 128.0 + brightness_delta;
                *channel = v.clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_config() -> AugmentationConfig {
        AugmentationConfig {
            flip_prob: 0.0,
            rotation_range: 0,
            rotation_prob: 0.0,
            contrast_range: (1.0, 1.0),
            brightness_range: (0.0, 0.0),
            gaussian_prob: 0.0,
            ..AugmentationConfig::default()
        }
    }

    fn sample() -> (RgbImage, GrayImage) {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 0, Rgb([10, 20, 30]));
        let mut mask = GrayImage::new(4, 2);
        mask.put_pixel(0, 0, Luma([1]));
        (image, mask)
    }

    #[test]
    fn disabled_augmentation_is_identity() {
        let (image, mask) = sample();
        let augmenter = SegmentationAugmenter::new(identity_config());

        let (out_image, out_mask) = augmenter.augment(&image, Some(&mask));
        assert_eq!(out_image, image);
        assert_eq!(out_mask.unwrap(), mask);
    }

    #[test]
    fn flip_moves_image_and_mask_together() {
        let (image, mask) = sample();
        let augmenter = SegmentationAugmenter::new(AugmentationConfig {
            flip_prob: 1.0,
            ..identity_config()
        });

        let (out_image, out_mask) = augmenter.augment(&image, Some(&mask));
        let out_mask = out_mask.unwrap();
        assert_eq!(out_image.get_pixel(3, 0), &Rgb([10, 20, 30]));
        assert_eq!(out_mask.get_pixel(3, 0), &Luma([1]));
        assert_eq!(out_mask.get_pixel(0, 0), &Luma([0]));
    }

    #[test]
    fn rotation_never_invents_class_ids() {
        let mut mask = GrayImage::new(16, 16);
        for x in 4..12 {
            mask.put_pixel(x, 8, Luma([1]));
        }
        let image = RgbImage::new(16, 16);
        let augmenter = SegmentationAugmenter::new(AugmentationConfig {
            rotation_range: 45,
            rotation_prob: 1.0,
            ..identity_config()
        });

        for _ in 0..10 {
            let (_, out_mask) = augmenter.augment(&image, Some(&mask));
            assert!(out_mask.unwrap().pixels().all(|p| p.0[0] <= 1));
        }
    }
}
