use crate::model::inference::PredictedMasks;

use color_eyre::{
    Result,
    eyre::{WrapErr, bail},
};
use image::GrayImage;
use log::info;
use std::path::{Path, PathBuf};

/// Spread class ids over `0..=255` so masks are viewable.
fn gray_level(label: i64, num_classes: usize) -> u8 {
    let max = num_classes.saturating_sub(1).max(1) as i64;
    (label.clamp(0, max) * 255 / max) as u8
}

/// Write every mask as `<output_dir>/<name>.png`, falling back to
/// `mask_00000.png` style names when `names` is `None`.
pub fn save_masks_png(
    masks: &PredictedMasks,
    num_classes: usize,
    output_dir: &Path,
    names: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    if let Some(names) = names {
        if names.len() != masks.len() {
            bail!(
                "{} names given for {} predicted masks",
                names.len(),
                masks.len()
            );
        }
    }
    std::fs::create_dir_all(output_dir)
        .wrap_err_with(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let (height, width) = (masks.height() as u32, masks.width() as u32);
    let mut written = Vec::with_capacity(masks.len());
    for (index, mask) in masks.masks().enumerate() {
        let pixels: Vec<u8> = mask.iter().map(|&l| gray_level(l, num_classes)).collect();
        let Some(img) = GrayImage::from_raw(width, height, pixels) else {
            bail!("Mask {index} does not fill {width}x{height}");
        };

        let name = match names {
            Some(names) => format!("{}.png", names[index]),
            None => format!("mask_{index:05}.png"),
        };
        let path = output_dir.join(name);
        img.save(&path)
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }

    info!("Wrote {} masks to {}", written.len(), output_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_masks_are_black_and_white() {
        assert_eq!(gray_level(0, 2), 0);
        assert_eq!(gray_level(1, 2), 255);
        assert_eq!(gray_level(1, 3), 127);
        assert_eq!(gray_level(2, 3), 255);
    }

    #[test]
    fn writes_named_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let masks = PredictedMasks::from_vec(vec![0, 1, 1, 0, 0, 0, 1, 1], [2, 2, 2]).unwrap();
        let names = vec!["left".to_string(), "right".to_string()];

        let written = save_masks_png(&masks, 2, dir.path(), Some(&names)).unwrap();
        assert_eq!(written, vec![dir.path().join("left.png"), dir.path().join("right.png")]);

        let img = image::open(&written[0]).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.as_raw(), &vec![0, 255, 255, 0]);
    }

    #[test]
    fn default_names_and_name_count_check() {
        let dir = tempfile::tempdir().unwrap();
        let masks = PredictedMasks::from_vec(vec![0; 4], [1, 2, 2]).unwrap();

        let written = save_masks_png(&masks, 2, dir.path(), None).unwrap();
        assert!(written[0].ends_with("mask_00000.png"));

        let names = vec!["a".to_string(), "b".to_string()];
        assert!(save_masks_png(&masks, 2, dir.path(), Some(&names)).is_err());
    }
}
