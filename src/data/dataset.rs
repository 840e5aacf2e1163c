use crate::common::{CHANNELS, IMAGE_EXTENSIONS};

use burn::data::dataset::{
    Dataset,
    transform::{PartialDataset, ShuffledDataset},
};
use color_eyre::{
    Result,
    eyre::{WrapErr, bail},
};
use image::imageops::{self, FilterType};
use log::{debug, info};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// One decoded sample, already resized to the model input shape.
///
/// Items batched together must share `height` and `width`.
#[derive(Clone, Debug)]
pub struct SegmentationItem {
    /// Row-major HWC RGB pixels.
    pub image: Vec<u8>,
    /// Row-major class ids, same spatial shape as `image`.
    pub mask: Option<Vec<u8>>,
    pub height: usize,
    pub width: usize,
    /// `[height, width]` of the file on disk.
    pub original_size: [usize; 2],
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug)]
pub struct DatasetOptions {
    /// `[height, width]` every image and mask is resized to.
    pub input_shape: [usize; 2],
    pub num_classes: usize,
}

#[derive(Clone, Debug)]
pub struct SegmentationDataset {
    items: Arc<Vec<SegmentationItem>>,
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub type SplitDataset =
    PartialDataset<ShuffledDataset<SegmentationDataset, SegmentationItem>, SegmentationItem>;

impl SegmentationDataset {
    pub fn new(items: Vec<SegmentationItem>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// Decode every image under `images_dir`, pairing each with
    /// `<masks_dir>/<stem>.png` when a masks directory is given.
    pub fn from_dirs(
        images_dir: &Path,
        masks_dir: Option<&Path>,
        options: DatasetOptions,
    ) -> Result<Self> {
        let image_paths = list_images(images_dir)?;
        if image_paths.is_empty() {
            bail!("No images found in {}", images_dir.display());
        }

        let mut items = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            let (image, original_size) = load_image(&path, options.input_shape)?;
            let mask = match masks_dir {
                Some(dir) => {
                    let mask_path = mask_path_for(dir, &path)?;
                    Some(load_mask(&mask_path, options)?)
                }
                None => None,
            };
            debug!("Loaded {} (original {:?})", path.display(), original_size);
            items.push(SegmentationItem {
                image,
                mask,
                height: options.input_shape[0],
                width: options.input_shape[1],
                original_size,
                path,
            });
        }

        info!(
            "Loaded {} images from {}",
            items.len(),
            images_dir.display()
        );
        Ok(Self::new(items))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.items.iter().map(|item| item.path.as_path())
    }

    /// The original size shared by every item, if there is one.
    pub fn common_original_size(&self) -> Option<[usize; 2]> {
        let first = self.items.first()?.original_size;
        self.items
            .iter()
            .all(|item| item.original_size == first)
            .then_some(first)
    }
}

/// `<root>/images` with masks from `<root>/masks`.
pub fn load_dataset(root: &str, options: DatasetOptions) -> Result<SegmentationDataset> {
    let root = Path::new(root);
    if !root.exists() {
        bail!("Dataset directory not found: {}", root.display());
    }
    SegmentationDataset::from_dirs(
        &root.join("images"),
        Some(&root.join("masks")),
        options,
    )
    .wrap_err_with(|| format!("Failed to load segmentation dataset at {}", root.display()))
}

pub fn load_train_val_datasets(
    root: &str,
    options: DatasetOptions,
    seed: u64,
    train_ratio: f32,
) -> Result<(SplitDataset, SplitDataset)> {
    let dataset = load_dataset(root, options)?;
    let len = dataset.len();
    if len < 2 {
        bail!("Need at least two samples to split train/val, found {len}");
    }
    let train_size = ((len as f32) * train_ratio).round() as usize;
    let train_size = train_size.clamp(1, len - 1);

    let shuffled_for_train = ShuffledDataset::with_seed(dataset.clone(), seed);
    let shuffled_for_val = ShuffledDataset::with_seed(dataset, seed);

    let train = PartialDataset::new(shuffled_for_train, 0, train_size);
    let val = PartialDataset::new(shuffled_for_val, train_size, len);

    Ok((train, val))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .wrap_err_with(|| format!("Failed to read image directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn mask_path_for(masks_dir: &Path, image_path: &Path) -> Result<PathBuf> {
    let Some(stem) = image_path.file_stem() else {
        bail!("Image path has no file name: {}", image_path.display());
    };
    let mask_path = masks_dir.join(stem).with_extension("png");
    if !mask_path.exists() {
        bail!(
            "Missing mask for {}: expected {}",
            image_path.display(),
            mask_path.display()
        );
    }
    Ok(mask_path)
}

fn load_image(path: &Path, [height, width]: [usize; 2]) -> Result<(Vec<u8>, [usize; 2])> {
    let img = image::open(path)
        .wrap_err_with(|| format!("Failed to decode image {}", path.display()))?;
    let original_size = [img.height() as usize, img.width() as usize];

    let rgb = img.to_rgb8();
    let rgb = if original_size == [height, width] {
        rgb
    } else {
        imageops::resize(&rgb, width as u32, height as u32, FilterType::Triangle)
    };

    let pixels = rgb.into_raw();
    debug_assert_eq!(pixels.len(), height * width * CHANNELS);
    Ok((pixels, original_size))
}

fn load_mask(path: &Path, options: DatasetOptions) -> Result<Vec<u8>> {
    let [height, width] = options.input_shape;
    let img = image::open(path)
        .wrap_err_with(|| format!("Failed to decode mask {}", path.display()))?;

    let luma = img.to_luma8();
    let luma = if [luma.height() as usize, luma.width() as usize] == [height, width] {
        luma
    } else {
        imageops::resize(&luma, width as u32, height as u32, FilterType::Nearest)
    };

    decode_mask_values(luma.as_raw(), options.num_classes)
        .wrap_err_with(|| format!("Invalid mask {}", path.display()))
}

/// Map raw grayscale mask values to class ids.
///
/// Binary problems accept any non-zero value as the positive class, so
/// 0/255 masks work unchanged. Otherwise the value is the class id.
pub fn decode_mask_values(raw: &[u8], num_classes: usize) -> Result<Vec<u8>> {
    if num_classes == 2 {
        return Ok(raw.iter().map(|&v| u8::from(v != 0)).collect());
    }
    if let Some(&bad) = raw.iter().find(|&&v| v as usize >= num_classes) {
        bail!("Mask value {bad} is not a class id below {num_classes}");
    }
    Ok(raw.to_vec())
}
