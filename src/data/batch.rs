use crate::data::{
    augmentation::{AugmentationConfig, SegmentationAugmenter, item_to_images},
    conversion::{convert_mask_to_tensor, convert_pixels_to_tensor},
    dataset::SegmentationItem,
    normalize::{NormalizeConfig, normalize},
};

use burn::{data::dataloader::batcher::Batcher, prelude::*, tensor::Tensor};
use log::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatcherMode {
    Train,
    Eval,
}

#[derive(Clone, Debug)]
pub struct SegmentationBatcher {
    mode: BatcherMode,
    augmenter: Option<SegmentationAugmenter>,
    normalize: NormalizeConfig,
}

impl Default for SegmentationBatcher {
    fn default() -> Self {
        Self::eval()
    }
}

impl SegmentationBatcher {
    pub fn train_default() -> Self {
        Self::train(AugmentationConfig::default())
    }

    pub fn train(config: AugmentationConfig) -> Self {
        Self {
            mode: BatcherMode::Train,
            augmenter: Some(SegmentationAugmenter::new(config)),
            normalize: NormalizeConfig::new(),
        }
    }

    pub fn eval() -> Self {
        Self {
            mode: BatcherMode::Eval,
            augmenter: None,
            normalize: NormalizeConfig::new(),
        }
    }

    pub fn mode(&self) -> BatcherMode {
        self.mode
    }

    /// The item's buffers, augmented in train mode. Augmentation failures
    /// fall back to the unmodified item.
    fn prepared(&self, item: &SegmentationItem) -> (Vec<u8>, Option<Vec<u8>>) {
        match (self.mode, &self.augmenter) {
            (BatcherMode::Train, Some(aug)) => match item_to_images(item) {
                Ok((image, mask)) => {
                    let (image, mask) = aug.augment(&image, mask.as_ref());
                    (image.into_raw(), mask.map(|m| m.into_raw()))
                }
                Err(e) => {
                    warn!("[augment warning] {}: {}", item.path.display(), e);
                    (item.image.clone(), item.mask.clone())
                }
            },
            _ => (item.image.clone(), item.mask.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[N, 3, H, W]`, normalized.
    pub images: Tensor<B, 4>,
    /// `[N, H, W]` class ids; present only when every item had a mask.
    pub masks: Option<Tensor<B, 3, Int>>,
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher {
    /// # Panics
    ///
    /// If the items do not share one spatial size. Datasets built by
    /// [`SegmentationDataset::from_dirs`] resize every item to the same
    /// input shape.
    ///
    /// [`SegmentationDataset::from_dirs`]: crate::data::SegmentationDataset::from_dirs
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        if let Some(first) = items.first() {
            let size = [first.height, first.width];
            if let Some(odd) = items.iter().find(|i| [i.height, i.width] != size) {
                panic!(
                    "Batch items must share one spatial size: {} is {}x{}, {} is {}x{}",
                    first.path.display(),
                    size[0],
                    size[1],
                    odd.path.display(),
                    odd.height,
                    odd.width
                );
            }
        }
        let prepared: Vec<(Vec<u8>, Option<Vec<u8>>)> =
            items.iter().map(|item| self.prepared(item)).collect();

        let images: Vec<Tensor<B, 4>> = items
            .iter()
            .zip(&prepared)
            .map(|(item, (pixels, _))| {
                convert_pixels_to_tensor::<B>(pixels, item.height, item.width, device)
            })
            .collect();
        let images = normalize(
            Tensor::cat(images, 0), // Concatenate along the batch dimension
            &self.normalize,
        );

        let masks: Option<Vec<Tensor<B, 3, Int>>> = items
            .iter()
            .zip(&prepared)
            .map(|(item, (_, mask))| {
                mask.as_ref()
                    .map(|m| convert_mask_to_tensor::<B>(m, item.height, item.width, device))
            })
            .collect();
        let masks = masks.map(|masks| Tensor::cat(masks, 0));

        SegmentationBatch { images, masks }
    }
}
