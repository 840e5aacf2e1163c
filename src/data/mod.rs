pub mod augmentation;
pub mod batch;
pub mod conversion;
pub mod dataset;
pub mod normalize;
pub mod resize;

pub use batch::{SegmentationBatch, SegmentationBatcher};
pub use dataset::{DatasetOptions, SegmentationDataset, SegmentationItem};
pub use resize::resize_image_batch;
