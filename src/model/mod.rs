pub mod backbone;
pub mod blocks;
pub mod inference;
pub mod pretrained;
pub mod segmentation;
pub mod training;
pub mod valid;

pub use inference::{PredictedMasks, predict};
pub use segmentation::{FireSegmentationModel, FireSegmentationModelConfig};
