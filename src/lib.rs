//! Fire semantic segmentation on burn: a ResNet fully-convolutional model,
//! its training loop, and batch prediction of hard label masks.

pub mod common;
pub mod data;
pub mod model;
pub mod utils;

pub use data::resize::resize_image_batch;
pub use model::inference::{PredictedMasks, predict};
