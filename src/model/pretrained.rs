use crate::model::backbone::ResNetBackboneRecord;

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use color_eyre::{
    Result,
    eyre::{WrapErr, bail},
};
use log::info;
use std::path::Path;

/// Maps torchvision ResNet state-dict keys onto [`ResNetBackbone`] fields.
/// `fc.*` has no counterpart and is ignored.
///
/// [`ResNetBackbone`]: crate::model::backbone::ResNetBackbone
fn torchvision_load_args(weights_path: &Path) -> LoadArgs {
    LoadArgs::new(weights_path.to_path_buf())
        // Map top-level batchnorm 'bn1' to 'norm1'
        .with_key_remap(r"^bn1\.(.+)$", "norm1.$1")
        // Map layer blocks convolution parameters
        .with_key_remap(
            r"^layer([1-4])\.(\d+)\.conv([123])\.(.+)$",
            "layer$1.blocks.$2.conv$3.$4",
        )
        // Map layer blocks batchnorm parameters
        .with_key_remap(
            r"^layer([1-4])\.(\d+)\.bn([123])\.(.+)$",
            "layer$1.blocks.$2.norm$3.$4",
        )
        .with_key_remap(
            r"^layer([1-4])\.(\d+)\.downsample\.0\.(.+)$",
            "layer$1.blocks.$2.downsample.conv.$3",
        )
        .with_key_remap(
            r"^layer([1-4])\.(\d+)\.downsample\.1\.(.+)$",
            "layer$1.blocks.$2.downsample.norm.$3",
        )
}

/// Load ImageNet-pretrained torchvision ResNet-50 weights (`.pth`).
pub fn load_torchvision_backbone<B: Backend>(
    weights_path: &Path,
    device: &B::Device,
) -> Result<ResNetBackboneRecord<B>> {
    if !weights_path.exists() {
        bail!(
            "Missing weights file: {:?}. Expected pretrained PyTorch ResNet50 weights.",
            weights_path
        );
    }

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(torchvision_load_args(weights_path), device)
        .wrap_err("Failed to load / map PyTorch ResNet50 state into backbone record")?;
    info!("Pretrained backbone loaded from {}", weights_path.display());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn missing_weights_file_is_reported() {
        let device = Default::default();
        let result = load_torchvision_backbone::<NdArray<f32>>(
            Path::new("/nonexistent/resnet50.pth"),
            &device,
        );
        let Err(err) = result else {
            panic!("loading a missing file succeeded");
        };
        assert!(err.to_string().contains("Missing weights file"));
    }
}
