use burn::{prelude::*, tensor::Tensor};

use crate::common::CHANNELS;

/// Per-channel statistics the backbone was pretrained with.
#[derive(Config, Debug)]
pub struct NormalizeConfig {
    #[config(default = "[0.485, 0.456, 0.406]")]
    pub mean: [f32; CHANNELS],
    #[config(default = "[0.229, 0.224, 0.225]")]
    pub std: [f32; CHANNELS],
}

fn channel_tensor<B: Backend>(values: [f32; CHANNELS], device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(
        TensorData::new(values.to_vec(), [1, CHANNELS, 1, 1]).convert::<B::FloatElem>(),
        device,
    )
}

/// `(x - mean) / std` over the channel dimension of a `[N, C, H, W]` batch.
pub fn normalize<B: Backend>(tensor: Tensor<B, 4>, config: &NormalizeConfig) -> Tensor<B, 4> {
    let device = tensor.device();
    let mean = channel_tensor::<B>(config.mean, &device);
    let std = channel_tensor::<B>(config.std, &device);

    (tensor - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn mean_pixel_maps_to_zero() {
        let device = Default::default();
        let config = NormalizeConfig::new();
        let pixel = Tensor::<TestBackend, 1>::from_floats(config.mean, &device)
            .reshape([1, CHANNELS, 1, 1]);

        let out = normalize(pixel, &config).into_data();
        for v in out.iter::<f32>() {
            assert!(v.abs() < 1e-6, "expected 0, got {v}");
        }
    }

    #[test]
    fn one_std_above_mean_maps_to_one() {
        let device = Default::default();
        let config = NormalizeConfig::new();
        let values: Vec<f32> = (0..CHANNELS)
            .map(|c| config.mean[c] + config.std[c])
            .collect();
        let pixel = Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device)
            .reshape([1, CHANNELS, 1, 1]);

        let out = normalize(pixel, &config).into_data();
        for v in out.iter::<f32>() {
            assert!((v - 1.0).abs() < 1e-5, "expected 1, got {v}");
        }
    }
}
