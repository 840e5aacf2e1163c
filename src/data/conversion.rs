use crate::common::CHANNELS;

use burn::{prelude::*, tensor::Tensor};

/// Row-major HWC `u8` pixels to a `[1, C, H, W]` tensor scaled to `[0, 1]`.
pub fn convert_pixels_to_tensor<B: Backend>(
    pixels: &[u8],
    height: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    assert_eq!(
        pixels.len(),
        height * width * CHANNELS,
        "Unexpected pixel buffer length for {height}x{width}"
    );

    let hw = height * width;
    let mut buf = vec![0f32; CHANNELS * hw];
    for (idx, rgb) in pixels.chunks_exact(CHANNELS).enumerate() {
        for (c, value) in rgb.iter().enumerate() {
            buf[c * hw + idx] = *value as f32 / 255.0;
        }
    }
    Tensor::<B, 3>::from_data(
        TensorData::new(buf, [CHANNELS, height, width]).convert::<B::FloatElem>(),
        device,
    )
    .reshape([1, CHANNELS, height, width])
}

/// Class-id mask to a `[1, H, W]` integer tensor.
pub fn convert_mask_to_tensor<B: Backend>(
    mask: &[u8],
    height: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 3, Int> {
    let ids: Vec<i32> = mask.iter().map(|&v| v as i32).collect();
    Tensor::<B, 3, Int>::from_data(
        TensorData::new(ids, [1, height, width]).convert::<B::IntElem>(),
        device,
    )
}
