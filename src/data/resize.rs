use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// Resize a batch of label maps `[N, H, W]` to `new_size = [height, width]`.
///
/// Nearest-neighbour sampling, so every output value is one of the input
/// class ids.
pub fn resize_image_batch<B: Backend>(
    masks: Tensor<B, 3, Int>,
    new_size: [usize; 2],
) -> Tensor<B, 3, Int> {
    let [n, h, w] = masks.dims();
    if [h, w] == new_size {
        return masks;
    }

    let as_float: Tensor<B, 4> = masks.float().reshape([n, 1, h, w]);
    let resized = interpolate(
        as_float,
        new_size,
        InterpolateOptions::new(InterpolateMode::Nearest),
    );

    // Nearest keeps exact integral values; round guards float backends
    // that store them with error.
    resized
        .round()
        .int()
        .reshape([n, new_size[0], new_size[1]])
}

/// Nearest-neighbour resize of a `[N, C, H, W]` float batch.
///
/// Used to upsample logits during training, so it sticks to the one
/// interpolation mode every backend can differentiate (ndarray has no
/// bilinear backward).
pub fn resize_float_batch<B: Backend>(tensor: Tensor<B, 4>, new_size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, h, w] = tensor.dims();
    if [h, w] == new_size {
        return tensor;
    }
    interpolate(
        tensor,
        new_size,
        InterpolateOptions::new(InterpolateMode::Nearest),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn upscale_keeps_labels() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 3, Int>::from_ints([[[0, 1], [1, 0]]], &device);

        let resized = resize_image_batch(masks, [4, 4]);
        assert_eq!(resized.dims(), [1, 4, 4]);

        let values: Vec<i64> = resized.into_data().iter::<i64>().collect();
        assert_eq!(
            values,
            vec![0, 0, 1, 1, 0, 0, 1, 1, 1, 1, 0, 0, 1, 1, 0, 0],
        );
    }

    #[test]
    fn downscale_changes_only_spatial_dims() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 3, Int>::ones([3, 8, 6], &device) * 2;

        let resized = resize_image_batch(masks, [4, 3]);
        assert_eq!(resized.dims(), [3, 4, 3]);
        assert!(resized.into_data().iter::<i64>().all(|v| v == 2));
    }

    #[test]
    fn same_size_is_identity() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 3, Int>::from_ints([[[3, 1, 2]]], &device);

        let resized = resize_image_batch(masks.clone(), [1, 3]);
        resized.into_data().assert_eq(&masks.into_data(), true);
    }

    #[test]
    fn float_upscale_repeats_each_value() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 4>::from_floats([[[[1.0, -2.0]]]], &device);

        let resized = resize_float_batch(logits, [2, 4]);
        let values: Vec<f32> = resized.into_data().iter::<f32>().collect();
        assert_eq!(values, vec![1.0, 1.0, -2.0, -2.0, 1.0, 1.0, -2.0, -2.0]);
    }

    #[test]
    fn float_resize_of_constant_is_constant() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::ones([2, 3, 5, 5], &device) * 0.5;

        let resized = resize_float_batch(images, [10, 7]);
        assert_eq!(resized.dims(), [2, 3, 10, 7]);
        for v in resized.into_data().iter::<f32>() {
            assert!((v - 0.5).abs() < 1e-5);
        }
    }
}
