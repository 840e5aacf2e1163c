use crate::{
    data::{batch::SegmentationBatch, resize::resize_image_batch},
    model::segmentation::{FireSegmentationModel, FireSegmentationModelConfig},
};
use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    record::CompactRecorder,
    tensor::activation::softmax,
};
use color_eyre::{
    Result,
    eyre::{WrapErr, bail, eyre},
};
use log::{debug, info};
use std::{path::Path, sync::Arc, time::Instant};

/// Label maps of every predicted image, stacked as `[N, H, W]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictedMasks {
    shape: [usize; 3],
    labels: Vec<i64>,
}

impl PredictedMasks {
    pub fn empty(spatial: [usize; 2]) -> Self {
        Self {
            shape: [0, spatial[0], spatial[1]],
            labels: Vec::new(),
        }
    }

    pub fn from_vec(labels: Vec<i64>, shape: [usize; 3]) -> Result<Self> {
        if labels.len() != shape.iter().product::<usize>() {
            bail!(
                "{} labels do not fill shape {:?}",
                labels.len(),
                shape
            );
        }
        Ok(Self { shape, labels })
    }

    /// Append a `[n, h, w]` batch. The first non-empty batch fixes `h, w`.
    fn extend(
        &mut self,
        batch_shape: [usize; 3],
        labels: impl Iterator<Item = i64>,
    ) -> Result<()> {
        let [n, h, w] = batch_shape;
        if self.shape[0] == 0 {
            self.shape[1] = h;
            self.shape[2] = w;
        } else if [h, w] != [self.shape[1], self.shape[2]] {
            bail!(
                "Batch masks of {}x{} differ from earlier {}x{}; pass a resize shape",
                h,
                w,
                self.shape[1],
                self.shape[2]
            );
        }
        self.labels.extend(labels);
        self.shape[0] += n;
        debug_assert_eq!(self.labels.len(), self.shape.iter().product::<usize>());
        Ok(())
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.shape[0] == 0
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Every label, row-major over `[N, H, W]`.
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn mask(&self, index: usize) -> Option<&[i64]> {
        let size = self.height() * self.width();
        (index < self.len()).then(|| &self.labels[index * size..(index + 1) * size])
    }

    pub fn masks(&self) -> impl Iterator<Item = &[i64]> {
        (0..self.len()).filter_map(|i| self.mask(i))
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3, Int> {
        Tensor::from_data(
            TensorData::new(self.labels.clone(), self.shape).convert::<B::IntElem>(),
            device,
        )
    }
}

/// Per-class scores `[N, C, H, W]` to a hard label map `[N, H, W]`.
pub fn labels_from_logits<B: Backend>(logits: Tensor<B, 4>) -> Tensor<B, 3, Int> {
    softmax(logits, 1).argmax(1).squeeze(1)
}

/// Predicted segmentation masks for every batch of `dataloader`, in loader
/// order, optionally resized to `resize_evaluation_shape = [height, width]`.
///
/// The model must live on a non-autodiff backend (use `model.valid()`),
/// which runs batch norm with its running statistics and records no graph.
pub fn predict<B: Backend>(
    model: &FireSegmentationModel<B>,
    dataloader: &Arc<dyn DataLoader<B, SegmentationBatch<B>>>,
    device: &B::Device,
    resize_evaluation_shape: Option<[usize; 2]>,
) -> Result<PredictedMasks> {
    let started = Instant::now();
    info!("Starting prediction");
    let mut results = PredictedMasks::empty(resize_evaluation_shape.unwrap_or([0, 0]));

    for (iteration, batch) in dataloader.iter().enumerate() {
        let images = batch.images.to_device(device);

        let y_pred = labels_from_logits(model.forward(images));
        let y_pred = match resize_evaluation_shape {
            Some(shape) => resize_image_batch(y_pred, shape),
            None => y_pred,
        };

        let shape = y_pred.dims();
        let data = y_pred.into_data();
        results
            .extend(shape, data.iter::<i64>())
            .wrap_err_with(|| format!("Prediction batch {iteration} has an inconsistent shape"))?;
        debug!("[Predict - Iteration {}] {} masks", iteration, shape[0]);
    }

    info!(
        "Predicted {} masks of {}x{} in {:.2?}",
        results.len(),
        results.height(),
        results.width(),
        started.elapsed()
    );
    Ok(results)
}

/// Rebuild the model described by `model_config.json` and load the
/// `best_model` checkpoint from `artifact_dir`. The config comes back too,
/// since it is the authority on `num_classes`.
pub fn load_trained_model<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<(FireSegmentationModel<B>, FireSegmentationModelConfig)> {
    let config_path = artifact_dir.join("model_config.json");
    let config = FireSegmentationModelConfig::load(&config_path)
        .map_err(|e| eyre!("Failed to read {}: {:?}", config_path.display(), e))?;

    let model = config
        .init::<B>(device)
        .load_file(artifact_dir.join("best_model"), &CompactRecorder::new(), device)
        .wrap_err_with(|| {
            format!(
                "Failed to load best_model checkpoint from {}",
                artifact_dir.display()
            )
        })?;
    info!(
        "Model loaded from {} ({} classes)",
        artifact_dir.display(),
        config.num_classes
    );
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{
            SegmentationBatcher,
            dataset::{SegmentationDataset, SegmentationItem},
        },
        model::segmentation::tests::tiny_config,
    };
    use burn::{
        backend::NdArray,
        data::dataloader::DataLoaderBuilder,
        record::CompactRecorder,
    };
    use std::path::PathBuf;

    type TestBackend = NdArray<f32>;

    fn item(seed: usize, height: usize, width: usize) -> SegmentationItem {
        let image = (0..height * width * 3)
            .map(|i| ((i * 37 + seed * 101) % 256) as u8)
            .collect();
        SegmentationItem {
            image,
            mask: None,
            height,
            width,
            original_size: [height, width],
            path: PathBuf::from(format!("{seed}.png")),
        }
    }

    fn loader(
        items: Vec<SegmentationItem>,
        batch_size: usize,
    ) -> Arc<dyn DataLoader<TestBackend, SegmentationBatch<TestBackend>>> {
        DataLoaderBuilder::new(SegmentationBatcher::eval())
            .batch_size(batch_size)
            .build(SegmentationDataset::new(items))
    }

    fn model(num_classes: usize) -> FireSegmentationModel<TestBackend> {
        tiny_config(num_classes).init(&Default::default())
    }

    #[test]
    fn collects_one_mask_per_image() {
        let device = Default::default();
        let model = model(3);
        let items = (0..5).map(|i| item(i, 32, 32)).collect();

        let masks = predict(&model, &loader(items, 2), &device, None).unwrap();
        assert_eq!(masks.shape(), [5, 32, 32]);
        assert!(masks.labels().iter().all(|&l| (0..3).contains(&l)));
        assert_eq!(masks.masks().count(), 5);
    }

    #[test]
    fn batching_does_not_change_results_or_order() {
        let device = Default::default();
        let model = model(2);
        let items: Vec<_> = (0..4).map(|i| item(i, 32, 32)).collect();

        let batched = predict(&model, &loader(items.clone(), 3), &device, None).unwrap();
        let single = predict(&model, &loader(items.clone(), 1), &device, None).unwrap();
        assert_eq!(batched, single);

        for (index, it) in items.into_iter().enumerate() {
            let one = predict(&model, &loader(vec![it], 1), &device, None).unwrap();
            assert_eq!(one.mask(0), batched.mask(index));
        }
    }

    #[test]
    fn resizes_to_evaluation_shape() {
        let device = Default::default();
        let model = model(2);
        let items = (0..3).map(|i| item(i, 32, 32)).collect();

        let masks = predict(&model, &loader(items, 2), &device, Some([20, 50])).unwrap();
        assert_eq!(masks.shape(), [3, 20, 50]);
        assert!(masks.labels().iter().all(|&l| l == 0 || l == 1));
    }

    #[test]
    fn empty_loader_yields_empty_stack() {
        let device = Default::default();
        let model = model(2);

        let masks = predict(&model, &loader(Vec::new(), 2), &device, None).unwrap();
        assert!(masks.is_empty());
        assert_eq!(masks.shape(), [0, 0, 0]);

        let masks = predict(&model, &loader(Vec::new(), 2), &device, Some([8, 8])).unwrap();
        assert_eq!(masks.shape(), [0, 8, 8]);
    }

    #[test]
    fn mixed_shapes_need_a_resize_shape() {
        let device = Default::default();
        let model = model(2);
        let items = vec![item(0, 32, 32), item(1, 64, 32)];

        assert!(predict(&model, &loader(items.clone(), 1), &device, None).is_err());
        let masks = predict(&model, &loader(items, 1), &device, Some([16, 16])).unwrap();
        assert_eq!(masks.shape(), [2, 16, 16]);
    }

    #[test]
    fn labels_from_logits_takes_class_argmax() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.1, 3.0]], [[2.0, 0.0]], [[0.5, 1.0]]]],
            &device,
        );

        let labels: Vec<i64> = labels_from_logits(logits).into_data().iter::<i64>().collect();
        assert_eq!(labels, vec![1, 0]);
    }

    #[test]
    fn masks_round_trip_through_tensor() {
        let masks = PredictedMasks::from_vec(vec![0, 1, 1, 0, 1, 1], [2, 1, 3]).unwrap();
        assert_eq!(masks.mask(1), Some(&[0, 1, 1][..]));
        assert_eq!(masks.mask(2), None);

        let tensor = masks.to_tensor::<TestBackend>(&Default::default());
        assert_eq!(tensor.dims(), [2, 1, 3]);
        assert!(PredictedMasks::from_vec(vec![0; 5], [2, 1, 3]).is_err());
    }

    #[test]
    fn missing_model_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_trained_model::<TestBackend>(dir.path(), &Default::default());
        let Err(err) = result else {
            panic!("loaded a model from an empty directory");
        };
        assert!(err.to_string().contains("model_config.json"));
    }

    #[test]
    fn trained_model_reloads_from_artifacts() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(3);
        let model = config.init::<TestBackend>(&device);
        config.save(dir.path().join("model_config.json")).unwrap();
        model
            .clone()
            .save_file(dir.path().join("best_model"), &CompactRecorder::new())
            .unwrap();

        let (reloaded, reloaded_config) =
            load_trained_model::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(reloaded_config.num_classes, 3);
        let items: Vec<_> = (0..2).map(|i| item(i, 32, 32)).collect();
        let original = predict(&model, &loader(items.clone(), 2), &device, None).unwrap();
        let restored = predict(&reloaded, &loader(items, 2), &device, None).unwrap();
        assert_eq!(original.shape(), restored.shape());

        // The compact recorder stores half precision, so allow rare flips.
        let agreeing = original
            .labels()
            .iter()
            .zip(restored.labels())
            .filter(|(a, b)| a == b)
            .count();
        assert!(agreeing * 10 >= original.labels().len() * 9);
    }
}
