use crate::{
    data::{batch::SegmentationBatch, dataset::SegmentationDataset},
    model::{
        inference::{PredictedMasks, labels_from_logits},
        segmentation::FireSegmentationModel,
    },
    utils::metrics::ConfusionMatrix,
};
use burn::{
    data::{dataloader::DataLoader, dataset::Dataset},
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
};
use color_eyre::{Result, eyre::bail};
use std::sync::Arc;

/// Cross-entropy over every pixel of `[N, C, H, W]` logits.
pub fn pixel_cross_entropy<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 3, Int>,
    smoothing: Option<f32>,
) -> Tensor<B, 1> {
    let [n, c, h, w] = logits.dims();
    let logits = logits.permute([0, 2, 3, 1]).reshape([n * h * w, c]);
    let targets = targets.reshape([n * h * w]);

    CrossEntropyLossConfig::new()
        .with_smoothing(smoothing)
        .init(&logits.device())
        .forward(logits, targets)
}

#[derive(Clone, Debug)]
pub struct ValidationSummary {
    pub loss: f32,
    pub pixel_accuracy: f32,
    pub mean_iou: f32,
    pub per_class_iou: Vec<Option<f32>>,
}

pub fn validate_epoch<B: Backend>(
    model: &FireSegmentationModel<B>,
    dataloader: &Arc<dyn DataLoader<B, SegmentationBatch<B>>>,
    num_classes: usize,
) -> Result<ValidationSummary> {
    let mut total_loss = 0.0;
    let mut batch_count = 0;
    let mut confusion = ConfusionMatrix::new(num_classes);

    for batch in dataloader.iter() {
        let Some(masks) = batch.masks else {
            bail!("Validation batch {batch_count} has no masks");
        };
        let output = model.forward(batch.images);
        let loss = pixel_cross_entropy(output.clone(), masks.clone(), None);

        let predictions = labels_from_logits(output).into_data();
        let targets = masks.into_data();
        let predictions: Vec<i64> = predictions.iter::<i64>().collect();
        let targets: Vec<i64> = targets.iter::<i64>().collect();
        confusion.update(&predictions, &targets)?;

        total_loss += loss.into_scalar().elem::<f32>();
        batch_count += 1;
    }

    if batch_count == 0 {
        bail!("Validation loader produced no batches");
    }

    Ok(ValidationSummary {
        loss: total_loss / batch_count as f32,
        pixel_accuracy: confusion.pixel_accuracy(),
        mean_iou: confusion.mean_iou(),
        per_class_iou: confusion.per_class_iou(),
    })
}

/// Compare predictions at model resolution with the dataset's own masks,
/// item by item in dataset order.
pub fn evaluate_predictions(
    predictions: &PredictedMasks,
    dataset: &SegmentationDataset,
    num_classes: usize,
) -> Result<ConfusionMatrix> {
    if predictions.len() != dataset.len() {
        bail!(
            "{} predictions for {} dataset items",
            predictions.len(),
            dataset.len()
        );
    }

    let mut confusion = ConfusionMatrix::new(num_classes);
    for (index, predicted) in predictions.masks().enumerate() {
        let Some(item) = dataset.get(index) else {
            bail!("Dataset item {index} disappeared");
        };
        let Some(mask) = item.mask else {
            bail!("{} has no ground-truth mask", item.path.display());
        };
        let target: Vec<i64> = mask.iter().map(|&v| v as i64).collect();
        confusion.update(predicted, &target)?;
    }
    Ok(confusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{SegmentationBatcher, SegmentationDataset, SegmentationItem},
        model::segmentation::tests::tiny_config,
    };
    use burn::{backend::NdArray, data::dataloader::DataLoaderBuilder};
    use std::path::PathBuf;

    type TestBackend = NdArray<f32>;

    fn item(mask: Option<Vec<u8>>) -> SegmentationItem {
        SegmentationItem {
            image: vec![90; 32 * 32 * 3],
            mask,
            height: 32,
            width: 32,
            original_size: [32, 32],
            path: PathBuf::from("x.png"),
        }
    }

    #[test]
    fn confident_correct_logits_have_low_loss() {
        let device = Default::default();
        let logits =
            Tensor::<TestBackend, 4>::from_floats([[[[10.0, -10.0]], [[-10.0, 10.0]]]], &device);
        let targets = Tensor::<TestBackend, 3, Int>::from_ints([[[0, 1]]], &device);

        let loss = pixel_cross_entropy(logits, targets, None).into_scalar();
        assert!(loss < 1e-3, "loss {loss}");
    }

    #[test]
    fn summary_covers_every_pixel() {
        let device = Default::default();
        let model = tiny_config(2).init::<TestBackend>(&device);
        let loader: Arc<dyn DataLoader<TestBackend, SegmentationBatch<TestBackend>>> =
            DataLoaderBuilder::new(SegmentationBatcher::eval())
                .batch_size(2)
                .build(SegmentationDataset::new(vec![
                    item(Some(vec![0; 32 * 32])),
                    item(Some(vec![1; 32 * 32])),
                    item(Some(vec![0; 32 * 32])),
                ]));

        let summary = validate_epoch(&model, &loader, 2).unwrap();
        assert!(summary.loss.is_finite());
        assert!((0.0..=100.0).contains(&summary.pixel_accuracy));
        assert!((0.0..=1.0).contains(&summary.mean_iou));
        assert_eq!(summary.per_class_iou.len(), 2);
    }

    #[test]
    fn predictions_are_scored_against_dataset_masks() {
        let dataset = SegmentationDataset::new(vec![item(Some(vec![1; 32 * 32]))]);
        let mut labels = vec![1; 32 * 32];
        labels[0] = 0;
        let predictions = PredictedMasks::from_vec(labels, [1, 32, 32]).unwrap();

        let confusion = evaluate_predictions(&predictions, &dataset, 2).unwrap();
        assert_eq!(confusion.count(1, 1), 32 * 32 - 1);
        assert_eq!(confusion.count(1, 0), 1);

        let unlabelled = SegmentationDataset::new(vec![item(None)]);
        assert!(evaluate_predictions(&predictions, &unlabelled, 2).is_err());
    }

    #[test]
    fn unlabelled_batches_are_rejected() {
        let device = Default::default();
        let model = tiny_config(2).init::<TestBackend>(&device);
        let loader: Arc<dyn DataLoader<TestBackend, SegmentationBatch<TestBackend>>> =
            DataLoaderBuilder::new(SegmentationBatcher::eval())
                .batch_size(1)
                .build(SegmentationDataset::new(vec![item(None)]));

        assert!(validate_epoch(&model, &loader, 2).is_err());
    }
}
