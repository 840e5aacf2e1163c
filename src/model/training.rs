use crate::{
    data::{
        batch::{SegmentationBatch, SegmentationBatcher},
        dataset::{DatasetOptions, load_train_val_datasets},
    },
    model::{
        pretrained::load_torchvision_backbone,
        segmentation::{FireSegmentationModel, FireSegmentationModelConfig},
        valid::{ValidationSummary, pixel_cross_entropy, validate_epoch},
    },
    utils::{app_paths::AppPaths, metrics::pixel_accuracy},
};

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use color_eyre::{
    Result,
    eyre::{WrapErr, bail, eyre},
};
use log::{info, warn};
use std::{path::Path, sync::Arc};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: FireSegmentationModelConfig,

    pub optimizer: AdamWConfig,

    #[config(default = 30)]
    pub num_epochs: usize,

    #[config(default = 8)]
    pub batch_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-4)]
    pub learning_rate: f64,

    #[config(default = "None")]
    pub label_smoothing: Option<f32>,

    #[config(default = 10)]
    pub lr_step_size: usize,

    #[config(default = 0.5)]
    pub lr_gamma: f64,

    #[config(default = 5)]
    pub early_stopping_patience: usize,

    #[config(default = 1)]
    pub gradient_accumulation_steps: usize,

    #[config(default = 0.8)]
    pub train_ratio: f32,

    /// `[height, width]` images are resized to before training.
    #[config(default = "[256, 256]")]
    pub input_shape: [usize; 2],
}

impl TrainingConfig {
    pub fn dataset_options(&self) -> DatasetOptions {
        DatasetOptions {
            input_shape: self.input_shape,
            num_classes: self.model.num_classes,
        }
    }

    /// The config `train` saved as `<artifact_dir>/config.json`.
    pub fn load_saved(artifact_dir: &Path) -> Result<Self> {
        let path = artifact_dir.join("config.json");
        TrainingConfig::load(&path)
            .map_err(|e| eyre!("Failed to read training config {}: {:?}", path.display(), e))
    }

    /// Reject settings the loop would divide by or never step with.
    pub fn check(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.gradient_accumulation_steps == 0 {
            bail!("gradient_accumulation_steps must be at least 1");
        }
        if self.lr_step_size == 0 {
            bail!("lr_step_size must be at least 1");
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig::new(
            FireSegmentationModelConfig::new(),
            AdamWConfig::new().with_weight_decay(1.0e-2),
        )
    }
}

fn create_artifact_dir(artifact_dir: &str) -> Result<()> {
    // Remove existing artifacts so stale checkpoints never outlive a run
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir)
        .wrap_err_with(|| format!("Failed to create artifact directory {artifact_dir}"))
}

/// Train a fresh model (backbone seeded from `paths.weights_path` when set)
/// and keep the checkpoint with the best validation mean IoU as
/// `<artifact_dir>/best_model`.
pub fn train<B: AutodiffBackend>(
    paths: &AppPaths,
    config: &TrainingConfig,
    device: B::Device,
) -> Result<ValidationSummary> {
    config.check().wrap_err("Invalid training config")?;
    create_artifact_dir(&paths.artifact_dir)?;
    config
        .save(format!("{}/config.json", paths.artifact_dir))
        .wrap_err("Failed to save training config JSON")?;
    config
        .model
        .save(format!("{}/model_config.json", paths.artifact_dir))
        .wrap_err("Failed to save model config JSON")?;

    B::seed(config.seed);

    let mut model: FireSegmentationModel<B> = config.model.init(&device);
    match &paths.weights_path {
        Some(weights) => {
            let record = load_torchvision_backbone::<B>(Path::new(weights), &device)?;
            model = model.load_backbone(record);
        }
        None => warn!("No WEIGHTS_PATH set, training the backbone from scratch"),
    }

    let (train_ds, val_ds) = load_train_val_datasets(
        &paths.dataset_root,
        config.dataset_options(),
        config.seed,
        config.train_ratio,
    )
    .wrap_err("Failed to load / split datasets")?;

    let dataloader_train: Arc<dyn DataLoader<B, SegmentationBatch<B>>> =
        DataLoaderBuilder::new(SegmentationBatcher::train_default())
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(train_ds);

    let dataloader_val: Arc<
        dyn DataLoader<B::InnerBackend, SegmentationBatch<B::InnerBackend>>,
    > = DataLoaderBuilder::new(SegmentationBatcher::eval())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(val_ds);

    let mut optim = config.optimizer.init();
    let mut best: Option<ValidationSummary> = None;
    let mut patience_counter = 0;
    let mut current_lr = config.learning_rate;
    let acc_steps = config.gradient_accumulation_steps;

    info!("Starting training with {} epochs", config.num_epochs);
    info!("Initial learning rate: {:.6}", current_lr);

    model = model.to_device(&device);
    for epoch in 1..config.num_epochs + 1 {
        let mut total_loss = 0.0;
        let mut total_accuracy = 0.0;
        let mut batch_count = 0;

        let mut gradient_accumulator: GradientsAccumulator<FireSegmentationModel<B>> =
            GradientsAccumulator::default();
        let mut pending = 0;

        for (iteration, batch) in dataloader_train.iter().enumerate() {
            let Some(masks) = batch.masks else {
                bail!("Training batch {iteration} has no masks");
            };
            let images = batch.images.to_device(&device);
            let masks = masks.to_device(&device);

            let output = model.forward(images);
            // normalizing loss to account for gradient accumulation
            let loss = pixel_cross_entropy(output.clone(), masks.clone(), config.label_smoothing)
                / (acc_steps as f32);
            let accuracy = pixel_accuracy(output, masks);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            gradient_accumulator.accumulate(&model, grads);
            pending += 1;

            if pending == acc_steps {
                model = optim.step(current_lr, model, gradient_accumulator.grads());
                pending = 0;
            }

            let loss_value = loss.into_scalar().elem::<f32>() * acc_steps as f32;
            if iteration % 25 == 0 {
                info!(
                    "[Train - Epoch {} - Iteration {}] Loss {:.4} | Pixel accuracy {:.2}%",
                    epoch, iteration, loss_value, accuracy
                );
            }

            total_loss += loss_value;
            total_accuracy += accuracy;
            batch_count += 1;
        }

        if pending > 0 {
            model = optim.step(current_lr, model, gradient_accumulator.grads());
        }
        if batch_count == 0 {
            bail!("Training loader produced no batches");
        }

        let train_loss = total_loss / batch_count as f32;
        let train_acc = total_accuracy / batch_count as f32;

        let summary = validate_epoch(&model.valid(), &dataloader_val, config.model.num_classes)
            .wrap_err("Validation epoch failed")?;

        info!(
            "Epoch {}: Train Loss {:.4}, Train Acc {:.2}% | Val Loss {:.4}, Val Acc {:.2}%, Val mIoU {:.4}",
            epoch,
            train_loss,
            train_acc,
            summary.loss,
            summary.pixel_accuracy,
            summary.mean_iou
        );

        if epoch % config.lr_step_size == 0 {
            current_lr *= config.lr_gamma;
            info!("Learning rate decayed to: {:.6}", current_lr);
        }

        let improved = best
            .as_ref()
            .is_none_or(|b| summary.mean_iou > b.mean_iou);
        if improved {
            patience_counter = 0;
            model
                .clone()
                .save_file(
                    format!("{}/best_model", paths.artifact_dir),
                    &CompactRecorder::new(),
                )
                .wrap_err("Failed saving best_model checkpoint")?;
            best = Some(summary);
        } else {
            patience_counter += 1;
        }

        model
            .clone()
            .save_file(
                format!("{}/model_epoch_{}", paths.artifact_dir, epoch),
                &CompactRecorder::new(),
            )
            .wrap_err_with(|| format!("Failed saving checkpoint for epoch {epoch}"))?;

        if patience_counter >= config.early_stopping_patience {
            info!(
                "Early stopping triggered at epoch {} (best val mIoU: {:.4})",
                epoch,
                best.as_ref().map_or(0.0, |b| b.mean_iou)
            );
            break;
        }
    }

    match best {
        Some(best) => {
            info!(
                "Best model saved to {}/best_model (mIoU {:.4})",
                paths.artifact_dir, best.mean_iou
            );
            Ok(best)
        }
        None => bail!("Training ran no epochs"),
    }
}
