use burn::{
    backend::Autodiff,
    data::dataloader::{DataLoader, DataLoaderBuilder},
};
use clap::{Args, Parser, Subcommand};
use color_eyre::{Result, eyre::WrapErr};
use fire_seg::{
    common::{CLASSES, HEIGHT, WIDTH},
    data::{DatasetOptions, SegmentationBatch, SegmentationBatcher, SegmentationDataset},
    model::{
        inference::{load_trained_model, predict},
        training::{TrainingConfig, train},
        valid::evaluate_predictions,
    },
    utils::{app_paths::AppPaths, export::save_masks_png},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[cfg(feature = "cuda")]
type Backend = burn::backend::Cuda<f32, i32>;
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
type Backend = burn::backend::Wgpu<f32, i32>;
#[cfg(not(any(feature = "cuda", feature = "wgpu")))]
type Backend = burn::backend::NdArray<f32>;

type AutodiffBackend = Autodiff<Backend>;

#[derive(Parser, Debug)]
#[command(
    name = "fire-seg",
    version,
    about = "Train a fire segmentation model and predict masks for image folders."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on <dataset-root>/images + <dataset-root>/masks
    Train(TrainArgs),
    /// Predict masks for every image of a directory and write them as PNG
    Predict(PredictArgs),
    /// Predict on a labelled dataset and report pixel accuracy and IoU
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Defaults to $DATASET_ROOT
    #[arg(long)]
    dataset_root: Option<String>,
    /// Defaults to $ARTIFACT_DIR
    #[arg(long)]
    artifact_dir: Option<String>,
    /// Pretrained torchvision ResNet-50 weights; defaults to $WEIGHTS_PATH
    #[arg(long)]
    weights: Option<String>,
    #[arg(long, default_value_t = 30)]
    epochs: usize,
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
    #[arg(long, default_value_t = 1.0e-4)]
    lr: f64,
    /// Model input size as HEIGHT WIDTH
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    input_size: Option<Vec<usize>>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Directory of images to segment
    #[arg(long)]
    images: PathBuf,
    /// Defaults to $ARTIFACT_DIR
    #[arg(long)]
    artifact_dir: Option<String>,
    /// Defaults to $OUTPUT_DIR
    #[arg(long)]
    output_dir: Option<String>,
    /// Resize every mask to HEIGHT WIDTH. Without it masks take the
    /// original image size when all images share one.
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    resize: Option<Vec<usize>>,
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Dataset root with images/ and masks/; defaults to $DATASET_ROOT
    #[arg(long)]
    dataset_root: Option<String>,
    /// Defaults to $ARTIFACT_DIR
    #[arg(long)]
    artifact_dir: Option<String>,
    #[arg(long, default_value_t = 8)]
    batch_size: usize,
}

fn pair(values: Option<Vec<usize>>) -> Option<[usize; 2]> {
    values.and_then(|v| <[usize; 2]>::try_from(v).ok())
}

/// Input shape from the saved training config, class count from the model
/// config the checkpoint was built with.
fn saved_dataset_options(artifact_dir: &Path, num_classes: usize) -> Result<DatasetOptions> {
    let config = TrainingConfig::load_saved(artifact_dir)
        .wrap_err("Predicting needs the training config saved with the checkpoint")?;
    Ok(DatasetOptions {
        input_shape: config.input_shape,
        num_classes,
    })
}

fn run_train(paths: AppPaths, args: TrainArgs) -> Result<()> {
    let paths = AppPaths {
        weights_path: args.weights.or(paths.weights_path),
        dataset_root: args.dataset_root.unwrap_or(paths.dataset_root),
        artifact_dir: args.artifact_dir.unwrap_or(paths.artifact_dir),
        ..paths
    };
    let config = TrainingConfig::default()
        .with_num_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_learning_rate(args.lr)
        .with_input_shape(pair(args.input_size).unwrap_or([HEIGHT, WIDTH]));

    let device = Default::default();
    let best = train::<AutodiffBackend>(&paths, &config, device).wrap_err("Training failed")?;
    println!(
        "Training complete. Best val mIoU {:.4}, pixel accuracy {:.2}%.",
        best.mean_iou, best.pixel_accuracy
    );
    Ok(())
}

fn prediction_loader(
    dataset: SegmentationDataset,
    batch_size: usize,
) -> Arc<dyn DataLoader<Backend, SegmentationBatch<Backend>>> {
    // Single worker, no shuffling: masks come back in file-name order.
    DataLoaderBuilder::new(SegmentationBatcher::eval())
        .batch_size(batch_size)
        .build(dataset)
}

fn run_predict(paths: AppPaths, args: PredictArgs) -> Result<()> {
    let artifact_dir = args.artifact_dir.unwrap_or(paths.artifact_dir);
    let output_dir = args.output_dir.unwrap_or(paths.output_dir);
    let artifact_path = Path::new(&artifact_dir);

    let device = Default::default();
    let (model, model_config) = load_trained_model::<Backend>(artifact_path, &device)?;
    let options = saved_dataset_options(artifact_path, model_config.num_classes)?;

    let dataset = SegmentationDataset::from_dirs(&args.images, None, options)?;
    let names: Vec<String> = dataset
        .paths()
        .map(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    let resize_shape = pair(args.resize).or_else(|| dataset.common_original_size());

    let masks = predict(
        &model,
        &prediction_loader(dataset, args.batch_size),
        &device,
        resize_shape,
    )?;
    let written = save_masks_png(
        &masks,
        options.num_classes,
        Path::new(&output_dir),
        Some(&names),
    )?;
    println!("Wrote {} masks to {}", written.len(), output_dir);
    Ok(())
}

fn run_evaluate(paths: AppPaths, args: EvaluateArgs) -> Result<()> {
    let artifact_dir = args.artifact_dir.unwrap_or(paths.artifact_dir);
    let dataset_root = PathBuf::from(args.dataset_root.unwrap_or(paths.dataset_root));
    let artifact_path = Path::new(&artifact_dir);

    let device = Default::default();
    let (model, model_config) = load_trained_model::<Backend>(artifact_path, &device)?;
    let options = saved_dataset_options(artifact_path, model_config.num_classes)?;
    let num_classes = options.num_classes;
    let dataset = SegmentationDataset::from_dirs(
        &dataset_root.join("images"),
        Some(&dataset_root.join("masks")),
        options,
    )?;

    let masks = predict(
        &model,
        &prediction_loader(dataset.clone(), args.batch_size),
        &device,
        None,
    )?;
    let confusion = evaluate_predictions(&masks, &dataset, num_classes)?;

    println!("Pixel accuracy: {:.2}%", confusion.pixel_accuracy());
    for (class, iou) in confusion.per_class_iou().iter().enumerate() {
        let name = if num_classes == CLASSES.len() {
            CLASSES[class].to_string()
        } else {
            format!("class {class}")
        };
        match iou {
            Some(iou) => println!("IoU {name}: {iou:.4}"),
            None => println!("IoU {name}: n/a"),
        }
    }
    println!("Mean IoU: {:.4}", confusion.mean_iou());
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fire_seg=info")),
        )
        .init();

    let paths = AppPaths::from_env();
    match Cli::parse().command {
        Commands::Train(args) => run_train(paths, args),
        Commands::Predict(args) => run_predict(paths, args),
        Commands::Evaluate(args) => run_evaluate(paths, args),
    }
}
