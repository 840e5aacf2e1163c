/// Filesystem locations, read from the environment with local defaults.
#[derive(Clone, Debug)]
pub struct AppPaths {
    /// Pretrained torchvision ResNet-50 `.pth`; unset trains from scratch.
    pub weights_path: Option<String>,
    pub dataset_root: String,
    pub artifact_dir: String,
    pub output_dir: String,
}

impl AppPaths {
    pub fn from_env() -> Self {
        Self {
            weights_path: std::env::var("WEIGHTS_PATH").ok(),
            dataset_root: std::env::var("DATASET_ROOT").unwrap_or_else(|_| "data/fire".into()),
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .unwrap_or_else(|_| "/tmp/fire_seg_artifacts".into()),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "predictions".into()),
        }
    }
}
