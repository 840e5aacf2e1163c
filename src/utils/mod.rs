pub mod app_paths;
pub mod export;
pub mod metrics;
