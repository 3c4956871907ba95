//! YOLO dataset preparation and model publishing
//!
//! This library splits a labeled image dataset into train/valid/test subsets,
//! writes the `data.yaml` manifest a YOLO trainer consumes, and drives an
//! external toolkit to train the detector and publish an ONNX export.

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod manifest;
pub mod pipeline;
pub mod toolkit;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, DatasetLayout, ExportParams, PipelineConfig, SplitOptions, TrainParams};
pub use dataset::{prepare_dataset, split_counts, split_samples};
pub use error::{PipelineError, PipelineFailure, PipelineResult, Stage, Warning};
pub use export::export_model;
pub use manifest::{scan_dataset, DatasetManifest};
pub use pipeline::Pipeline;
pub use toolkit::{ModelToolkit, TrainRequest, UltralyticsCli};
pub use types::{
    ClassRegistry, DatasetSplit, ExportedArtifact, FailureSummary, LabeledSample, PipelineReport,
    Subset, TrainOutcome, TrainingMetrics,
};
