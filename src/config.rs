use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::types::Subset;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_JOB_NAME: &str = "screen-detector";
pub const DEFAULT_PUBLISH_PATH: &str = "public/models/screen-detector.onnx";

/// Prepare a labeled image dataset, train a YOLO detector on it and publish an ONNX export.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Dataset root holding images/ and labels/
    #[arg(long = "dataset_root", default_value = "dataset", global = true)]
    pub dataset_root: PathBuf,

    /// Seed for the train/valid/test shuffle
    #[arg(long = "seed", default_value_t = DEFAULT_SEED, global = true)]
    pub seed: u64,

    /// Directory the yolo command runs in; training output lands in runs/detect/ below it
    #[arg(long = "work_dir", default_value = ".", global = true)]
    pub work_dir: PathBuf,

    /// The yolo executable
    #[arg(long = "yolo_bin", default_value = "yolo", global = true)]
    pub yolo_bin: String,

    /// Write the run report as JSON to this file
    #[arg(long = "report", global = true)]
    pub report: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Match images to labels, split 70/20/10 and write data.yaml
    Prepare(PrepareArgs),
    /// Train on an already prepared dataset
    Train(TrainArgs),
    /// Convert a trained model and publish it
    Export(ExportArgs),
    /// Prepare, train and export in one go
    Run(RunArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct PrepareArgs {
    /// Delete existing train/valid/test directories before copying
    #[arg(long = "clean")]
    pub clean: bool,

    /// Keep class names already filled in an existing data.yaml
    #[arg(long = "keep_names")]
    pub keep_names: bool,

    /// Fail on label lines whose first token is not a class id
    #[arg(long = "strict_labels")]
    pub strict_labels: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TrainArgs {
    /// Training run name; weights land in runs/detect/<name>/weights/
    #[arg(long = "job_name", default_value = DEFAULT_JOB_NAME)]
    pub job_name: String,

    /// Pretrained weights to start from
    #[arg(long = "base_model", default_value = "yolov8n.pt")]
    pub base_model: String,

    #[arg(long = "epochs", default_value_t = 100)]
    pub epochs: u32,

    /// Training image size
    #[arg(long = "imgsz", default_value_t = 640)]
    pub imgsz: u32,

    #[arg(long = "batch", default_value_t = 16)]
    pub batch: u32,

    /// Epochs without improvement before early stopping
    #[arg(long = "patience", default_value_t = 20)]
    pub patience: u32,

    /// Dataloader workers
    #[arg(long = "workers", default_value_t = 4)]
    pub workers: u32,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExportArgs {
    /// Trained weights to convert; defaults to runs/detect/<job_name>/weights/best.pt
    #[arg(long = "artifact")]
    pub artifact: Option<PathBuf>,

    /// Publish destination for the converted model
    #[arg(long = "output", default_value = DEFAULT_PUBLISH_PATH)]
    pub output: PathBuf,

    /// Export image size
    #[arg(long = "export_imgsz", default_value_t = 640)]
    pub export_imgsz: u32,

    /// ONNX opset version
    #[arg(long = "opset", default_value_t = 12, value_parser = validate_opset)]
    pub opset: u32,

    /// Skip ONNX graph simplification
    #[arg(long = "no_simplify")]
    pub no_simplify: bool,

    /// Export with dynamic input shapes
    #[arg(long = "dynamic")]
    pub dynamic: bool,

    /// Move the converted file instead of copying it
    #[arg(long = "move")]
    pub move_artifact: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub prepare: PrepareArgs,
    #[command(flatten)]
    pub train: TrainArgs,
    #[command(flatten)]
    pub export: ExportArgs,
}

// Validate that the opset is one the exporter can target
fn validate_opset(s: &str) -> Result<u32, String> {
    match u32::from_str(s) {
        Ok(val) if (7..=21).contains(&val) => Ok(val),
        _ => Err("OPSET must be between 7 and 21".to_string()),
    }
}

/// Where the dataset lives and how the split is laid out under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub root: PathBuf,
    pub images_dir_name: String,
    pub labels_dir_name: String,
    pub manifest_name: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self::new("dataset")
    }
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            images_dir_name: "images".to_string(),
            labels_dir_name: "labels".to_string(),
            manifest_name: "data.yaml".to_string(),
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(&self.images_dir_name)
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.root.join(&self.labels_dir_name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_name)
    }

    pub fn subset_images_dir(&self, subset: Subset) -> PathBuf {
        self.root.join(subset.dir_name()).join(&self.images_dir_name)
    }

    pub fn subset_labels_dir(&self, subset: Subset) -> PathBuf {
        self.root.join(subset.dir_name()).join(&self.labels_dir_name)
    }

    /// Image directory of a subset relative to the root, as written into the manifest.
    pub fn relative_images_dir(&self, subset: Subset) -> String {
        format!("{}/{}", subset.dir_name(), self.images_dir_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    pub seed: u64,
    pub clean: bool,
    pub keep_names: bool,
    pub strict_labels: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            clean: false,
            keep_names: false,
            strict_labels: false,
        }
    }
}

/// Hyperparameters passed through to the training collaborator untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainParams {
    pub job_name: String,
    pub base_model: String,
    pub epochs: u32,
    pub imgsz: u32,
    pub batch: u32,
    pub patience: u32,
    pub workers: u32,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            base_model: "yolov8n.pt".to_string(),
            epochs: 100,
            imgsz: 640,
            batch: 16,
            patience: 20,
            workers: 4,
        }
    }
}

/// Target parameters for the ONNX conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportParams {
    pub imgsz: u32,
    pub simplify: bool,
    pub opset: u32,
    pub dynamic: bool,
}

impl ExportParams {
    pub const FORMAT: &'static str = "onnx";

    /// Where the exporter writes its output: the input with its extension swapped.
    pub fn output_path_for(&self, artifact: &Path) -> PathBuf {
        artifact.with_extension(Self::FORMAT)
    }
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            imgsz: 640,
            simplify: true,
            opset: 12,
            dynamic: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Relocation {
    #[default]
    Copy,
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Overrides the artifact reported by training.
    pub artifact: Option<PathBuf>,
    pub destination: PathBuf,
    pub relocation: Relocation,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            artifact: None,
            destination: PathBuf::from(DEFAULT_PUBLISH_PATH),
            relocation: Relocation::Copy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitOptions {
    pub program: String,
    pub work_dir: PathBuf,
}

impl Default for ToolkitOptions {
    fn default() -> Self {
        Self {
            program: "yolo".to_string(),
            work_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub layout: DatasetLayout,
    pub split: SplitOptions,
    pub train: TrainParams,
    pub export: ExportParams,
    pub publish: PublishOptions,
    pub toolkit: ToolkitOptions,
}

impl PipelineConfig {
    /// Where training leaves its best weights for the configured job.
    pub fn trained_artifact_path(&self) -> PathBuf {
        self.toolkit
            .work_dir
            .join("runs/detect")
            .join(&self.train.job_name)
            .join("weights/best.pt")
    }
}

impl From<&TrainArgs> for TrainParams {
    fn from(args: &TrainArgs) -> Self {
        Self {
            job_name: args.job_name.clone(),
            base_model: args.base_model.clone(),
            epochs: args.epochs,
            imgsz: args.imgsz,
            batch: args.batch,
            patience: args.patience,
            workers: args.workers,
        }
    }
}

impl Args {
    /// Resolve the command line into a pipeline configuration. Options a subcommand
    /// does not expose keep their defaults.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            layout: DatasetLayout::new(&self.dataset_root),
            split: SplitOptions {
                seed: self.seed,
                ..SplitOptions::default()
            },
            toolkit: ToolkitOptions {
                program: self.yolo_bin.clone(),
                work_dir: self.work_dir.clone(),
            },
            ..PipelineConfig::default()
        };

        let (prepare, train, export) = match &self.command {
            Command::Prepare(prepare) => (Some(prepare), None, None),
            Command::Train(train) => (None, Some(train), None),
            Command::Export(export) => (None, None, Some(export)),
            Command::Run(run) => (Some(&run.prepare), Some(&run.train), Some(&run.export)),
        };

        if let Some(prepare) = prepare {
            config.split.clean = prepare.clean;
            config.split.keep_names = prepare.keep_names;
            config.split.strict_labels = prepare.strict_labels;
        }
        if let Some(train) = train {
            config.train = TrainParams::from(train);
        }
        if let Some(export) = export {
            config.export = ExportParams {
                imgsz: export.export_imgsz,
                simplify: !export.no_simplify,
                opset: export.opset,
                dynamic: export.dynamic,
            };
            config.publish = PublishOptions {
                artifact: export.artifact.clone(),
                destination: export.output.clone(),
                relocation: if export.move_artifact {
                    Relocation::Move
                } else {
                    Relocation::Copy
                },
            };
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_opset() {
        assert!(validate_opset("12").is_ok());
        assert!(validate_opset("7").is_ok());
        assert!(validate_opset("6").is_err());
        assert!(validate_opset("abc").is_err());
    }

    #[test]
    fn test_run_args_resolve_into_config() {
        let args = Args::parse_from([
            "yolo-forge",
            "--dataset_root",
            "data",
            "--seed",
            "7",
            "run",
            "--clean",
            "--epochs",
            "5",
            "--no_simplify",
            "--move",
        ]);
        let config = args.to_pipeline_config();

        assert_eq!(config.layout.root, PathBuf::from("data"));
        assert_eq!(config.split.seed, 7);
        assert!(config.split.clean);
        assert_eq!(config.train.epochs, 5);
        assert!(!config.export.simplify);
        assert_eq!(config.export.opset, 12);
        assert_eq!(config.publish.relocation, Relocation::Move);
    }

    #[test]
    fn test_prepare_keeps_default_seed() {
        let args = Args::parse_from(["yolo-forge", "prepare"]);
        let config = args.to_pipeline_config();

        assert_eq!(config.split.seed, DEFAULT_SEED);
        assert_eq!(config.layout.manifest_path(), PathBuf::from("dataset/data.yaml"));
        assert_eq!(
            config.trained_artifact_path(),
            PathBuf::from("./runs/detect/screen-detector/weights/best.pt")
        );
    }

    #[test]
    fn test_malformed_label_hint_names_accepted_flag() {
        let err = crate::error::PipelineError::MalformedLabel {
            path: PathBuf::from("labels/a.txt"),
            line: 1,
            content: "chrome".to_string(),
        };
        assert!(err.hint().contains("--strict_labels"));

        let args = Args::try_parse_from(["yolo-forge", "prepare", "--strict_labels"]).unwrap();
        assert!(args.to_pipeline_config().split.strict_labels);
    }
}
