//! The training and export collaborator.
//!
//! The pipeline never trains or converts anything itself; it hands requests to
//! a [`ModelToolkit`]. [`UltralyticsCli`] drives the `yolo` command line.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{ExportParams, ToolkitOptions, TrainParams};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{TrainOutcome, TrainingMetrics};

/// A training request: the manifest to train on and the pass-through hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainRequest {
    pub manifest: PathBuf,
    pub params: TrainParams,
}

pub trait ModelToolkit {
    /// Train on the dataset described by the manifest and return the best weights.
    fn train(&self, request: &TrainRequest) -> PipelineResult<TrainOutcome>;

    /// Convert trained weights to the portable format. Returns where the
    /// converted file was written.
    fn convert(&self, artifact: &Path, params: &ExportParams) -> PipelineResult<PathBuf>;
}

const PROJECT_DIR: &str = "runs/detect";

// Per-epoch metrics table the trainer writes into the job directory
const RESULTS_FILE: &str = "results.csv";
const MAP50_COLUMN: &str = "metrics/mAP50(B)";
const MAP50_95_COLUMN: &str = "metrics/mAP50-95(B)";

/// Read the final-epoch mAP values from a trainer `results.csv`.
///
/// A missing file, missing columns or an empty table give `Ok(None)`; the
/// trainer is free to skip validation.
pub fn read_training_metrics(path: &Path) -> PipelineResult<Option<TrainingMetrics>> {
    if !path.is_file() {
        debug!("No training results at {}", path.display());
        return Ok(None);
    }
    let csv_err = |source: csv::Error| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    // Older trainers pad the header names with spaces
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let column = |name: &str| headers.iter().position(|header| header == name);
    let (Some(map50_at), Some(map50_95_at)) = (column(MAP50_COLUMN), column(MAP50_95_COLUMN))
    else {
        debug!("{} has no mAP columns", path.display());
        return Ok(None);
    };

    let mut last = None;
    for record in reader.records() {
        last = Some(record.map_err(csv_err)?);
    }
    let Some(record) = last else {
        return Ok(None);
    };

    let value = |index: usize| record.get(index).and_then(|v| v.parse::<f64>().ok());
    Ok(match (value(map50_at), value(map50_95_at)) {
        (Some(map50), Some(map50_95)) => Some(TrainingMetrics { map50, map50_95 }),
        _ => None,
    })
}

/// Runs the Ultralytics `yolo` executable as a child process.
#[derive(Debug, Clone)]
pub struct UltralyticsCli {
    options: ToolkitOptions,
}

impl UltralyticsCli {
    pub fn new(options: ToolkitOptions) -> Self {
        Self { options }
    }

    // The child runs inside work_dir and gets PROJECT_DIR relative to it; this is
    // the same directory seen from the caller.
    fn project_dir(&self) -> PathBuf {
        self.options.work_dir.join(PROJECT_DIR)
    }

    /// Arguments for `yolo detect train`
    pub fn train_args(&self, request: &TrainRequest) -> Vec<String> {
        let params = &request.params;
        vec![
            "detect".to_string(),
            "train".to_string(),
            format!("data={}", request.manifest.display()),
            format!("model={}", params.base_model),
            format!("epochs={}", params.epochs),
            format!("imgsz={}", params.imgsz),
            format!("batch={}", params.batch),
            format!("patience={}", params.patience),
            format!("workers={}", params.workers),
            format!("name={}", params.job_name),
            format!("project={}", PROJECT_DIR),
            "exist_ok=True".to_string(),
            "save=True".to_string(),
            "plots=True".to_string(),
        ]
    }

    /// Arguments for `yolo export`
    pub fn export_args(&self, artifact: &Path, params: &ExportParams) -> Vec<String> {
        vec![
            "export".to_string(),
            format!("model={}", artifact.display()),
            format!("format={}", ExportParams::FORMAT),
            format!("imgsz={}", params.imgsz),
            format!("simplify={}", python_bool(params.simplify)),
            format!("opset={}", params.opset),
            format!("dynamic={}", python_bool(params.dynamic)),
        ]
    }

    fn run(&self, operation: &'static str, args: &[String]) -> PipelineResult<()> {
        debug!("Running {} {}", self.options.program, args.join(" "));
        let status = Command::new(&self.options.program)
            .args(args)
            .current_dir(&self.options.work_dir)
            .status()
            .map_err(|e| PipelineError::io(&self.options.program, e))?;
        if !status.success() {
            return Err(PipelineError::Collaborator {
                program: self.options.program.clone(),
                operation,
                status,
            });
        }
        Ok(())
    }
}

impl ModelToolkit for UltralyticsCli {
    fn train(&self, request: &TrainRequest) -> PipelineResult<TrainOutcome> {
        info!(
            "Training {} on {} for {} epochs...",
            request.params.base_model,
            request.manifest.display(),
            request.params.epochs
        );
        self.run("train", &self.train_args(request))?;

        let job_dir = self.project_dir().join(&request.params.job_name);
        // Weights are what matter; unreadable metrics only cost the summary.
        let metrics = read_training_metrics(&job_dir.join(RESULTS_FILE)).unwrap_or_else(|e| {
            warn!("{}", e);
            None
        });
        Ok(TrainOutcome {
            artifact: job_dir.join("weights/best.pt"),
            metrics,
        })
    }

    fn convert(&self, artifact: &Path, params: &ExportParams) -> PipelineResult<PathBuf> {
        info!(
            "Converting {} to {} (imgsz {}, opset {})...",
            artifact.display(),
            ExportParams::FORMAT,
            params.imgsz,
            params.opset
        );
        self.run("export", &self.export_args(artifact, params))?;
        Ok(params.output_path_for(artifact))
    }
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_args() {
        let cli = UltralyticsCli::new(ToolkitOptions::default());
        let args = cli.export_args(
            Path::new("runs/detect/screen-detector/weights/best.pt"),
            &ExportParams::default(),
        );

        assert_eq!(
            args,
            vec![
                "export",
                "model=runs/detect/screen-detector/weights/best.pt",
                "format=onnx",
                "imgsz=640",
                "simplify=True",
                "opset=12",
                "dynamic=False",
            ]
        );
    }

    #[test]
    fn test_train_args_pin_project_dir() {
        let cli = UltralyticsCli::new(ToolkitOptions {
            program: "yolo".to_string(),
            work_dir: PathBuf::from("/work"),
        });
        let request = TrainRequest {
            manifest: PathBuf::from("dataset/data.yaml"),
            params: TrainParams::default(),
        };
        let args = cli.train_args(&request);

        assert!(args.contains(&"data=dataset/data.yaml".to_string()));
        assert!(args.contains(&"name=screen-detector".to_string()));
        assert!(args.contains(&"project=runs/detect".to_string()));
        assert!(args.contains(&"exist_ok=True".to_string()));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let cli = UltralyticsCli::new(ToolkitOptions {
            program: "definitely-not-a-yolo-binary".to_string(),
            work_dir: PathBuf::from("."),
        });
        let err = cli
            .convert(Path::new("best.pt"), &ExportParams::default())
            .unwrap_err();

        assert_eq!(err.kind(), "IoError");
    }

    const RESULTS: &str = "\
                  epoch,         train/box_loss,   metrics/precision(B),   metrics/mAP50(B),metrics/mAP50-95(B)
                      1,                 1.2345,                0.41234,              0.3012,            0.1804
                      2,                 1.1021,                0.55012,              0.6125,            0.4217
";

    #[test]
    fn test_read_training_metrics_takes_last_epoch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(RESULTS_FILE);
        std::fs::write(&path, RESULTS).unwrap();

        let metrics = read_training_metrics(&path).unwrap().unwrap();

        assert_eq!(metrics.map50, 0.6125);
        assert_eq!(metrics.map50_95, 0.4217);
    }

    #[test]
    fn test_read_training_metrics_tolerates_missing_data() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert_eq!(
            read_training_metrics(&temp_dir.path().join(RESULTS_FILE)).unwrap(),
            None
        );

        let headers_only = temp_dir.path().join("headers.csv");
        std::fs::write(&headers_only, "epoch,metrics/mAP50(B),metrics/mAP50-95(B)\n").unwrap();
        assert_eq!(read_training_metrics(&headers_only).unwrap(), None);

        let no_val = temp_dir.path().join("no_val.csv");
        std::fs::write(&no_val, "epoch,train/box_loss\n1,0.9\n").unwrap();
        assert_eq!(read_training_metrics(&no_val).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_train_reports_metrics_from_results_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let job_dir = temp_dir.path().join(PROJECT_DIR).join("screen-detector");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(RESULTS_FILE), RESULTS).unwrap();

        // `true` accepts any arguments and exits successfully
        let cli = UltralyticsCli::new(ToolkitOptions {
            program: "true".to_string(),
            work_dir: temp_dir.path().to_path_buf(),
        });
        let request = TrainRequest {
            manifest: PathBuf::from("dataset/data.yaml"),
            params: TrainParams::default(),
        };
        let outcome = cli.train(&request).unwrap();

        assert_eq!(outcome.artifact, job_dir.join("weights/best.pt"));
        assert_eq!(
            outcome.metrics,
            Some(TrainingMetrics {
                map50: 0.6125,
                map50_95: 0.4217
            })
        );
    }
}
