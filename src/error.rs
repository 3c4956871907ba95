use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

use crate::types::{FailureSummary, PipelineReport};

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Fatal conditions. Any of these aborts the current stage and everything after it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no {what} found in {}", path.display())]
    DatasetEmpty { what: &'static str, path: PathBuf },

    #[error("no labeled images: {reason} ({})", path.display())]
    DatasetUnlabeled { reason: &'static str, path: PathBuf },

    #[error("malformed label line {line} in {}: {content:?}", path.display())]
    MalformedLabel {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("dataset manifest not found: {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("trained model not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("conversion finished but produced no file at {}", path.display())]
    ConversionOutputMissing { path: PathBuf },

    #[error("`{program} {operation}` exited with {status}")]
    Collaborator {
        program: String,
        operation: &'static str,
        status: ExitStatus,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unreadable training results {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Attach a path to an io error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Stable name of the error kind, suitable for reports and scripting.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DatasetEmpty { .. } => "DatasetEmptyError",
            PipelineError::DatasetUnlabeled { .. } => "DatasetUnlabeledError",
            PipelineError::MalformedLabel { .. } => "MalformedLabelError",
            PipelineError::ManifestNotFound { .. } => "ManifestNotFoundError",
            PipelineError::ArtifactNotFound { .. } => "ArtifactNotFoundError",
            PipelineError::ConversionOutputMissing { .. } => "ConversionOutputMissingError",
            PipelineError::Collaborator { .. } => "CollaboratorError",
            PipelineError::Io { .. } => "IoError",
            PipelineError::Yaml { .. } => "ManifestFormatError",
            PipelineError::Csv { .. } => "TrainingResultsFormatError",
            PipelineError::Json(_) => "ReportFormatError",
        }
    }

    /// What the operator should do next.
    pub fn hint(&self) -> &'static str {
        match self {
            PipelineError::DatasetEmpty { what: "images", .. } => {
                "add your screenshots (*.png, *.jpg) to the images directory"
            }
            PipelineError::DatasetEmpty { .. } | PipelineError::DatasetUnlabeled { .. } => {
                "label your images first (one <stem>.txt per image in the labels directory)"
            }
            PipelineError::MalformedLabel { .. } => {
                "fix or remove the offending line, or rerun without --strict_labels"
            }
            PipelineError::ManifestNotFound { .. } => "prepare the dataset first",
            PipelineError::ArtifactNotFound { .. } => "train the model first",
            PipelineError::ConversionOutputMissing { .. } => {
                "check the exporter output above and rerun the export"
            }
            PipelineError::Collaborator { .. } => {
                "check that the yolo command is installed and its output above, then rerun"
            }
            PipelineError::Io { .. } => "check the path exists and is writable",
            PipelineError::Yaml { .. } => "fix the manifest syntax or regenerate it with prepare",
            PipelineError::Csv { .. } => "check the results.csv written by the trainer",
            PipelineError::Json(_) => "check the report destination",
        }
    }
}

/// Non-fatal findings, surfaced in reports without halting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    LowSampleCount { found: usize, minimum: usize },
    MalformedLabelLines { lines: usize, files: usize },
    PlaceholderClassNames { ids: Vec<u32> },
}

impl Warning {
    pub fn kind(&self) -> &'static str {
        match self {
            Warning::LowSampleCount { .. } => "LowSampleCountWarning",
            Warning::MalformedLabelLines { .. } => "MalformedLabelLinesWarning",
            Warning::PlaceholderClassNames { .. } => "PlaceholderClassNamesWarning",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::LowSampleCount { found, minimum } => write!(
                f,
                "only {} labeled images (fewer than {}); accuracy will be limited, 50+ recommended",
                found, minimum
            ),
            Warning::MalformedLabelLines { lines, files } => write!(
                f,
                "skipped {} label lines without a class id in {} files",
                lines, files
            ),
            Warning::PlaceholderClassNames { ids } => write!(
                f,
                "class names for ids {:?} are still placeholders; edit the manifest names",
                ids
            ),
        }
    }
}

/// Pipeline stage, used to locate a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Train,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "prepare",
            Stage::Train => "train",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// The first fatal error of a run, with the stage it came from and whatever
/// the stages before it had already produced.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    pub report: Box<PipelineReport>,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: PipelineError, mut report: PipelineReport) -> Self {
        report.failure = Some(FailureSummary {
            stage,
            kind: error.kind().to_string(),
            message: error.to_string(),
            hint: error.hint().to_string(),
        });
        Self {
            stage,
            error,
            report: Box::new(report),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn hint(&self) -> &'static str {
        self.error.hint()
    }
}
