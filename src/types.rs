use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Stage, Warning};

// Image extensions picked up from the images directory
pub const IMG_FORMATS: &[&str] = &["jpg", "png"];

// Extension of label files, one per image stem
pub const LABEL_EXTENSION: &str = "txt";

// Fewer labeled images than this still trains, but poorly
pub const MIN_RECOMMENDED_SAMPLES: usize = 10;

/// An image matched to its label file by stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSample {
    pub stem: String,
    pub image: PathBuf,
    pub label: Option<PathBuf>,
    pub class_ids: BTreeSet<u32>,
}

impl LabeledSample {
    /// A sample without a label file cannot be trained on.
    pub fn is_usable(&self) -> bool {
        self.label.is_some()
    }

    /// File name the image keeps inside a subset directory.
    pub fn image_file_name(&self) -> &std::ffi::OsStr {
        self.image
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(&self.stem))
    }
}

/// Class id to display name. Ids discovered in labels start out as `class_<id>`
/// and are renamed by hand in the manifest before training.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassRegistry(BTreeMap<u32, String>);

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names(names: BTreeMap<u32, String>) -> Self {
        Self(names)
    }

    pub fn placeholder_name(id: u32) -> String {
        format!("class_{}", id)
    }

    /// Register an id with its placeholder name; existing entries are left alone.
    pub fn insert_discovered(&mut self, id: u32) {
        self.0
            .entry(id)
            .or_insert_with(|| Self::placeholder_name(id));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.0.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn is_placeholder(&self, id: u32) -> bool {
        self.name(id)
            .is_some_and(|name| name == Self::placeholder_name(id))
    }

    /// Ids whose name nobody has filled in yet.
    pub fn unresolved(&self) -> Vec<u32> {
        self.ids().filter(|id| self.is_placeholder(*id)).collect()
    }

    /// Copy names from `previous` for ids still present here. Ids that disappeared
    /// from the dataset are not resurrected.
    pub fn carry_names_from(&mut self, previous: &ClassRegistry) {
        for (id, name) in self.0.iter_mut() {
            if let Some(old) = previous.name(*id) {
                *name = old.to_string();
            }
        }
    }
}

impl FromIterator<u32> for ClassRegistry {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut registry = ClassRegistry::new();
        for id in iter {
            registry.insert_discovered(id);
        }
        registry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    Train,
    Valid,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Valid, Subset::Test];

    pub fn dir_name(self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Valid => "valid",
            Subset::Test => "test",
        }
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

// Struct to hold the split samples for training, validation, and testing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<LabeledSample>,
    pub valid: Vec<LabeledSample>,
    pub test: Vec<LabeledSample>,
}

impl DatasetSplit {
    pub fn subset(&self, subset: Subset) -> &[LabeledSample] {
        match subset {
            Subset::Train => &self.train,
            Subset::Valid => &self.valid,
            Subset::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sizes(&self) -> SplitSizes {
        SplitSizes {
            train: self.train.len(),
            valid: self.valid.len(),
            test: self.test.len(),
        }
    }

    /// Stems per subset, in split order.
    pub fn membership(&self, subset: Subset) -> Vec<&str> {
        self.subset(subset)
            .iter()
            .map(|sample| sample.stem.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitSizes {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

// Counts gathered while matching images to labels
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub images_found: usize,
    pub labels_found: usize,
    pub labeled_images: usize,
    pub unlabeled_images: usize,
    pub orphan_labels: usize,
    pub duplicate_stems: usize,
    pub malformed_lines: usize,
    pub files_with_malformed_lines: usize,
}

impl ScanStats {
    pub fn print_summary(&self) {
        log::info!("Found {} images", self.images_found);
        log::info!("Found {} labels", self.labels_found);
        log::info!("{} images have labels", self.labeled_images);
        if self.unlabeled_images > 0 {
            log::info!(
                "Skipped {} images without a label file",
                self.unlabeled_images
            );
        }
        if self.orphan_labels > 0 {
            log::warn!(
                "{} label files have no matching image; their class ids are still registered",
                self.orphan_labels
            );
        }
        if self.duplicate_stems > 0 {
            log::warn!(
                "{} images share a stem with another image and were ignored",
                self.duplicate_stems
            );
        }
    }
}

/// A converted model at its publish location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl ExportedArtifact {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrainingMetrics {
    pub map50: f64,
    pub map50_95: f64,
}

/// What the training collaborator hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainOutcome {
    pub artifact: PathBuf,
    pub metrics: Option<TrainingMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub stats: ScanStats,
    pub split: SplitSizes,
    pub class_ids: Vec<u32>,
    pub manifest_path: PathBuf,
    pub warnings: Vec<Warning>,
}

/// Everything a pipeline run produced, stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub completed: Vec<Stage>,
    pub prepare: Option<PrepareReport>,
    pub train: Option<TrainOutcome>,
    pub export: Option<ExportedArtifact>,
    pub warnings: Vec<Warning>,
    pub failure: Option<FailureSummary>,
}

/// The fatal error that ended a run, in report form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
    pub hint: String,
}

impl PipelineReport {
    pub fn has_warning(&self, kind: &str) -> bool {
        self.warnings.iter().any(|w| w.kind() == kind)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> crate::error::PipelineResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| crate::error::PipelineError::io(path, e))
    }
}
