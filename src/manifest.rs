//! Image/label matching, class-id discovery and the `data.yaml` manifest.
//!
//! Scanning only reads: nothing under the dataset root is created or modified
//! until the splitter materializes the subsets.

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DatasetLayout;
use crate::error::{PipelineError, PipelineResult, Warning};
use crate::types::{
    ClassRegistry, LabeledSample, ScanStats, Subset, IMG_FORMATS, LABEL_EXTENSION,
    MIN_RECOMMENDED_SAMPLES,
};
use crate::utils::{file_stem_string, list_files_with_extension};

/// Everything the scan found: usable samples, the classes they use, and counts.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub samples: Vec<LabeledSample>,
    pub registry: ClassRegistry,
    pub stats: ScanStats,
    pub warnings: Vec<Warning>,
}

/// Match images to labels by stem and discover the class ids in use.
///
/// Only samples with a label file are returned, ordered by stem. Images
/// without a label are counted, not rejected. Class ids are collected from
/// every label file, including ones with no image.
pub fn scan_dataset(layout: &DatasetLayout, strict_labels: bool) -> PipelineResult<ScanResult> {
    let images_dir = layout.images_dir();
    let labels_dir = layout.labels_dir();

    if !images_dir.is_dir() {
        return Err(PipelineError::DatasetEmpty {
            what: "images",
            path: images_dir,
        });
    }

    let mut image_files = Vec::new();
    for ext in IMG_FORMATS {
        image_files.extend(list_files_with_extension(&images_dir, ext)?);
    }
    image_files.sort();
    if image_files.is_empty() {
        return Err(PipelineError::DatasetEmpty {
            what: "images",
            path: images_dir,
        });
    }

    if !labels_dir.is_dir() {
        return Err(PipelineError::DatasetUnlabeled {
            reason: "label directory is missing",
            path: labels_dir,
        });
    }

    let label_files = list_files_with_extension(&labels_dir, LABEL_EXTENSION)?;
    if label_files.is_empty() {
        return Err(PipelineError::DatasetEmpty {
            what: "labels",
            path: labels_dir,
        });
    }

    let labels_by_stem: BTreeMap<String, PathBuf> = label_files
        .iter()
        .filter_map(|path| file_stem_string(path).map(|stem| (stem, path.clone())))
        .collect();

    let mut stats = ScanStats {
        images_found: image_files.len(),
        labels_found: label_files.len(),
        ..ScanStats::default()
    };

    // Every label file contributes class ids, with or without a matching image.
    let mut parsed_by_stem = BTreeMap::new();
    for (stem, label) in &labels_by_stem {
        let parsed = read_class_ids(label, strict_labels)?;
        if parsed.malformed_lines > 0 {
            stats.malformed_lines += parsed.malformed_lines;
            stats.files_with_malformed_lines += 1;
        }
        parsed_by_stem.insert(stem.as_str(), parsed);
    }
    let registry: ClassRegistry = parsed_by_stem
        .values()
        .flat_map(|parsed| parsed.class_ids.iter().copied())
        .collect();

    let mut image_stems = HashSet::new();
    let mut samples = Vec::new();
    for image in image_files {
        let Some(stem) = file_stem_string(&image) else {
            warn!("Skipping image with a non UTF-8 name: {:?}", image);
            stats.unlabeled_images += 1;
            continue;
        };
        if !image_stems.insert(stem.clone()) {
            debug!("Duplicate stem {:?}, ignoring {:?}", stem, image);
            stats.duplicate_stems += 1;
            continue;
        }

        match labels_by_stem.get(&stem) {
            Some(label) => {
                let class_ids = parsed_by_stem
                    .get(stem.as_str())
                    .map(|parsed| parsed.class_ids.clone())
                    .unwrap_or_default();
                samples.push(LabeledSample {
                    stem,
                    image,
                    label: Some(label.clone()),
                    class_ids,
                });
            }
            None => stats.unlabeled_images += 1,
        }
    }

    stats.labeled_images = samples.len();
    stats.orphan_labels = labels_by_stem
        .keys()
        .filter(|stem| !image_stems.contains(*stem))
        .count();
    stats.print_summary();

    if samples.is_empty() {
        return Err(PipelineError::DatasetUnlabeled {
            reason: "no image has a matching label file",
            path: labels_dir,
        });
    }

    samples.sort_by(|a, b| a.stem.cmp(&b.stem));
    info!(
        "Found class IDs: {:?}",
        registry.ids().collect::<Vec<_>>()
    );

    let mut warnings = Vec::new();
    if samples.len() < MIN_RECOMMENDED_SAMPLES {
        warnings.push(Warning::LowSampleCount {
            found: samples.len(),
            minimum: MIN_RECOMMENDED_SAMPLES,
        });
    }
    if stats.malformed_lines > 0 {
        warnings.push(Warning::MalformedLabelLines {
            lines: stats.malformed_lines,
            files: stats.files_with_malformed_lines,
        });
    }
    for warning in &warnings {
        warn!("{}", warning);
    }

    Ok(ScanResult {
        samples,
        registry,
        stats,
        warnings,
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedLabel {
    pub class_ids: BTreeSet<u32>,
    pub malformed_lines: usize,
}

/// Collect the leading class id of every line in a YOLO label file.
pub fn read_class_ids(path: &Path, strict: bool) -> PipelineResult<ParsedLabel> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    parse_class_ids(path, &content, strict)
}

/// Blank lines carry no box and are skipped. A line whose first token is not a
/// class id is counted as malformed, or rejected when `strict` is set.
pub fn parse_class_ids(path: &Path, content: &str, strict: bool) -> PipelineResult<ParsedLabel> {
    let mut parsed = ParsedLabel::default();
    for (index, line) in content.lines().enumerate() {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        match token.parse::<u32>() {
            Ok(id) => {
                parsed.class_ids.insert(id);
            }
            Err(_) if strict => {
                return Err(PipelineError::MalformedLabel {
                    path: path.to_path_buf(),
                    line: index + 1,
                    content: line.trim().to_string(),
                });
            }
            Err(_) => {
                debug!(
                    "{}:{}: no class id in {:?}",
                    path.display(),
                    index + 1,
                    line.trim()
                );
                parsed.malformed_lines += 1;
            }
        }
    }
    Ok(parsed)
}

/// The dataset configuration consumed by the trainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: PathBuf,
    pub train: String,
    pub val: String,
    pub test: String,
    #[serde(default)]
    pub nc: usize,
    #[serde(deserialize_with = "deserialize_names")]
    pub names: ClassRegistry,
}

impl DatasetManifest {
    /// Manifest for a split rooted at `root`, which should be absolute so the
    /// trainer can run from any directory.
    pub fn new(layout: &DatasetLayout, root: PathBuf, names: ClassRegistry) -> Self {
        Self {
            path: root,
            train: layout.relative_images_dir(Subset::Train),
            val: layout.relative_images_dir(Subset::Valid),
            test: layout.relative_images_dir(Subset::Test),
            nc: names.len(),
            names,
        }
    }

    /// Render the manifest as commented YAML. Output depends only on the fields,
    /// so an unchanged dataset renders byte-identical text.
    pub fn render(&self) -> PipelineResult<String> {
        let mut yaml = String::from("# Dataset configuration for YOLOv8\n");
        yaml.push_str(&format!(
            "path: {}\n",
            yaml_scalar(&self.path.to_string_lossy())?
        ));
        yaml.push_str(&format!("train: {}\n", yaml_scalar(&self.train)?));
        yaml.push_str(&format!("val: {}\n", yaml_scalar(&self.val)?));
        yaml.push_str(&format!("test: {}\n", yaml_scalar(&self.test)?));
        yaml.push_str("\n# Number of classes\n");
        yaml.push_str(&format!("nc: {}\n", self.nc));
        yaml.push_str("\n# Class names (replace the class_<id> placeholders before training)\n");
        yaml.push_str("names:\n");
        for (id, name) in self.names.iter() {
            yaml.push_str(&format!("  {}: {}", id, yaml_scalar(name)?));
            if self.names.is_placeholder(id) {
                yaml.push_str("  # TODO: replace with the real label name");
            }
            yaml.push('\n');
        }
        Ok(yaml)
    }

    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        let yaml = self.render()?;
        fs::write(path, yaml).map_err(|e| PipelineError::io(path, e))
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.is_file() {
            return Err(PipelineError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_yaml::from_str(&content).map_err(|source| PipelineError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

// Quote a scalar only when YAML needs it
fn yaml_scalar(value: &str) -> PipelineResult<String> {
    let rendered = serde_yaml::to_string(value).map_err(|source| PipelineError::Yaml {
        path: PathBuf::from(value),
        source,
    })?;
    Ok(rendered.trim_end().to_string())
}

// Hand-edited manifests may list names as a sequence instead of an id map
fn deserialize_names<'de, D>(deserializer: D) -> Result<ClassRegistry, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        Map(BTreeMap<u32, String>),
        List(Vec<String>),
    }

    let map = match Names::deserialize(deserializer)? {
        Names::Map(map) => map,
        Names::List(list) => list
            .into_iter()
            .enumerate()
            .map(|(id, name)| (id as u32, name))
            .collect(),
    };
    Ok(ClassRegistry::from_names(map))
}
