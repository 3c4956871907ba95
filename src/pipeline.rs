use log::{info, warn};
use std::fs;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::dataset::prepare_dataset;
use crate::error::{PipelineError, PipelineFailure, PipelineResult, Stage, Warning};
use crate::export::export_model;
use crate::manifest::DatasetManifest;
use crate::toolkit::{ModelToolkit, TrainRequest};
use crate::types::{ExportedArtifact, PipelineReport, PrepareReport, TrainOutcome};

/// Runs prepare, train and export in order, stopping at the first failure.
pub struct Pipeline<T: ModelToolkit> {
    config: PipelineConfig,
    toolkit: T,
}

impl<T: ModelToolkit> Pipeline<T> {
    pub fn new(config: PipelineConfig, toolkit: T) -> Self {
        Self { config, toolkit }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn toolkit(&self) -> &T {
        &self.toolkit
    }

    /// Run every stage.
    pub fn run(&self) -> Result<PipelineReport, PipelineFailure> {
        self.run_stages(&[Stage::Prepare, Stage::Train, Stage::Export])
    }

    /// Run the given stages in order. Later stages pick up what earlier ones
    /// produced in the same run, or fall back to the configured locations.
    pub fn run_stages(&self, stages: &[Stage]) -> Result<PipelineReport, PipelineFailure> {
        let mut report = PipelineReport::default();
        for &stage in stages {
            info!("=== {} ===", stage);
            let result = match stage {
                Stage::Prepare => self.prepare().map(|prepared| {
                    report.warnings.extend(prepared.warnings.iter().cloned());
                    report.prepare = Some(prepared);
                }),
                Stage::Train => self.train(&mut report.warnings).map(|outcome| {
                    report.train = Some(outcome);
                }),
                Stage::Export => self
                    .export(report.train.as_ref())
                    .map(|exported| report.export = Some(exported)),
            };
            if let Err(error) = result {
                return Err(PipelineFailure::new(stage, error, report));
            }
            report.completed.push(stage);
        }
        Ok(report)
    }

    pub fn prepare(&self) -> PipelineResult<PrepareReport> {
        prepare_dataset(&self.config.layout, &self.config.split)
    }

    /// Train on the prepared manifest. Placeholder class names are reported as a
    /// warning; training still proceeds with them.
    pub fn train(&self, warnings: &mut Vec<Warning>) -> PipelineResult<TrainOutcome> {
        let manifest_path = self.config.layout.manifest_path();
        let manifest = DatasetManifest::load(&manifest_path)?;

        let unresolved = manifest.names.unresolved();
        if !unresolved.is_empty() {
            let warning = Warning::PlaceholderClassNames { ids: unresolved };
            warn!("{}", warning);
            warnings.push(warning);
        }

        let request = TrainRequest {
            manifest: fs::canonicalize(&manifest_path)
                .map_err(|e| PipelineError::io(&manifest_path, e))?,
            params: self.config.train.clone(),
        };
        let outcome = self.toolkit.train(&request)?;

        info!("Model saved to {}", outcome.artifact.display());
        if let Some(metrics) = &outcome.metrics {
            info!("mAP50: {:.3}", metrics.map50);
            info!("mAP50-95: {:.3}", metrics.map50_95);
        }
        Ok(outcome)
    }

    /// Convert and publish. The artifact is, in order of preference: the
    /// configured override, what training just produced, or the conventional
    /// weights location of the configured job.
    pub fn export(&self, trained: Option<&TrainOutcome>) -> PipelineResult<ExportedArtifact> {
        let artifact: PathBuf = self
            .config
            .publish
            .artifact
            .clone()
            .or_else(|| trained.map(|outcome| outcome.artifact.clone()))
            .unwrap_or_else(|| self.config.trained_artifact_path());

        export_model(
            &self.toolkit,
            &artifact,
            &self.config.publish.destination,
            &self.config.export,
            self.config.publish.relocation,
        )
    }
}
