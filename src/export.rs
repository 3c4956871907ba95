use log::{debug, info};
use std::fs;
use std::io;
use std::path::Path;

use crate::config::{ExportParams, Relocation};
use crate::error::{PipelineError, PipelineResult};
use crate::toolkit::ModelToolkit;
use crate::types::ExportedArtifact;
use crate::utils::{copy_file, ensure_directory};

/// Convert trained weights and publish the result at `destination`.
///
/// Nothing is written when the trained artifact is missing. An existing file
/// at `destination` is overwritten.
pub fn export_model<T: ModelToolkit + ?Sized>(
    toolkit: &T,
    artifact: &Path,
    destination: &Path,
    params: &ExportParams,
    relocation: Relocation,
) -> PipelineResult<ExportedArtifact> {
    if !artifact.is_file() {
        return Err(PipelineError::ArtifactNotFound {
            path: artifact.to_path_buf(),
        });
    }
    let artifact = fs::canonicalize(artifact).map_err(|e| PipelineError::io(artifact, e))?;
    info!("Loading trained model from {}", artifact.display());

    // A converter that exits cleanly without writing must not pass on last run's file.
    let expected = params.output_path_for(&artifact);
    if expected.is_file() {
        debug!("Removing previous conversion output {}", expected.display());
        fs::remove_file(&expected).map_err(|e| PipelineError::io(&expected, e))?;
    }

    let converted = toolkit.convert(&artifact, params)?;
    if !converted.is_file() {
        return Err(PipelineError::ConversionOutputMissing { path: converted });
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    relocate(&converted, destination, relocation)?;

    let size_bytes = fs::metadata(destination)
        .map_err(|e| PipelineError::io(destination, e))?
        .len();
    let exported = ExportedArtifact {
        path: destination.to_path_buf(),
        size_bytes,
    };
    info!("Model saved to {}", exported.path.display());
    info!("File size: {:.2} MB", exported.size_mb());
    Ok(exported)
}

fn relocate(from: &Path, to: &Path, relocation: Relocation) -> PipelineResult<()> {
    match relocation {
        Relocation::Copy => copy_file(from, to).map(|_| ()),
        Relocation::Move => match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // rename cannot cross filesystems; fall back to copy + remove
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                copy_file(from, to)?;
                fs::remove_file(from).map_err(|e| PipelineError::io(from, e))
            }
            Err(e) => Err(PipelineError::io(from, e)),
        },
    }
}
