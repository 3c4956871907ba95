use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Delete a directory if present and create it empty
pub fn recreate_directory(path: &Path) -> PipelineResult<PathBuf> {
    if path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    }
    ensure_directory(path)
}

/// Create a directory and its parents if absent
pub fn ensure_directory(path: &Path) -> PipelineResult<PathBuf> {
    fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(path.to_path_buf())
}

/// Copy `from` to `to`, overwriting, and return the number of bytes copied
pub fn copy_file(from: &Path, to: &Path) -> PipelineResult<u64> {
    fs::copy(from, to).map_err(|e| PipelineError::io(from, e))
}

/// List files directly inside `dir` with the given extension, sorted by path
pub fn list_files_with_extension(dir: &Path, extension: &str) -> PipelineResult<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        extension
    );
    let entries = glob(&pattern)
        .map_err(|e| PipelineError::io(dir, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            PipelineError::io(path, e.into_error())
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// The file name without its extension, if it is valid UTF-8
pub fn file_stem_string(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
