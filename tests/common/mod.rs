#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use yolo_forge::{ExportParams, ModelToolkit, PipelineResult, TrainOutcome, TrainRequest};

/// Write `count` fake screenshots with one label each. Labels cycle through
/// class ids 0..classes.
pub fn write_dataset(root: &Path, count: usize, classes: u32) {
    let images = root.join("images");
    let labels = root.join("labels");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&labels).unwrap();
    for i in 0..count {
        let stem = format!("shot_{:03}", i);
        let ext = if i % 2 == 0 { "png" } else { "jpg" };
        fs::write(images.join(format!("{}.{}", stem, ext)), format!("image {}", i)).unwrap();
        let class_id = i as u32 % classes.max(1);
        fs::write(
            labels.join(format!("{}.txt", stem)),
            format!("{} 0.5 0.5 0.2 0.2\n", class_id),
        )
        .unwrap();
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn stems(dir: &Path) -> Vec<String> {
    let mut stems: Vec<String> = list_names(dir)
        .into_iter()
        .map(|name| {
            Path::new(&name)
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    stems.sort();
    stems
}

/// In-process stand-in for the yolo command line.
pub struct FakeToolkit {
    pub work_dir: PathBuf,
    pub produce_output: bool,
    pub train_calls: RefCell<Vec<TrainRequest>>,
    pub convert_calls: RefCell<Vec<PathBuf>>,
}

impl FakeToolkit {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            produce_output: true,
            train_calls: RefCell::new(Vec::new()),
            convert_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn silent_failure(work_dir: &Path) -> Self {
        Self {
            produce_output: false,
            ..Self::new(work_dir)
        }
    }
}

impl ModelToolkit for FakeToolkit {
    fn train(&self, request: &TrainRequest) -> PipelineResult<TrainOutcome> {
        self.train_calls.borrow_mut().push(request.clone());
        let weights = self
            .work_dir
            .join("runs/detect")
            .join(&request.params.job_name)
            .join("weights");
        fs::create_dir_all(&weights).unwrap();
        let artifact = weights.join("best.pt");
        fs::write(&artifact, b"trained weights").unwrap();
        Ok(TrainOutcome {
            artifact,
            metrics: None,
        })
    }

    fn convert(&self, artifact: &Path, params: &ExportParams) -> PipelineResult<PathBuf> {
        self.convert_calls.borrow_mut().push(artifact.to_path_buf());
        let output = params.output_path_for(artifact);
        if self.produce_output {
            fs::write(&output, vec![7u8; 2048]).unwrap();
        }
        Ok(output)
    }
}
