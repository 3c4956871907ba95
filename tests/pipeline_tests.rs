mod common;

use std::fs;
use std::path::Path;

use common::{write_dataset, FakeToolkit};
use yolo_forge::config::{PublishOptions, Relocation, ToolkitOptions};
use yolo_forge::{
    export_model, DatasetLayout, ExportParams, Pipeline, PipelineConfig, PipelineError, Stage,
};

fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig {
        layout: DatasetLayout::new(root.join("dataset")),
        publish: PublishOptions {
            destination: root.join("public/models/screen-detector.onnx"),
            ..PublishOptions::default()
        },
        toolkit: ToolkitOptions {
            program: "yolo".to_string(),
            work_dir: root.to_path_buf(),
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn test_export_missing_artifact_writes_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let toolkit = FakeToolkit::new(temp_dir.path());
    let destination = temp_dir.path().join("public/models/model.onnx");

    let err = export_model(
        &toolkit,
        &temp_dir.path().join("runs/detect/missing/weights/best.pt"),
        &destination,
        &ExportParams::default(),
        Relocation::Copy,
    )
    .unwrap_err();

    assert_eq!(err.kind(), "ArtifactNotFoundError");
    assert!(!destination.exists());
    assert!(!destination.parent().unwrap().exists());
    assert!(toolkit.convert_calls.borrow().is_empty());
}

#[test]
fn test_export_reports_missing_conversion_output() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifact = temp_dir.path().join("best.pt");
    fs::write(&artifact, b"weights").unwrap();
    let toolkit = FakeToolkit::silent_failure(temp_dir.path());
    let destination = temp_dir.path().join("out/model.onnx");

    let err = export_model(
        &toolkit,
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Copy,
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::ConversionOutputMissing { .. }));
    assert!(!destination.exists());
}

#[test]
fn test_export_copies_and_overwrites() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifact = temp_dir.path().join("best.pt");
    fs::write(&artifact, b"weights").unwrap();
    let destination = temp_dir.path().join("public/models/model.onnx");
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, b"old model").unwrap();
    let toolkit = FakeToolkit::new(temp_dir.path());

    let exported = export_model(
        &toolkit,
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Copy,
    )
    .unwrap();

    assert_eq!(exported.path, destination);
    assert_eq!(exported.size_bytes, 2048);
    assert_eq!(fs::read(&destination).unwrap().len(), 2048);
    // copy leaves the converter's own output in place
    assert!(temp_dir.path().join("best.onnx").exists());
}

#[test]
fn test_export_move_relocates() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifact = temp_dir.path().join("best.pt");
    fs::write(&artifact, b"weights").unwrap();
    let destination = temp_dir.path().join("model.onnx");
    let toolkit = FakeToolkit::new(temp_dir.path());

    export_model(
        &toolkit,
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Move,
    )
    .unwrap();

    assert!(destination.exists());
    assert!(!temp_dir.path().join("best.onnx").exists());
}

#[test]
fn test_export_does_not_republish_stale_conversion() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifact = temp_dir.path().join("best.pt");
    fs::write(&artifact, b"weights").unwrap();
    let destination = temp_dir.path().join("public/models/model.onnx");

    export_model(
        &FakeToolkit::new(temp_dir.path()),
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Copy,
    )
    .unwrap();
    assert!(temp_dir.path().join("best.onnx").is_file());
    fs::remove_file(&destination).unwrap();

    let err = export_model(
        &FakeToolkit::silent_failure(temp_dir.path()),
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Copy,
    )
    .unwrap_err();

    assert_eq!(err.kind(), "ConversionOutputMissingError");
    assert!(!destination.exists());
    assert!(!temp_dir.path().join("best.onnx").exists());
}

#[test]
fn test_export_move_propagates_rename_errors() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifact = temp_dir.path().join("best.pt");
    fs::write(&artifact, b"weights").unwrap();
    // a non-empty directory in the way makes rename fail on the same filesystem
    let destination = temp_dir.path().join("model.onnx");
    fs::create_dir_all(destination.join("occupied")).unwrap();
    let toolkit = FakeToolkit::new(temp_dir.path());

    let err = export_model(
        &toolkit,
        &artifact,
        &destination,
        &ExportParams::default(),
        Relocation::Move,
    )
    .unwrap_err();

    assert_eq!(err.kind(), "IoError");
    assert!(destination.join("occupied").is_dir());
    // nothing was copied, so the converted file must still be there
    assert!(temp_dir.path().join("best.onnx").is_file());
}

#[test]
fn test_full_pipeline_with_fake_toolkit() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    write_dataset(&config.layout.root, 20, 2);
    let destination = config.publish.destination.clone();
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));
    assert_eq!(
        pipeline.config().layout.root,
        temp_dir.path().join("dataset")
    );

    let report = pipeline.run().unwrap();

    assert_eq!(
        report.completed,
        vec![Stage::Prepare, Stage::Train, Stage::Export]
    );
    assert_eq!(report.prepare.as_ref().unwrap().split.train, 14);
    assert!(report.has_warning("PlaceholderClassNamesWarning"));
    assert!(!report.has_warning("LowSampleCountWarning"));
    let exported = report.export.unwrap();
    assert_eq!(exported.path, destination);
    assert!(destination.is_file());

    let json = serde_json::to_string(&report.warnings).unwrap();
    assert!(json.contains("placeholder_class_names"));
}

#[test]
fn test_train_request_uses_prepared_manifest() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    write_dataset(&config.layout.root, 12, 1);
    let manifest = config.layout.manifest_path();
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));

    let report = pipeline.run_stages(&[Stage::Prepare, Stage::Train]).unwrap();

    let calls = pipeline.toolkit().train_calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].manifest, fs::canonicalize(manifest).unwrap());
    assert_eq!(calls[0].params.job_name, "screen-detector");
    assert!(report.train.unwrap().artifact.ends_with("weights/best.pt"));
    assert!(pipeline.toolkit().convert_calls.borrow().is_empty());
}

#[test]
fn test_train_without_manifest_fails_fast() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    let destination = config.publish.destination.clone();
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));

    let failure = pipeline
        .run_stages(&[Stage::Train, Stage::Export])
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Train);
    assert_eq!(failure.kind(), "ManifestNotFoundError");
    assert_eq!(failure.hint(), "prepare the dataset first");
    assert!(!destination.exists());
}

#[test]
fn test_prepare_failure_stops_the_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    fs::create_dir_all(config.layout.images_dir()).unwrap();
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));

    let failure = pipeline.run().unwrap_err();

    assert_eq!(failure.stage, Stage::Prepare);
    assert_eq!(failure.kind(), "DatasetEmptyError");
    assert!(!temp_dir.path().join("runs").exists());
}

#[test]
fn test_export_stage_alone_uses_conventional_weights() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    let weights = config.trained_artifact_path();
    fs::create_dir_all(weights.parent().unwrap()).unwrap();
    fs::write(&weights, b"weights").unwrap();
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));

    let report = pipeline.run_stages(&[Stage::Export]).unwrap();

    assert_eq!(report.completed, vec![Stage::Export]);
    assert!(report.export.unwrap().path.is_file());
}

#[test]
fn test_failure_keeps_partial_report() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = config_in(temp_dir.path());
    write_dataset(&config.layout.root, 12, 2);
    let pipeline = Pipeline::new(config, FakeToolkit::new(temp_dir.path()));

    let failure = pipeline
        .run_stages(&[Stage::Prepare, Stage::Export])
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Export);
    let report = &failure.report;
    assert_eq!(report.completed, vec![Stage::Prepare]);
    assert_eq!(report.prepare.as_ref().unwrap().stats.labeled_images, 12);
    assert!(report.export.is_none());
    let summary = report.failure.as_ref().unwrap();
    assert_eq!(summary.stage, Stage::Export);
    assert_eq!(summary.kind, "ArtifactNotFoundError");
    assert_eq!(summary.hint, "train the model first");

    let path = temp_dir.path().join("report.json");
    report.write_json(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["completed"], serde_json::json!(["prepare"]));
    assert_eq!(json["failure"]["kind"], "ArtifactNotFoundError");
    assert_eq!(json["failure"]["stage"], "export");
}
