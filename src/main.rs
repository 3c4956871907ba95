use clap::Parser;
use log::{error, info};
use std::path::Path;
use std::process::ExitCode;

use yolo_forge::config::Command;
use yolo_forge::{Args, Pipeline, PipelineReport, Stage, UltralyticsCli};

fn write_report(report: &PipelineReport, path: &Path) -> bool {
    match report.write_json(path) {
        Ok(()) => {
            info!("Report written to {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to write report: {}", e);
            false
        }
    }
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = args.to_pipeline_config();
    let stages: &[Stage] = match &args.command {
        Command::Prepare(_) => &[Stage::Prepare],
        Command::Train(_) => &[Stage::Train],
        Command::Export(_) => &[Stage::Export],
        Command::Run(_) => &[Stage::Prepare, Stage::Train, Stage::Export],
    };

    let toolkit = UltralyticsCli::new(config.toolkit.clone());
    let pipeline = Pipeline::new(config, toolkit);
    info!("Dataset root: {}", pipeline.config().layout.root.display());

    match pipeline.run_stages(stages) {
        Ok(report) => {
            for warning in &report.warnings {
                info!("{}: {}", warning.kind(), warning);
            }
            if let Some(path) = &args.report {
                if !write_report(&report, path) {
                    return ExitCode::FAILURE;
                }
            }
            info!("Done.");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!("{} ({})", failure, failure.kind());
            error!("Hint: {}", failure.hint());
            if let Some(path) = &args.report {
                write_report(&failure.report, path);
            }
            ExitCode::FAILURE
        }
    }
}
