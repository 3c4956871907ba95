use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;

use crate::config::{DatasetLayout, SplitOptions};
use crate::error::{PipelineError, PipelineResult};
use crate::manifest::{scan_dataset, DatasetManifest};
use crate::types::{
    DatasetSplit, LabeledSample, PrepareReport, SplitSizes, Subset, LABEL_EXTENSION,
};
use crate::utils::{copy_file, create_progress_bar, ensure_directory, recreate_directory};

/// Subset sizes for `total` samples: floor(70%) train, floor(90%) - train valid,
/// the remainder test.
pub fn split_counts(total: usize) -> SplitSizes {
    let train = total * 7 / 10;
    let valid = total * 9 / 10 - train;
    SplitSizes {
        train,
        valid,
        test: total - train - valid,
    }
}

/// Shuffle the samples with a seeded RNG and cut them into train/valid/test.
///
/// Samples are ordered by stem before shuffling, so the result depends only on
/// the set of samples and the seed. Samples without a label file are dropped.
pub fn split_samples(samples: &[LabeledSample], seed: u64) -> DatasetSplit {
    let mut ordered: Vec<LabeledSample> = samples
        .iter()
        .filter(|sample| sample.is_usable())
        .cloned()
        .collect();
    ordered.sort_by(|a, b| a.stem.cmp(&b.stem));

    let mut rng = StdRng::seed_from_u64(seed);
    ordered.shuffle(&mut rng);

    let sizes = split_counts(ordered.len());
    let test = ordered.split_off(sizes.train + sizes.valid);
    let valid = ordered.split_off(sizes.train);

    DatasetSplit {
        train: ordered,
        valid,
        test,
    }
}

/// Create the images/labels directory pair of every subset
pub fn setup_split_directories(layout: &DatasetLayout, clean: bool) -> PipelineResult<()> {
    for subset in Subset::ALL {
        if clean {
            recreate_directory(&layout.root.join(subset.dir_name()))?;
        }
        ensure_directory(&layout.subset_images_dir(subset))?;
        ensure_directory(&layout.subset_labels_dir(subset))?;
    }
    Ok(())
}

/// Copy every sample's image and label into its subset directories, overwriting
/// files left by earlier runs.
pub fn materialize_split(split: &DatasetSplit, layout: &DatasetLayout) -> PipelineResult<()> {
    for subset in Subset::ALL {
        let samples = split.subset(subset);
        let images_dir = layout.subset_images_dir(subset);
        let labels_dir = layout.subset_labels_dir(subset);
        let pb = create_progress_bar(samples.len() as u64, subset.dir_name());

        for sample in samples {
            // Without its label the image would land in the subset unannotated.
            let Some(label) = &sample.label else {
                pb.inc(1);
                continue;
            };
            copy_file(&sample.image, &images_dir.join(sample.image_file_name()))?;
            copy_file(
                label,
                &labels_dir.join(format!("{}.{}", sample.stem, LABEL_EXTENSION)),
            )?;
            pb.inc(1);
        }
        pb.finish_with_message(format!("{} copy complete", subset));
    }
    Ok(())
}

/// Scan, split, copy and write the manifest.
pub fn prepare_dataset(
    layout: &DatasetLayout,
    options: &SplitOptions,
) -> PipelineResult<PrepareReport> {
    let scan = scan_dataset(layout, options.strict_labels)?;

    let split = split_samples(&scan.samples, options.seed);
    let sizes = split.sizes();
    info!(
        "Split (seed {}): train {} images, valid {} images, test {} images",
        options.seed, sizes.train, sizes.valid, sizes.test
    );

    setup_split_directories(layout, options.clean)?;
    info!("Copying files...");
    materialize_split(&split, layout)?;
    info!("Files copied.");

    let manifest_path = layout.manifest_path();
    let mut names = scan.registry.clone();
    if options.keep_names && manifest_path.is_file() {
        let previous = DatasetManifest::load(&manifest_path)?;
        names.carry_names_from(&previous.names);
    }

    let root = fs::canonicalize(&layout.root).map_err(|e| PipelineError::io(&layout.root, e))?;
    let manifest = DatasetManifest::new(layout, root, names);
    manifest.write(&manifest_path)?;
    info!("Created {}", manifest_path.display());

    let unresolved = manifest.names.unresolved();
    if !unresolved.is_empty() {
        info!(
            "Edit {} and replace the placeholder names for class IDs {:?} (e.g. 0: vscode, 1: chrome)",
            manifest_path.display(),
            unresolved
        );
    }

    Ok(PrepareReport {
        stats: scan.stats,
        split: sizes,
        class_ids: scan.registry.ids().collect(),
        manifest_path,
        warnings: scan.warnings,
    })
}
