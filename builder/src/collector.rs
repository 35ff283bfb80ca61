use crate::config::ConfigErrors;
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::path::PathBuf;
use tracing::{debug, warn};

/// default glob for job files
pub const JOB_FILE_GLOB: &str = "*.{yaml,yml}";

/// Find job files below `paths`.
///
/// Directories are walked recursively (honouring ignore files) and filtered
/// with `glob`, paths naming a file are always kept. The result is sorted and
/// free of duplicates.
pub fn collect(paths: &[PathBuf], glob: &str) -> Result<Vec<PathBuf>, ConfigErrors> {
    let glob = GlobBuilder::new(glob).build()?.compile_matcher();
    let (first, others) = paths.split_first().ok_or(ConfigErrors::NoInput)?;
    let mut builder = WalkBuilder::new(first);

    debug!("Filtering with glob: {glob:?}");
    // add other paths
    others.iter().for_each(|path| {
        builder.add(path);
    });

    Ok(builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to search for job files: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
        .filter(|entry| entry.depth() == 0 || glob.is_match(entry.path()))
        .map(DirEntry::into_path)
        .sorted()
        .dedup()
        .collect_vec())
}
