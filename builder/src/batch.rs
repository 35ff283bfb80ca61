use crate::{
    config::{write_file, ConfigErrors, SubmitConfig},
    render::{render, RenderedDescriptor},
};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// A rendered job together with where it came from and where it goes
#[derive(Debug, Clone)]
pub struct RenderedJob {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub descriptor: RenderedDescriptor,
}

/// Render the jobs of all `configs` in parallel.
///
/// Jobs come back ordered by job file and then job name, independent of how
/// the thread pool scheduled them. `only` restricts rendering to a single job
/// and `out_dir` overrides the output directory of every job file.
#[instrument(skip(configs), level = "info")]
pub fn render_all(
    configs: &[SubmitConfig],
    only: Option<&str>,
    out_dir: Option<&Path>,
) -> Result<Vec<RenderedJob>, ConfigErrors> {
    // job names become file names, so they have to be unique over all files
    let mut owners: BTreeMap<&str, &Path> = BTreeMap::new();
    for config in configs {
        for name in config.jobs.keys() {
            if let Some(first) = owners.insert(name, &config.source) {
                return Err(ConfigErrors::DuplicateJob {
                    name: name.clone(),
                    first: first.to_path_buf(),
                    second: config.source.clone(),
                });
            }
        }
    }

    if let Some(name) = only {
        if !owners.contains_key(name) {
            return Err(ConfigErrors::UnknownJob(name.to_string()));
        }
    }

    let tasks = configs
        .iter()
        .flat_map(|config| {
            let options = config.render_options();
            let directory = out_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| config.output_dir());

            config
                .jobs
                .iter()
                .filter(move |(name, _)| only.map_or(true, |only| only == name.as_str()))
                .map(move |(name, spec)| (config, name, spec, options.clone(), directory.clone()))
        })
        .collect::<Vec<_>>();

    debug!("Rendering {} jobs", tasks.len());

    tasks
        .into_par_iter()
        .map(|(config, name, spec, options, directory)| -> Result<_, ConfigErrors> {
            let descriptor = render(spec, &options).map_err(|source| ConfigErrors::InvalidJob {
                name: name.clone(),
                source,
            })?;

            debug!(job = name, "Rendered descriptor");

            Ok(RenderedJob {
                name: name.clone(),
                source: config.source.clone(),
                destination: directory.join(format!("{name}.sub")),
                descriptor,
            })
        })
        .collect()
}

/// write every rendered job to its destination
#[instrument(skip(jobs), level = "info")]
pub fn write_all(jobs: &[RenderedJob]) -> Result<(), ConfigErrors> {
    jobs.par_iter().try_for_each(|job| -> Result<(), ConfigErrors> {
        write_file(&job.destination, &job.descriptor.to_string())?;
        info!("Wrote {}", job.destination.to_string_lossy());

        Ok(())
    })
}
