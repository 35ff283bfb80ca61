#[cfg(test)]
mod config_test;

use crate::{
    dag::DagError,
    parse::ParseError,
    render::RenderOptions,
    spec::{JobSpec, Resource, ValidationError},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::{debug, error, warn};

static JOB_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("job name pattern is valid"));

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Invalid YAML in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("No input paths were given")]
    NoInput,
    #[error("Job files failed the preflight checks")]
    FailedPreflight,
    #[error("Job {name} is invalid: {source}")]
    InvalidJob {
        name: String,
        source: ValidationError,
    },
    #[error("Job {name} is defined in both {first:?} and {second:?}")]
    DuplicateJob {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Job {0} is not defined in any job file")]
    UnknownJob(String),
    #[error("Failed to parse {path:?}: {source}")]
    Parse { path: PathBuf, source: ParseError },
    #[error("Sweep is invalid: {0}")]
    Sweep(#[from] DagError),
}

/// read a file into a string, attaching the path to the error
pub fn read_file(path: &Path) -> Result<String, ConfigErrors> {
    fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// create the parent directory if needed and write `content` to `path`
pub fn write_file(path: &Path, content: &str) -> Result<(), ConfigErrors> {
    let write_error = |source| ConfigErrors::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    fs::write(path, content).map_err(write_error)
}

/// load a YAML document of type `T` from `path`
pub fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigErrors> {
    serde_yaml::from_str(&read_file(path)?).map_err(|source| ConfigErrors::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// A job file: named job specs plus how to render them
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    // canonical order of request_* lines, falls back to memory, cpus, disk, gpus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_order: Option<Vec<Resource>>,
    // comment placed on top of every descriptor rendered from this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    // where descriptors go, relative paths are resolved against the job file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub jobs: BTreeMap<String, JobSpec>,

    #[serde(default, skip)]
    pub source: PathBuf,
}

impl FromStr for SubmitConfig {
    type Err = serde_yaml::Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(text)
    }
}

impl SubmitConfig {
    /// load a job file and remember where it came from
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let mut config: Self = load_yaml(path)?;
        config.source = path.to_path_buf();

        debug!(path = ?path, jobs = config.jobs.len(), "Loaded job file");

        Ok(config)
    }

    pub fn render_options(&self) -> RenderOptions {
        let defaults = RenderOptions::default();

        RenderOptions {
            resource_order: self
                .resource_order
                .clone()
                .unwrap_or(defaults.resource_order),
            header: self.header.clone(),
        }
    }

    /// directory the descriptors of this file are written to
    pub fn output_dir(&self) -> PathBuf {
        let base = self
            .source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match self.output_dir {
            Some(ref dir) if dir.is_absolute() => dir.clone(),
            Some(ref dir) => base.join(dir),
            None => base,
        }
    }

    /// Check every job and report all problems at once, returns true if any were found
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.jobs.is_empty() {
            warn!(
                "{} defines no jobs, nothing will be rendered",
                self.source.to_string_lossy()
            );
        }

        if let Some(ref order) = self.resource_order {
            let mut seen = Vec::with_capacity(order.len());
            for resource in order {
                if seen.contains(&resource) {
                    warn!("resource_order lists {resource} more than once, the first position is used");
                }
                seen.push(resource);
            }
        }

        for (name, job) in self.jobs.iter() {
            if !JOB_NAME.is_match(name) {
                error!("jobs.{name} can't be used as a file name, use letters, digits, `_`, `-` and `.`");
                contains_error = true;
            }

            if let Err(e) = job.validate() {
                error!("jobs.{name}: {e}");
                contains_error = true;
            }
        }

        contains_error
    }
}
