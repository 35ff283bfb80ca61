use super::*;
use crate::spec::{Quantity, SizeUnit};
use pretty_assertions::assert_eq;

const JOBS: &str = r#"
resource_order: [cpus, memory]
header: generated by condorsub
output_dir: submit
jobs:
  sens:
    executable: /home/user/scripts/sens.py
    resources:
      memory: 8GB
    logs:
      log: sens.log
"#;

#[test]
pub fn load_remembers_the_source() {
    let dir = tempfile::Builder::new().prefix("jobs").tempdir().unwrap();
    let path = dir.path().join("jobs.yaml");
    fs::write(&path, JOBS).unwrap();

    let config = SubmitConfig::load(&path).unwrap();

    assert_eq!(config.source, path);
    assert_eq!(config.output_dir(), dir.path().join("submit"));
    assert_eq!(
        config.jobs["sens"].resources[&Resource::Memory],
        Quantity::sized(8, SizeUnit::Giga)
    );
}

#[test]
pub fn load_reports_missing_and_invalid_files() {
    let dir = tempfile::Builder::new().prefix("jobs").tempdir().unwrap();
    let missing = dir.path().join("missing.yaml");
    assert!(matches!(
        SubmitConfig::load(&missing),
        Err(ConfigErrors::Read { path, .. }) if path == missing
    ));

    let invalid = dir.path().join("invalid.yaml");
    fs::write(&invalid, "jobs: {}\nqueue_count: 3\n").unwrap();
    assert!(matches!(
        SubmitConfig::load(&invalid),
        Err(ConfigErrors::Yaml { path, .. }) if path == invalid
    ));
}

#[test]
pub fn render_options_follow_the_file() {
    let config: SubmitConfig = JOBS.parse().unwrap();

    assert_eq!(
        config.render_options(),
        RenderOptions {
            resource_order: vec![Resource::Cpus, Resource::Memory],
            header: Some("generated by condorsub".to_string()),
        }
    );

    let defaults: SubmitConfig = "jobs: {}".parse().unwrap();
    assert_eq!(defaults.render_options(), RenderOptions::default());
}

#[test]
pub fn output_dir_keeps_absolute_paths() {
    let mut config: SubmitConfig = JOBS.parse().unwrap();
    config.source = PathBuf::from("/work/jobs.yaml");
    config.output_dir = Some(PathBuf::from("/scratch/submit"));
    assert_eq!(config.output_dir(), PathBuf::from("/scratch/submit"));

    config.output_dir = None;
    assert_eq!(config.output_dir(), PathBuf::from("/work"));
}

#[test]
pub fn preflight_checks_flag_every_invalid_job() {
    let config: SubmitConfig = JOBS.parse().unwrap();
    assert!(!config.preflight_checks());

    let mut renamed = config.clone();
    let job = renamed.jobs.remove("sens").unwrap();
    renamed.jobs.insert("sens run".to_string(), job);
    assert!(renamed.preflight_checks());

    let mut invalid = config;
    invalid.jobs.get_mut("sens").unwrap().log_paths.clear();
    assert!(invalid.preflight_checks());
}

#[test]
pub fn write_file_creates_parent_directories() {
    let dir = tempfile::Builder::new().prefix("submit").tempdir().unwrap();
    let path = dir.path().join("nested/sens.sub");

    write_file(&path, "queue\n").unwrap();

    assert_eq!(read_file(&path).unwrap(), "queue\n");
}
