use super::*;
use crate::spec::{Directive, LogChannel, Quantity, SizeUnit};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn sens_job() -> JobSpec {
    let mut spec = JobSpec::new("/bin/run.py");
    spec.arguments = vec![Argument::new("ast", "$(ast)"), Argument::new("seed", "$(seed)")];
    spec.resources
        .insert(Resource::Memory, Quantity::sized(8, SizeUnit::Giga));
    spec.resources
        .insert("cpu-count".to_string().into(), Quantity::count(12));
    spec.log_paths
        .insert(LogChannel::Log, "job_$(Cluster).log".to_string());
    spec.log_paths
        .insert(LogChannel::Output, "job_$(Cluster).out".to_string());
    spec.log_paths
        .insert(LogChannel::Error, "job_$(Cluster).err".to_string());
    spec
}

fn render_default(spec: &JobSpec) -> String {
    render(spec, &RenderOptions::default()).unwrap().to_string()
}

#[test]
pub fn render_sens_job() {
    let expected = "\
Executable = /bin/run.py
Arguments = \"--ast $(ast) --seed $(seed)\"

Log = job_$(Cluster).log
Output = job_$(Cluster).out
Error = job_$(Cluster).err
request_memory = 8GB
request_cpus = 12
queue
";

    assert_eq!(render_default(&sens_job()), expected);
}

#[test]
pub fn render_ends_with_queue_count() {
    let mut spec = sens_job();
    spec.queue_count = 5;

    let rendered = render(&spec, &RenderOptions::default()).unwrap();

    assert_eq!(rendered.lines().last(), Some(&Line::Queue(5)));
    assert_eq!(rendered.to_string().lines().last(), Some("queue 5"));
}

#[test]
pub fn render_skips_empty_arguments() {
    let mut spec = sens_job();
    spec.arguments.clear();

    let rendered = render_default(&spec);

    assert!(!rendered.contains("Arguments"));
    assert!(rendered.starts_with("Executable = /bin/run.py\n\nLog = "));
}

#[test]
pub fn render_orders_resources() {
    let mut spec = sens_job();
    spec.resources.insert(Resource::Gpus, Quantity::count(1));
    spec.resources
        .insert(Resource::Other("licenses".to_string()), Quantity::count(2));
    let options = RenderOptions {
        resource_order: vec![Resource::Gpus, Resource::Cpus],
        header: None,
    };

    let requests = render(&spec, &options)
        .unwrap()
        .into_lines()
        .into_iter()
        .filter_map(|line| match line {
            Line::Directive { key, .. } if key.starts_with("request_") => Some(key),
            _ => None,
        })
        .collect::<Vec<_>>();

    assert_eq!(
        requests,
        vec![
            "request_gpus",
            "request_cpus",
            "request_memory",
            "request_licenses"
        ]
    );
}

#[test]
pub fn render_quotes_argument_values() {
    let arguments = vec![
        Argument::new("range", "6e4 1e7 20"),
        Argument::new("label", "it's"),
        Argument::new("title", "say \"hi\""),
        Argument::new("empty", ""),
        Argument::new("passthrough", "--verbose"),
        Argument::switch("no_bsm"),
    ];

    assert_eq!(
        join_arguments(&arguments),
        "--range '6e4 1e7 20' --label 'it''s' --title 'say \"\"hi\"\"' --empty '' \
         --passthrough '--verbose' --no_bsm"
    );
}

#[test]
pub fn render_environment_policies() {
    let environment_line = |policy: EnvironmentPolicy| {
        let mut spec = sens_job();
        spec.environment = Some(policy);

        render_default(&spec)
            .lines()
            .find(|line| line.starts_with("GetEnv") || line.starts_with("Environment"))
            .map(str::to_string)
    };

    assert_eq!(
        environment_line(EnvironmentPolicy::InheritAll).as_deref(),
        Some("GetEnv = True")
    );
    assert_eq!(
        environment_line(EnvironmentPolicy::InheritNamed(vec![
            "PATH".to_string(),
            "CONDA*".to_string()
        ]))
        .as_deref(),
        Some("GetEnv = PATH, CONDA*")
    );
    assert_eq!(
        environment_line(EnvironmentPolicy::Explicit(BTreeMap::from([
            ("OMP_NUM_THREADS".to_string(), "4".to_string()),
            ("GREETING".to_string(), "hello world".to_string()),
        ])))
        .as_deref(),
        Some("Environment = \"GREETING='hello world' OMP_NUM_THREADS=4\"")
    );
    assert!(!render_default(&sens_job()).contains("GetEnv"));
}

#[test]
pub fn render_header_and_directives() {
    let mut spec = sens_job();
    spec.arguments.clear();
    spec.resources.clear();
    spec.log_paths.retain(|channel, _| *channel == LogChannel::Log);
    spec.initial_dir = Some("/data/run_$(Process)".to_string());
    spec.directives = vec![
        Directive::new("universe", "vanilla"),
        Directive::new("+AccountingGroup", "\"quicktest\""),
        Directive::new("notify_user", ""),
    ];
    let options = RenderOptions {
        header: Some("generated by condorsub\nedit the job file instead".to_string()),
        ..Default::default()
    };

    let expected = "\
# generated by condorsub
# edit the job file instead
Executable = /bin/run.py

Log = job_$(Cluster).log
InitialDir = /data/run_$(Process)
universe = vanilla
+AccountingGroup = \"quicktest\"
notify_user =
queue
";

    assert_eq!(render(&spec, &options).unwrap().to_string(), expected);
}

#[test]
pub fn render_is_deterministic() {
    let spec = sens_job();

    assert_eq!(render_default(&spec), render_default(&spec.clone()));
}

#[test]
pub fn render_rejects_invalid_jobs() {
    let mut spec = sens_job();
    spec.resources.insert(Resource::Memory, Quantity::count(0));

    assert!(matches!(
        render(&spec, &RenderOptions::default()),
        Err(ValidationError::NonPositiveResource {
            resource: Resource::Memory,
            ..
        })
    ));
}
