use super::*;
use crate::spec::{Argument, LogChannel};
use pretty_assertions::assert_eq;

const SENS_SWEEP: &str = r#"
submit: /work/sens.sub
retry: 2
vars:
  stat_method: bayesian
  outdir: "out_{dimension}_{seed}"
axes:
  dimension: [3, 4]
  seed: {start: 0, end: 3}
"#;

fn sweep(yaml: &str) -> Sweep {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
pub fn expand_walks_the_last_axis_fastest() {
    let dag = sweep(SENS_SWEEP).expand().unwrap();

    let combinations = dag
        .nodes
        .iter()
        .map(|node| (node.vars[0].1.as_str(), node.vars[1].1.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        combinations,
        vec![
            ("3", "0"),
            ("3", "1"),
            ("3", "2"),
            ("4", "0"),
            ("4", "1"),
            ("4", "2"),
        ]
    );

    let names = dag.nodes.iter().map(|node| node.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["job1", "job2", "job3", "job4", "job5", "job6"]);
}

#[test]
pub fn expand_interpolates_fixed_vars() {
    let dag = sweep(SENS_SWEEP).expand().unwrap();

    assert_eq!(
        dag.nodes[4],
        DagNode {
            name: "job5".to_string(),
            submit: PathBuf::from("/work/sens.sub"),
            vars: vec![
                ("dimension".to_string(), "4".to_string()),
                ("seed".to_string(), "1".to_string()),
                ("stat_method".to_string(), "bayesian".to_string()),
                ("outdir".to_string(), "out_4_1".to_string()),
            ],
            retry: Some(2),
        }
    );
}

#[test]
pub fn dag_file_lists_jobs_vars_and_retries() {
    let dag = sweep(
        r#"
submit: /work/sens.sub
prefix: sens_
retry: 3
vars:
  title: 'say "hi" \ bye'
axes:
  dimension: [3]
"#,
    )
    .expand()
    .unwrap();

    let expected = "\
JOB\tsens_1\t/work/sens.sub
VARS\tsens_1\tdimension=\"3\"
VARS\tsens_1\ttitle=\"say \\\"hi\\\" \\\\ bye\"
RETRY\tsens_1\t3
";

    assert_eq!(dag.to_string(), expected);
}

#[test]
pub fn expand_without_axes_gives_one_node() {
    let dag = sweep("submit: plot.sub\nvars:\n  dimension: 3\n").expand().unwrap();

    assert_eq!(
        dag.to_string(),
        "JOB\tjob1\tplot.sub\nVARS\tjob1\tdimension=\"3\"\n"
    );
}

#[test]
pub fn ranges_support_steps() {
    let dag = sweep(
        r#"
submit: sens.sub
axes:
  seed: {start: 10, end: 0, step: -4}
"#,
    )
    .expand()
    .unwrap();

    let seeds = dag
        .nodes
        .iter()
        .map(|node| node.vars[0].1.as_str())
        .collect::<Vec<_>>();
    assert_eq!(seeds, vec!["10", "6", "2"]);
}

#[test]
pub fn ranges_stop_at_the_integer_limits() {
    let seeds = |yaml: &str| {
        sweep(&format!("submit: sens.sub\naxes:\n  seed: {yaml}\n"))
            .expand()
            .unwrap()
            .nodes
            .into_iter()
            .map(|node| node.vars[0].1.clone())
            .collect::<Vec<_>>()
    };

    assert_eq!(
        seeds("{start: 9223372036854775806, end: 9223372036854775807, step: 2}"),
        vec!["9223372036854775806"]
    );
    assert_eq!(
        seeds("{start: -9223372036854775807, end: -9223372036854775808, step: -3}"),
        vec!["-9223372036854775807"]
    );
}

#[test]
pub fn mapping_axes_set_variables_together() {
    let dag = sweep(
        r#"
submit: /work/sens.sub
vars:
  stat_method: bayesian
  datadir: "/data/sensitivity/DIM{dimension}/{texture}"
axes:
  dimension: [3, 6]
  source:
    - {sr0: 0.0, sr1: 1.0, sr2: 0, texture: OET}
    - {sr0: 0.7, sr1: 0.3, sr2: 0, texture: OUT}
  eval_segment: {start: 0, end: 2}
"#,
    )
    .expand()
    .unwrap();

    assert_eq!(dag.nodes.len(), 8);

    let first = dag.to_string().lines().take(9).join("\n");
    assert_eq!(
        first,
        "\
JOB\tjob1\t/work/sens.sub
VARS\tjob1\tdimension=\"3\"
VARS\tjob1\tsr0=\"0.0\"
VARS\tjob1\tsr1=\"1.0\"
VARS\tjob1\tsr2=\"0\"
VARS\tjob1\ttexture=\"OET\"
VARS\tjob1\teval_segment=\"0\"
VARS\tjob1\tstat_method=\"bayesian\"
VARS\tjob1\tdatadir=\"/data/sensitivity/DIM3/OET\""
    );

    let scenarios = dag
        .nodes
        .iter()
        .map(|node| {
            (
                node.vars[0].1.as_str(),
                node.vars[4].1.as_str(),
                node.vars[5].1.as_str(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        scenarios,
        vec![
            ("3", "OET", "0"),
            ("3", "OET", "1"),
            ("3", "OUT", "0"),
            ("3", "OUT", "1"),
            ("6", "OET", "0"),
            ("6", "OET", "1"),
            ("6", "OUT", "0"),
            ("6", "OUT", "1"),
        ]
    );
    assert_eq!(
        dag.nodes[7].vars[1..4].to_vec(),
        vec![
            ("sr0".to_string(), "0.7".to_string()),
            ("sr1".to_string(), "0.3".to_string()),
            ("sr2".to_string(), "0".to_string()),
        ]
    );
    assert_eq!(
        dag.nodes[7].vars[7],
        ("datadir".to_string(), "/data/sensitivity/DIM6/OUT".to_string())
    );
}

#[test]
pub fn interpolation_does_not_expand_substituted_values() {
    let dag = sweep(
        r#"
submit: sens.sub
vars:
  label: "{a}-{b}-{missing}"
axes:
  a: ["{b}"]
  b: [x]
"#,
    )
    .expand()
    .unwrap();

    assert_eq!(
        dag.nodes[0].vars[2],
        ("label".to_string(), "{b}-x-{missing}".to_string())
    );
}

#[test]
pub fn expand_rejects_bad_sweeps() {
    let cases = [
        ("axes:\n  seed: []\n", DagError::EmptyAxis("seed".to_string())),
        (
            "axes:\n  seed: {start: 3, end: 0}\n",
            DagError::EmptyAxis("seed".to_string()),
        ),
        (
            "axes:\n  seed: {start: 0, end: 3, step: 0}\n",
            DagError::ZeroStep("seed".to_string()),
        ),
        (
            "axes:\n  bad-name: [1]\n",
            DagError::InvalidVarName("bad-name".to_string()),
        ),
        (
            "axes:\n  seed: [1]\nvars:\n  Seed: 2\n",
            DagError::DuplicateVar("Seed".to_string()),
        ),
        ("vars:\n  outdir:\n", DagError::NullValue("vars.outdir".to_string())),
        (
            "axes:\n  dimension: [3, ~]\n",
            DagError::NullValue("axes.dimension".to_string()),
        ),
        (
            "prefix: two words\n",
            DagError::InvalidPrefix("two words".to_string()),
        ),
        (
            "axes:\n  source: [1, {sr0: 0}]\n",
            DagError::MixedAxis("source".to_string()),
        ),
        (
            "axes:\n  source: [{sr0: 0}, {sr1: 1}]\n",
            DagError::InconsistentBindings {
                axis: "source".to_string(),
                index: 1,
            },
        ),
        (
            "axes:\n  source: [{sr0: 0}]\nvars:\n  SR0: 1\n",
            DagError::DuplicateVar("SR0".to_string()),
        ),
        (
            "axes:\n  source: [{sr0: 0}, {sr0: 1}]\n  sr0: [2]\n",
            DagError::DuplicateVar("sr0".to_string()),
        ),
        (
            "axes:\n  source: [{sr0: ~}]\n",
            DagError::NullValue("axes.source[0].sr0".to_string()),
        ),
    ];

    for (yaml, expected) in cases {
        let yaml = format!("submit: sens.sub\n{yaml}");

        assert_eq!(sweep(&yaml).expand(), Err(expected));
    }
}

#[test]
pub fn unresolved_placeholders_ignore_scheduler_macros() {
    let mut spec = JobSpec::new("/bin/run.py");
    spec.arguments = vec![
        Argument::new("ast", "$(AST)"),
        Argument::new("seed", "$(seed)"),
        Argument::new("data", "$(datadir)/$(Process)"),
    ];
    spec.log_paths
        .insert(LogChannel::Log, "job_$(Cluster).log".to_string());

    let sweep = sweep("submit: sens.sub\nvars:\n  ast: 1\naxes:\n  seed: [1, 2]\n");

    assert_eq!(sweep.unresolved_placeholders(&spec), vec!["datadir"]);
}

#[test]
pub fn unresolved_placeholders_see_mapped_variables() {
    let mut spec = JobSpec::new("/bin/run.py");
    spec.arguments = vec![
        Argument::new("sr0", "$(sr0)"),
        Argument::new("texture", "$(TEXTURE)"),
        Argument::new("source", "$(source)"),
    ];

    let sweep = sweep("submit: sens.sub\naxes:\n  source: [{sr0: 0.2, texture: OET}]\n");

    assert_eq!(sweep.unresolved_placeholders(&spec), vec!["source"]);
}
