//! DAGMan input for parameter sweeps.
//!
//! A sweep fans one submit descriptor out over the cartesian product of its
//! axes. Every combination becomes a DAG node whose `VARS` lines bind the
//! `$(name)` tokens of the descriptor:
//!
//! ```text
//! JOB	job1	/path/sens.sub
//! VARS	job1	dimension="3"
//! VARS	job1	stat_method="bayesian"
//! ```
//!
//! An axis entry may also be a mapping that sets several variables at once,
//! for variables that only vary together:
//!
//! ```yaml
//! axes:
//!   source:
//!     - {sr0: 0.0, sr1: 1.0, sr2: 0, texture: OET}
//!     - {sr0: 0.7, sr1: 0.3, sr2: 0, texture: OUT}
//! ```

#[cfg(test)]
mod dag_test;

use crate::{
    config::{load_yaml, ConfigErrors},
    spec::{
        yaml::{pairs, Pair, Scalar},
        JobSpec,
    },
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

static VAR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable pattern is valid"));
static INTERPOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("interpolation pattern is valid")
});
static NODE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("prefix pattern is valid"));

/// macros the scheduler and DAGMan define for every job, compared case-insensitively
const BUILTIN_MACROS: [&str; 14] = [
    "cluster",
    "clusterid",
    "process",
    "procid",
    "node",
    "step",
    "item",
    "itemindex",
    "row",
    "job",
    "retry",
    "dagmanjobid",
    "arch",
    "opsys",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("axes.{0} has no values")]
    EmptyAxis(String),
    #[error("axes.{0} has a range with step 0")]
    ZeroStep(String),
    #[error("{0:?} is not a valid DAG variable name")]
    InvalidVarName(String),
    #[error("variable {0} is defined more than once")]
    DuplicateVar(String),
    #[error("{0} needs a value")]
    NullValue(String),
    #[error("node prefix {0:?} is invalid, use letters, digits, `_`, `-` and `.`")]
    InvalidPrefix(String),
    #[error("axes.{0} mixes plain values and variable mappings")]
    MixedAxis(String),
    #[error("axes.{axis}[{index}] sets other variables than the first entry")]
    InconsistentBindings { axis: String, index: usize },
}

/// variables one axis value sets, in declaration order
type Bindings = Vec<(String, String)>;

/// One entry of a listed axis.
///
/// A plain value binds the axis variable. A mapping sets several variables
/// together, e.g. the components of a source flavour and its texture, and
/// the axis name is then only a label.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum AxisValue {
    Single(Scalar),
    Bound(#[serde(with = "pairs")] Vec<Var>),
}

impl AxisValue {
    fn bindings(&self, axis: &str, index: usize) -> Result<Bindings, DagError> {
        match *self {
            Self::Single(ref value) => value
                .0
                .clone()
                .map(|value| vec![(axis.to_string(), value)])
                .ok_or_else(|| DagError::NullValue(format!("axes.{axis}"))),
            Self::Bound(ref vars) => vars
                .iter()
                .map(|var| {
                    var.value
                        .clone()
                        .map(|value| (var.name.clone(), value))
                        .ok_or_else(|| {
                            DagError::NullValue(format!("axes.{axis}[{index}].{}", var.name))
                        })
                })
                .collect(),
        }
    }
}

/// Values an axis takes: an explicit list or an integer range excluding `end`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum AxisValues {
    List(Vec<AxisValue>),
    Range {
        start: i64,
        end: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
}

fn default_step() -> i64 {
    1
}

impl AxisValues {
    /// names of the variables the axis sets on every node
    fn variables<'a>(&'a self, axis: &'a str) -> Vec<&'a str> {
        match *self {
            Self::List(ref values) => match values.first() {
                Some(AxisValue::Bound(vars)) => vars.iter().map(|var| var.name.as_str()).collect(),
                _ => vec![axis],
            },
            Self::Range { .. } => vec![axis],
        }
    }

    fn bindings(&self, axis: &str) -> Result<Vec<Bindings>, DagError> {
        let bindings = match *self {
            Self::List(ref values) => {
                let bound = values
                    .iter()
                    .filter(|value| matches!(value, AxisValue::Bound(_)))
                    .count();
                if bound != 0 && bound != values.len() {
                    return Err(DagError::MixedAxis(axis.to_string()));
                }

                values
                    .iter()
                    .enumerate()
                    .map(|(index, value)| value.bindings(axis, index))
                    .collect::<Result<Vec<_>, _>>()?
            }
            Self::Range { step: 0, .. } => return Err(DagError::ZeroStep(axis.to_string())),
            Self::Range { start, end, step } => {
                let mut bindings = Vec::new();
                let mut current = start;

                while (step > 0 && current < end) || (step < 0 && current > end) {
                    bindings.push(vec![(axis.to_string(), current.to_string())]);
                    match current.checked_add(step) {
                        Some(next) => current = next,
                        // past the integer limits is past `end` as well
                        None => break,
                    }
                }

                bindings
            }
        };

        let Some(first) = bindings.first() else {
            return Err(DagError::EmptyAxis(axis.to_string()));
        };

        // every node has to see the same variables
        let names = |entry: &Bindings| {
            entry
                .iter()
                .map(|(name, _)| name.to_lowercase())
                .sorted()
                .collect_vec()
        };
        let expected = names(first);
        match bindings.iter().position(|entry| names(entry) != expected) {
            Some(index) => Err(DagError::InconsistentBindings {
                axis: axis.to_string(),
                index,
            }),
            None => Ok(bindings),
        }
    }
}

/// A swept variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Axis {
    pub name: String,
    pub values: AxisValues,
}

impl Pair for Axis {
    type Value = AxisValues;

    fn from_pair(name: String, values: AxisValues) -> Result<Self, String> {
        Ok(Self { name, values })
    }

    fn to_pair(&self) -> (&str, AxisValues) {
        (&self.name, self.values.clone())
    }
}

/// A variable shared by every node, `{name}` is replaced by the value the node binds to `name`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub value: Option<String>,
}

impl Pair for Var {
    type Value = Scalar;

    fn from_pair(name: String, value: Scalar) -> Result<Self, String> {
        Ok(Self {
            name,
            value: value.0,
        })
    }

    fn to_pair(&self) -> (&str, Scalar) {
        (&self.name, Scalar(self.value.clone()))
    }
}

fn default_prefix() -> String {
    "job".to_string()
}

/// Sweep file: one descriptor and the variables to fan it out over
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Sweep {
    pub submit: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, with = "pairs")]
    pub vars: Vec<Var>,
    #[serde(default, with = "pairs")]
    pub axes: Vec<Axis>,
}

impl Sweep {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        load_yaml(path)
    }

    /// Expand the sweep into DAG nodes.
    ///
    /// Nodes are numbered from 1 in the order of the cartesian product of the
    /// axes, the last axis varying fastest. Without axes the sweep is a single node.
    pub fn expand(&self) -> Result<DagFile, DagError> {
        if !NODE_PREFIX.is_match(&self.prefix) {
            return Err(DagError::InvalidPrefix(self.prefix.clone()));
        }

        let names = self
            .axes
            .iter()
            .flat_map(|axis| axis.values.variables(&axis.name))
            .chain(self.vars.iter().map(|var| var.name.as_str()));
        let mut seen = BTreeSet::new();
        for name in names {
            if !VAR_NAME.is_match(name) {
                return Err(DagError::InvalidVarName(name.to_string()));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(DagError::DuplicateVar(name.to_string()));
            }
        }

        let axes = self
            .axes
            .iter()
            .map(|axis| axis.values.bindings(&axis.name))
            .collect::<Result<Vec<_>, _>>()?;
        let combinations = if axes.is_empty() {
            vec![Vec::new()]
        } else {
            axes.into_iter().multi_cartesian_product().collect_vec()
        };

        debug!(
            nodes = combinations.len(),
            submit = ?self.submit,
            "Expanding sweep"
        );

        let nodes = combinations
            .into_iter()
            .enumerate()
            .map(|(index, combination)| -> Result<DagNode, DagError> {
                let swept = combination.into_iter().flatten().collect_vec();

                let mut vars = swept.clone();
                for var in self.vars.iter() {
                    let value = var
                        .value
                        .as_deref()
                        .ok_or_else(|| DagError::NullValue(format!("vars.{}", var.name)))?;
                    vars.push((var.name.clone(), interpolate(value, &swept)));
                }

                Ok(DagNode {
                    name: format!("{}{}", self.prefix, index + 1),
                    submit: self.submit.clone(),
                    vars,
                    retry: self.retry,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DagFile { nodes })
    }

    /// `$(name)` tokens of `spec` that neither this sweep nor the scheduler define
    pub fn unresolved_placeholders(&self, spec: &JobSpec) -> Vec<String> {
        let defined = self
            .axes
            .iter()
            .flat_map(|axis| axis.values.variables(&axis.name))
            .chain(self.vars.iter().map(|var| var.name.as_str()))
            .map(str::to_lowercase)
            .collect::<BTreeSet<_>>();

        spec.placeholders()
            .into_iter()
            .filter(|name| {
                let lowered = name.to_lowercase();
                !defined.contains(&lowered) && !BUILTIN_MACROS.contains(&lowered.as_str())
            })
            .collect()
    }
}

/// replace `{name}` with the value the node binds to `name`, in a single pass
/// so substituted values are never expanded again
fn interpolate(template: &str, swept: &[(String, String)]) -> String {
    INTERPOLATION
        .replace_all(template, |captures: &Captures| {
            let name = &captures[1];
            swept
                .iter()
                .find(|(bound, _)| bound == name)
                .map_or_else(|| captures[0].to_string(), |(_, value)| value.clone())
        })
        .into_owned()
}

/// One `JOB` of the DAG with its `VARS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub name: String,
    pub submit: PathBuf,
    pub vars: Vec<(String, String)>,
    pub retry: Option<u32>,
}

/// DAGMan input file, displays as the file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagFile {
    pub nodes: Vec<DagNode>,
}

fn escape_var(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for DagFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes.iter() {
            writeln!(f, "JOB\t{}\t{}", node.name, node.submit.to_string_lossy())?;
            for (name, value) in node.vars.iter() {
                writeln!(f, "VARS\t{}\t{name}=\"{}\"", node.name, escape_var(value))?;
            }
            if let Some(retry) = node.retry {
                writeln!(f, "RETRY\t{}\t{retry}", node.name)?;
            }
        }

        Ok(())
    }
}
