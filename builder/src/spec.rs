pub mod resource;
pub mod yaml;


pub use resource::{Quantity, QuantityError, Resource, SizeUnit};

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use thiserror::Error;
use yaml::{pairs, Pair, Scalar};

static DIRECTIVE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\+|(?i:my)\.)?[A-Za-z_][A-Za-z0-9_.]*$").expect("directive pattern is valid")
});
static ENVIRONMENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("environment pattern is valid"));
static ENVIRONMENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_*][A-Za-z0-9_*]*$").expect("getenv pattern is valid"));
static RESOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("resource pattern is valid"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(([A-Za-z0-9_.]+)\)").expect("placeholder pattern is valid"));

/// keys the renderer emits itself, these can't be passed through as directives
const BUILTIN_KEYS: [&str; 9] = [
    "executable",
    "arguments",
    "log",
    "output",
    "error",
    "getenv",
    "environment",
    "initialdir",
    "queue",
];

/// returns true if `key` is emitted by the renderer and not an opaque directive
pub fn is_builtin_key(key: &str) -> bool {
    let key = key.to_lowercase();

    BUILTIN_KEYS.contains(&key.as_str()) || key.starts_with("request_")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("executable must not be empty")]
    EmptyExecutable,
    #[error("log_paths must set at least one of log, output or error")]
    MissingLogPaths,
    #[error("log_paths.{0} must not be empty")]
    EmptyLogPath(LogChannel),
    #[error("resources.{resource} must be positive, got {quantity}")]
    NonPositiveResource {
        resource: Resource,
        quantity: Quantity,
    },
    #[error("resources.{0} is not a valid resource name")]
    InvalidResourceName(String),
    #[error("resources.{0} is requested more than once, resource names ignore case")]
    DuplicateResource(String),
    #[error("arguments contain --{0} more than once")]
    DuplicateFlag(String),
    #[error("arguments flag {flag:?} is invalid: {reason}")]
    InvalidFlag { flag: String, reason: &'static str },
    #[error("queue_count must be positive")]
    ZeroQueueCount,
    #[error("directives.{0} is emitted by the builder and can't be set as a directive")]
    ReservedDirective(String),
    #[error("directives.{0} is defined more than once")]
    DuplicateDirective(String),
    #[error("directives key {0:?} is not a valid directive name")]
    InvalidDirectiveName(String),
    #[error("environment must name at least one variable to inherit")]
    EmptyEnvironment,
    #[error("environment variable name {0:?} is invalid")]
    InvalidEnvironmentName(String),
    #[error("environment.{0} must not contain a double quote")]
    InvalidEnvironmentValue(String),
    #[error("{0} must not span multiple lines")]
    MultilineValue(String),
    #[error("{0} must not start or end with whitespace")]
    SurroundingWhitespace(String),
}

/// Output channel of a job that the scheduler writes to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Log,
    Output,
    Error,
}

impl LogChannel {
    pub const ALL: [LogChannel; 3] = [Self::Log, Self::Output, Self::Error];

    /// canonical key of the submit line for this channel
    pub fn key(&self) -> &'static str {
        match self {
            Self::Log => "Log",
            Self::Output => "Output",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Log => "log",
            Self::Output => "output",
            Self::Error => "error",
        })
    }
}

/// A `--flag value` pair passed to the executable, `value` is `None` for bare switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub flag: String,
    pub value: Option<String>,
}

impl Argument {
    pub fn new(flag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            value: Some(value.into()),
        }
    }

    pub fn switch(flag: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            value: None,
        }
    }
}

impl Pair for Argument {
    type Value = Scalar;

    fn from_pair(flag: String, value: Scalar) -> Result<Self, String> {
        Ok(Self {
            flag,
            value: value.0,
        })
    }

    fn to_pair(&self) -> (&str, Scalar) {
        (&self.flag, Scalar(self.value.clone()))
    }
}

/// An opaque scheduler directive such as `universe` or `requirements`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub value: String,
}

impl Directive {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Pair for Directive {
    type Value = Scalar;

    fn from_pair(name: String, value: Scalar) -> Result<Self, String> {
        match value.0 {
            Some(value) => Ok(Self { name, value }),
            None => Err(format!("directives.{name} needs a value")),
        }
    }

    fn to_pair(&self) -> (&str, Scalar) {
        (&self.name, Scalar::text(self.value.clone()))
    }
}

/// Which environment the job sees on the execute node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvironmentRepr", into = "EnvironmentRepr")]
pub enum EnvironmentPolicy {
    /// copy the whole submitter environment (`GetEnv = True`)
    InheritAll,
    /// copy the named variables, `*` patterns allowed
    InheritNamed(Vec<String>),
    /// set exactly these variables
    Explicit(BTreeMap<String, String>),
}

/// YAML shape: `true`, a list of names, or a mapping of variables
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EnvironmentRepr {
    All(bool),
    Named(Vec<String>),
    Explicit(BTreeMap<String, Scalar>),
}

impl TryFrom<EnvironmentRepr> for EnvironmentPolicy {
    type Error = String;

    fn try_from(repr: EnvironmentRepr) -> Result<Self, Self::Error> {
        match repr {
            EnvironmentRepr::All(true) => Ok(Self::InheritAll),
            EnvironmentRepr::All(false) => {
                Err("environment: false is the default, omit the key instead".to_string())
            }
            EnvironmentRepr::Named(names) => Ok(Self::InheritNamed(names)),
            EnvironmentRepr::Explicit(variables) => variables
                .into_iter()
                .map(|(name, value)| match value.0 {
                    Some(value) => Ok((name, value)),
                    None => Err(format!("environment.{name} needs a value")),
                })
                .collect::<Result<_, _>>()
                .map(Self::Explicit),
        }
    }
}

impl From<EnvironmentPolicy> for EnvironmentRepr {
    fn from(policy: EnvironmentPolicy) -> Self {
        match policy {
            EnvironmentPolicy::InheritAll => Self::All(true),
            EnvironmentPolicy::InheritNamed(names) => Self::Named(names),
            EnvironmentPolicy::Explicit(variables) => Self::Explicit(
                variables
                    .into_iter()
                    .map(|(name, value)| (name, Scalar::text(value)))
                    .collect(),
            ),
        }
    }
}

fn default_queue_count() -> u32 {
    1
}

fn is_default_queue_count(count: &u32) -> bool {
    *count == 1
}

/// Everything needed to render one submit descriptor
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    #[serde(default)]
    pub executable: String,
    #[serde(default, with = "pairs", skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Argument>,
    #[serde(
        default,
        deserialize_with = "resource::unique_requests",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub resources: BTreeMap<Resource, Quantity>,
    #[serde(default, alias = "logs")]
    pub log_paths: BTreeMap<LogChannel, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_dir: Option<String>,
    #[serde(default, with = "pairs", skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    #[serde(
        default = "default_queue_count",
        skip_serializing_if = "is_default_queue_count"
    )]
    pub queue_count: u32,
}

impl JobSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
            resources: BTreeMap::new(),
            log_paths: BTreeMap::new(),
            environment: None,
            initial_dir: None,
            directives: Vec::new(),
            queue_count: default_queue_count(),
        }
    }

    /// Check every invariant a renderable spec has to hold, reporting the first violation
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.executable.trim().is_empty() {
            return Err(ValidationError::EmptyExecutable);
        }
        plain_value("executable", &self.executable)?;

        self.validate_arguments()?;

        for (resource, quantity) in self.resources.iter() {
            if let Resource::Other(name) = resource {
                // names of known resources have to use their variant to render consistently
                let known = !matches!(name.parse(), Ok(Resource::Other(_)));
                if known || !RESOURCE_NAME.is_match(name) {
                    return Err(ValidationError::InvalidResourceName(name.clone()));
                }
            }
            if !quantity.is_positive() {
                return Err(ValidationError::NonPositiveResource {
                    resource: resource.clone(),
                    quantity: *quantity,
                });
            }
        }

        // the scheduler reads `request_Foo` and `request_foo` as one key
        if let Some(resource) = self
            .resources
            .keys()
            .duplicates_by(|resource| resource.request_key().to_lowercase())
            .next()
        {
            return Err(ValidationError::DuplicateResource(resource.to_string()));
        }

        if self.log_paths.is_empty() {
            return Err(ValidationError::MissingLogPaths);
        }
        for (channel, path) in self.log_paths.iter() {
            if path.trim().is_empty() {
                return Err(ValidationError::EmptyLogPath(*channel));
            }
            plain_value(&format!("log_paths.{channel}"), path)?;
        }

        if let Some(ref environment) = self.environment {
            validate_environment(environment)?;
        }

        if let Some(ref initial_dir) = self.initial_dir {
            plain_value("initial_dir", initial_dir)?;
        }

        self.validate_directives()?;

        if self.queue_count == 0 {
            return Err(ValidationError::ZeroQueueCount);
        }

        Ok(())
    }

    fn validate_arguments(&self) -> Result<(), ValidationError> {
        for argument in self.arguments.iter() {
            let flag = &argument.flag;
            let reason = if flag.is_empty() {
                Some("flag must not be empty")
            } else if flag.starts_with('-') {
                Some("flag is written without leading dashes")
            } else if flag.chars().any(char::is_whitespace) {
                Some("flag must not contain whitespace")
            } else if flag.contains(['"', '\'']) {
                Some("flag must not contain quotes")
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(ValidationError::InvalidFlag {
                    flag: flag.clone(),
                    reason,
                });
            }
            if let Some(ref value) = argument.value {
                single_line(&format!("arguments.{flag}"), value)?;
            }
        }

        match self.arguments.iter().map(|argument| &argument.flag).duplicates().next() {
            Some(flag) => Err(ValidationError::DuplicateFlag(flag.clone())),
            None => Ok(()),
        }
    }

    fn validate_directives(&self) -> Result<(), ValidationError> {
        for directive in self.directives.iter() {
            if !DIRECTIVE_NAME.is_match(&directive.name) {
                return Err(ValidationError::InvalidDirectiveName(directive.name.clone()));
            }
            if is_builtin_key(&directive.name) {
                return Err(ValidationError::ReservedDirective(directive.name.clone()));
            }
            plain_value(&format!("directives.{}", directive.name), &directive.value)?;
        }

        // the scheduler treats keys case-insensitively
        match self
            .directives
            .iter()
            .duplicates_by(|directive| directive.name.to_lowercase())
            .next()
        {
            Some(directive) => Err(ValidationError::DuplicateDirective(directive.name.clone())),
            None => Ok(()),
        }
    }

    /// All `$(name)` substitution tokens the descriptor leaves to the scheduler
    pub fn placeholders(&self) -> BTreeSet<String> {
        let arguments = self
            .arguments
            .iter()
            .filter_map(|argument| argument.value.as_deref());
        let directives = self.directives.iter().map(|directive| directive.value.as_str());

        std::iter::once(self.executable.as_str())
            .chain(arguments)
            .chain(self.log_paths.values().map(String::as_str))
            .chain(self.initial_dir.as_deref())
            .chain(directives)
            .flat_map(|text| PLACEHOLDER.captures_iter(text))
            .map(|captures| captures[1].to_string())
            .collect()
    }
}

fn single_line(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.contains(['\n', '\r']) {
        Err(ValidationError::MultilineValue(field.to_string()))
    } else {
        Ok(())
    }
}

/// unquoted values are trimmed by the scheduler, so surrounding whitespace would not survive
fn plain_value(field: &str, value: &str) -> Result<(), ValidationError> {
    single_line(field, value)?;

    if value.trim() != value {
        Err(ValidationError::SurroundingWhitespace(field.to_string()))
    } else {
        Ok(())
    }
}

fn validate_environment(environment: &EnvironmentPolicy) -> Result<(), ValidationError> {
    match environment {
        EnvironmentPolicy::InheritAll => Ok(()),
        EnvironmentPolicy::InheritNamed(names) => {
            if names.is_empty() {
                return Err(ValidationError::EmptyEnvironment);
            }

            // `GetEnv = True/False` would read back as a boolean
            let invalid = |name: &&String| {
                !ENVIRONMENT_PATTERN.is_match(name)
                    || name.eq_ignore_ascii_case("true")
                    || name.eq_ignore_ascii_case("false")
            };
            match names.iter().find(invalid) {
                Some(name) => Err(ValidationError::InvalidEnvironmentName(name.clone())),
                None => Ok(()),
            }
        }
        EnvironmentPolicy::Explicit(variables) => {
            for (name, value) in variables.iter() {
                if !ENVIRONMENT_NAME.is_match(name) {
                    return Err(ValidationError::InvalidEnvironmentName(name.clone()));
                }
                if value.contains('"') {
                    return Err(ValidationError::InvalidEnvironmentValue(name.clone()));
                }
                single_line(&format!("environment.{name}"), value)?;
            }

            Ok(())
        }
    }
}
