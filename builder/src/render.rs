#[cfg(test)]
mod render_test;

use crate::spec::{Argument, EnvironmentPolicy, JobSpec, Resource, ValidationError};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single line of a submit descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Directive { key: String, value: String },
    Comment(String),
    Blank,
    /// terminal `queue [N]`
    Queue(u32),
}

impl Line {
    fn directive(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Directive {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directive { key, value } if value.is_empty() => write!(f, "{key} ="),
            Self::Directive { key, value } => write!(f, "{key} = {value}"),
            Self::Comment(text) if text.is_empty() => f.write_str("#"),
            Self::Comment(text) => write!(f, "# {text}"),
            Self::Blank => Ok(()),
            Self::Queue(1) => f.write_str("queue"),
            Self::Queue(count) => write!(f, "queue {count}"),
        }
    }
}

/// Rendered submit descriptor, displays as the file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDescriptor {
    lines: Vec<Line>,
}

impl RenderedDescriptor {
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<Line> {
        self.lines
    }
}

impl fmt::Display for RenderedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines.iter() {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

fn default_resource_order() -> Vec<Resource> {
    vec![
        Resource::Memory,
        Resource::Cpus,
        Resource::Disk,
        Resource::Gpus,
    ]
}

/// Caller supplied presentation choices that are not part of the job itself
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RenderOptions {
    /// request lines follow this order, resources not listed come after sorted by name
    #[serde(default = "default_resource_order")]
    pub resource_order: Vec<Resource>,
    /// comment placed at the top of the descriptor
    #[serde(default)]
    pub header: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            resource_order: default_resource_order(),
            header: None,
        }
    }
}

/// Render `spec` into a submit descriptor.
///
/// Lines come in a fixed order: header comment, `Executable`, `Arguments`,
/// a blank separator, log channels, environment, resource requests,
/// `InitialDir`, the directives in input order and finally `queue`.
pub fn render(spec: &JobSpec, options: &RenderOptions) -> Result<RenderedDescriptor, ValidationError> {
    spec.validate()?;

    let mut lines = Vec::new();

    if let Some(ref header) = options.header {
        lines.extend(header.lines().map(|line| Line::Comment(line.trim_end().to_string())));
    }

    lines.push(Line::directive("Executable", spec.executable.as_str()));
    if !spec.arguments.is_empty() {
        lines.push(Line::directive(
            "Arguments",
            format!("\"{}\"", join_arguments(&spec.arguments)),
        ));
    }
    lines.push(Line::Blank);

    lines.extend(
        spec.log_paths
            .iter()
            .map(|(channel, path)| Line::directive(channel.key(), path.as_str())),
    );

    match spec.environment {
        Some(EnvironmentPolicy::InheritAll) => lines.push(Line::directive("GetEnv", "True")),
        Some(EnvironmentPolicy::InheritNamed(ref names)) => {
            lines.push(Line::directive("GetEnv", names.join(", ")))
        }
        Some(EnvironmentPolicy::Explicit(ref variables)) => {
            let joined = variables
                .iter()
                .map(|(name, value)| format!("{name}={}", quote_environment_value(value)))
                .join(" ");
            lines.push(Line::directive("Environment", format!("\"{joined}\"")))
        }
        None => {}
    }

    let rank = |resource: &Resource| {
        options
            .resource_order
            .iter()
            .position(|ordered| ordered == resource)
            .unwrap_or(usize::MAX)
    };
    lines.extend(
        spec.resources
            .iter()
            .sorted_by(|(left, _), (right, _)| rank(left).cmp(&rank(right)).then(left.cmp(right)))
            .map(|(resource, quantity)| Line::directive(resource.request_key(), quantity.to_string())),
    );

    if let Some(ref initial_dir) = spec.initial_dir {
        lines.push(Line::directive("InitialDir", initial_dir.as_str()));
    }

    lines.extend(
        spec.directives
            .iter()
            .map(|directive| Line::directive(directive.name.as_str(), directive.value.as_str())),
    );

    lines.push(Line::Queue(spec.queue_count));

    Ok(RenderedDescriptor { lines })
}

/// Join arguments into the body of a new-syntax `Arguments = "..."` value
pub fn join_arguments(arguments: &[Argument]) -> String {
    arguments
        .iter()
        .map(|argument| match argument.value {
            Some(ref value) => format!("--{} {}", argument.flag, quote_argument(value)),
            None => format!("--{}", argument.flag),
        })
        .join(" ")
}

/// Quote a single argument following the scheduler's new argument syntax:
/// whitespace groups with single quotes (doubled inside), double quotes are doubled.
fn quote_argument(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(char::is_whitespace)
        || value.contains('\'')
        || value.starts_with("--");

    let quoted = if needs_quotes {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    };

    quoted.replace('"', "\"\"")
}

fn quote_environment_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) || value.contains('\'') {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}
