
use crate::spec::{Argument, Directive, EnvironmentPolicy, JobSpec, LogChannel, Quantity, Resource};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeMap, mem};
use thiserror::Error;
use tracing::trace;

// 1) key: optionally `+` prefixed attribute name
// 2) value: rest of the line, may be empty
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\+?[A-Za-z_][A-Za-z0-9_.]*)\s*=\s*(.*)$").expect("key value pattern is valid")
});
// `Arguments` is also accepted without the `=`
static BARE_ARGUMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:arguments)\s+(.*)$").expect("arguments pattern is valid"));
static QUEUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:queue)(?:\s+(\d+))?$").expect("queue pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: expected `key = value`, found {content:?}")]
    MalformedLine { line: usize, content: String },
    #[error("line {line}: invalid {key} value ({reason}) in {content:?}")]
    InvalidValue {
        line: usize,
        key: String,
        reason: String,
        content: String,
    },
    #[error("line {line}: {key} is already set, found again in {content:?}")]
    DuplicateKey {
        line: usize,
        key: String,
        content: String,
    },
    #[error("line {line}: expected `queue` or `queue <count>` with a positive count, found {content:?}")]
    MalformedQueue { line: usize, content: String },
    #[error("line {line}: only comments may follow the terminal queue directive, found {content:?}")]
    TrailingContent { line: usize, content: String },
    #[error("missing terminal `queue` directive")]
    MissingQueue,
}

/// Position of the line being parsed, used to build errors
struct Context<'a> {
    line: usize,
    content: &'a str,
}

impl Context<'_> {
    fn invalid(&self, key: &str, reason: impl Into<String>) -> ParseError {
        ParseError::InvalidValue {
            line: self.line,
            key: key.to_string(),
            reason: reason.into(),
            content: self.content.to_string(),
        }
    }

    fn duplicate(&self, key: &str) -> ParseError {
        ParseError::DuplicateKey {
            line: self.line,
            key: key.to_string(),
            content: self.content.to_string(),
        }
    }
}

/// Parse submit descriptor text back into a [`JobSpec`].
///
/// Blank lines and `#` comments are skipped and not preserved. Keys the
/// renderer emits itself are matched case-insensitively, every other key
/// becomes a directive in file order. The text has to end with a `queue`
/// line, optionally followed by comments.
pub fn parse(text: &str) -> Result<JobSpec, ParseError> {
    let mut spec = JobSpec::new(String::new());
    let mut executable_seen = false;
    let mut arguments_seen = false;
    let mut queue = None;

    for (lineno, raw) in text.lines().enumerate() {
        let context = Context {
            line: lineno + 1,
            content: raw,
        };
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if queue.is_some() {
            return Err(ParseError::TrailingContent {
                line: context.line,
                content: raw.to_string(),
            });
        }

        let first_word = line
            .split(|c: char| c.is_whitespace() || c == '=')
            .next()
            .unwrap_or_default();
        if first_word.eq_ignore_ascii_case("queue") {
            queue = Some(parse_queue(line, &context)?);
            continue;
        }

        let (key, value) = if let Some(captures) = KEY_VALUE.captures(line) {
            (
                captures.get(1).map_or("", |m| m.as_str()),
                captures.get(2).map_or("", |m| m.as_str()),
            )
        } else if let Some(captures) = BARE_ARGUMENTS.captures(line) {
            ("Arguments", captures.get(1).map_or("", |m| m.as_str()))
        } else {
            return Err(ParseError::MalformedLine {
                line: context.line,
                content: raw.to_string(),
            });
        };

        trace!(line = context.line, key, value, "Parsed descriptor line");

        match key.to_lowercase().as_str() {
            "executable" => {
                if mem::replace(&mut executable_seen, true) {
                    return Err(context.duplicate(key));
                }
                if value.is_empty() {
                    return Err(context.invalid(key, "executable must not be empty"));
                }
                spec.executable = value.to_string();
            }
            "arguments" => {
                if mem::replace(&mut arguments_seen, true) {
                    return Err(context.duplicate(key));
                }
                spec.arguments =
                    parse_arguments(value).map_err(|reason| context.invalid(key, reason))?;
            }
            "getenv" | "environment" => {
                if spec.environment.is_some() {
                    return Err(context.duplicate("GetEnv/Environment"));
                }
                spec.environment = if key.eq_ignore_ascii_case("getenv") {
                    parse_getenv(value)
                } else {
                    parse_environment(value).map(Some)
                }
                .map_err(|reason| context.invalid(key, reason))?;
            }
            "initialdir" => {
                if spec.initial_dir.replace(value.to_string()).is_some() {
                    return Err(context.duplicate(key));
                }
            }
            lowered => {
                if let Some(channel) = LogChannel::ALL
                    .into_iter()
                    .find(|channel| channel.key().eq_ignore_ascii_case(lowered))
                {
                    if value.is_empty() {
                        return Err(context.invalid(key, "path must not be empty"));
                    }
                    if spec.log_paths.insert(channel, value.to_string()).is_some() {
                        return Err(context.duplicate(key));
                    }
                } else if let Some(name) = lowered.strip_prefix("request_") {
                    // keep the original spelling for resources the builder does not know
                    let resource: Resource = key[key.len() - name.len()..].to_string().into();
                    let quantity = value
                        .parse::<Quantity>()
                        .map_err(|error| context.invalid(key, error.to_string()))?;

                    let request_key = resource.request_key();
                    if spec
                        .resources
                        .keys()
                        .any(|seen| seen.request_key().eq_ignore_ascii_case(&request_key))
                    {
                        return Err(context.duplicate(key));
                    }
                    spec.resources.insert(resource, quantity);
                } else if spec
                    .directives
                    .iter()
                    .any(|directive| directive.name.eq_ignore_ascii_case(key))
                {
                    return Err(context.duplicate(key));
                } else {
                    spec.directives.push(Directive::new(key, value));
                }
            }
        }
    }

    spec.queue_count = queue.ok_or(ParseError::MissingQueue)?;

    Ok(spec)
}

fn parse_queue(line: &str, context: &Context) -> Result<u32, ParseError> {
    let malformed = || ParseError::MalformedQueue {
        line: context.line,
        content: context.content.to_string(),
    };

    let captures = QUEUE.captures(line).ok_or_else(malformed)?;
    match captures.get(1) {
        Some(count) => match count.as_str().parse::<u32>() {
            Ok(count) if count > 0 => Ok(count),
            _ => Err(malformed()),
        },
        None => Ok(1),
    }
}

/// A word of an argument string, `quoted` if any part of it was single-quoted
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

/// Split the body of a new-syntax argument string into words.
///
/// Words are separated by whitespace, single quotes group (with `''` for a
/// literal quote) and `""` stands for a literal double quote.
fn split_new_syntax(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if chars.next_if_eq(&'"').is_none() {
                    return Err("unescaped double quote".to_string());
                }
                current.push('"');
                in_token = true;
            }
            '\'' => {
                in_token = true;
                quoted = true;

                loop {
                    match chars.next() {
                        Some('\'') if chars.next_if_eq(&'\'').is_some() => current.push('\''),
                        Some('\'') => break,
                        Some('"') if chars.next_if_eq(&'"').is_some() => current.push('"'),
                        Some('"') => return Err("unescaped double quote".to_string()),
                        Some(other) => current.push(other),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(Token {
                        text: mem::take(&mut current),
                        quoted,
                    });
                    in_token = false;
                    quoted = false;
                }
            }
            other => {
                current.push(other);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(Token {
            text: current,
            quoted,
        });
    }

    Ok(tokens)
}

/// Split a double quoted value (new syntax) or a plain whitespace separated one (old syntax)
fn split_value(value: &str) -> Result<Vec<Token>, String> {
    match value.strip_prefix('"') {
        Some(rest) => match rest.strip_suffix('"') {
            Some(body) => split_new_syntax(body),
            None => Err("missing closing double quote".to_string()),
        },
        None => Ok(value
            .split_whitespace()
            .map(|word| Token {
                text: word.to_string(),
                quoted: false,
            })
            .collect()),
    }
}

fn parse_arguments(value: &str) -> Result<Vec<Argument>, String> {
    let mut arguments = Vec::new();
    let mut tokens = split_value(value)?.into_iter().peekable();

    while let Some(token) = tokens.next() {
        let flag = match token.text.strip_prefix("--") {
            Some(flag) if !token.quoted && !flag.is_empty() => flag.to_string(),
            _ => return Err(format!("expected a --flag, found {:?}", token.text)),
        };

        let value = tokens
            .next_if(|next| next.quoted || !next.text.starts_with("--"))
            .map(|next| next.text);

        arguments.push(Argument { flag, value });
    }

    Ok(arguments)
}

fn parse_getenv(value: &str) -> Result<Option<EnvironmentPolicy>, String> {
    if value.eq_ignore_ascii_case("true") {
        return Ok(Some(EnvironmentPolicy::InheritAll));
    }
    if value.eq_ignore_ascii_case("false") {
        return Ok(None);
    }

    let names: Vec<String> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        Err("expected True, False or a list of variable names".to_string())
    } else {
        Ok(Some(EnvironmentPolicy::InheritNamed(names)))
    }
}

fn parse_environment(value: &str) -> Result<EnvironmentPolicy, String> {
    // old syntax separates assignments with `;` and has no quoting
    let assignments = if value.starts_with('"') {
        split_value(value)?
            .into_iter()
            .map(|token| token.text)
            .collect::<Vec<_>>()
    } else {
        value
            .split(';')
            .map(str::trim)
            .filter(|assignment| !assignment.is_empty())
            .map(str::to_string)
            .collect()
    };

    assignments
        .into_iter()
        .map(|assignment| match assignment.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => Err(format!("expected NAME=value, found {assignment:?}")),
        })
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(EnvironmentPolicy::Explicit)
}
