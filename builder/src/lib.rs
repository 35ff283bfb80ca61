//! Render, parse and fan out HTCondor submit descriptors.
//!
//! A [`JobSpec`] describes one job: executable, `--flag value` arguments,
//! resource requests, log paths, environment and opaque scheduler directives.
//! [`render`] turns it into descriptor text with a stable line order and
//! [`parse`] reads such text back. Job files ([`config::SubmitConfig`]) hold
//! named specs in YAML, [`dag::Sweep`] expands a descriptor over a parameter
//! grid into DAGMan input.

pub mod batch;
pub mod collector;
pub mod config;
pub mod dag;
pub mod parse;
pub mod render;
pub mod spec;

pub use parse::{parse, ParseError};
pub use render::{render, Line, RenderOptions, RenderedDescriptor};
pub use spec::{
    Argument, Directive, EnvironmentPolicy, JobSpec, LogChannel, Quantity, Resource, SizeUnit,
    ValidationError,
};
