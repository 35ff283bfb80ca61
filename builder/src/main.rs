use clap::{ArgAction, Parser, Subcommand};
use condorsub::{
    batch::{render_all, write_all},
    collector::{collect, JOB_FILE_GLOB},
    config::{read_file, write_file, ConfigErrors, SubmitConfig},
    dag::Sweep,
    parse, render, RenderOptions, Resource,
};
use itertools::{EitherOrBoth, Itertools};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "condorsub", author, version)]
#[command(about = "Render and inspect HTCondor submit descriptors", long_about = None)]
struct Cli {
    /// Log more, repeat for trace output (RUST_LOG takes precedence)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every job of the given job files into submit descriptors
    Render {
        /// Job files or directories containing them
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Glob selecting job files inside directories
        #[arg(long, default_value = JOB_FILE_GLOB)]
        glob: String,

        /// Only render the job with this name
        #[arg(long)]
        job: Option<String>,

        /// Write descriptors here instead of each file's output_dir
        #[arg(short = 'o', long)]
        out_dir: Option<PathBuf>,

        /// Print descriptors instead of writing them
        #[arg(long, conflicts_with = "out_dir")]
        stdout: bool,
    },
    /// Parse a submit descriptor and print it as a YAML job spec
    Parse { path: PathBuf },
    /// Check that submit descriptors are in canonical rendered form
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Canonical order of request_* lines
        #[arg(long, value_delimiter = ',')]
        resource_order: Option<Vec<Resource>>,
    },
    /// Expand a sweep file into a DAGMan input file
    Dag {
        sweep: PathBuf,

        /// Write the DAG here instead of printing it
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.cmd {
        Commands::Render {
            paths,
            glob,
            job,
            out_dir,
            stdout,
        } => render_files(&paths, &glob, job.as_deref(), out_dir.as_deref(), stdout),
        Commands::Parse { path } => parse_file(&path),
        Commands::Check {
            paths,
            resource_order,
        } => check_files(&paths, resource_order),
        Commands::Dag { sweep, out } => expand_sweep(&sweep, out.as_deref()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print(text: &str) -> Result<(), ConfigErrors> {
    io::stdout()
        .lock()
        .write_all(text.as_bytes())
        .map_err(|source| ConfigErrors::Write {
            path: PathBuf::from("<stdout>"),
            source,
        })
}

fn render_files(
    paths: &[PathBuf],
    glob: &str,
    job: Option<&str>,
    out_dir: Option<&Path>,
    stdout: bool,
) -> Result<ExitCode, ConfigErrors> {
    let files = collect(paths, glob)?;
    if files.is_empty() {
        warn!("No job files matched {glob}");
        return Ok(ExitCode::SUCCESS);
    }

    let configs = files
        .iter()
        .map(|path| SubmitConfig::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    // run all checks before bailing out so every problem shows up at once
    let failed = configs
        .iter()
        .map(SubmitConfig::preflight_checks)
        .fold(false, |failed, contains_error| failed | contains_error);
    if failed {
        return Err(ConfigErrors::FailedPreflight);
    }

    let jobs = render_all(&configs, job, out_dir)?;

    if stdout {
        for (index, job) in jobs.iter().enumerate() {
            if index > 0 {
                print("\n")?;
            }
            print(&job.descriptor.to_string())?;
        }
    } else {
        write_all(&jobs)?;
    }

    info!("Rendered {} descriptors from {} job files", jobs.len(), configs.len());

    Ok(ExitCode::SUCCESS)
}

fn parse_file(path: &Path) -> Result<ExitCode, ConfigErrors> {
    let spec = parse(&read_file(path)?).map_err(|source| ConfigErrors::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Err(e) = spec.validate() {
        warn!("{} parses but would not render: {e}", path.to_string_lossy());
    }

    let yaml = serde_yaml::to_string(&spec).map_err(|source| ConfigErrors::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    print(&yaml)?;

    Ok(ExitCode::SUCCESS)
}

fn check_files(
    paths: &[PathBuf],
    resource_order: Option<Vec<Resource>>,
) -> Result<ExitCode, ConfigErrors> {
    let mut options = RenderOptions::default();
    if let Some(order) = resource_order {
        options.resource_order = order;
    }

    let mut all_canonical = true;

    for path in paths {
        let name = path.to_string_lossy();
        let text = read_file(path)?;

        let rendered = match parse(&text) {
            Ok(spec) => match render(&spec, &options) {
                Ok(rendered) => rendered.to_string(),
                Err(e) => {
                    error!("{name}: {e}");
                    all_canonical = false;
                    continue;
                }
            },
            Err(e) => {
                error!("{name}: {e}");
                all_canonical = false;
                continue;
            }
        };

        // compare without comments and blank lines, those are not part of the job
        let significant = |line: &&str| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        };
        let difference = text
            .lines()
            .filter(significant)
            .zip_longest(rendered.lines().filter(significant))
            .find(|pair| match pair {
                EitherOrBoth::Both(found, expected) => found.trim_end() != *expected,
                _ => true,
            });

        match difference {
            None => debug!("{name} is canonical"),
            Some(pair) => {
                all_canonical = false;
                let (found, expected) = (pair.clone().left(), pair.right());
                warn!(
                    "{name} differs from its canonical form: found {:?}, expected {:?}",
                    found.unwrap_or("<end of file>"),
                    expected.unwrap_or("<end of file>")
                );
            }
        }
    }

    Ok(if all_canonical {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn expand_sweep(path: &Path, out: Option<&Path>) -> Result<ExitCode, ConfigErrors> {
    let sweep = Sweep::load(path)?;
    let dag = sweep.expand()?;

    // the descriptor is optional here, it may only exist on the submit host
    match read_file(&sweep.submit).map(|text| parse(&text)) {
        Ok(Ok(spec)) => {
            for name in sweep.unresolved_placeholders(&spec) {
                warn!(
                    "{} uses $({name}) but the sweep does not define it",
                    sweep.submit.to_string_lossy()
                );
            }
        }
        Ok(Err(e)) => warn!("Failed to parse {}: {e}", sweep.submit.to_string_lossy()),
        Err(e) => debug!("Skipping placeholder check: {e}"),
    }

    let text = dag.to_string();
    match out {
        Some(out) => {
            write_file(out, &text)?;
            info!("dag file = {}", out.to_string_lossy());
        }
        None => print(&text)?,
    }
    info!("total jobs = {}", dag.nodes.len());

    Ok(ExitCode::SUCCESS)
}
