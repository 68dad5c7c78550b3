//! spec-metrics: records and reports AI and human time spent on specs.
//!
//! ## Subcommands
//!
//! - `serve`: Long-running JSON-lines server on stdin/stdout
//! - `recover`: Turn a leftover session checkpoint into closed records
//! - `spec`, `project`: Print aggregated metrics
//! - `log`: Print the valid records of the metric log
//! - `record-human`: Append one human session

mod commands;
mod logging;
mod serve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use spec_metrics_core::{load_config, MetricsConfig, SystemClock};

#[derive(Parser)]
#[command(name = "spec-metrics")]
#[command(about = "Spec workflow time metrics")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.spec-metrics/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines requests on stdin until EOF
    Serve {
        /// Project root containing the metadata directory
        #[arg(long)]
        project: PathBuf,
    },

    /// Recover sessions left open by a crash
    Recover {
        #[arg(long)]
        project: PathBuf,
    },

    /// Print metrics for one spec
    Spec {
        #[arg(long)]
        project: PathBuf,

        #[arg(long)]
        spec_id: String,
    },

    /// Print metrics for the whole project
    Project {
        #[arg(long)]
        project: PathBuf,
    },

    /// Print metric records as JSON lines
    Log {
        #[arg(long)]
        project: PathBuf,

        /// Only records for this spec
        #[arg(long)]
        spec_id: Option<String>,
    },

    /// Append a human session (RFC 3339 timestamps)
    RecordHuman {
        #[arg(long)]
        project: PathBuf,

        #[arg(long)]
        spec_id: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();
    let config = resolve_config(cli.config);

    let result = match cli.command {
        Commands::Serve { project } => run_serve(project, config),
        Commands::Recover { project } => commands::recover(project, config),
        Commands::Spec { project, spec_id } => commands::spec(project, config, &spec_id),
        Commands::Project { project } => commands::project(project, config),
        Commands::Log { project, spec_id } => commands::log(project, config, spec_id.as_deref()),
        Commands::RecordHuman {
            project,
            spec_id,
            start,
            end,
        } => commands::record_human(project, config, &spec_id, &start, &end),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "spec-metrics failed");
        std::process::exit(1);
    }
}

fn resolve_config(path: Option<PathBuf>) -> MetricsConfig {
    match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load config; using defaults");
            MetricsConfig::default()
        }
    }
}

fn run_serve(project: PathBuf, config: MetricsConfig) -> Result<(), String> {
    let stdin = std::io::BufReader::new(std::io::stdin());
    let server = serve::Server::open(project, config, Arc::new(SystemClock), std::io::stdout())?;
    server
        .run(stdin)
        .map_err(|err| format!("Serve loop failed: {}", err))
}
