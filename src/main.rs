// Command-line entry point for Zumanji.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use zumanji::api::server::{self, ServerState};
use zumanji::application::{CompareUsecase, ImportPipeline, ImportTarget};
use zumanji::common::config::Settings;
use zumanji::common::logging::init_logging;
use zumanji::domain::history::historical_calls;
use zumanji::domain::model::BuildKey;
use zumanji::domain::store::DiskBuildStore;
use zumanji::infrastructure::PayloadLoader;
use zumanji::ports::report_exporter::{JsonExporter, TextExporter};
use zumanji::ports::ReportExporter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database directory (overrides the settings file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Log debug events
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import JSON reports (files or directories of *.json)
    Import {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Project label
        #[arg(short, long)]
        project: Option<String>,

        /// Revision label
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Print the test tree of a build
    Tree {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        revision: String,
    },

    /// Diff the call trace of a test against another run
    Diff {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        revision: String,
        /// Test label
        #[arg(short, long)]
        label: String,
        /// Comparison revision (default: previous build)
        #[arg(long)]
        against: Option<String>,
        /// Comparison test label (default: same label)
        #[arg(long)]
        against_label: Option<String>,
    },

    /// Summarize call-count changes against another build
    Changes {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        revision: String,
        /// Comparison revision (default: previous build)
        #[arg(long)]
        against: Option<String>,
    },

    /// Print historical call counts of tests
    History {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        revision: String,
        #[arg(short, long, required = true)]
        label: Vec<String>,
    },

    /// Run the JSON command server
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        settings.db_path = db.clone();
    }

    let store = DiskBuildStore::new(&settings.db_path)
        .with_context(|| format!("Cannot open database {}", settings.db_path.display()))?;
    let exporter: &dyn ReportExporter = match cli.format {
        Format::Text => &TextExporter,
        Format::Json => &JsonExporter,
    };

    match cli.command {
        Command::Import {
            inputs,
            project,
            revision,
        } => {
            let pipeline = ImportPipeline::new(&store);
            let target = ImportTarget { project, revision };
            for path in PayloadLoader::collect_reports(&inputs)? {
                info!(path = %path.display(), "reading json file");
                let payload = PayloadLoader::load_file(&path)?;
                let build = pipeline
                    .import(&payload, &target)
                    .with_context(|| format!("Failed to import {}", path.display()))?;
                println!(
                    "Imported {} (build {}, {} tests)",
                    path.display(),
                    build.key,
                    build.num_tests
                );
            }
        }
        Command::Tree { project, revision } => {
            let compare = CompareUsecase::new(&store);
            let key = BuildKey::new(project, revision);
            let build = compare.build(&key)?;
            let tree = compare.tree(&key)?;
            println!("{}", exporter.render_tree(&build, &tree)?);
        }
        Command::Diff {
            project,
            revision,
            label,
            against,
            against_label,
        } => {
            let compare = CompareUsecase::new(&store);
            let against = against.map(|r| BuildKey::new(project.clone(), r));
            let diff = compare.trace_diff(
                &BuildKey::new(project, revision),
                &label,
                against.as_ref(),
                against_label.as_deref(),
            )?;
            println!("{}", exporter.render_diff(&diff)?);
        }
        Command::Changes {
            project,
            revision,
            against,
        } => {
            let compare = CompareUsecase::new(&store);
            let against = against.map(|r| BuildKey::new(project.clone(), r));
            let changes = compare.changes(&BuildKey::new(project, revision), against.as_ref())?;
            println!("{}", exporter.render_changes(&changes)?);
        }
        Command::History {
            project,
            revision,
            label,
        } => {
            let build = CompareUsecase::new(&store).build(&BuildKey::new(project, revision))?;
            let labels: Vec<&str> = label.iter().map(String::as_str).collect();
            let series = historical_calls(
                &store,
                &build,
                &labels,
                &settings.call_types,
                settings.history_points,
            )?;
            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&series)?),
                Format::Text => {
                    println!("call types: {}", settings.call_types.join(", "));
                    for (label, points) in &series {
                        let cells: Vec<String> = points
                            .iter()
                            .map(|p| match &p.build {
                                Some(key) => format!("{}={:?}", key.revision, p.calls),
                                None => "-".to_string(),
                            })
                            .collect();
                        println!("{}: {}", label, cells.join(" "));
                    }
                }
            }
        }
        Command::Serve { port } => {
            let port = port.unwrap_or(settings.server.port);
            let state = Arc::new(ServerState::new(Arc::new(store), settings));
            server::start_server(port, state)?;
        }
    }

    Ok(())
}
