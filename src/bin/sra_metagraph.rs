use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use sra_metagraph::app::{App, LoadOptions};
use sra_metagraph::config::ConfigLoader;
use sra_metagraph::domain::SearchQuery;
use sra_metagraph::entrez::EntrezHttpClient;
use sra_metagraph::error::SraGraphError;
use sra_metagraph::graph::{GraphStore, MemoryGraph, Neo4jHttpStore};
use sra_metagraph::output::{JsonOutput, TextOutput};
use sra_metagraph::pipeline::CancelToken;
use sra_metagraph::progress::TracingProgress;

#[derive(Parser)]
#[command(name = "sra-metagraph")]
#[command(about = "Load NCBI SRA experiment metadata into a Neo4j graph and normalize it")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./sra-metagraph.json, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search SRA and load every matching experiment package")]
    Load(LoadArgs),
    #[command(about = "Run the repair passes over the loaded graph")]
    Postprocess,
    #[command(about = "Check the loaded graph for corruption")]
    Check,
    #[command(about = "Count nodes and relationships")]
    Stats,
    #[command(about = "Delete every node and relationship")]
    Clear,
}

#[derive(Args)]
struct LoadArgs {
    /// Entrez query, e.g. `"soil metagenome"[Organism]`
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    #[arg(long)]
    skip_postprocess: bool,

    /// Load into an in-memory graph instead of Neo4j
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SraGraphError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SraGraphError) -> u8 {
    match error {
        SraGraphError::MissingConfig(_)
        | SraGraphError::ConfigRead(_)
        | SraGraphError::ConfigParse(_)
        | SraGraphError::InvalidConfig(_)
        | SraGraphError::InvalidQuery(_) => 2,
        SraGraphError::EntrezHttp(_)
        | SraGraphError::EntrezStatus { .. }
        | SraGraphError::EntrezResponse(_)
        | SraGraphError::GraphHttp(_)
        | SraGraphError::GraphStatus { .. }
        | SraGraphError::GraphStatement { .. }
        | SraGraphError::GraphResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupted, stopping after in-flight requests");
            cancel.cancel();
        })
        .into_diagnostic()?;
    }

    let entrez = EntrezHttpClient::new(&config.entrez)?;
    let dry_run = matches!(&cli.command, Commands::Load(args) if args.dry_run);
    if dry_run {
        let app = App::new(entrez, MemoryGraph::new(), config);
        run_command(cli.command, &app, cli.json, &cancel)?;
        if !cli.json {
            TextOutput::print_stats(&app.stats()?);
        }
        Ok(())
    } else {
        let store = Neo4jHttpStore::new(&config.neo4j)?;
        let app = App::new(entrez, store, config);
        run_command(cli.command, &app, cli.json, &cancel)
    }
}

fn run_command<G: GraphStore>(
    command: Commands,
    app: &App<EntrezHttpClient, G>,
    json: bool,
    cancel: &CancelToken,
) -> miette::Result<()> {
    let sink = TracingProgress;
    match command {
        Commands::Load(args) => {
            let query: SearchQuery = args.query.join(" ").parse()?;
            let options = LoadOptions {
                skip_postprocess: args.skip_postprocess,
            };
            let result = app.load(&query, &options, cancel, &sink)?;
            if json {
                JsonOutput::print_load(&result).into_diagnostic()?;
            } else {
                TextOutput::print_load(&result);
            }
        }
        Commands::Postprocess => {
            let result = app.postprocess(cancel, &sink)?;
            if json {
                JsonOutput::print_postprocess(&result).into_diagnostic()?;
            } else {
                TextOutput::print_postprocess(&result);
            }
        }
        Commands::Check => {
            let result = app.check()?;
            if json {
                JsonOutput::print_check(&result).into_diagnostic()?;
            } else {
                TextOutput::print_check(&result);
            }
            if !result.passed {
                return Err(miette::Report::msg(
                    "graph failed the integrity check; clear it and reload",
                ));
            }
        }
        Commands::Stats => {
            let result = app.stats()?;
            if json {
                JsonOutput::print_stats(&result).into_diagnostic()?;
            } else {
                TextOutput::print_stats(&result);
            }
        }
        Commands::Clear => {
            let result = app.clear()?;
            if json {
                JsonOutput::print_clear(&result).into_diagnostic()?;
            } else {
                println!("graph cleared");
            }
        }
    }
    Ok(())
}
