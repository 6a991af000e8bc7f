use std::error::Error;

use alvys_ingest::{
    alvys::entity::Entity,
    config::{load_env_file, Config},
    pipeline::{Mode, Pipeline, RunRequest},
};
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Ingest Alvys TMS data for one tenant", long_about = None)]
struct Cli {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod", global = true)]
    env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tenant SCAC
    #[arg(short, long)]
    scac: String,

    /// Entities to process, or `all`.  Defaults to ALVYS_ENTITIES.
    entities: Vec<String>,

    /// Process the week that ended this many weeks before the last one
    #[arg(short, long, default_value_t = 0)]
    weeks_ago: u32,

    /// Show what would run without calling the API or writing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export entities to gzipped JSON files
    Export(RunArgs),
    /// Load previously exported files into DuckDB
    Insert(RunArgs),
    /// Export, then load
    ExportInsert(RunArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    load_env_file(&cli.env)?;
    let config = Config::from_env()?;

    let (mode, args) = match cli.command {
        Command::Export(args) => (Mode::Export, args),
        Command::Insert(args) => (Mode::Insert, args),
        Command::ExportInsert(args) => (Mode::ExportInsert, args),
    };
    let entities = if args.entities.is_empty() {
        config.entities.clone()
    } else {
        Entity::normalise(&args.entities)?
    };
    let req = RunRequest {
        weeks_ago: args.weeks_ago,
        dry_run: args.dry_run,
        ..RunRequest::new(mode, entities)
    };

    let mut pipeline = Pipeline::open(config)?;
    let summary = pipeline.run_scac(&args.scac, &req)?;
    println!("{}", summary.ascii_table());
    if summary.has_failures() {
        error!("{}", summary);
        std::process::exit(1);
    }
    info!("{}", summary);
    Ok(())
}
