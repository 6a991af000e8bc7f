use std::error::Error;

use alvys_ingest::{
    config::{load_env_file, Config},
    pipeline::{Mode, Pipeline, RunRequest},
    utils::alerts::send_error_notification,
};
use clap::Parser;
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Process the week that ended this many weeks before the last one
    #[arg(short, long, default_value_t = 0)]
    weeks_ago: u32,

    /// Show what would run without calling the API or writing anything
    #[arg(long)]
    dry_run: bool,
}

/// Export and load last week's data for every tenant in the roster.
/// Run this job every Sunday after midnight, local time.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    load_env_file(&args.env)?;
    let config = Config::from_env()?;
    let alert_endpoint = config.alert_endpoint.clone();

    let req = RunRequest {
        weeks_ago: args.weeks_ago,
        dry_run: args.dry_run,
        ..RunRequest::new(Mode::ExportInsert, config.entities.clone())
    };
    let mut pipeline = Pipeline::open(config)?;
    let summary = pipeline.run_all(&req)?;
    println!("{}", summary.ascii_table());

    for skipped in &summary.roster_warnings {
        warn!("[{}] skipped, {}", skipped.scac, skipped.reason);
    }
    if !summary.has_failures() {
        info!("{}", summary);
        return Ok(());
    }

    error!("{}", summary);
    match alert_endpoint {
        Some(endpoint) => match send_error_notification(
            &endpoint,
            "weekly_ingest",
            &format!(
                "{} of {} tenant/entity pairs failed",
                summary.failed(),
                summary.results.len()
            ),
            &summary.failure_report(),
            None,
        ) {
            Ok(_) => info!("Sent failure notification"),
            Err(e) => error!("Failed to send failure notification: {}", e),
        },
        None => warn!("ALVYS_ALERT_ENDPOINT not set, no notification sent"),
    }
    Ok(())
}
