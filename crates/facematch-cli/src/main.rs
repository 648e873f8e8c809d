use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use facematch_core::{Descriptor, FaceAnalyzer, FaceObservation, ObservationFile, RecordId};
use facematch_store::DescriptorStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod render;
mod session;

use config::Config;
use session::Session;

/// Exit status when the analyzer found no face in the input.
const EXIT_NO_FACE: u8 = 2;

#[derive(Parser)]
#[command(name = "facematch", about = "Face descriptor store and similarity search")]
struct Cli {
    /// Database file (overrides FACEMATCH_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of text where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the face from an observation file and show its closest matches
    Enroll {
        /// JSON observation written by the face detector
        observation: PathBuf,
        /// Provenance tag stored with the record (e.g. "scan", "upload")
        #[arg(short, long, default_value = "scan")]
        kind: String,
    },
    /// Compare a stored record against all other records
    Result {
        id: RecordId,
    },
    /// Search the store for faces similar to an observation, without storing it
    Search {
        observation: PathBuf,
    },
    /// List the most recent records
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show one stored record
    Show {
        id: RecordId,
    },
    /// Totals, recent activity and match quality
    Stats,
    /// Export every record to a dated JSON file
    Backup {
        /// Output directory (defaults to backup_dir from the config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Replace the store's contents with a backup file
    Restore {
        file: PathBuf,
    },
    /// Show database location and schema version
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let bands = config.bands().context("invalid confidence bands")?;

    let store = DescriptorStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let mut session = Session::new(store, config.matcher(), bands, config.recent_limit);

    match cli.command {
        Commands::Enroll { observation, kind } => {
            let Some(observation) = observe(&observation)? else {
                return Ok(no_face());
            };
            let id = session.enroll(observation, &kind).await?;
            let result = session.scan_result(id).await?;
            if cli.json {
                let document = render::enrolled_json(id, &result.outcome);
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                println!("Stored record #{id}");
                println!("{}", render::outcome(&result.outcome));
            }
        }
        Commands::Result { id } => match session.scan_result(id).await {
            Ok(result) if cli.json => {
                println!("{}", serde_json::to_string_pretty(&result.outcome.matches)?)
            }
            Ok(result) => println!("{}", render::scan_result(&result)),
            Err(e) if e.is_not_found() => return Ok(not_found(id)),
            Err(e) => return Err(e.into()),
        },
        Commands::Search { observation } => {
            let Some(observation) = observe(&observation)? else {
                return Ok(no_face());
            };
            let query: Descriptor = observation.descriptor;
            let outcome = session.search(&query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome.matches)?);
            } else {
                println!("{}", render::outcome(&outcome));
            }
        }
        Commands::List { limit } => {
            let records = session.recent(limit.unwrap_or(config.recent_limit)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records stored");
            } else {
                for record in &records {
                    println!("{}", render::record_line(record));
                }
            }
        }
        Commands::Show { id } => match session.record(id).await {
            Ok(record) if cli.json => println!("{}", serde_json::to_string_pretty(&record)?),
            Ok(record) => {
                println!("{}", render::record_line(&record));
                if let Some(detection) = record.detection {
                    println!(
                        "  box x={:.1} y={:.1} w={:.1} h={:.1}",
                        detection.x, detection.y, detection.width, detection.height
                    );
                }
                if let Some(landmarks) = &record.landmarks {
                    println!("  {} landmarks", landmarks.len());
                }
            }
            Err(e) if e.is_not_found() => return Ok(not_found(id)),
            Err(e) => return Err(e.into()),
        },
        Commands::Stats => {
            let dashboard = session.dashboard(Utc::now().date_naive()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                println!("{}", render::dashboard(&dashboard));
            }
        }
        Commands::Backup { dir } => {
            let dir = dir.unwrap_or_else(|| config.backup_dir.clone());
            let (name, json) = session.backup(Utc::now().date_naive()).await?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join(name);
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            println!("Backup written to {}", path.display());
        }
        Commands::Restore { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let summary = session
                .restore(&raw)
                .await
                .with_context(|| format!("restoring from {}", file.display()))?;
            println!(
                "Restored {} record(s), replacing {}",
                summary.restored, summary.cleared
            );
            for name in &summary.ignored_stores {
                println!("  ignored unknown store '{name}'");
            }
        }
        Commands::Status => {
            let store = session.store();
            println!("database:       {}", store.location());
            println!("schema version: {}", store.schema_version().await?);
            println!("records:        {}", store.count().await?);
            let matcher = session.matcher();
            let bands = session.bands();
            println!(
                "threshold:      {} (excellent < {}, good < {})",
                matcher.threshold,
                bands.excellent_below(),
                bands.good_below()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn observe(path: &Path) -> Result<Option<FaceObservation>> {
    ObservationFile
        .analyze(path)
        .with_context(|| format!("analyzing {}", path.display()))
}

fn no_face() -> ExitCode {
    eprintln!("No face detected. Make sure the face is clearly visible and try again.");
    ExitCode::from(EXIT_NO_FACE)
}

fn not_found(id: RecordId) -> ExitCode {
    eprintln!("Record #{id} not found");
    ExitCode::FAILURE
}
