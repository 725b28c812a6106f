use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use spinlog::cache::MemoryCache;
use spinlog::catalog::ProjectForm;
use spinlog::ingest::{SpinIngestor, SpinRequest};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spinlog", version, about = "Record plays against a self-building music catalog")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a single play
    Spin {
        /// User who played the track
        #[arg(long)]
        user: u64,

        /// Track title
        #[arg(long)]
        track: String,

        /// Track artist (repeat for features)
        #[arg(long = "artist", required = true)]
        artists: Vec<String>,

        /// Project (album, EP, single, compilation) title
        #[arg(long)]
        project: String,

        /// Project artist (defaults to the track artists)
        #[arg(long = "project-artist")]
        project_artists: Vec<String>,

        /// Project form: album, ep, single or compilation
        #[arg(long, default_value = "album")]
        form: ProjectForm,

        /// Project release date (YYYY-MM-DD)
        #[arg(long)]
        release: NaiveDate,

        /// Play time (RFC 3339, defaults to now)
        #[arg(long)]
        time: Option<DateTime<Utc>>,
    },

    /// Import plays from a JSON-lines file
    Import {
        /// File with one spin request per line
        file: PathBuf,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Print the catalog id for a title and its artists
    Id {
        title: String,

        #[arg(required = true)]
        artists: Vec<String>,
    },

    /// Show a user's most recent plays
    History {
        #[arg(long)]
        user: u64,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show catalog statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    if let Commands::Id { title, artists } = &cli.command {
        println!("{}", spinlog::identity::derive_id(title, artists));
        return Ok(());
    }

    // Load config file (optional, defaults if missing)
    let config = spinlog::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(spinlog::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Arc::new(
        spinlog::db::Database::open(&db_path).context("Failed to open database")?,
    );
    let cache = Arc::new(MemoryCache::new(config.cache.ttl(), config.cache.max_entries));
    let ingestor = SpinIngestor::new(db.clone(), cache);

    match cli.command {
        Commands::Spin {
            user,
            track,
            artists,
            project,
            project_artists,
            form,
            release,
            time,
        } => {
            let project_artist_names = if project_artists.is_empty() {
                artists.clone()
            } else {
                project_artists
            };
            let req = SpinRequest {
                user_id: user,
                time: time.unwrap_or_else(Utc::now),
                track_title: track,
                track_artist_names: artists,
                project_title: project,
                project_artist_names,
                project_form: form,
                project_release: release,
            };

            let spin = ingestor.ingest_spin(&req).context("Failed to record spin")?;
            println!(
                "Recorded spin {} of \"{}\" (track {}) at {}",
                spin.id,
                req.track_title,
                spin.track_id,
                spin.time.to_rfc3339()
            );
        }

        Commands::Import { file, jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result = spinlog::import::import_spins(&ingestor, &file, workers)
                .context("Import failed")?;
            println!(
                "Import complete: {} ingested, {} failed",
                result.ingested, result.failed
            );
        }

        Commands::History { user, limit } => {
            let entries = db.recent_spins(user, limit).context("Query failed")?;

            if entries.is_empty() {
                println!("No spins for user {}.", user);
                return Ok(());
            }

            println!(
                "{:<20} {:<30} {:<25} {}",
                "Time", "Track", "Artist", "Project"
            );
            println!("{}", "-".repeat(100));

            for e in &entries {
                println!(
                    "{:<20} {:<30} {:<25} {}",
                    e.time.format("%Y-%m-%d %H:%M:%S").to_string(),
                    truncate(&e.track_title, 30),
                    truncate(&e.artists.join(", "), 25),
                    e.primary_project.as_deref().unwrap_or("-"),
                );
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Catalog Statistics");
            println!("==================");
            println!("Artists:   {}", stats.artists);
            println!("Tracks:    {}", stats.tracks);
            println!("Projects:  {}", stats.projects);
            println!("Spins:     {}", stats.spins);
            println!("Listeners: {}", stats.users);
        }

        Commands::Id { .. } => {} // handled before opening the database
    }

    Ok(())
}

/// Truncate to `width` characters, marking the cut with "...".
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
