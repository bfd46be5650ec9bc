use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use outbox_relay::logging::init_logging;
use outbox_relay::{
    DeadLetterFilter, DeadLetterStore, DispatcherPool, IdempotencyStore, LogPublisher,
    OutboxStatus, OutboxStore, RelayConfig, SqliteStore,
};

/// How often `run` prunes processed rows and expired idempotency keys.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "outbox-relay")]
#[command(about = "Relay committed outbox events to the message bus")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, short, env = "OUTBOX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher pool until SIGINT/SIGTERM.
    Run {
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print outbox row counts per status.
    Stats,
    /// List outbox rows.
    List {
        /// PENDING, PROCESSING or PROCESSED.
        #[arg(long)]
        status: Option<OutboxStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete processed rows older than the retention window.
    Prune {
        #[arg(long)]
        older_than_ms: Option<u64>,
    },
    /// Inspect and act on dead-lettered events.
    DeadLetters {
        #[command(subcommand)]
        command: DeadLetterCommand,
    },
}

#[derive(Subcommand)]
enum DeadLetterCommand {
    List {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        error_contains: Option<String>,
        /// RFC 3339 lower bound on the failure time.
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound on the failure time.
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Show {
        id: String,
    },
    /// Re-enqueue a dead letter with a fresh retry budget.
    Replay {
        id: String,
    },
    Discard {
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    init_logging(&config.log_level);

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    match cli.command {
        Command::Run { workers } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.validate()?;
            run(&store, &config)
        }
        Command::Stats => print_json(&store.stats()?),
        Command::List { status, limit } => print_json(&store.list(status, limit)?),
        Command::Prune { older_than_ms } => {
            let retention = older_than_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.processed_retention());
            let pruned = store.prune_processed(retention)?;
            let purged = store.purge_expired()?;
            print_json(&serde_json::json!({ "pruned": pruned, "purgedKeys": purged }))
        }
        Command::DeadLetters { command } => dead_letters(&store, command),
    }
}

fn run(store: &SqliteStore, config: &RelayConfig) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let publisher = Arc::new(LogPublisher::new());
    let pool = DispatcherPool::spawn(config.workers, |_| store.reopen(), publisher, config)?;
    info!(
        workers = pool.len(),
        database = %config.database_path.display(),
        "Relay running"
    );

    let mut last_housekeeping = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
        if last_housekeeping.elapsed() >= HOUSEKEEPING_INTERVAL {
            housekeeping(store, config);
            last_housekeeping = Instant::now();
        }
    }

    info!("Shutdown requested, settling in-flight batches");
    let stats = pool.stop();
    info!(
        published = stats.messages_published,
        retried = stats.messages_retried,
        dead_lettered = stats.messages_dead_lettered,
        "Relay stopped"
    );
    Ok(())
}

/// Prune processed rows and expired idempotency keys. Store errors are
/// logged; the relay keeps running and retries on the next interval.
fn housekeeping(store: &SqliteStore, config: &RelayConfig) -> bool {
    let pruned = store.prune_processed(config.processed_retention());
    if let Err(err) = &pruned {
        warn!(error = %err, "Pruning processed events failed");
    }
    let purged = store.purge_expired();
    if let Err(err) = &purged {
        warn!(error = %err, "Purging expired idempotency keys failed");
    }
    pruned.is_ok() && purged.is_ok()
}

fn dead_letters(store: &SqliteStore, command: DeadLetterCommand) -> Result<()> {
    match command {
        DeadLetterCommand::List {
            event_type,
            error_contains,
            since,
            until,
            limit,
        } => {
            let mut filter = DeadLetterFilter::new().limit(limit);
            filter.event_type = event_type;
            filter.error_contains = error_contains;
            filter.failed_after = since;
            filter.failed_before = until;
            print_json(&store.list_dead_letters(&filter)?)
        }
        DeadLetterCommand::Show { id } => {
            let event = store
                .get_dead_letter(&id)?
                .with_context(|| format!("no dead letter {id}"))?;
            print_json(&event)
        }
        DeadLetterCommand::Replay { id } => print_json(&store.replay(&id)?),
        DeadLetterCommand::Discard { id } => {
            if !store.discard(&id)? {
                anyhow::bail!("no dead letter {id}");
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dead_letter_time_filters() {
        let cli = Cli::try_parse_from([
            "outbox-relay",
            "--database",
            "/tmp/relay.db",
            "dead-letters",
            "list",
            "--event-type",
            "order.created",
            "--since",
            "2026-01-01T00:00:00Z",
            "--until",
            "2026-01-02T12:30:00+02:00",
            "--limit",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.database, Some(PathBuf::from("/tmp/relay.db")));
        let Command::DeadLetters {
            command:
                DeadLetterCommand::List {
                    event_type,
                    since,
                    until,
                    limit,
                    ..
                },
        } = cli.command
        else {
            panic!("expected dead-letters list");
        };
        assert_eq!(event_type.as_deref(), Some("order.created"));
        assert_eq!(
            since,
            Some("2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert_eq!(
            until,
            Some("2026-01-02T10:30:00Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert_eq!(limit, 5);
    }

    #[test]
    fn rejects_malformed_time_filter() {
        let parsed =
            Cli::try_parse_from(["outbox-relay", "dead-letters", "list", "--since", "yesterday"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_replay_prune_and_list_status() {
        let cli = Cli::try_parse_from(["outbox-relay", "dead-letters", "replay", "evt-1"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::DeadLetters {
                command: DeadLetterCommand::Replay { ref id }
            } if id == "evt-1"
        ));

        let cli =
            Cli::try_parse_from(["outbox-relay", "prune", "--older-than-ms", "1000"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Prune {
                older_than_ms: Some(1000)
            }
        ));

        let cli = Cli::try_parse_from(["outbox-relay", "list", "--status", "pending"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::List {
                status: Some(OutboxStatus::Pending),
                limit: 50
            }
        ));
    }

    #[test]
    fn housekeeping_survives_store_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        let config = RelayConfig::default();
        assert!(housekeeping(&store, &config));

        store
            .with_connection(|conn| {
                conn.execute_batch("DROP TABLE outbox_events; DROP TABLE idempotency_keys;")?;
                Ok(())
            })
            .unwrap();
        assert!(!housekeeping(&store, &config));
    }
}
