//! `chronomesh` — CLI entrypoint. No interactive surface is needed here,
//! so a `clap`-derive flags binary wires the queue, store and worker
//! together: `run`, `push`, and `truncate`.

use chronomesh_audit::InMemoryAuditSink;
use chronomesh_base::Config;
use chronomesh_queue::Queue;
use chronomesh_store::VersionStore;
use chronomesh_worker::Worker;
use clap::{Parser, Subcommand};
use std::io::Read;

#[derive(Parser)]
#[command(name = "chronomesh", about = "Versioned, time-stamped graph mutation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the worker loop: recovers in-flight items, then drains the
    /// queue forever.
    Run,
    /// Enqueues one request envelope read from a file, or stdin if no file
    /// is given. For manual testing.
    Push {
        #[arg(long)]
        file: Option<std::path::PathBuf>,
    },
    /// Drops queued items for a version, or every version if none is given.
    Truncate {
        #[arg(long)]
        version: Option<String>,
    },
}

fn main() -> chronomesh_base::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Run => {
            let queue = Queue::open(&config.queue_db_path)?;
            let store = VersionStore::new(&config.store_root);
            let worker = Worker::new(queue, store, Box::new(InMemoryAuditSink::new()), config);
            let recovered = worker.recover()?;
            if recovered > 0 {
                tracing::info!(recovered, "recovered in-flight items from a prior run");
            }
            worker.run()?;
            Ok(())
        }
        Command::Push { file } => {
            let mut bytes = Vec::new();
            match file {
                Some(path) => bytes = std::fs::read(path)?,
                None => {
                    std::io::stdin().read_to_end(&mut bytes)?;
                }
            }
            // Validate it's at least well-formed JSON before it goes
            // durable — the worker will still reject a structurally
            // invalid envelope later, but failing fast here saves a
            // round trip through the queue for an obvious typo.
            let _: serde_json::Value = serde_json::from_slice(&bytes)?;
            let queue = Queue::open(&config.queue_db_path)?;
            let seq = queue.push(&bytes)?;
            println!("{{\"status\": \"queued\", \"seq\": {seq}}}");
            Ok(())
        }
        Command::Truncate { version } => {
            let queue = Queue::open(&config.queue_db_path)?;
            let removed = queue.truncate(version.as_deref())?;
            println!("{{\"removed\": {removed}}}");
            Ok(())
        }
    }
}
