//! # Ops Harness CLI (`opsh`)
//!
//! Starts either service, runs a single probe, or inspects campaigns on disk.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `opsh serve network` | Start the network diagnostics service |
//! | `opsh serve tracker` | Start the visit-tracking service |
//! | `opsh probe <kind> --json '<payload>'` | Run one probe and print the result |
//! | `opsh campaigns list` | List campaigns with coverage |
//! | `opsh campaigns show <id>` | Print a campaign as JSON |
//! | `opsh campaigns sync <id>` | Re-scan a campaign's files |
//! | `opsh campaigns coverage <id>` | Print coverage statistics |
//!
//! ## Examples
//!
//! ```bash
//! opsh --config ./opsh.toml serve network
//! API_PORT=9000 opsh serve tracker
//! opsh probe dns --json '{"query": "example.com", "record_type": "MX"}'
//! opsh probe scan --json '{"target": "127.0.0.1", "ports": [22, 80]}'
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ops_harness::clock;
use ops_harness::config::{self, Config};
use ops_harness::error::parse_uuid;
use ops_harness::network_api;
use ops_harness::probe::{ProbeEngine, ProbeKind, ProbeRequest};
use ops_harness::sink::{NullSink, ProbeSink, SqlProbeSink};
use ops_harness::tracker::Tracker;
use ops_harness::tracker_api;

/// Ops Harness: network diagnostics and file visit tracking over HTTP.
#[derive(Parser)]
#[command(name = "opsh", version)]
struct Cli {
    /// Path to a TOML configuration file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an HTTP service.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Run a single probe and print the result as JSON.
    ///
    /// Kinds: `http`, `dns`, `connectivity`, `scan`, `tls`.
    Probe {
        kind: ProbeKind,

        /// Probe parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        json: String,
    },

    /// Inspect campaigns in the configured storage directory.
    Campaigns {
        #[command(subcommand)]
        action: CampaignAction,
    },
}

#[derive(Subcommand)]
enum ServeService {
    Network,
    Tracker,
}

#[derive(Subcommand)]
enum CampaignAction {
    List,
    Show { id: String },
    Sync { id: String },
    Coverage { id: String },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_probe(cfg: &Config, kind: ProbeKind, payload: &str) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("--json must be a JSON object")?;
    let request = ProbeRequest::from_payload(kind, payload)?;

    let sink: Arc<dyn ProbeSink> = match &cfg.diagnostics.database_url {
        Some(url) => Arc::new(SqlProbeSink::connect(url).await?),
        None => Arc::new(NullSink),
    };
    let engine = ProbeEngine::new(
        sink,
        Duration::from_millis(cfg.diagnostics.default_timeout_ms),
    );
    let result = engine.run(request).await?;
    print_json(&result)
}

async fn run_campaigns(cfg: &Config, action: CampaignAction) -> anyhow::Result<()> {
    let tracker = Tracker::new(
        cfg.tracker.campaigns_dir(),
        clock::system(),
        cfg.tracker.default_max_files,
    );
    match action {
        CampaignAction::List => {
            let campaigns = tracker.list().await?;
            if campaigns.is_empty() {
                println!("No campaigns in {}", tracker.store().dir().display());
            }
            for view in campaigns {
                println!(
                    "{}  {:<30} {:>4}/{:<4} files  {:>6.2}%",
                    view.campaign.id,
                    view.campaign.name,
                    view.visited_files,
                    view.total_files,
                    view.coverage_percent
                );
            }
        }
        CampaignAction::Show { id } => {
            print_json(&tracker.get(parse_uuid(&id, "campaign")?).await?)?;
        }
        CampaignAction::Sync { id } => {
            let outcome = tracker.sync(parse_uuid(&id, "campaign")?, None).await?;
            println!(
                "added {}, deleted {}, total {}",
                outcome.added_files.len(),
                outcome.deleted_files.len(),
                outcome.total_files
            );
        }
        CampaignAction::Coverage { id } => {
            print_json(&tracker.coverage(parse_uuid(&id, "campaign")?).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ops_harness=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { service } => match service {
            ServeService::Network => network_api::run(&cfg).await?,
            ServeService::Tracker => tracker_api::run(&cfg).await?,
        },
        Commands::Probe { kind, json } => run_probe(&cfg, kind, &json).await?,
        Commands::Campaigns { action } => run_campaigns(&cfg, action).await?,
    }

    Ok(())
}
