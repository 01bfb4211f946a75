use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use gigs_scraper::app::ports::PersistencePort;
use gigs_scraper::app::{build_scheduler, BuildOptions};
use gigs_scraper::config::AppConfig;
use gigs_scraper::domain::DeletionRecord;
use gigs_scraper::infra::SupabaseStore;
use gigs_scraper::observability::{init_logging, metrics};
use gigs_scraper::pipeline::chain::ChainDelivery;
use gigs_scraper::pipeline::RunRequest;
use gigs_scraper::server::{start_server, ServerState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "gigs_scraper")]
#[command(about = "Batch ingestion engine for Stockholm concert and comedy listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the scrape trigger over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one batch and print its report
    Run {
        #[arg(long, default_value_t = gigs_scraper::common::constants::DEFAULT_BATCH)]
        batch: u32,
        /// Restrict paginated sources to this page
        #[arg(long)]
        page: Option<u32>,
        /// Trigger the next batch when this one finishes
        #[arg(long)]
        chain: bool,
        /// Keep results in memory instead of writing to the store
        #[arg(long)]
        dry_run: bool,
    },
    /// List batch numbers and the sources in each
    Batches,
    /// Record an operator deletion so the event is never re-imported
    Delete {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        venue: String,
        /// Event date in Stockholm local time, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;

    match cli.command {
        Commands::Serve { port } => {
            metrics::init()?;
            let scheduler = build_scheduler(&config, BuildOptions::default())?;
            let state = ServerState {
                scheduler: Arc::new(scheduler),
                secret: config.backends.chain_secret.clone(),
            };
            if let Err(e) = start_server(state, port).await {
                bail!("server stopped: {}", e);
            }
        }
        Commands::Run {
            batch,
            page,
            chain,
            dry_run,
        } => {
            metrics::init()?;
            let scheduler = build_scheduler(&config, BuildOptions { dry_run })?;
            let run = scheduler.run_batch(RunRequest { batch, page, chain }).await?;
            println!("{}", serde_json::to_string_pretty(&run.report)?);

            // A one-shot process must not exit before the trigger is out.
            if let Some(handle) = run.chain {
                match handle.await {
                    Ok(ChainDelivery::Delivered { attempts }) => info!("Chain delivered after {} attempt(s)", attempts),
                    Ok(ChainDelivery::Abandoned { attempts }) => {
                        warn!("Chain abandoned after {} attempt(s)", attempts)
                    }
                    Err(e) => error!("Chain task panicked: {}", e),
                }
            }
            if let Err(e) = metrics::push_to_gateway(&run.report.run_id.to_string()).await {
                warn!("Failed to push metrics: {}", e);
            }
        }
        Commands::Batches => {
            let registry = gigs_scraper::app::bootstrap::load_registry(&config)?;
            for summary in registry.summaries() {
                println!(
                    "batch {:>2}: {} task(s) [{}]",
                    summary.number,
                    summary.task_count,
                    summary.sources.join(", ")
                );
            }
        }
        Commands::Delete { artist, venue, date } => {
            let backends = &config.backends;
            let (Some(url), Some(key)) = (&backends.supabase_url, &backends.supabase_key) else {
                bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY are required to record deletions");
            };
            let store = SupabaseStore::new(
                url,
                key,
                &backends.events_table,
                &backends.deletions_table,
                Duration::from_secs(backends.request_timeout_secs),
            )?;
            let record = DeletionRecord::new(artist, venue, date);
            store.record_deletion(&record).await?;
            println!("Recorded deletion for key {}", record.natural_key().digest());
        }
    }
    Ok(())
}
