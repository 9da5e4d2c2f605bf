use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use game_art::database_ops::store::GameStore;
use game_art::util::db::Db;
use game_art::util::env;
use game_art::{Backfill, BackfillOptions, CatalogConfig, PgGameStore, Resolver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "game-art", version, about = "Board-game catalog id and artwork resolver")]
struct Cli {
    /// Optional override for the database URL
    #[arg(long, global = true)]
    db_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Resolve catalog id and artwork for one game (after create or rename)
    Resolve {
        /// Game id
        #[arg(long)]
        id: i64,
        /// Search under this name instead of the stored one
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-resolve every game lacking art or with a non-ok status
    Backfill {
        /// Only list what would be processed; `--dry-run=false` overrides BACKFILL_DRY_RUN
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        dry_run: Option<bool>,
        /// Maximum number of games (defaults to BACKFILL_LIMIT / all)
        #[arg(long)]
        limit: Option<u32>,
        /// Pause between games in milliseconds (defaults to BACKFILL_DELAY_MS / 1500)
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

/// Command-line values win over the environment-derived defaults.
fn backfill_options(
    dry_run: Option<bool>,
    limit: Option<u32>,
    delay_ms: Option<u64>,
    defaults: BackfillOptions,
) -> BackfillOptions {
    BackfillOptions {
        dry_run: dry_run.unwrap_or(defaults.dry_run),
        limit: limit.or(defaults.limit),
        delay: delay_ms.map(Duration::from_millis).unwrap_or(defaults.delay),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    game_art::tracing::init_tracing("info,sqlx=warn")?;
    let cli = Cli::parse();

    let db_url = match cli.db_url {
        Some(url) => url,
        None => env::db_url().context("set DATABASE_URL or pass --db-url")?,
    };
    let db = Db::connect(&db_url, env::env_parse("DB_MAX_CONNS", 2u32)).await?;
    let store: Arc<dyn GameStore> = Arc::new(PgGameStore::new(db));

    let config = CatalogConfig::from_env();
    if !config.is_enabled() {
        warn!("BGG_API_TOKEN not set; every resolution will be recorded as disabled");
    }
    let resolver = Arc::new(Resolver::from_config(store, &config)?);

    match cli.command {
        Commands::Resolve { id, name } => {
            let report = resolver.resolve(id, name.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Backfill {
            dry_run,
            limit,
            delay_ms,
        } => {
            let options = backfill_options(dry_run, limit, delay_ms, BackfillOptions::from_env());
            info!(?options, "backfill options");

            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(());
                }
            });
            let shutdown = async move {
                if rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            };

            let summary = Backfill::with_fixed_interval(resolver, options)
                .run_until(shutdown)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
