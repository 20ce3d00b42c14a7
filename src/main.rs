use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wplace_pull::{
    checkpoint::{CheckpointFile, RowShardWriter, CHECKPOINT_FILE},
    fetch::{PixelFetcher, TileFetcher},
    grid::{GridSpace, PixelCoord, TileCoord, WorkSource},
    logging,
    output::TileFileWriter,
    proxy::{PoolConfig, ProxyPool},
    sched::{ErrorLog, Scheduler, SchedulerConfig},
    split::{Orchestrator, WorkerCommand},
    Config, TileBounds,
};

/// Proxy list cap for the region sweep
const REGION_MAX_PROXIES: usize = 500;

/// In-flight requests allowed per proxy in the region sweep
const REGION_REQUESTS_PER_PROXY: usize = 5;

/// Spacing budget spread across all proxies in the region sweep
const REGION_PACING: Duration = Duration::from_millis(300);

/// Bulk, resumable, proxy-rotated tile and pixel acquisition
#[derive(Parser)]
#[command(name = "wplace-pull")]
#[command(about = "Bulk, resumable, proxy-rotated tile and pixel acquisition")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Root folder for tiles, logs and archives
    #[arg(long, global = true, env = "WP_WPLACE_PATH")]
    base_path: Option<PathBuf>,

    /// Maximum in-flight requests per worker
    #[arg(long, global = true, env = "WP_CONCURRENT")]
    concurrency: Option<usize>,

    /// Number of worker processes for the split sweep
    #[arg(long, global = true, env = "WP_SPLITS")]
    splits: Option<usize>,

    /// URL or file path of the proxy list
    #[arg(long, global = true, env = "PROXY_LIST_URL")]
    proxy_source: Option<String>,

    /// Lowest tile x (inclusive)
    #[arg(long, global = true)]
    min_x: Option<u32>,

    /// Highest tile x (inclusive)
    #[arg(long, global = true)]
    max_x: Option<u32>,

    /// Lowest tile y (inclusive)
    #[arg(long, global = true)]
    min_y: Option<u32>,

    /// Highest tile y (inclusive)
    #[arg(long, global = true)]
    max_y: Option<u32>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the whole tile grid with one worker process per range (default)
    Split,
    /// Sweep one range of tiles in this process
    Pull,
    /// Sweep pixel ownership of every tile, sealing results row by row
    Regions {
        /// Checkpoint file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Directory for row files
        #[arg(long)]
        out: Option<PathBuf>,
        /// Use at most this many proxies from the list
        #[arg(long, default_value_t = REGION_MAX_PROXIES)]
        max_proxies: usize,
    },
    /// Load the proxy list, write the side file and print the count
    Proxies,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::default();
        if let Some(path) = &self.base_path {
            config.base_path = path.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency.max(1);
        }
        if let Some(splits) = self.splits {
            config.splits = splits.max(1);
        }
        config.proxy_source = self.proxy_source.clone();

        let bounds = &mut config.bounds;
        bounds.min_x = self.min_x.unwrap_or(bounds.min_x);
        bounds.max_x = self.max_x.unwrap_or(bounds.max_x);
        bounds.min_y = self.min_y.unwrap_or(bounds.min_y);
        bounds.max_y = self.max_y.unwrap_or(bounds.max_y);
        config.bounds.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = cli.config()?;

    match cli.command {
        Some(Commands::Split) | None => {
            let command = WorkerCommand::current_exe(&config)?;
            let summary = Orchestrator::new(&config, command).run().await?;
            println!(
                "Finished in {}: {} checked, {} files, next archive tiles-{}.7z",
                summary.elapsed_formatted,
                summary.total_files_checked,
                summary.total_files_made,
                summary.archive_index
            );
        }
        Some(Commands::Pull) => {
            pull_tiles(&config, config.bounds).await?;
        }
        Some(Commands::Regions {
            checkpoint,
            out,
            max_proxies,
        }) => {
            pull_regions(&config, checkpoint, out, max_proxies).await?;
        }
        Some(Commands::Proxies) => {
            let pool = load_pool(&config, PoolConfig::new()).await?;
            println!("Loaded {} proxies", pool.len());
            for endpoint in pool.endpoints() {
                println!("  {}", endpoint);
            }
        }
    }

    Ok(())
}

async fn load_pool(config: &Config, pool_config: PoolConfig) -> Result<ProxyPool> {
    let source = config.require_proxy_source()?;
    let pool_config = pool_config.with_side_file(config.logs_dir().join("proxies.json"));
    Ok(ProxyPool::load(source, &pool_config).await?)
}

fn error_log(config: &Config) -> ErrorLog {
    ErrorLog::new(config.logs_dir().join("errors.ndjson"))
}

async fn pull_tiles(config: &Config, bounds: TileBounds) -> Result<()> {
    let pool = load_pool(config, PoolConfig::new()).await?;
    let space = bounds.space();

    let writer = TileFileWriter::new(config.tiles_dir());
    writer.prepare(space).await?;

    let scheduler_config = SchedulerConfig::new().with_concurrency(config.concurrency);
    let stats = Scheduler::new(
        scheduler_config,
        WorkSource::<TileCoord>::new(space),
        Arc::new(pool),
        Arc::new(TileFetcher::default()),
        Arc::new(writer),
        error_log(config),
    )
    .run()
    .await;

    info!(done = stats.done, failed = stats.failed, files = stats.files, "tile sweep complete");
    Ok(())
}

async fn pull_regions(
    config: &Config,
    checkpoint: Option<PathBuf>,
    out: Option<PathBuf>,
    max_proxies: usize,
) -> Result<()> {
    let pool = load_pool(config, PoolConfig::new().with_max_proxies(max_proxies)).await?;

    // Rows are tile_y, columns tile_x.
    let bounds = config.bounds;
    let space = GridSpace::new(bounds.min_y, bounds.max_y, bounds.min_x, bounds.max_x);

    let checkpoint =
        CheckpointFile::new(checkpoint.unwrap_or_else(|| config.base_path.join(CHECKPOINT_FILE)));
    let out = out.unwrap_or_else(|| config.base_path.join("regions"));
    let writer = RowShardWriter::open(out, checkpoint, space)?;

    let proxies = pool.len();
    let scheduler_config = SchedulerConfig::new()
        .with_concurrency(REGION_REQUESTS_PER_PROXY * proxies)
        .with_min_interval(REGION_PACING / proxies.max(1) as u32);

    let stats = Scheduler::new(
        scheduler_config,
        writer.source::<PixelCoord>(),
        Arc::new(pool),
        Arc::new(PixelFetcher::default()),
        Arc::new(writer),
        error_log(config),
    )
    .run()
    .await;

    info!(done = stats.done, failed = stats.failed, records = stats.files, "region sweep complete");
    Ok(())
}
