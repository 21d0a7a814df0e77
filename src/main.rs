//! # ptt-archiver CLI Application
//!
//! This module implements the command-line interface for the archiver,
//! providing access to its pipelines through a set of subcommands.
//!
//! ## Key Components
//!
//! - CLI argument parsing with clap
//! - Subcommands:
//!   - `crawl`: traverse boards, archive post images, write posts as JSON lines
//!   - `export`: move finished job items from Scrapinghub to B2
//!   - `decrypt`: decrypt a directory of archived files
//!
//! Settings are read from the environment (and `SHUB_SETTINGS`); flags
//! override them.

mod telemetry;

use anyhow::{Context, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use dialoguer::{Password, theme::ColorfulTheme};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ptt_archiver::crawler::{AssetPolicy, CrawlController, CrawlerConfig, Fetcher, HttpFetcher, board_url};
use ptt_archiver::export::{BatchExporter, ScrapinghubClient};
use ptt_archiver::pipeline::{AssetPipeline, FernetCipher, PipelineConfigBuilder, decrypt_dir};
use ptt_archiver::settings::Settings;
use ptt_archiver::shutdown::ShutdownCoordinator;
use ptt_archiver::storage::BackendRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{info, instrument, warn};
use url::Url;

#[derive(Parser)]
#[command(author, version, about = "Crawl a PTT board and archive its posts and images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl boards, archive post images, and write posts as JSON lines
    Crawl(CrawlArgs),

    /// Upload finished job items to B2 as gzip JSON lines
    Export(ExportArgs),

    /// Decrypt a directory of archived files
    Decrypt(DecryptArgs),
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Board to crawl, e.g. Beauty (repeatable)
    #[arg(short, long)]
    board: Vec<String>,

    /// Listing page to start from instead of a board's newest page (repeatable)
    #[arg(long)]
    start_url: Vec<String>,

    /// Maximum number of listing pages per board
    #[arg(short = 'p', long, default_value = "5")]
    max_pages: u32,

    /// Store URI for archived images (overrides FILES_STORE)
    #[arg(short, long)]
    files_store: Option<String>,

    /// Write posts to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also emit posts without any qualifying image
    #[arg(long)]
    emit_all: bool,

    /// Image host asset links must point at
    #[arg(long, default_value = "imgur.com")]
    asset_host: String,

    /// Allowed image extensions (comma-separated)
    #[arg(long = "ext", value_delimiter = ',', default_value = ".jpg,.png")]
    extensions: Vec<String>,

    /// Number of concurrent detail page fetches
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Number of concurrent image downloads
    #[arg(long, default_value = "8")]
    asset_concurrency: usize,

    /// Minimum delay between requests in milliseconds
    #[arg(short, long, default_value = "250")]
    rate: u64,
}

#[derive(Args)]
struct ExportArgs {
    /// Spiders whose finished jobs are exported
    #[arg(required = true)]
    spider_name: Vec<String>,

    /// Scrapinghub API key (overrides API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Scrapinghub project id (overrides PROJECT_ID)
    #[arg(long)]
    project_id: Option<String>,

    /// B2 API endpoint (overrides B2_ENDPOINT)
    #[arg(long)]
    b2_endpoint: Option<String>,

    /// B2 application key id (overrides B2_KEY_ID)
    #[arg(long, alias = "b2-account-id")]
    b2_key_id: Option<String>,

    /// B2 application key (overrides B2_APPLICATION_KEY)
    #[arg(long)]
    b2_application_key: Option<String>,

    /// Destination, b2://bucket/prefix (overrides ITEMS_STORE)
    #[arg(long)]
    b2_path: Option<String>,

    /// Delete each job after its items were uploaded
    #[arg(long)]
    delete: bool,
}

impl std::fmt::Debug for ExportArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportArgs")
            .field("spider_name", &self.spider_name)
            .field("project_id", &self.project_id)
            .field("b2_path", &self.b2_path)
            .field("delete", &self.delete)
            .finish_non_exhaustive()
    }
}

#[derive(Args, Debug)]
struct DecryptArgs {
    /// Directory of encrypted files
    input_dir: PathBuf,

    /// Directory the decrypted files are written to
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let _otel = telemetry::init_tracing_subscriber()?;
    let settings = Settings::from_env()?;

    match command {
        Commands::Crawl(args) => crawl_command(args, settings).await?,
        Commands::Export(args) => export_command(args, settings).await?,
        Commands::Decrypt(args) => decrypt_command(args, settings).await?,
    }

    Ok(())
}

fn seed_urls(args: &CrawlArgs) -> anyhow::Result<Vec<Url>> {
    let seeds: Vec<Url> = args
        .board
        .iter()
        .map(|board| board_url(board))
        .chain(args.start_url.iter().cloned())
        .map(|url| Url::parse(&url).with_context(|| format!("Invalid start URL {}", url)))
        .collect::<anyhow::Result<_>>()?;
    if seeds.is_empty() {
        bail!("Nothing to crawl; pass --board or --start-url");
    }
    Ok(seeds)
}

#[instrument(skip(settings))]
async fn crawl_command(args: CrawlArgs, settings: Settings) -> anyhow::Result<()> {
    let seeds = seed_urls(&args)?;

    let config = CrawlerConfig::builder()
        .max_pages(args.max_pages)
        .detail_concurrency(args.concurrency)
        .rate_limit_ms(args.rate)
        .asset_host(args.asset_host.clone())
        .asset_extensions(args.extensions.clone())
        .asset_policy(if args.emit_all {
            AssetPolicy::EmitAll
        } else {
            AssetPolicy::RequireAssets
        })
        .build();
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config)?);

    let files_store = args
        .files_store
        .clone()
        .or_else(|| settings.files_store.clone())
        .ok_or_else(|| anyhow!("No files store configured; pass --files-store or set FILES_STORE"))?;
    let pipeline_config = PipelineConfigBuilder::new()
        .with_files_store(files_store)
        .with_encryption_key(settings.files_encryption_key.clone())
        .with_asset_concurrency(args.asset_concurrency)
        .build();

    // Storage problems abort here, before any page is fetched.
    let pipeline = AssetPipeline::open(
        &pipeline_config,
        &settings.storage_config(),
        &BackendRegistry::default(),
        Arc::clone(&fetcher),
    )
    .await?;

    let shutdown = ShutdownCoordinator::shared();
    shutdown.install_ctrl_c_handler();
    let controller = CrawlController::new(fetcher, config)?.with_shutdown(shutdown);

    let mut writer: BufWriter<Box<dyn AsyncWrite + Unpin + Send>> = match &args.output {
        Some(path) => BufWriter::new(Box::new(tokio::fs::File::create(path).await?)),
        None => BufWriter::new(Box::new(tokio::io::stdout())),
    };

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    progress.enable_steady_tick(Duration::from_millis(120));
    progress.set_message(format!("Crawling {} seed(s)...", seeds.len()));

    let mut posts = 0usize;
    let mut images = 0usize;
    let mut archived = Box::pin(pipeline.archive(controller.run(seeds)));
    while let Some(post) = archived.next().await {
        let mut line = serde_json::to_vec(&post)?;
        line.push(b'\n');
        writer.write_all(&line).await?;

        posts += 1;
        images += post.files.len();
        progress.set_message(format!("{} posts, {} images archived", posts, images));
    }
    writer.flush().await?;

    progress.finish_with_message(format!("Archived {} posts and {} images", posts, images));
    if let Some(path) = &args.output {
        info!("Saved posts to {}", path.display());
    }
    Ok(())
}

#[instrument(skip(settings))]
async fn export_command(args: ExportArgs, mut settings: Settings) -> anyhow::Result<()> {
    let overrides = [
        (args.api_key, &mut settings.api_key),
        (args.project_id, &mut settings.project_id),
        (args.b2_endpoint, &mut settings.b2_endpoint),
        (args.b2_key_id, &mut settings.b2_key_id),
        (args.b2_application_key, &mut settings.b2_application_key),
        (args.b2_path, &mut settings.items_store),
    ];
    for (flag, setting) in overrides {
        if flag.is_some() {
            *setting = flag;
        }
    }

    let items_store = settings.items_store()?.to_string();
    let api_key = settings
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("No Scrapinghub API key; pass --api-key or set API_KEY"))?;
    let project_id = settings
        .project_id
        .clone()
        .ok_or_else(|| anyhow!("No Scrapinghub project; pass --project-id or set PROJECT_ID"))?;

    let store = BackendRegistry::default()
        .open(&items_store, &settings.storage_config())
        .await?;
    let queue = Arc::new(ScrapinghubClient::new(api_key, project_id)?);

    let summary = BatchExporter::new(queue, store)
        .export(&args.spider_name, args.delete)
        .await;

    for spider in &summary.spiders {
        println!(
            "{}: {} exported, {} deleted, {} failed",
            spider.name, spider.jobs_exported, spider.jobs_deleted, spider.failures
        );
    }
    if summary.failures() > 0 {
        warn!("{} job(s) failed; see the log for details", summary.failures());
    }

    Ok(())
}

#[instrument(skip(settings))]
async fn decrypt_command(args: DecryptArgs, settings: Settings) -> anyhow::Result<()> {
    let key = match settings.files_encryption_key {
        Some(key) => key,
        None => tokio::task::spawn_blocking(|| {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt("Enter your encryption key")
                .interact()
        })
        .await??,
    };
    let cipher = FernetCipher::new(&key)?;

    let summary = decrypt_dir(&cipher, &args.input_dir, &args.output_dir).await?;
    println!(
        "Decrypted {} files into {}",
        summary.written.len(),
        args.output_dir.display()
    );
    if !summary.failed.is_empty() {
        warn!("{} file(s) could not be decrypted", summary.failed.len());
    }

    Ok(())
}
