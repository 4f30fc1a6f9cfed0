use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use profile_resolver::config::{get_config_path, AppConfig, ConfigOverrides};
use profile_resolver::extract::Extractor;
use profile_resolver::input::{build_source, InputKind};
use profile_resolver::logging::init_logging;
use profile_resolver::output::CsvRecordSink;
use profile_resolver::pacing::{DelayBounds, Pacer, TokioPacer};
use profile_resolver::proxy::build_pool;
use profile_resolver::resolver::{BatchSummary, ResolutionStatus, Resolver};
use profile_resolver::search::challenge::build_challenge_resolver;
use profile_resolver::search::retry::RetryPolicy;
use profile_resolver::search::{SearchDriver, SearchEngine};
use profile_resolver::session::{build_provider, RenderingMode};

#[derive(Parser)]
#[command(name = "profile-resolver")]
#[command(about = "Resolve proof links to public profile pages")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every query from the configured input
    Run {
        #[arg(short, long, help = "CSV file with the query column", conflicts_with = "sheet_url")]
        input: Option<PathBuf>,

        #[arg(long, help = "Published spreadsheet CSV export URL")]
        sheet_url: Option<String>,

        #[arg(long, help = "Input column holding the queries")]
        column: Option<String>,

        #[arg(short, long, help = "Search engine: google, bing or duckduckgo")]
        engine: Option<String>,

        #[arg(short, long, help = "Proxy provider: none, webshare or proxyscrape")]
        proxy: Option<String>,

        #[arg(long, help = "Consecutive access walls before rotating the proxy")]
        threshold: Option<u32>,

        #[arg(long, help = "Run the browser without a window")]
        headless: bool,

        #[arg(short, long, help = "Output CSV path")]
        output: Option<PathBuf>,

        #[arg(long, help = "Minimum pause between queries in milliseconds")]
        min_delay_ms: Option<u64>,

        #[arg(long, help = "Maximum pause between queries in milliseconds")]
        max_delay_ms: Option<u64>,
    },

    /// Fetch and list the endpoints of the configured proxy provider
    Proxies,

    /// Show the effective configuration
    Config {
        #[arg(long, help = "Write the effective configuration to the config file")]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).await?;
    ConfigOverrides::apply(&mut config);
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    match cli.command {
        Commands::Run {
            input,
            sheet_url,
            column,
            engine,
            proxy,
            threshold,
            headless,
            output,
            min_delay_ms,
            max_delay_ms,
        } => {
            if let Some(path) = input {
                config.input.kind = InputKind::File;
                config.input.path = Some(path);
            }
            if let Some(url) = sheet_url {
                config.input.kind = InputKind::Spreadsheet;
                config.input.url = Some(url);
            }
            if let Some(column) = column {
                config.input.column = column;
            }
            if let Some(engine) = engine {
                config.search.engine = engine.parse()?;
            }
            if let Some(proxy) = proxy {
                config.proxy.provider = proxy.parse()?;
            }
            if let Some(threshold) = threshold {
                config.resolver.access_wall_threshold = threshold;
            }
            if headless {
                config.session.rendering_mode = RenderingMode::Headless;
            }
            if let Some(output) = output {
                config.output.path = output;
            }
            config.pacing.inter_query = DelayBounds::new(
                min_delay_ms.unwrap_or(config.pacing.inter_query.min_ms),
                max_delay_ms.unwrap_or(config.pacing.inter_query.max_ms),
            );

            config.validate()?;
            init_logging(&config.logging)?;
            info!("Profile Resolver v{}", env!("CARGO_PKG_VERSION"));

            execute_batch(&config).await?;
        }
        Commands::Proxies => {
            init_logging(&config.logging)?;
            list_proxies(&config).await?;
        }
        Commands::Config { write } => {
            config.validate()?;
            if write {
                let path = config.save(cli.config.as_deref()).await?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("# {}", cli.config.unwrap_or_else(get_config_path).display());
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

async fn execute_batch(config: &AppConfig) -> Result<()> {
    let source = build_source(&config.input)?;
    info!("Loading queries from {}", source.describe());
    let queries = source.load().await?;
    if queries.is_empty() {
        println!("No queries found in column '{}'.", config.input.column);
        return Ok(());
    }

    let pacer: Arc<dyn Pacer> = Arc::new(TokioPacer);
    let engine = SearchEngine::build(&config.search, &config.pacing, pacer.clone())?;
    let search = SearchDriver::new(
        Box::new(engine),
        RetryPolicy::new(config.search.max_attempts, config.pacing.retry_backoff),
        build_challenge_resolver(config.search.challenge, config.search.challenge_timeout_seconds),
        pacer.clone(),
        config.pacing.clone(),
    );
    let extractor = Extractor::new(
        config.resolver.selectors.clone(),
        &config.resolver.access_wall_marker,
        pacer.clone(),
        config.pacing.render_settle,
    );

    let mut resolver = Resolver::new(
        search,
        extractor,
        build_provider(&config.session).await?,
        build_pool(&config.proxy)?,
        pacer,
        config.pacing.inter_query,
        config.resolver.access_wall_threshold,
    );

    let mut sink = CsvRecordSink::open(&config.output.path)?;
    match resolver.run(&queries, &mut sink).await {
        Ok(summary) => {
            print_summary(&summary, &config.output.path);
            Ok(())
        }
        Err(e) => {
            error!("Batch halted after {} records: {}", sink.written(), e);
            println!(
                "Batch halted after {} of {} queries. Partial results in: {}",
                sink.written(),
                queries.len(),
                config.output.path.display()
            );
            Err(e.into())
        }
    }
}

fn print_summary(summary: &BatchSummary, output: &std::path::Path) {
    println!("Batch {} completed.", summary.batch_id);
    println!("{:<24} {:>8}", "Status", "Count");
    println!("{}", "-".repeat(33));
    for status in [
        ResolutionStatus::Ok,
        ResolutionStatus::NotFoundOrChallenge,
        ResolutionStatus::AccessWall,
        ResolutionStatus::Rotated,
    ] {
        println!("{:<24} {:>8}", status.label(), summary.count(status));
    }
    println!("{}", "-".repeat(33));
    println!("{:<24} {:>8}", "processed", summary.processed);
    println!("{:<24} {:>8}", "proxy rotations", summary.rotations);
    if let Some(endpoint) = &summary.last_endpoint {
        println!("Last proxy: {}", endpoint);
    }
    if let Some(finished) = summary.finished_at {
        let elapsed = finished - summary.started_at;
        println!("Elapsed: {}s", elapsed.num_seconds());
    }
    println!("Results written to: {}", output.display());
}

async fn list_proxies(config: &AppConfig) -> Result<()> {
    let Some(mut pool) = build_pool(&config.proxy)? else {
        println!("No proxy provider configured; connections are direct.");
        return Ok(());
    };

    let count = pool.fetch().await?;
    println!("{} endpoints from {}:", count, pool.provider_name());
    println!("{:<28} {:<12} {:<6}", "Server", "Region", "Auth");
    println!("{}", "-".repeat(48));
    for endpoint in pool.endpoints() {
        println!(
            "{:<28} {:<12} {:<6}",
            endpoint.server(),
            endpoint.region,
            if endpoint.has_credentials() { "yes" } else { "no" }
        );
    }

    Ok(())
}
