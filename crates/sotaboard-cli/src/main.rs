use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sotaboard_arxiv::{ArxivSource, SnapshotReader};
use sotaboard_core::config_file::{self, ConfigFile};
use sotaboard_core::model::backend_for;
use sotaboard_core::orchestrator::ExtractionContext;
use sotaboard_core::store::RunStore;
use sotaboard_core::taxonomy::Taxonomy;
use sotaboard_core::{PaperRecord, ParseStatus, ParsedPaper, ProgressEvent, RunStats};
use sotaboard_parse::parse_paper_cached;
use sotaboard_pdf_mupdf::MupdfBackend;
use sotaboard_reporting::{ExportFormat, build_leaderboard, write_leaderboard};

/// SOTA leaderboard miner - filter, fetch, parse and extract structured
/// results from arXiv papers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a config file (overrides the default cascade)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the metadata snapshot and cache the candidate set
    Scan {
        /// Path to the JSON-lines metadata snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Download PDFs for the cached candidate set
    Fetch {
        /// Retry ids recorded in the failed-download ledger
        #[arg(long)]
        refetch_failed: bool,
    },

    /// Parse downloaded PDFs into normalized documents
    Parse {
        /// Drop cached parses and re-parse from the PDFs
        #[arg(long)]
        reparse: bool,
    },

    /// Run model extraction over content-filtered papers
    Extract {
        /// Max model calls this run
        #[arg(long)]
        budget: Option<usize>,

        /// Re-extract papers with cached results
        #[arg(long)]
        force_refresh: bool,

        /// Path to the taxonomy TOML
        #[arg(long)]
        taxonomy: Option<PathBuf>,
    },

    /// Aggregate extraction results into the leaderboard
    Leaderboard {
        /// Output path (.csv, .json or .md)
        #[arg(short, long, default_value = "leaderboard.csv")]
        output: PathBuf,
    },

    /// Run the full pipeline: scan, fetch, parse, extract, aggregate
    Run {
        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[arg(long)]
        taxonomy: Option<PathBuf>,

        #[arg(long)]
        budget: Option<usize>,

        #[arg(short, long, default_value = "leaderboard.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => config_file::load_from_path(path)
            .ok_or_else(|| anyhow::anyhow!("could not read config at {}", path.display()))?,
        None => config_file::load_config(),
    };

    let store_root = cli
        .store
        .clone()
        .or_else(|| {
            config
                .paths
                .as_ref()
                .and_then(|p| p.store_root.clone())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("runs/sotaboard"));
    let store = RunStore::new(store_root);

    // Ctrl-C cancels the run; completed cache entries stay valid.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted - finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Scan { snapshot } => scan(&config, &store, snapshot),
        Command::Fetch { refetch_failed } => fetch(&config, &store, refetch_failed, &cancel).await,
        Command::Parse { reparse } => parse(&store, reparse, &cancel),
        Command::Extract {
            budget,
            force_refresh,
            taxonomy,
        } => {
            extract(&config, &store, budget, force_refresh, taxonomy, &cancel).await?;
            Ok(())
        }
        Command::Leaderboard { output } => leaderboard(&config, &store, &output),
        Command::Run {
            snapshot,
            taxonomy,
            budget,
            output,
        } => {
            scan(&config, &store, snapshot)?;
            fetch(&config, &store, false, &cancel).await?;
            parse(&store, false, &cancel)?;
            extract(&config, &store, budget, false, taxonomy, &cancel).await?;
            leaderboard(&config, &store, &output)
        }
    }
}

fn progress_bar(len: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg:>10} [{bar:30}] {pos}/{len}")
            .expect("static template is valid")
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

fn scan(config: &ConfigFile, store: &RunStore, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    let snapshot_path = snapshot
        .or_else(|| {
            config
                .paths
                .as_ref()
                .and_then(|p| p.snapshot.clone())
                .map(PathBuf::from)
        })
        .ok_or_else(|| anyhow::anyhow!("no snapshot path configured (--snapshot or [paths].snapshot)"))?;

    let criteria = config
        .filter
        .as_ref()
        .map(|f| f.criteria())
        .unwrap_or_default();

    eprintln!("Scanning {} ...", snapshot_path.display());
    let mut reader = SnapshotReader::open(&snapshot_path)?;
    let candidates = criteria.filter_candidates(reader.by_ref());
    let skipped = reader.skipped();

    store.write_candidates(&candidates)?;

    println!(
        "Scan complete: {} candidates ({} malformed lines skipped)",
        candidates.len().green(),
        skipped
    );
    if candidates.is_empty() {
        println!("{}", "No candidates found. Try broadening keywords.".yellow());
    } else if candidates.len() > 500 {
        println!(
            "{}",
            "More than 500 candidates - consider refining keywords before fetching.".yellow()
        );
    }
    Ok(())
}

fn load_candidate_set(store: &RunStore) -> anyhow::Result<Vec<PaperRecord>> {
    store
        .load_candidates()
        .ok_or_else(|| anyhow::anyhow!("no cached candidate set - run `sotaboard scan` first"))
}

async fn fetch(
    config: &ConfigFile,
    store: &RunStore,
    refetch_failed_flag: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let candidates = load_candidate_set(store)?;
    let fetch_config = config.fetch.clone().unwrap_or_default();

    let mut source = ArxivSource::new();
    if let Some(base_url) = fetch_config.base_url {
        source = source.with_base_url(base_url);
    }
    if let Some(max_retries) = fetch_config.max_retries {
        source = source.with_max_retries(max_retries);
    }
    if let Some(timeout_secs) = fetch_config.timeout_secs {
        source = source.with_timeout(Duration::from_secs(timeout_secs));
    }
    let delay = Duration::from_millis(fetch_config.delay_ms.unwrap_or(3000));
    let refetch_failed = refetch_failed_flag || fetch_config.refetch_failed.unwrap_or(false);

    let client = reqwest::Client::new();
    let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();

    let bar = progress_bar(ids.len() as u64, "fetching");
    let bar_for_items = bar.clone();
    let on_item = move |_id: &str| bar_for_items.inc(1);
    let on_item: &(dyn Fn(&str) + Send + Sync) = &on_item;
    let report = source
        .fetch_candidates(
            &ids,
            store,
            &client,
            delay,
            refetch_failed,
            cancel,
            Some(on_item),
        )
        .await;
    bar.finish_and_clear();

    println!(
        "Fetch complete: {} available ({} cache hits), {} failed, {} skipped from ledger",
        report.fetched.len().green(),
        report.cache_hits,
        report.failed.len().red(),
        report.skipped_ledger.len()
    );
    for (id, err) in &report.failed {
        tracing::warn!(paper_id = %id, error = %err, "fetch failure");
    }
    Ok(())
}

fn parse(store: &RunStore, reparse: bool, cancel: &CancellationToken) -> anyhow::Result<()> {
    let candidates = load_candidate_set(store)?;
    let backend = MupdfBackend::new();

    let bar = progress_bar(candidates.len() as u64, "parsing");
    let mut ok = 0usize;
    let mut partial = 0usize;
    let mut failed = 0usize;
    let mut missing = 0usize;

    for record in &candidates {
        if cancel.is_cancelled() {
            break;
        }
        bar.inc(1);
        if !store.has_pdf(&record.id) {
            missing += 1;
            continue;
        }
        if reparse {
            store.invalidate_parsed(&record.id)?;
        }
        let paper =
            parse_paper_cached(&record.id, &store.pdf_path(&record.id), &backend, None, store)?;
        match paper.status {
            ParseStatus::Ok => ok += 1,
            ParseStatus::Partial => partial += 1,
            ParseStatus::Failed => failed += 1,
        }
    }
    bar.finish_and_clear();

    println!(
        "Parse complete: {} ok, {} partial, {} failed, {} without PDF",
        ok.green(),
        partial.yellow(),
        failed.red(),
        missing
    );
    Ok(())
}

/// Collect papers that pass the content filter, paired with their
/// snapshot abstracts.
fn content_filtered_papers(
    config: &ConfigFile,
    store: &RunStore,
) -> anyhow::Result<(Vec<(ParsedPaper, Option<String>)>, usize)> {
    let candidates = load_candidate_set(store)?;
    let rules = config
        .content
        .as_ref()
        .map(|c| c.rules())
        .unwrap_or_default();

    let mut surviving = Vec::new();
    let mut rejected = 0usize;
    for record in &candidates {
        let Some(paper) = store.load_parsed(&record.id) else {
            continue;
        };
        let decision = rules.evaluate(&paper);
        if decision.include {
            tracing::debug!(
                paper_id = %record.id,
                matched = ?decision.matched_keywords,
                "content filter pass"
            );
            surviving.push((paper, Some(record.abstract_text.clone())));
        } else {
            tracing::info!(
                paper_id = %record.id,
                reason = decision.reason.as_deref().unwrap_or("-"),
                "content filter reject"
            );
            rejected += 1;
        }
    }
    Ok((surviving, rejected))
}

async fn extract(
    config: &ConfigFile,
    store: &RunStore,
    budget: Option<usize>,
    force_refresh: bool,
    taxonomy_path: Option<PathBuf>,
    cancel: &CancellationToken,
) -> anyhow::Result<RunStats> {
    let extraction = config.extraction.clone().unwrap_or_default();

    let taxonomy_path = taxonomy_path
        .or_else(|| {
            config
                .paths
                .as_ref()
                .and_then(|p| p.taxonomy.clone())
                .map(PathBuf::from)
        })
        .ok_or_else(|| anyhow::anyhow!("no taxonomy configured (--taxonomy or [paths].taxonomy)"))?;
    let taxonomy = Arc::new(Taxonomy::load(&taxonomy_path)?);
    if taxonomy.is_empty() {
        anyhow::bail!("taxonomy at {} has no nodes", taxonomy_path.display());
    }

    let mut orchestrator_config = extraction.orchestrator_config();
    if budget.is_some() {
        orchestrator_config.call_budget = budget;
    }
    orchestrator_config.force_refresh = force_refresh;

    let backend = backend_for(&orchestrator_config)
        .map_err(|e| anyhow::anyhow!(e))?;

    let (papers, rejected) = content_filtered_papers(config, store)?;
    println!(
        "Extracting from {} papers ({} rejected by content filter)",
        papers.len(),
        rejected
    );

    let ctx = ExtractionContext {
        config: orchestrator_config,
        store: store.clone(),
        taxonomy,
        targets: extraction.targets(),
        schema: extraction.schema(),
        excerpt_policy: extraction.excerpt_policy(),
    };

    let bar = progress_bar(papers.len() as u64, "extracting");
    let bar_for_events = bar.clone();
    // Every job ends in exactly one Result or BudgetExhausted event
    // (cache hits also emit Result), so those drive the bar.
    let progress = move |event: ProgressEvent| match event {
        ProgressEvent::Result { .. } | ProgressEvent::BudgetExhausted { .. } => {
            bar_for_events.inc(1)
        }
        _ => {}
    };

    let (results, stats) = sotaboard_core::extract_candidates(
        papers,
        ctx,
        Arc::from(backend),
        progress,
        cancel.clone(),
    )
    .await;
    bar.finish_and_clear();

    print_extraction_summary(&stats, results.len());
    Ok(stats)
}

fn print_extraction_summary(stats: &RunStats, results: usize) {
    println!("Extraction summary:");
    println!("  papers considered    {}", stats.total);
    println!("  results persisted    {}", results);
    println!("  succeeded            {}", stats.succeeded.green());
    println!("  from cache           {}", stats.cache_hits);
    println!("  validation failures  {}", stats.validation_failures.red());
    println!("  refusals             {}", stats.refusals.yellow());
    println!("  skipped (budget)     {}", stats.budget_skipped);
    println!("  unprocessed (halt)   {}", stats.unprocessed);
    println!("  model calls          {}", stats.model_calls);
}

fn leaderboard(config: &ConfigFile, store: &RunStore, output: &PathBuf) -> anyhow::Result<()> {
    let schema_version = config
        .extraction
        .as_ref()
        .map(|e| e.schema().version)
        .unwrap_or(sotaboard_core::schema::CURRENT_SCHEMA_VERSION);

    let results = store.list_extractions(schema_version)?;
    let rows = build_leaderboard(&results);

    let format = ExportFormat::from_extension(output)
        .ok_or_else(|| anyhow::anyhow!("unsupported output extension: {}", output.display()))?;
    write_leaderboard(&rows, format, output).map_err(|e| anyhow::anyhow!(e))?;

    let sources: std::collections::BTreeSet<&str> =
        rows.iter().map(|r| r.paper_id.as_str()).collect();
    println!(
        "Leaderboard: {} rows from {} papers -> {}",
        rows.len().green(),
        sources.len(),
        output.display()
    );
    if let Some(best) = rows.first() {
        println!(
            "  best {}: {} = {} ({})",
            best.metric, best.method, best.value, best.paper_id
        );
    }
    Ok(())
}
