use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use review_miner::app::analyze_use_case::AnalyzeUseCase;
use review_miner::app::dedup_use_case::DedupUseCase;
use review_miner::app::extract_use_case::{ExtractOptions, ExtractUseCase};
use review_miner::app::normalize_use_case::NormalizeUseCase;
use review_miner::app::queue_use_case::QueueUseCase;
use review_miner::app::run_use_case::RuleStagesUseCase;
use review_miner::app::tag_use_case::TagUseCase;
use review_miner::config::{Config, DEFAULT_CONFIG_PATH};
use review_miner::infra::gemini_classifier::GeminiClassifier;
use review_miner::logging;
use review_miner::observability;
use review_miner::pipeline::processing::dedup::Deduplicator;
use review_miner::pipeline::processing::extraction::batch::BatchExtractor;
use review_miner::pipeline::processing::normalize::noise::NoiseFilter;
use review_miner::pipeline::processing::normalize::ReviewNormalizer;
use review_miner::pipeline::processing::queue::QueueSampler;
use review_miner::pipeline::processing::tagging::lexicon::Lexicon;
use review_miner::pipeline::processing::tagging::LexicalTagger;

#[derive(Parser)]
#[command(name = "review_miner")]
#[command(about = "Customer review mining pipeline: normalize, dedup, tag, sample, extract, analyze")]
#[command(version = "0.1.0")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Lexicon file (overrides paths.lexicon)
    #[arg(long, global = true)]
    lexicon: Option<PathBuf>,

    /// Raw review input (overrides paths.raw_reviews)
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize raw scraped reviews
    Normalize,
    /// Merge duplicate reviews into one row per review id
    Dedup,
    /// Apply the tag lexicon to deduplicated reviews
    Tag,
    /// Build the stratified LLM extraction queue
    Queue,
    /// Run batched LLM extraction over the queue
    Extract {
        /// Reprocess reviews that already have results
        #[arg(long)]
        force: bool,
        /// Process at most N pending reviews
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Join extraction items with tags and write the pivot tables
    Analyze,
    /// Run normalize, dedup, tag and queue sequentially
    Run,
}

fn load_lexicon(config: &Config) -> Result<Lexicon> {
    let lexicon = Lexicon::load_or_bundled(config.paths.lexicon.as_deref())
        .context("loading tag lexicon")?;
    info!(
        "Lexicon {} loaded: {} attributes, {} contexts, {} skins",
        lexicon.version.as_deref().unwrap_or("unversioned"),
        lexicon.attributes.len(),
        lexicon.contexts.len(),
        lexicon.skins.len()
    );
    Ok(lexicon)
}

fn normalizer(config: &Config) -> ReviewNormalizer {
    ReviewNormalizer::new(NoiseFilter::with_config(config.noise.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    if let Some(lexicon) = cli.lexicon {
        config.paths.lexicon = Some(lexicon);
    }
    if let Some(input) = cli.input {
        config.paths.raw_reviews = input;
    }

    logging::init_logging(&config.paths.log_dir);
    if let Some(addr) = config.metrics.listen_addr.as_deref() {
        observability::init(addr)?;
    }

    let paths = config.paths.clone();
    match cli.command {
        Commands::Normalize => {
            println!("🧹 Normalizing raw reviews...");
            let summary = NormalizeUseCase::new(normalizer(&config)).run(&paths.raw_reviews, &paths.normalized)?;
            println!("✅ {} rows normalized -> {}", summary.total_rows, paths.normalized.display());
            println!("   Derived ids: {}", summary.derived_review_ids);
            println!("   Ratings nulled: {}", summary.rating_coerced);
            println!("   Date parse rate: {:.1}%", summary.date_parse_rate * 100.0);
        }
        Commands::Dedup => {
            println!("🔗 Deduplicating reviews...");
            let summary = DedupUseCase::new(Deduplicator::new()).run(&paths.normalized, &paths.deduped)?;
            println!("✅ {} -> {} rows -> {}", summary.rows_before, summary.rows_after, paths.deduped.display());
            println!("   Conflicts: {} ({:.1}%)", summary.conflict_count, summary.conflict_rate * 100.0);
        }
        Commands::Tag => {
            println!("🏷️  Tagging reviews...");
            let tagger = LexicalTagger::new(load_lexicon(&config)?);
            let summary = TagUseCase::new(tagger).run(&paths.deduped, &paths.tagged)?;
            println!("✅ {} reviews tagged -> {}", summary.total_reviews, paths.tagged.display());
            println!("   Golden nuggets: {}", summary.golden_nugget_count);
            println!("   Conditional rate: {:.1}%", summary.conditional_rate * 100.0);
        }
        Commands::Queue => {
            println!("📋 Building extraction queue...");
            let sampler = QueueSampler::new(config.queue.clone());
            let summary = QueueUseCase::new(sampler).run(&paths.tagged, &paths.queue)?;
            println!("✅ {} reviews queued -> {}", summary.total, paths.queue.display());
            for (bucket, count) in &summary.bucket_counts {
                println!("   {}: {}", bucket, count);
            }
        }
        Commands::Extract { force, limit } => {
            println!("🤖 Running LLM extraction...");
            let classifier = Arc::new(GeminiClassifier::from_env(&config.extraction)?);
            let extractor = BatchExtractor::new(classifier, config.extraction.clone());

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; stopping after the current batch");
                    flag.store(true, Ordering::SeqCst);
                }
            });

            let use_case = ExtractUseCase::new(extractor, cancel);
            match use_case
                .run(
                    &paths.queue,
                    &paths.extraction_results,
                    &paths.extraction_items,
                    ExtractOptions { force, limit },
                )
                .await
            {
                Ok(summary) => {
                    if summary.cancelled {
                        println!("⚠️  Extraction interrupted; progress saved");
                    } else {
                        println!("✅ Extraction completed");
                    }
                    println!("   Reviews processed: {}", summary.processed_reviews);
                    println!("   Succeeded: {}", summary.success_reviews);
                    println!(
                        "   Failed: {} parse, {} missing, {} api, {} rate limit",
                        summary.json_parse_errors,
                        summary.missing_in_response,
                        summary.api_errors,
                        summary.rate_limit_errors
                    );
                    println!("   Items: {} -> {}", summary.total_items, paths.extraction_items.display());
                }
                Err(e) => {
                    error!("Extraction failed: {:#}", e);
                    println!("❌ Extraction failed: {:#}", e);
                    return Err(e);
                }
            }
        }
        Commands::Analyze => {
            println!("📊 Building pivot tables...");
            let summary = AnalyzeUseCase::new(&paths.analysis_dir)
                .run(&paths.extraction_items, &paths.tagged)?;
            println!("✅ Analysis written to {}", paths.analysis_dir.display());
            println!("   Item rows: {}", summary.item_rows);
            println!("   Join success rate: {:.1}%", summary.join_success_rate * 100.0);
            println!("   Context NONE rate: {:.1}%", summary.context_none_rate * 100.0);
        }
        Commands::Run => {
            println!("🚀 Running rule stages...");
            let lexicon = load_lexicon(&config)?;
            let stages = RuleStagesUseCase::new(paths.clone(), config.noise.clone(), lexicon, config.queue.clone());
            match stages.run() {
                Ok(report) => {
                    println!("✅ Rule stages completed");
                    println!("   Normalized: {}", report.normalize.total_rows);
                    println!("   Deduplicated: {}", report.dedup.rows_after);
                    println!("   Golden nuggets: {}", report.tag.golden_nugget_count);
                    println!("   Queued: {} -> {}", report.queue.total, paths.queue.display());
                }
                Err(e) => {
                    error!("Rule stages failed: {:#}", e);
                    println!("❌ Rule stages failed: {:#}", e);
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
