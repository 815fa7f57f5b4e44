//! # Video Harness CLI (`vh`)
//!
//! Ingest videos into time-aligned transcript/caption chunks and search
//! them.
//!
//! ## Usage
//!
//! ```bash
//! vh --config ./config/vh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vh ingest --url <URL>` | Download and ingest a remote video |
//! | `vh ingest --local <PATH>` | Ingest a local video file |
//! | `vh search <video_id> "<query>"` | Adaptive similarity search within one video |
//! | `vh ask <video_id> "<question>"` | Answer a question with timestamp citations |
//! | `vh meta <video_id>` | Print the stored metadata record |
//! | `vh health` | Show the vector backend and whether it is reachable |
//! | `vh serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Logs go to stderr so
//! stdout stays parseable.

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use video_harness::config::{self, Config};
use video_harness::embedding::{create_provider, EmbeddingGateway};
use video_harness::get::get_video_meta;
use video_harness::ingest::{Collaborators, Orchestrator};
use video_harness::layout::DataLayout;
use video_harness::models::{IngestOutcome, IngestRequest, SourceKind};
use video_harness::progress::ProgressMode;
use video_harness::rag::{answer_question, OllamaAnswerModel};
use video_harness::rerank::create_reranker;
use video_harness::search::RetrievalEngine;
use video_harness::server::{run_server, AppState};
use video_harness::sources::{print_health, vector_store_health};
use video_harness::store::open_store;

/// Video Harness: video ingestion and adaptive similarity search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vh.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "vh", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one video: acquire, decode, transcribe, caption, align, embed, index.
    ///
    /// Ctrl-C cancels the ingest at the next stage boundary.
    #[command(group(ArgGroup::new("source").required(true).args(["url", "local"])))]
    Ingest {
        /// Remote video URL (fetched with yt-dlp).
        #[arg(long)]
        url: Option<String>,

        /// Local video file.
        #[arg(long)]
        local: Option<PathBuf>,

        /// Frames sampled per second. 0 disables frame extraction.
        #[arg(long, default_value_t = 1.0)]
        fps: f64,

        /// Keep at most this many frames.
        #[arg(long)]
        max_frames: Option<usize>,

        /// Skip the captioning stage.
        #[arg(long)]
        no_captions: bool,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search one video's chunks.
    Search {
        video_id: String,
        query: String,

        /// Maximum number of hits (default: `[retrieval].default_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question about one video.
    Ask {
        video_id: String,
        question: String,

        /// Supporting passages to retrieve.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Override `[llm].model`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Print a video's metadata record as JSON.
    Meta { video_id: String },

    /// Show the vector backend and whether it is reachable.
    Health,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn retrieval_engine(cfg: &Config) -> Result<RetrievalEngine> {
    let gateway = EmbeddingGateway::new(create_provider(&cfg.embedding)?, cfg.embedding.batch_size);
    let store = open_store(cfg, gateway.dims()).await?;
    Ok(RetrievalEngine::new(
        gateway,
        store,
        create_reranker(&cfg.rerank)?,
        cfg.retrieval.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let layout = DataLayout::new(&cfg);

    match cli.command {
        Commands::Ingest {
            url,
            local,
            fps,
            max_frames,
            no_captions,
            progress,
        } => {
            let (source_kind, source) = match (url, local) {
                (Some(url), _) => (SourceKind::Remote, url),
                (None, Some(path)) => (SourceKind::Local, path.display().to_string()),
                (None, None) => anyhow::bail!("one of --url or --local is required"),
            };
            let req = IngestRequest {
                source_kind,
                source,
                fps,
                max_frames,
                enable_captions: !no_captions,
            };

            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let orchestrator = Orchestrator::new(layout, Collaborators::from_config(&cfg).await?)
                .with_progress(mode.reporter());

            let registry = orchestrator.registry().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("cancelling after the current stage...");
                    registry.cancel_all();
                }
            });

            match orchestrator.ingest(&req).await? {
                IngestOutcome::Completed {
                    video_id,
                    chunks_indexed,
                } => {
                    println!("ingest complete");
                    println!("  video_id: {}", video_id);
                    println!("  chunks indexed: {}", chunks_indexed);
                }
                IngestOutcome::Cancelled { video_id, stage } => {
                    println!("ingest cancelled before {}", stage);
                    println!("  video_id: {}", video_id);
                    std::process::exit(130);
                }
            }
        }
        Commands::Search {
            video_id,
            query,
            top_k,
        } => {
            let engine = retrieval_engine(&cfg).await?;
            let hits = engine.search(&video_id, &query, top_k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {:.1}s-{:.1}s",
                    i + 1,
                    hit.score,
                    hit.start,
                    hit.end
                );
                println!("    transcript: \"{}\"", hit.transcript);
                if !hit.caption.is_empty() {
                    println!("    caption: \"{}\"", hit.caption);
                }
                if let Some(thumb) = &hit.thumbnail_path {
                    println!("    thumbnail: {}", thumb);
                }
                println!();
            }
        }
        Commands::Ask {
            video_id,
            question,
            top_k,
            model,
        } => {
            let mut answer_model = OllamaAnswerModel::new(&cfg.llm)?;
            if let Some(model) = model {
                answer_model = answer_model.with_model(&model);
            }
            let answer = answer_question(&layout, &video_id, &question, top_k, &answer_model).await?;
            println!("{}", answer.answer);
            println!();
            println!("sources:");
            for s in &answer.sources {
                println!("  [{:.1}s-{:.1}s] {}", s.start, s.end, s.transcript);
            }
        }
        Commands::Meta { video_id } => {
            let meta = get_video_meta(&layout, &video_id).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Commands::Health => {
            print_health(&vector_store_health(&cfg).await?);
        }
        Commands::Serve => {
            let collab = Collaborators::from_config(&cfg).await?;
            let engine = RetrievalEngine::new(
                collab.embedder.clone(),
                collab.store.clone(),
                create_reranker(&cfg.rerank)?,
                cfg.retrieval.clone(),
            );
            let answer_model = Arc::new(OllamaAnswerModel::new(&cfg.llm)?);
            let state = AppState::new(
                Arc::new(cfg),
                Arc::new(Orchestrator::new(layout, collab)),
                engine,
                answer_model,
            );
            run_server(state).await?;
        }
    }

    Ok(())
}
