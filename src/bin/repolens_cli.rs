//! `repolens-cli` - interactive testing tool for the indexer and search
//! layers, run directly against a working tree rather than over the
//! stdin/stdout tool protocol.

use std::io::BufRead;
use std::io::Write;
use std::io::{self};
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;

use repolens::RepolensConfig;
use repolens::RepolensService;
use repolens::catalog::Catalog;
use repolens::config::EmbeddingProvider;
use repolens::embedder::HttpEmbedder;
use repolens::embedder::UnavailableEmbedder;
use repolens::indexing::Indexer;
use repolens::location::LocationStore;
use repolens::search::Bm25LexicalSearch;
use repolens::search::Oversample;
use repolens::search::SemanticSearcher;
use repolens::search::TagSymbolExtractor;
use repolens::service::FindSymbolRequest;
use repolens::service::GetFileRequest;
use repolens::service::HybridSearchRequest;
use repolens::service::SearchKeywordRequest;
use repolens::storage::BackendKind;
use repolens::storage::PoolConfig;
use repolens::storage::PostgresStore;
use repolens::storage::SqliteStore;
use repolens::storage::Store;
use repolens::traits::Embedder;
use repolens::types::DistanceMetric;
use repolens::vector::AnnNativeIndex;
use repolens::vector::ExactScanIndex;
use repolens::vector::VectorIndex;

const TOOL_DIR_NAME: &str = ".repolens";

#[derive(Parser)]
#[command(name = "repolens-cli")]
#[command(about = "Testing tool for the repolens indexer and search layers")]
struct Cli {
    /// Working directory to index/search.
    #[arg(default_value = ".")]
    workdir: PathBuf,

    /// Path to a config file (default: `{workdir}/.repolens/config.toml`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single command and exit (instead of REPL mode).
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show index status for the working directory.
    Status,
    /// Build or incrementally update the index.
    Build {
        /// Ignore the previous snapshot and treat every file as changed.
        #[arg(long)]
        force: bool,
    },
    /// Hybrid search (lexical + semantic, RRF-fused).
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Lexical (BM25) search only.
    Keyword {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Symbol lookup by name.
    Symbol {
        name: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print a file or a line range of it.
    Get {
        path: String,
        #[arg(long)]
        start: Option<u32>,
        #[arg(long)]
        end: Option<u32>,
    },
    /// Show the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("repolens=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workdir = cli.workdir.canonicalize().unwrap_or_else(|_| cli.workdir.clone());
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| workdir.join(TOOL_DIR_NAME).join("config.toml"));
    let config = RepolensConfig::load(Some(&config_path))?;

    match cli.command {
        Some(cmd) => run_command(cmd, &workdir, &config).await?,
        None => run_repl(&workdir, &config).await?,
    }

    Ok(())
}

async fn open_store(config: &RepolensConfig) -> anyhow::Result<Store> {
    match config.db_type {
        BackendKind::Embedded => {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let path = config.db_path.clone();
            let store = tokio::task::spawn_blocking(move || SqliteStore::open(&path)).await??;
            Ok(Store::Embedded(Arc::new(store)))
        }
        BackendKind::Server => {
            let dsn = config
                .db_dsn
                .clone()
                .ok_or_else(|| anyhow::anyhow!("db_dsn required when db_type = server"))?;
            Ok(Store::Server(Arc::new(PostgresStore::connect(&dsn, PoolConfig::default()).await?)))
        }
    }
}

fn build_embedder(config: &RepolensConfig) -> Arc<dyn Embedder> {
    match &config.embedding.provider {
        EmbeddingProvider::Off => Arc::new(UnavailableEmbedder),
        EmbeddingProvider::A | EmbeddingProvider::B => {
            let mut embedder = HttpEmbedder::new(&config.embedding.endpoint, &config.embedding.model, config.embedding.dimensions);
            if let Some(key) = &config.embedding.api_key {
                embedder = embedder.with_api_key(key);
            }
            Arc::new(embedder)
        }
    }
}

async fn build_service(workdir: &Path, config: &RepolensConfig) -> anyhow::Result<(Store, RepolensService)> {
    let store = open_store(config).await?;
    let embedder = build_embedder(config);
    let locations = LocationStore::new(store.clone());

    let semantic = build_semantic(&store, embedder, locations.clone(), workdir, config).await;
    let service = RepolensService::new(
        workdir,
        locations,
        Arc::new(Bm25LexicalSearch::new()),
        Arc::new(TagSymbolExtractor::new()),
        semantic,
        Oversample(config.search.oversample_factor),
    );
    Ok((store, service))
}

async fn build_semantic(
    store: &Store,
    embedder: Arc<dyn Embedder>,
    locations: LocationStore,
    repo_root: &Path,
    config: &RepolensConfig,
) -> Option<SemanticSearcher> {
    if config.embedding.provider == EmbeddingProvider::Off {
        return None;
    }
    let catalog = Catalog::new(store.clone());
    let repo_root_str = repo_root.to_string_lossy().into_owned();
    let repo_config = catalog.get_repo_config(&repo_root_str).await.ok().flatten()?;

    let vector_index: Arc<dyn VectorIndex> = if store.supports_native_vector() {
        Arc::new(AnnNativeIndex::new(store.clone(), repo_config.model_id.clone(), repo_config.dimensions, DistanceMetric::Cosine))
    } else {
        Arc::new(ExactScanIndex::new(store.clone(), repo_config.model_id, DistanceMetric::Cosine))
    };

    Some(
        SemanticSearcher::new(embedder, vector_index, locations, DistanceMetric::Cosine)
            .with_snippet_reader(Arc::new(repolens::search::FsSnippetReader::new(repo_root))),
    )
}

async fn run_command(cmd: Command, workdir: &PathBuf, config: &RepolensConfig) -> anyhow::Result<()> {
    match cmd {
        Command::Status => cmd_status(workdir, config).await,
        Command::Build { force } => cmd_build(workdir, config, force).await,
        Command::Search { query, limit } => cmd_search(workdir, config, &query, limit).await,
        Command::Keyword { query, limit } => cmd_keyword(workdir, config, &query, limit).await,
        Command::Symbol { name, limit } => cmd_symbol(workdir, config, &name, limit).await,
        Command::Get { path, start, end } => cmd_get(workdir, config, &path, start, end).await,
        Command::Config => cmd_config(config),
    }
}

async fn run_repl(workdir: &PathBuf, config: &RepolensConfig) -> anyhow::Result<()> {
    println!("repolens-cli");
    println!("Workdir: {}", workdir.display());
    println!("Data: {}", config.db_path.display());
    println!();
    println!("Commands: status, build [--force], search <query>, keyword <query>, symbol <name>, get <path>, config, quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = *parts.first().unwrap_or(&"");

        let result = match cmd {
            "quit" | "exit" | "q" => break,
            "status" => cmd_status(workdir, config).await,
            "build" => {
                let force = parts.get(1).map(|s| *s == "--force").unwrap_or(false);
                cmd_build(workdir, config, force).await
            }
            "search" => {
                let query = parts[1..].join(" ");
                if query.is_empty() {
                    println!("Usage: search <query>");
                    continue;
                }
                cmd_search(workdir, config, &query, 10).await
            }
            "keyword" => {
                let query = parts[1..].join(" ");
                if query.is_empty() {
                    println!("Usage: keyword <query>");
                    continue;
                }
                cmd_keyword(workdir, config, &query, 10).await
            }
            "symbol" => {
                let name = parts.get(1).copied().unwrap_or("");
                if name.is_empty() {
                    println!("Usage: symbol <name>");
                    continue;
                }
                cmd_symbol(workdir, config, name, 10).await
            }
            "get" => {
                let path = parts.get(1).copied().unwrap_or("");
                if path.is_empty() {
                    println!("Usage: get <path>");
                    continue;
                }
                cmd_get(workdir, config, path, None, None).await
            }
            "config" => cmd_config(config),
            "help" | "?" => {
                println!("status, build [--force], search <query>, keyword <query>, symbol <name>, get <path>, config, quit");
                continue;
            }
            _ => {
                println!("Unknown command: {cmd}. Type 'help' for available commands.");
                continue;
            }
        };

        if let Err(e) = result {
            println!("Error: {e}");
        }
    }

    Ok(())
}

async fn cmd_status(workdir: &Path, config: &RepolensConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let catalog = Catalog::new(store.clone());
    let locations = LocationStore::new(store);
    let repo_root = workdir.to_string_lossy().into_owned();

    match catalog.get_repo_config(&repo_root).await? {
        Some(repo_config) => {
            println!("Model: {}", repo_config.model_id);
            println!("Dimensions: {}", repo_config.dimensions);
        }
        None => println!("Model: none (not yet indexed)"),
    }

    let stats = locations.stats(&repo_root).await?;
    println!("Files indexed: {}", stats.file_count);
    println!("Locations: {}", stats.total_locations);
    println!("Unique chunk hashes: {}", stats.unique_hashes);
    Ok(())
}

async fn cmd_build(workdir: &Path, config: &RepolensConfig, force: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let embedder = build_embedder(config);
    let indexer = Indexer::new(
        store,
        embedder,
        config.chunking.clone(),
        repolens::PipelineConfig {
            batch_size: config.indexing.batch_size,
            max_workers: config.indexing.max_workers,
        },
        TOOL_DIR_NAME,
        Duration::from_secs(config.indexing.lock_timeout_secs),
    );

    println!("Indexing {}...", workdir.display());
    let stats = indexer.index(workdir, force).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_search(workdir: &Path, config: &RepolensConfig, query: &str, limit: usize) -> anyhow::Result<()> {
    let (_store, service) = build_service(workdir, config).await?;
    let response = service
        .hybrid_search(HybridSearchRequest {
            query: query.to_string(),
            keyword_limit: limit,
            semantic_limit: limit,
            rerank: config.search.rerank_enabled,
        })
        .await?;

    println!(
        "[Hybrid] {} results (keyword: {}, semantic: {}, semantic_available: {})\n",
        response.results.len(),
        response.keyword_count,
        response.semantic_count,
        response.semantic_available
    );
    for (i, hit) in response.results.iter().enumerate() {
        println!("{}. {}:{}-{} (score: {:.3})", i + 1, hit.path, hit.line, hit.end_line, hit.score);
        if let Some(snippet) = &hit.snippet {
            for line in snippet.lines().take(2) {
                println!("   {}", line.trim());
            }
        }
    }
    Ok(())
}

async fn cmd_keyword(workdir: &Path, config: &RepolensConfig, query: &str, limit: usize) -> anyhow::Result<()> {
    let (_store, service) = build_service(workdir, config).await?;
    let response = service
        .search_keyword(SearchKeywordRequest {
            query: query.to_string(),
            top_k: limit,
        })
        .await?;

    println!("[Keyword] {} results\n", response.results.len());
    for (i, hit) in response.results.iter().enumerate() {
        println!("{}. {}:{}-{} (score: {:.3})", i + 1, hit.path, hit.line_start, hit.line_end, hit.score);
        println!("   {}", hit.snippet.lines().next().unwrap_or("").trim());
    }
    Ok(())
}

async fn cmd_symbol(workdir: &Path, config: &RepolensConfig, name: &str, limit: usize) -> anyhow::Result<()> {
    let (_store, service) = build_service(workdir, config).await?;
    let response = service
        .find_symbol(FindSymbolRequest {
            name: name.to_string(),
            kind: None,
            limit,
        })
        .await?;

    println!("[Symbol] {} matches\n", response.symbols.len());
    for (i, sym) in response.symbols.iter().enumerate() {
        println!("{}. {} {} ({}:{})", i + 1, sym.kind, sym.name, sym.path, sym.line);
    }
    Ok(())
}

async fn cmd_get(workdir: &Path, config: &RepolensConfig, path: &str, start: Option<u32>, end: Option<u32>) -> anyhow::Result<()> {
    let (_store, service) = build_service(workdir, config).await?;
    let response = service
        .get_file(GetFileRequest {
            path: path.to_string(),
            start_line: start,
            end_line: end,
        })
        .await?;
    println!("{}", response.content);
    Ok(())
}

fn cmd_config(config: &RepolensConfig) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
