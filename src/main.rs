//! `repolens`: tool-protocol server and one-shot indexer.
//!
//! Run with no subcommand to serve the line-delimited JSON protocol over
//! stdin/stdout (§6); `repolens index [--force]` runs a single indexing
//! pass and exits. Both load configuration the same way and wire the same
//! collaborators.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;

use repolens::RepolensConfig;
use repolens::RepolensError;
use repolens::RepolensService;
use repolens::Store;
use repolens::catalog::Catalog;
use repolens::config::EmbeddingProvider;
use repolens::embedder::HttpEmbedder;
use repolens::embedder::UnavailableEmbedder;
use repolens::indexing::Indexer;
use repolens::location::LocationStore;
use repolens::reranker::PassthroughCrossEncoder;
use repolens::search::Bm25LexicalSearch;
use repolens::search::Oversample;
use repolens::search::SemanticSearcher;
use repolens::search::TagSymbolExtractor;
use repolens::storage::BackendKind;
use repolens::storage::PostgresStore;
use repolens::storage::PoolConfig;
use repolens::storage::SqliteStore;
use repolens::traits::CrossEncoder;
use repolens::traits::Embedder;
use repolens::types::DistanceMetric;
use repolens::vector::AnnNativeIndex;
use repolens::vector::ExactScanIndex;
use repolens::vector::VectorIndex;

const TOOL_DIR_NAME: &str = ".repolens";

#[derive(Parser)]
#[command(name = "repolens")]
#[command(about = "Local code-intelligence engine: indexer and tool-protocol server")]
struct Cli {
    /// Repository to index/serve.
    #[arg(default_value = ".")]
    workdir: PathBuf,

    /// Path to a TOML config file. Defaults to `<workdir>/.repolens/config.toml`.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single indexing pass and exit.
    Index {
        /// Treat every file as changed, ignoring the previous snapshot.
        #[arg(long)]
        force: bool,
    },
    /// Serve the line-delimited JSON tool protocol on stdin/stdout (default).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let workdir = cli.workdir.canonicalize().unwrap_or_else(|_| cli.workdir.clone());

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| workdir.join(TOOL_DIR_NAME).join("config.toml"));
    let config = match RepolensConfig::load(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    init_tracing(&config);

    let command = cli.command.unwrap_or(Command::Serve);
    let exit_code = match command {
        Command::Index { force } => run_index(&workdir, &config, force).await,
        Command::Serve => run_serve(&workdir, &config).await,
    };
    std::process::exit(exit_code);
}

fn init_tracing(config: &RepolensConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("repolens={}", config.log_level.as_str())));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match &config.log_format {
        repolens::config::LogFormat::Json => builder.json().init(),
        repolens::config::LogFormat::Text => builder.init(),
    }
}

async fn build_store(config: &RepolensConfig) -> Result<Store, RepolensError> {
    match config.db_type {
        BackendKind::Embedded => {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let path = config.db_path.clone();
            let store = tokio::task::spawn_blocking(move || SqliteStore::open(&path))
                .await
                .map_err(|e| RepolensError::internal(e.to_string()))??;
            Ok(Store::Embedded(Arc::new(store)))
        }
        BackendKind::Server => {
            let dsn = config.db_dsn.clone().ok_or_else(|| RepolensError::ConfigError {
                field: "db_dsn".into(),
                cause: "required when db_type = server".into(),
            })?;
            let store = PostgresStore::connect(&dsn, PoolConfig::default()).await?;
            Ok(Store::Server(Arc::new(store)))
        }
    }
}

fn build_embedder(config: &RepolensConfig) -> Arc<dyn Embedder> {
    match &config.embedding.provider {
        EmbeddingProvider::Off => Arc::new(UnavailableEmbedder),
        EmbeddingProvider::A | EmbeddingProvider::B => {
            let mut embedder = HttpEmbedder::new(
                &config.embedding.endpoint,
                &config.embedding.model,
                config.embedding.dimensions,
            );
            if let Some(key) = &config.embedding.api_key {
                embedder = embedder.with_api_key(key);
            }
            Arc::new(embedder)
        }
    }
}

fn build_indexer(store: Store, embedder: Arc<dyn Embedder>, config: &RepolensConfig) -> Indexer {
    Indexer::new(
        store,
        embedder,
        config.chunking.clone(),
        repolens::PipelineConfig {
            batch_size: config.indexing.batch_size,
            max_workers: config.indexing.max_workers,
        },
        TOOL_DIR_NAME,
        Duration::from_secs(config.indexing.lock_timeout_secs),
    )
}

async fn run_index(workdir: &Path, config: &RepolensConfig, force: bool) -> i32 {
    let store = match build_store(config).await {
        Ok(store) => store,
        Err(e) => return report_error(&e),
    };
    let embedder = build_embedder(config);
    let indexer = build_indexer(store, embedder, config);
    match indexer.index(workdir, force).await {
        Ok(stats) => {
            println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
            0
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &RepolensError) -> i32 {
    if let RepolensError::IndexInProgress { lock_path, .. } = e {
        eprintln!("index locked: {}", lock_path.display());
    } else {
        eprintln!("error: {e}");
    }
    e.exit_code()
}

/// Builds the semantic searcher for `repo_root` if an embedding provider is
/// configured. `search_semantic`/`hybrid_search` degrade gracefully when
/// this is `None` or the embedder probe fails at call time.
async fn build_semantic_searcher(
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
        Arc::new(AnnNativeIndex::new(
            store.clone(),
            repo_config.model_id.clone(),
            repo_config.dimensions,
            DistanceMetric::Cosine,
        ))
    } else {
        Arc::new(ExactScanIndex::new(store.clone(), repo_config.model_id, DistanceMetric::Cosine))
    };

    let searcher = SemanticSearcher::new(embedder, vector_index, locations, DistanceMetric::Cosine)
        .with_snippet_reader(Arc::new(repolens::search::FsSnippetReader::new(repo_root)));
    Some(searcher)
}

fn build_cross_encoder(config: &RepolensConfig) -> Arc<dyn CrossEncoder> {
    #[cfg(feature = "neural-reranker")]
    if config.search.rerank_enabled {
        if let Ok(encoder) = repolens::reranker::FastEmbedCrossEncoder::new() {
            return Arc::new(encoder);
        }
    }
    let _ = config;
    Arc::new(PassthroughCrossEncoder)
}

async fn run_serve(workdir: &Path, config: &RepolensConfig) -> i32 {
    let store = match build_store(config).await {
        Ok(store) => store,
        Err(e) => return report_error(&e),
    };
    let embedder = build_embedder(config);
    let locations = LocationStore::new(store.clone());
    let cross_encoder = build_cross_encoder(config);

    let semantic = build_semantic_searcher(&store, embedder.clone(), locations.clone(), workdir, config).await;
    let service = RepolensService::new(
        workdir,
        locations,
        Arc::new(Bm25LexicalSearch::new()),
        Arc::new(TagSymbolExtractor::new()),
        semantic,
        Oversample(config.search.oversample_factor),
    )
    .with_cross_encoder(cross_encoder, config.search.rerank_top);

    serve_stdio(&service).await
}

#[derive(serde::Deserialize)]
struct RequestEnvelope {
    id: Option<serde_json::Value>,
    op: String,
    #[serde(flatten)]
    params: serde_json::Value,
}

#[derive(serde::Serialize)]
struct ResponseEnvelope<T: serde::Serialize> {
    id: Option<serde_json::Value>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Reads one JSON request per stdin line, dispatches it to the matching
/// [`RepolensService`] operation, and writes one JSON response per stdout
/// line. Exits `0` on a clean EOF.
async fn serve_stdio(service: &RepolensService) -> i32 {
    let stdin = tokio::io::stdin();
    let mut reader = tokio::io::BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return 0,
            Err(e) => {
                eprintln!("stdin read error: {e}");
                return 1;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response_line = dispatch_line(service, &line).await;
        if stdout.write_all(response_line.as_bytes()).await.is_err() || stdout.write_all(b"\n").await.is_err() {
            return 1;
        }
        if stdout.flush().await.is_err() {
            return 1;
        }
    }
}

async fn dispatch_line(service: &RepolensService, line: &str) -> String {
    let envelope: RequestEnvelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            return serde_json::to_string(&ResponseEnvelope::<()> {
                id: None,
                ok: false,
                result: None,
                error: Some(format!("invalid request: {e}")),
            })
            .unwrap_or_default();
        }
    };
    let id = envelope.id.clone();
    match run_operation(service, &envelope).await {
        Ok(value) => serde_json::to_string(&ResponseEnvelope {
            id,
            ok: true,
            result: Some(value),
            error: None,
        })
        .unwrap_or_default(),
        Err(e) => serde_json::to_string(&ResponseEnvelope::<()> {
            id,
            ok: false,
            result: None,
            error: Some(e.to_string()),
        })
        .unwrap_or_default(),
    }
}

async fn run_operation(
    service: &RepolensService,
    envelope: &RequestEnvelope,
) -> Result<serde_json::Value, RepolensError> {
    let params = envelope.params.clone();
    match envelope.op.as_str() {
        "search_keyword" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.search_keyword(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        "get_file" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.get_file(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        "find_symbol" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.find_symbol(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        "list_defs_in_file" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.list_defs_in_file(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        "search_semantic" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.search_semantic(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        "hybrid_search" => {
            let req = serde_json::from_value(params).map_err(invalid)?;
            let resp = service.hybrid_search(req).await?;
            Ok(serde_json::to_value(resp).map_err(invalid)?)
        }
        other => Err(RepolensError::invalid_argument(format!("unknown operation: {other}"))),
    }
}

fn invalid(e: impl std::fmt::Display) -> RepolensError {
    RepolensError::invalid_argument(e.to_string())
}
