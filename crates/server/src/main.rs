//! Roundtable Server
//!
//! Axum server that relays the upstream research stream to clients as
//! normalized SSE events, plus an offline replay command for captures.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::{stream, Stream, StreamExt};
use roundtable_core::config::{StreamConfig, StreamConfigOverrides};
use roundtable_core::research::{OutputEvent, ResearchRequest, StreamProcessor, UpstreamClient};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

const CONFIG_PATH: &str = ".roundtable/config.json";
const KEEP_ALIVE_SECS: u64 = 15;

/// Application state
struct AppState {
    config: StreamConfig,
    upstream: UpstreamClient,
}

type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Roundtable - research stream normalizer")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the relay server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Feed a recorded upstream capture through the pipeline
    Replay {
        /// Capture file with the raw upstream bytes
        path: PathBuf,
        /// Bytes per simulated network chunk
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
        /// Topic recorded in the session
        #[arg(long, default_value = "")]
        topic: String,
    },
}

// === API Types ===

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    topic: String,
    #[serde(default)]
    max_analysts: Option<u32>,
    #[serde(default)]
    #[schema(value_type = Object)]
    options: serde_json::Map<String, serde_json::Value>,
}

impl From<StreamRequest> for ResearchRequest {
    fn from(req: StreamRequest) -> Self {
        ResearchRequest {
            topic: req.topic,
            max_analysts: req.max_analysts,
            options: req.options,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ApiResponse {
    success: bool,
    message: String,
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
}

/// Effective stream configuration
#[derive(Debug, Serialize, ToSchema)]
struct ConfigResponse {
    upstream_url: String,
    stream_path: String,
    hard_timeout_secs: u64,
    stall_threshold_secs: u64,
    channel_capacity: usize,
}

impl From<&StreamConfig> for ConfigResponse {
    fn from(config: &StreamConfig) -> Self {
        Self {
            upstream_url: config.upstream_url.clone(),
            stream_path: config.stream_path.clone(),
            hard_timeout_secs: config.hard_timeout_secs,
            stall_threshold_secs: config.stall_threshold_secs,
            channel_capacity: config.channel_capacity,
        }
    }
}

// === Config Loading ===

/// Read the persisted config file; a missing or broken file means defaults
async fn load_file_overrides() -> StreamConfigOverrides {
    let path = PathBuf::from(CONFIG_PATH);
    if !path.exists() {
        return StreamConfigOverrides::default();
    }
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
            StreamConfigOverrides::default()
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read config file");
            StreamConfigOverrides::default()
        }
    }
}

/// Environment overrides, looked up through `lookup`
fn env_overrides(lookup: impl Fn(&str) -> Option<String>) -> StreamConfigOverrides {
    let secs = |key: &str| {
        lookup(key).and_then(|raw| match raw.trim().parse::<u64>() {
            Ok(secs) => Some(secs),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring non-numeric environment value");
                None
            }
        })
    };
    StreamConfigOverrides {
        upstream_url: lookup("ROUNDTABLE_UPSTREAM_URL").filter(|url| !url.trim().is_empty()),
        hard_timeout_secs: secs("ROUNDTABLE_HARD_TIMEOUT_SECS"),
        stall_threshold_secs: secs("ROUNDTABLE_STALL_THRESHOLD_SECS"),
        ..Default::default()
    }
}

async fn load_config() -> StreamConfig {
    let _ = dotenvy::dotenv();

    let mut config = StreamConfig::default();
    config.merge(load_file_overrides().await);
    config.merge(env_overrides(|key| std::env::var(key).ok()));
    config
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Roundtable API",
        version = "1.0.0",
        description = "Normalized relay for multi-analyst research streams"
    ),
    paths(stream_research, get_config, health),
    components(schemas(StreamRequest, ApiResponse, HealthResponse, ConfigResponse)),
    tags(
        (name = "research", description = "Research streaming"),
        (name = "config", description = "Configuration"),
        (name = "system", description = "Health and discovery")
    )
)]
struct ApiDoc;

// === API Handlers ===

/// Start a research run and stream normalized events
#[utoipa::path(
    post,
    path = "/api/v1/research/stream",
    tag = "research",
    request_body = StreamRequest,
    responses(
        (status = 200, description = "SSE stream of normalized research events"),
        (status = 400, description = "Missing topic", body = ApiResponse)
    )
)]
async fn stream_research(
    State(state): State<SharedState>,
    Json(req): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ApiResponse>)> {
    if req.topic.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: "topic is required".to_string(),
            }),
        ));
    }

    let request = ResearchRequest::from(req);
    let config = state.config.clone();
    let client = state.upstream.clone();
    let (tx, rx) = mpsc::channel::<OutputEvent>(config.channel_capacity);

    tokio::spawn(async move {
        let mut processor = StreamProcessor::new(config, request.topic.clone(), tx);
        if let Err(e) = processor.run_upstream(&client, &request).await {
            tracing::warn!(error = %e, kind = e.kind(), "Research stream ended with error");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(json))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}

/// Get the effective configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Effective stream configuration", body = ConfigResponse)
    )
)]
async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse::from(&state.config))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

// === Commands ===

fn router(state: SharedState) -> Router {
    let research_routes = Router::new().route("/stream", post(stream_research));

    Router::new()
        .nest("/api/v1/research", research_routes)
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/health", get(health))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

async fn run_server(config: StreamConfig, port: u16) -> anyhow::Result<()> {
    let upstream = UpstreamClient::new(&config)?;
    tracing::info!(upstream = %upstream.url(), "Upstream research service");

    let state: SharedState = Arc::new(AppState { config, upstream });
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Roundtable server listening");
    tracing::info!("   Stream:  POST /api/v1/research/stream");
    tracing::info!("   Config:  GET /api/v1/config");
    tracing::info!("   Health:  GET /api/v1/health");
    tracing::info!("   OpenAPI: GET /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Split a capture into fixed-size chunks, as a network read would
fn capture_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Result<Vec<u8>, Infallible>> {
    bytes
        .chunks(chunk_size.max(1))
        .map(|chunk| Ok(chunk.to_vec()))
        .collect()
}

async fn run_replay(
    config: StreamConfig,
    path: PathBuf,
    chunk_size: usize,
    topic: String,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), chunk_size, "Replaying capture");

    let mut out = Vec::new();
    let result = {
        let mut processor = StreamProcessor::new(config, topic, &mut out);
        let result = processor.run(stream::iter(capture_chunks(&bytes, chunk_size))).await;
        tracing::info!(stats = ?processor.stats(), "Replay finished");
        result
    };

    for event in &out {
        println!("{}", serde_json::to_string(event)?);
    }

    result.map(|_| ()).map_err(Into::into)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so replay output stays clean JSON lines
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config().await;

    match args.command {
        Some(CliCommand::Replay {
            path,
            chunk_size,
            topic,
        }) => run_replay(config, path, chunk_size, topic).await,
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
