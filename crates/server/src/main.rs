//! Whale-Watch — whale/pump detection and auto-trading server
//!
//! Usage:
//!   whale-watch serve --port 3001      — Launch API server with background worker
//!   whale-watch run                    — Run the worker headless (no HTTP)

use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use engine::{run_market_worker, BotConfig, MarketDataClient, TraderControl, WorkerProgress};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Parser)]
#[command(name = "whale-watch")]
#[command(about = "Whale activity detection and auto-trading", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the API server with the background worker
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        /// Start with the auto-trader enabled
        #[arg(long)]
        autotrade: bool,
    },
    /// Run the worker headless (no HTTP server)
    Run {
        /// Start with the auto-trader enabled
        #[arg(long)]
        autotrade: bool,
        /// Stop after this many completed poll cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Stop after a single poll cycle (same as --cycles 1)
        #[arg(long)]
        once: bool,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    config: Arc<RwLock<BotConfig>>,
    progress: Arc<WorkerProgress>,
    control: Arc<TraderControl>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,whale_watch=debug")
    } else {
        EnvFilter::new("info,engine=info,whale_watch=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve {
            host,
            port,
            autotrade,
        } => {
            cmd_serve(&host, port, autotrade).await?;
        }
        Commands::Run {
            autotrade,
            cycles,
            once,
        } => {
            let max_cycles = if once { Some(1) } else { cycles };
            cmd_run(autotrade, max_cycles).await?;
        }
    }

    Ok(())
}

fn load_config() -> anyhow::Result<BotConfig> {
    let path =
        std::env::var("WHALE_WATCH_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let mut cfg = BotConfig::load_or_default(&path)?;

    // Credentials come from the environment, never from the config file
    if let Ok(key) = std::env::var("LBANK_API_KEY") {
        cfg.api_key = key;
    }
    if let Ok(secret) = std::env::var("LBANK_SECRET_KEY") {
        cfg.secret_key = secret;
    }
    Ok(cfg)
}

async fn open_database() -> anyhow::Result<persistence::Database> {
    let db_path =
        std::env::var("WHALE_WATCH_DB_PATH").unwrap_or_else(|_| "data/whale_watch.db".to_string());
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);
    Ok(db)
}

// ============================================================================
// Serve command — Axum API server + background worker
// ============================================================================

async fn cmd_serve(host: &str, port: u16, autotrade: bool) -> anyhow::Result<()> {
    info!("Whale-Watch v{} starting...", APP_VERSION);

    let db = Arc::new(open_database().await?);
    let config = Arc::new(RwLock::new(load_config()?));
    let progress = Arc::new(WorkerProgress::new());
    let control = Arc::new(TraderControl::new(autotrade));

    spawn_worker(&db, &config, &progress, &control);

    let state = AppState {
        db,
        config,
        progress,
        control,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Determine static files directory
    let exe_path = std::env::current_exe().unwrap_or_default();
    let exe_dir = exe_path.parent().unwrap_or(std::path::Path::new("."));
    let dist_dir = exe_dir.join("dist");
    let static_dir = if dist_dir.exists() {
        dist_dir
    } else {
        std::path::PathBuf::from("dist")
    };

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/status", get(api_status))
        .route("/market", get(api_market))
        .route("/whales", get(api_whales))
        .route("/pump_dumps", get(api_pump_dumps))
        .route("/signals", get(api_signals))
        .route("/queue", get(api_queue))
        .route("/trades", get(api_trades))
        .route("/trades/open", get(api_open_trades))
        .route("/autotrade/start", post(api_autotrade_start))
        .route("/autotrade/stop", post(api_autotrade_stop))
        .route("/autotrade/stats", get(api_autotrade_stats))
        .route("/config", get(api_get_config).post(api_update_config))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&static_dir))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Whale-Watch v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health           - Health check");
    println!("  GET  /api/status           - Worker progress");
    println!("  GET  /api/market           - Latest market snapshot per symbol");
    println!("  GET  /api/whales           - Recent whale events");
    println!("  GET  /api/pump_dumps       - Recent pump/dump events");
    println!("  GET  /api/signals          - Signals (optional ?status=)");
    println!("  GET  /api/queue            - Trade queue (valid, scored)");
    println!("  GET  /api/trades           - Trade history");
    println!("  GET  /api/trades/open      - Open trades");
    println!("  POST /api/autotrade/start  - Enable the auto-trader");
    println!("  POST /api/autotrade/stop   - Disable the auto-trader");
    println!("  GET  /api/autotrade/stats  - Daily/monthly PnL stats");
    println!("  GET  /api/config           - Current configuration");
    println!("  POST /api/config           - Update configuration");
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_worker(
    db: &Arc<persistence::Database>,
    config: &Arc<RwLock<BotConfig>>,
    progress: &Arc<WorkerProgress>,
    control: &Arc<TraderControl>,
) {
    let pool = db.pool_clone();
    let config = config.clone();
    let progress = progress.clone();
    let control = control.clone();
    tokio::spawn(async move {
        let client = MarketDataClient::new();
        run_market_worker(&client, &progress, &control, &config, pool).await;
    });
}

// ============================================================================
// Run command — headless worker
// ============================================================================

async fn cmd_run(autotrade: bool, max_cycles: Option<u64>) -> anyhow::Result<()> {
    println!("\n=== Whale-Watch v{} (headless) ===", APP_VERSION);

    let db = Arc::new(open_database().await?);
    let config = Arc::new(RwLock::new(load_config()?));
    let progress = Arc::new(WorkerProgress::new());
    let control = Arc::new(TraderControl::new(autotrade));

    info!(
        autotrade,
        source = config.read().unwrap().api_source.as_str(),
        "Starting headless worker"
    );

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting stop...");
        progress_for_ctrlc.cancelled.store(true, Ordering::Relaxed);
    });

    if let Some(max) = max_cycles {
        let progress_for_limit = progress.clone();
        tokio::spawn(async move {
            loop {
                if progress_for_limit.cycles.load(Ordering::Relaxed) >= max {
                    info!("Cycle limit of {} reached, requesting stop...", max);
                    progress_for_limit.cancelled.store(true, Ordering::Relaxed);
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        });
    }

    let client = MarketDataClient::new();
    run_market_worker(&client, &progress, &control, &config, db.pool_clone()).await;

    println!(
        "Stopped after {} cycles ({} whales, {} pump/dumps, {} trades opened)",
        progress.cycles.load(Ordering::Relaxed),
        progress.whales_detected.load(Ordering::Relaxed),
        progress.pumps_detected.load(Ordering::Relaxed),
        progress.trades_opened.load(Ordering::Relaxed),
    );
    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

fn limit_param(params: &HashMap<String, String>) -> i64 {
    params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_LIST_LIMIT)
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "whale-watch",
        "version": APP_VERSION,
    }))
}

/// GET /api/status — worker progress and trading switch
async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.progress;
    let status = *progress.status.read().unwrap();
    let error = progress.error_message.read().unwrap().clone();

    Json(serde_json::json!({
        "status": status,
        "autotrade_enabled": state.control.is_enabled(),
        "cycles": progress.cycles.load(Ordering::Relaxed),
        "whales_detected": progress.whales_detected.load(Ordering::Relaxed),
        "pumps_detected": progress.pumps_detected.load(Ordering::Relaxed),
        "signals_resolved": progress.signals_resolved.load(Ordering::Relaxed),
        "trades_opened": progress.trades_opened.load(Ordering::Relaxed),
        "trades_closed": progress.trades_closed.load(Ordering::Relaxed),
        "error": error,
    }))
}

/// GET /api/market — newest snapshot per symbol
async fn api_market(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.db.market().latest_snapshots().await {
        Ok(rows) => Json(serde_json::json!({ "success": true, "data": rows })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query market snapshots: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/whales — recent whale events with 24h buy/sell flow
async fn api_whales(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let events = state.db.events();
    let day_ago = Utc::now().timestamp() - 86_400;
    let rows = events.recent_whales(limit_param(&params)).await;
    let flow = events.whale_flow_since(day_ago).await;
    match (rows, flow) {
        (Ok(rows), Ok(flow)) => Json(serde_json::json!({
            "success": true,
            "flow_24h": flow,
            "data": rows,
        })),
        (Err(e), _) | (_, Err(e)) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query whales: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/pump_dumps — recent pump/dump events
async fn api_pump_dumps(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    match state
        .db
        .events()
        .recent_pump_dumps(limit_param(&params))
        .await
    {
        Ok(rows) => Json(serde_json::json!({ "success": true, "data": rows })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query pump/dumps: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/signals — recent signals, optionally filtered by status
async fn api_signals(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let status = params.get("status").map(|s| s.as_str());
    let signals = state.db.signals();
    let rows = signals.list(status, limit_param(&params)).await;
    let counts = signals.status_counts().await;
    match (rows, counts) {
        (Ok(rows), Ok(counts)) => Json(serde_json::json!({
            "success": true,
            "counts": counts,
            "data": rows,
        })),
        (Err(e), _) | (_, Err(e)) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query signals: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/queue — valid signals above the trade threshold, best first
async fn api_queue(State(state): State<AppState>) -> Json<serde_json::Value> {
    let min_score = state.config.read().unwrap().min_score_for_trade as i64;
    match state.db.signals().trade_queue(min_score, 20).await {
        Ok(rows) => Json(serde_json::json!({
            "success": true,
            "min_score": min_score,
            "data": rows,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query trade queue: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/trades — trade history
async fn api_trades(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    match state.db.trades().recent(limit_param(&params)).await {
        Ok(rows) => Json(serde_json::json!({ "success": true, "data": rows })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query trades: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/trades/open
async fn api_open_trades(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.db.trades().open_trades().await {
        Ok(rows) => Json(serde_json::json!({ "success": true, "data": rows })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query open trades: {}", e),
            "data": [],
        })),
    }
}

/// POST /api/autotrade/start
async fn api_autotrade_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.control.enable();
    info!("Auto-trader enabled via API");
    Json(serde_json::json!({ "success": true, "enabled": true }))
}

/// POST /api/autotrade/stop
async fn api_autotrade_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.control.disable();
    info!("Auto-trader disabled via API");
    Json(serde_json::json!({ "success": true, "enabled": false }))
}

/// GET /api/autotrade/stats — daily and monthly closed-trade aggregates
async fn api_autotrade_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = Utc::now();
    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    let month_start = now
        .date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);

    let trades = state.db.trades();
    let daily = trades.stats_since(day_start).await;
    let monthly = trades.stats_since(month_start).await;

    match (daily, monthly) {
        (Ok(daily), Ok(monthly)) => Json(serde_json::json!({
            "success": true,
            "enabled": state.control.is_enabled(),
            "daily": daily,
            "monthly": monthly,
        })),
        (Err(e), _) | (_, Err(e)) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to compute stats: {}", e),
        })),
    }
}

/// GET /api/config — current configuration with credentials masked
async fn api_get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut cfg = state.config.read().unwrap().clone();
    if !cfg.api_key.is_empty() {
        cfg.api_key = "***".to_string();
    }
    if !cfg.secret_key.is_empty() {
        cfg.secret_key = "***".to_string();
    }
    Json(serde_json::json!({ "success": true, "config": cfg }))
}

/// POST /api/config — replace the runtime configuration.
/// Credentials are kept from the running config; they only come from
/// the environment.
async fn api_update_config(
    State(state): State<AppState>,
    Json(mut new_config): Json<BotConfig>,
) -> Json<serde_json::Value> {
    {
        let mut cfg = state.config.write().unwrap();
        new_config.api_key = cfg.api_key.clone();
        new_config.secret_key = cfg.secret_key.clone();
        *cfg = new_config;
    }
    info!("Configuration updated via API");
    Json(serde_json::json!({ "success": true }))
}
