use std::sync::Arc;
use std::sync::OnceLock;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use kis::{KisBrokerAdapter, ProxyOptions};
use router_core::broker::BrokerAdapter;
use router_core::config::CONFIG;
use router_core::credentials::CredentialStore;
use router_core::executor::{EmergencyStop, SignalExecutor};
use router_core::types::RawSignal;

mod config;
use config::load_app_config;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Clone)]
struct AppState {
    store: Arc<CredentialStore>,
    broker: Arc<dyn BrokerAdapter>,
    executor: Arc<SignalExecutor>,
    emergency: Arc<EmergencyStop>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusQuery {
    account_id: String,
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/order/:order_id", get(get_order_status))
        .route("/healthz", get(healthz))
        .route("/admin/emergency-stop", post(admin_emergency_stop))
        .route("/admin/resume", post(admin_resume))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = load_app_config().unwrap_or_else(|err| {
        tracing::warn!("failed to load server config: {err:?}, using defaults");
        Default::default()
    });
    settings.apply_runtime_env();
    let (http_proxy, https_proxy) = settings.proxy_settings();

    let accounts_json = CONFIG.require_accounts_json()?;
    let store = Arc::new(CredentialStore::from_json(accounts_json)?);

    let broker: Arc<dyn BrokerAdapter> = Arc::new(KisBrokerAdapter::new(ProxyOptions {
        http: http_proxy,
        https: https_proxy,
    })?);

    let emergency = Arc::new(EmergencyStop::default());
    let executor = Arc::new(SignalExecutor::new(
        store.clone(),
        broker.clone(),
        emergency.clone(),
    ));

    let app_state = AppState {
        store,
        broker,
        executor,
        emergency,
    };

    let bind_addr = settings
        .bind_addr()
        .unwrap_or_else(|_| "0.0.0.0:3000".parse().expect("invalid default addr"));

    let router = Router::new()
        .merge(api_routes())
        .nest("/api", api_routes())
        .with_state(app_state)
        .layer(CorsLayer::new().allow_methods(Any).allow_origin(Any));

    info!("Starting execution router on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    let log_dir = std::path::Path::new("logs");
    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("failed to create log directory {log_dir:?}: {err}");
    }

    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(log_dir, "router.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let env_filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let fmt_stdout = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let fmt_file = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_stdout)
        .with(fmt_file);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing already initialised");
    }
}

async fn handle_webhook(
    State(state): State<AppState>,
    Json(raw): Json<RawSignal>,
) -> impl IntoResponse {
    let result = state.executor.execute(raw).await;

    let status = if result.success {
        StatusCode::OK
    } else {
        status_for_result(&result)
    };

    if status.is_server_error() {
        tracing::error!(?result, "webhook execution failed");
    } else if !result.success {
        tracing::warn!(?result, "webhook execution rejected");
    }

    (status, Json(result))
}

fn status_for_result(result: &router_core::types::ExecutionResult) -> StatusCode {
    use router_core::types::ErrorType;

    let reason = result.details.get("reason").and_then(|v| v.as_str());
    match (result.error_type, reason) {
        (Some(ErrorType::Validation), Some("unknown_token")) => StatusCode::UNAUTHORIZED,
        (Some(ErrorType::Validation), Some("inactive_account")) => StatusCode::FORBIDDEN,
        (Some(ErrorType::Validation), _) => StatusCode::BAD_REQUEST,
        (Some(ErrorType::Risk), _) => StatusCode::BAD_REQUEST,
        (Some(ErrorType::EmergencyStop), _) => StatusCode::SERVICE_UNAVAILABLE,
        (Some(ErrorType::Broker), _) | (Some(ErrorType::System), _) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        (None, _) => StatusCode::OK,
    }
}

async fn get_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<OrderStatusQuery>,
) -> impl IntoResponse {
    let Some(account) = state.store.load_by_id(&query.account_id) else {
        tracing::warn!(account_id = %query.account_id, "order status lookup: unknown account");
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown account_id" })),
        );
    };

    match state.broker.poll_status(account, &order_id).await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!({ "status": status }))),
        Err(err) => {
            tracing::error!(order_id = %order_id, error = %err, "order status lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
        }
    }
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn admin_emergency_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.executor.emergency_stop();
    tracing::warn!("emergency stop engaged via admin endpoint");
    StatusCode::OK
}

async fn admin_resume(State(state): State<AppState>) -> impl IntoResponse {
    state.executor.resume();
    tracing::info!("execution resumed via admin endpoint");
    StatusCode::OK
}
