use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tablesage::config::Config;
use tablesage::{AppState, handlers, middleware, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::ask::ask,
        handlers::upload::upload_dataset,
        handlers::upload::upload_context,
        handlers::dataset::get_dataset_summary,
        handlers::health::health,
    ),
    components(
        schemas(
            models::AskRequest,
            models::AskResponse,
            models::AnswerPayload,
            models::ClarificationQuestion,
            models::Confidence,
            models::ConfidenceLevel,
            models::Diagnostic,
            models::DiagnosticCode,
            models::Driver,
            models::Chart,
            models::ChartPoint,
            models::SqlArtifact,
            models::CostSummary,
            models::ContextCitation,
            models::ColumnType,
            models::DatasetUploadResponse,
            models::DatasetSummaryResponse,
            models::DatasetNotReadyResponse,
            models::ContextUploadResponse,
            handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "Ask", description = "Analytical Q&A over the active dataset"),
        (name = "Upload", description = "Dataset and context document ingestion"),
        (name = "Dataset", description = "Active dataset inspection"),
        (name = "System", description = "Service health"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let _log_guard = if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tablesage.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    tracing::info!("Tablesage starting up");

    let app_state = AppState::build(config.clone()).await?;
    tracing::info!("Database ready at {}", config.database.path);

    let origins = config
        .cors
        .allow_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .allow_origin(AllowOrigin::list(origins))
        .expose_headers([middleware::REQUEST_ID_HEADER.parse::<axum::http::HeaderName>()?]);

    let upload_limit_mb = config.upload.dataset_max_mb.max(config.upload.context_max_mb) + 1;

    let app = Router::new()
        .route("/api/ask", post(handlers::ask::ask))
        .route("/api/upload/dataset", post(handlers::upload::upload_dataset))
        .route("/api/upload/context", post(handlers::upload::upload_context))
        .route("/api/dataset/summary", get(handlers::dataset::get_dataset_summary))
        .route("/api/health", get(handlers::health::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn(middleware::propagate_request_id))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(upload_limit_mb * 1024 * 1024))
        .with_state(Arc::clone(&app_state));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
