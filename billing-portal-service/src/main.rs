use std::sync::Arc;

use axum::http::{HeaderValue, Request};
use axum::middleware::{Next, from_fn};
use billing_portal_service::service::{AppState, build_router};
use coverage_flow::{
    BillStore, ChatStore, HttpDocumentStore, InMemoryBillStore, InMemoryChatStore,
    InMemoryDocumentStore, InMemoryInsuranceStore, InsuranceStore, OpenRouterGateway,
    PostgresStores,
};
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "billing_portal_service=debug,coverage_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add a correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() {
    init_tracing();

    // Required for every classification and analysis call.
    let gateway = match OpenRouterGateway::from_env() {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let (bills, insurance, chat): (Arc<dyn BillStore>, Arc<dyn InsuranceStore>, Arc<dyn ChatStore>) =
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            match PostgresStores::connect(&database_url).await {
                Ok(stores) => {
                    info!("Using PostgreSQL record stores");
                    (
                        Arc::new(stores.bills()),
                        Arc::new(stores.insurance()),
                        Arc::new(stores.chat()),
                    )
                }
                Err(e) => {
                    error!(
                        "Failed to connect to PostgreSQL: {}. Falling back to in-memory stores.",
                        e
                    );
                    (
                        Arc::new(InMemoryBillStore::new()),
                        Arc::new(InMemoryInsuranceStore::new()),
                        Arc::new(InMemoryChatStore::new()),
                    )
                }
            }
        } else {
            warn!("DATABASE_URL not set, records will not survive a restart");
            (
                Arc::new(InMemoryBillStore::new()),
                Arc::new(InMemoryInsuranceStore::new()),
                Arc::new(InMemoryChatStore::new()),
            )
        };

    let documents: Arc<dyn coverage_flow::DocumentStore> = match (
        std::env::var("STORAGE_URL"),
        std::env::var("STORAGE_API_KEY"),
    ) {
        (Ok(url), Ok(key)) => {
            info!("Using remote document store at {}", url);
            Arc::new(HttpDocumentStore::new(url, key))
        }
        _ => {
            warn!("STORAGE_URL/STORAGE_API_KEY not set, documents will not survive a restart");
            Arc::new(InMemoryDocumentStore::new())
        }
    };

    let state = AppState {
        bills,
        insurance,
        chat,
        documents,
        gateway,
        bucket: std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| "documents".to_string()),
    };

    let app = build_router(state)
        .layer(from_fn(correlation_id_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("failed to bind 0.0.0.0:3000");

    info!("Server running on http://0.0.0.0:3000");

    axum::serve(listener, app).await.expect("server error");
}
