//! HTTP surface of the portal workflow.
//!
//! Validation failures are rejected here, before any orchestrator runs.
//! Raw provider and store error text is logged but never echoed to the
//! client; responses carry short, category-appropriate messages.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{delete, get, post, put};
use axum::Router;
use chrono::NaiveDate;
use coverage_flow::models::{Bill, InsuranceDocument};
use coverage_flow::summary::CostSummary;
use coverage_flow::{
    BillStatus, BillStore, ChatStore, CoreError, DocumentStore, ExtractionGateway, InsuranceStore,
    path_from_url, summarize,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::chat::chat_reply;
use crate::orchestrators::{
    NewBill, UploadedFile, analyze_bill_on_demand, recalculate_bills, upload_bill,
    upload_insurance,
};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Everything the orchestrators need, created once at startup and passed by
/// reference. No hidden singletons.
#[derive(Clone)]
pub struct AppState {
    pub bills: Arc<dyn BillStore>,
    pub insurance: Arc<dyn InsuranceStore>,
    pub chat: Arc<dyn ChatStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub gateway: Arc<dyn ExtractionGateway>,
    pub bucket: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Map a core error to a user-facing response. The raw error text goes to
/// the log sink only.
fn error_response(e: CoreError) -> ApiError {
    error!(error = %e, "request failed");
    match e {
        CoreError::Timeout(_) => reject(
            StatusCode::GATEWAY_TIMEOUT,
            "The operation timed out. Please try again.",
        ),
        CoreError::Storage(_) => reject(
            StatusCode::BAD_GATEWAY,
            "A network error occurred while storing the file. Please try again.",
        ),
        CoreError::Gateway(_) => reject(StatusCode::BAD_GATEWAY, "AI service unavailable"),
        CoreError::NotFound(_) => reject(StatusCode::NOT_FOUND, "Not found"),
        CoreError::InvalidInput(message) => reject(StatusCode::BAD_REQUEST, message),
        CoreError::Database(_) | CoreError::Serialization(_) => reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong. Please try again.",
        ),
    }
}

fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing x-user-id header"))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/bills", post(create_bill).get(list_bills))
        .route("/bills/{id}/analyze", post(analyze_bill))
        .route("/bills/{id}/status", put(set_bill_status))
        .route("/bills/{id}", delete(delete_bill))
        .route("/insurance", post(create_insurance).get(list_insurance))
        .route("/insurance/{id}", delete(delete_insurance))
        .route("/recalculate", post(recalculate))
        .route("/summary", get(cost_summary))
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Vec<(String, String)>, Option<UploadedFile>), ApiError> {
    let mut fields = Vec::new();
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "malformed multipart body"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|_| reject(StatusCode::BAD_REQUEST, "could not read uploaded file"))?;
            if !bytes.is_empty() {
                file = Some(UploadedFile {
                    name: file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|_| reject(StatusCode::BAD_REQUEST, "could not read form field"))?;
            if !value.is_empty() {
                fields.push((name, value));
            }
        }
    }

    Ok((fields, file))
}

async fn create_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Bill>, ApiError> {
    let user_id = require_user(&headers)?;
    let (fields, file) = read_multipart(multipart).await?;

    let mut input = NewBill {
        file,
        ..Default::default()
    };
    for (name, value) in fields {
        match name.as_str() {
            "hospital_name" => input.hospital_name = Some(value),
            "bill_date" => {
                let date = NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                    .map_err(|_| reject(StatusCode::BAD_REQUEST, "bill_date must be YYYY-MM-DD"))?;
                input.bill_date = Some(date);
            }
            "amount" => {
                let amount = value
                    .parse::<f64>()
                    .map_err(|_| reject(StatusCode::BAD_REQUEST, "amount must be a number"))?;
                input.amount = Some(amount);
            }
            "description" => input.description = Some(value),
            other => warn!(field = %other, "ignoring unknown form field"),
        }
    }

    upload_bill(&state, &user_id, input)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn list_bills(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Bill>>, ApiError> {
    let user_id = require_user(&headers)?;
    state
        .bills
        .list_for_user(&user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn analyze_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Bill>, ApiError> {
    let user_id = require_user(&headers)?;
    analyze_bill_on_demand(&state, &user_id, id)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: String,
}

async fn set_bill_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&headers)?;
    let status = BillStatus::parse(&change.status)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "unknown bill status"))?;
    // `processing` is an internal state; users move bills between
    // pending, paid and denied only.
    if status == BillStatus::Processing {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "bills cannot be moved back to processing",
        ));
    }

    state
        .bills
        .set_status(&user_id, id, status)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn delete_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&headers)?;
    let bill = state
        .bills
        .get(&user_id, id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Not found"))?;

    // Cascade to the stored file; a failed removal is logged, not surfaced.
    if let Some(path) = bill
        .file_url
        .as_deref()
        .and_then(|url| path_from_url(url, &state.bucket))
    {
        if let Err(e) = state.documents.remove(&state.bucket, &[path]).await {
            warn!(bill_id = %id, error = %e, "failed to remove stored file");
        }
    }

    state
        .bills
        .delete(&user_id, id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn create_insurance(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<InsuranceDocument>, ApiError> {
    let user_id = require_user(&headers)?;
    let (fields, file) = read_multipart(multipart).await?;

    let file = file.ok_or_else(|| {
        reject(
            StatusCode::BAD_REQUEST,
            "an insurance upload requires a file",
        )
    })?;
    let document_type = fields
        .iter()
        .find(|(name, _)| name == "document_type")
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| "insurance".to_string());

    upload_insurance(&state, &user_id, &document_type, file)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn list_insurance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<InsuranceDocument>>, ApiError> {
    let user_id = require_user(&headers)?;
    state
        .insurance
        .list_for_user(&user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn delete_insurance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user_id = require_user(&headers)?;
    let doc = state
        .insurance
        .get(&user_id, id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Not found"))?;

    if let Some(path) = path_from_url(&doc.file_url, &state.bucket) {
        if let Err(e) = state.documents.remove(&state.bucket, &[path]).await {
            warn!(document_id = %id, error = %e, "failed to remove stored file");
        }
    }

    state
        .insurance
        .delete(&user_id, id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn recalculate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::orchestrators::RecalculationReport>, ApiError> {
    let user_id = require_user(&headers)?;
    recalculate_bills(&state, &user_id, None)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn cost_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CostSummary>, ApiError> {
    let user_id = require_user(&headers)?;
    let bills = state
        .bills
        .list_for_user(&user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(summarize(&bills)))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let user_id = require_user(&headers)?;
    if request.message.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    chat_reply(&state, &user_id, &request.message)
        .await
        .map(|reply| Json(ChatResponse { reply }))
        .map_err(error_response)
}
