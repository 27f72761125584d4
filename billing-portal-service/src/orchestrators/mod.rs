//! Multi-step workflows behind the portal's endpoints.
//!
//! Each orchestrator runs its steps strictly sequentially: upload, insert,
//! classify, patch. Failures before the row insert abort the whole
//! operation; failures after it only degrade the row to a safe status.

mod analyze;
mod recalculate;
mod upload_bill;
mod upload_insurance;

pub use analyze::analyze_bill_on_demand;
pub use recalculate::{RecalculationReport, recalculate_bills};
pub use upload_bill::{NewBill, upload_bill};
pub use upload_insurance::upload_insurance;

use std::time::Duration;

use chrono::NaiveDate;
use coverage_flow::models::{Bill, BillAnalysisResult};
use coverage_flow::{
    DocumentStore, InsuranceStatus, InsuranceStore, Result, format_insurance_context, object_path,
    with_retry, with_timeout,
};
use tracing::info;

use crate::service::AppState;

pub(crate) const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const UPLOAD_RETRIES: u32 = 3;
pub(crate) const UPLOAD_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const INSERT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const BILL_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(20);
pub(crate) const INSURANCE_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(25);
pub(crate) const DETAILED_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

/// A file received from the upload form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Store the file under a per-user, timestamped path and return
/// `(object_path, public_url)`. Retries with backoff around a per-attempt
/// deadline; any remaining failure aborts the caller's upload.
pub(crate) async fn store_file(
    state: &AppState,
    user_id: &str,
    file: &UploadedFile,
) -> Result<(String, String)> {
    let path = object_path(user_id, &file.name);
    with_retry(
        || {
            with_timeout(
                state.documents.upload(
                    &state.bucket,
                    &path,
                    file.bytes.clone(),
                    &file.mime_type,
                ),
                UPLOAD_TIMEOUT,
                "file upload",
            )
        },
        UPLOAD_RETRIES,
        UPLOAD_BACKOFF,
    )
    .await?;

    let url = state.documents.public_url(&state.bucket, &path);
    info!(path = %path, "stored uploaded file");
    Ok((path, url))
}

pub(crate) fn mime_from_path(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Overwrite a bill's primitive columns from a successful analysis so the
/// row and its `analysis_result` never diverge.
pub(crate) fn apply_overview(bill: &mut Bill, analysis: &BillAnalysisResult) {
    if let Some(name) = &analysis.overview.hospital_name {
        bill.hospital_name = name.clone();
    }
    if let Some(amount) = analysis.overview.total_amount {
        bill.amount = amount;
    }
    if let Some(date) = analysis
        .overview
        .date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    {
        bill.bill_date = date;
    }
    if let Some(summary) = &analysis.overview.summary {
        bill.description = summary.clone();
    }
    bill.analysis_result = Some(analysis.clone());
}

/// Context block for the user's active policy: the most recent approved
/// document holding an analysis, falling back to any analyzed document
/// regardless of status.
pub(crate) async fn active_policy_context(state: &AppState, user_id: &str) -> Result<Option<String>> {
    let documents = state.insurance.list_for_user(user_id).await?;

    let active = documents
        .iter()
        .find(|d| d.status == InsuranceStatus::Approved && d.analysis_result.is_some())
        .or_else(|| documents.iter().find(|d| d.analysis_result.is_some()));

    Ok(active
        .and_then(|d| d.analysis_result.as_ref())
        .map(format_insurance_context))
}
