//! Bulk re-analysis of a user's bills against the active policy.
//!
//! Bills are processed one at a time. Serializing the loop caps concurrent
//! load on the extraction gateway and keeps the progress counter
//! monotonic; running the bills in parallel would be a behavior change,
//! not an optimization.

use coverage_flow::{
    BillStore, CoreError, DetailedAnalyzer, DocumentStore, Result, path_from_url,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::service::AppState;

use super::{active_policy_context, apply_overview, mime_from_path};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecalculationReport {
    /// Bills visited, including ones skipped for having no stored file.
    pub processed: usize,
    pub total: usize,
    /// Bills that received a fresh analysis.
    pub analyzed: usize,
}

/// Re-run detailed bill analysis for every bill with a stored file. Per-bill
/// failures are logged and skipped; the sweep itself only fails when there
/// is no analyzed insurance document to build context from. Failed bills are
/// not retried automatically - the user re-triggers the sweep.
pub async fn recalculate_bills(
    state: &AppState,
    user_id: &str,
    progress: Option<mpsc::UnboundedSender<usize>>,
) -> Result<RecalculationReport> {
    let context = active_policy_context(state, user_id).await?.ok_or_else(|| {
        CoreError::InvalidInput("no analyzed insurance document on file".to_string())
    })?;

    let bills = state.bills.list_for_user(user_id).await?;
    let analyzer = DetailedAnalyzer::new(state.gateway.clone());

    let mut report = RecalculationReport {
        processed: 0,
        total: bills.len(),
        analyzed: 0,
    };

    for mut bill in bills {
        report.processed += 1;
        if let Some(tx) = &progress {
            let _ = tx.send(report.processed);
        }

        let Some(file_url) = bill.file_url.clone() else {
            info!(bill_id = %bill.id, "no stored file, skipping");
            continue;
        };

        // Recover the object path from the stored URL; a private bucket is
        // read through a short-lived signed URL.
        let Some(path) = path_from_url(&file_url, &state.bucket) else {
            warn!(bill_id = %bill.id, "stored URL does not point into our bucket, skipping");
            continue;
        };
        if let Err(e) = state.documents.signed_url(&state.bucket, &path, 60).await {
            warn!(bill_id = %bill.id, error = %e, "could not sign stored file, skipping");
            continue;
        }
        let bytes = match state.documents.download(&state.bucket, &path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(bill_id = %bill.id, error = %e, "could not fetch stored file, skipping");
                continue;
            }
        };

        match analyzer
            .analyze_bill(&bytes, mime_from_path(&path), Some(&context))
            .await
        {
            Some(analysis) => {
                apply_overview(&mut bill, &analysis);
                match state.bills.update(bill).await {
                    Ok(updated) => {
                        report.analyzed += 1;
                        info!(bill_id = %updated.id, "bill re-analyzed against new policy");
                    }
                    Err(e) => warn!(error = %e, "failed to persist re-analysis"),
                }
            }
            None => warn!(bill_id = %bill.id, "re-analysis produced no result"),
        }
    }

    info!(
        processed = report.processed,
        total = report.total,
        analyzed = report.analyzed,
        "recalculation sweep complete"
    );
    Ok(report)
}
