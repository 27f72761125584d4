//! On-demand detailed analysis of a single bill - the expensive tier,
//! triggered from the bill view rather than at upload time.

use coverage_flow::models::Bill;
use coverage_flow::{
    BillStore, CoreError, DetailedAnalyzer, DocumentStore, Result, path_from_url, with_timeout,
};
use tracing::info;
use uuid::Uuid;

use crate::service::AppState;

use super::{DETAILED_ANALYSIS_TIMEOUT, active_policy_context, apply_overview, mime_from_path};

/// Run the detailed analyzer against one bill's stored file, using the
/// active policy as context when one exists. Returns the updated bill; a
/// no-result analysis surfaces as a gateway error for the caller to render
/// as "Analysis Failed".
pub async fn analyze_bill_on_demand(state: &AppState, user_id: &str, bill_id: Uuid) -> Result<Bill> {
    let mut bill = state
        .bills
        .get(user_id, bill_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("bill {}", bill_id)))?;

    let file_url = bill
        .file_url
        .clone()
        .ok_or_else(|| CoreError::InvalidInput("bill has no stored file to analyze".to_string()))?;
    let path = path_from_url(&file_url, &state.bucket)
        .ok_or_else(|| CoreError::InvalidInput("stored URL is not in our bucket".to_string()))?;

    let bytes = state.documents.download(&state.bucket, &path).await?;
    let context = active_policy_context(state, user_id).await?;

    let analyzer = DetailedAnalyzer::new(state.gateway.clone());
    let analysis = with_timeout(
        async {
            Ok(analyzer
                .analyze_bill(&bytes, mime_from_path(&path), context.as_deref())
                .await)
        },
        DETAILED_ANALYSIS_TIMEOUT,
        "bill analysis",
    )
    .await?
    .ok_or_else(|| CoreError::Gateway("analysis produced no result".to_string()))?;

    apply_overview(&mut bill, &analysis);
    let updated = state.bills.update(bill).await?;
    info!(bill_id = %updated.id, with_context = context.is_some(), "bill analyzed on demand");
    Ok(updated)
}
