//! Insurance document upload path.
//!
//! A correctly-classified insurance document is auto-approved: its only
//! downstream use is as reference context for bill predictions, and a false
//! rejection blocks the user's entire cost-prediction feature. A valid
//! document of the wrong type is rejected outright.

use chrono::Utc;
use coverage_flow::models::{InsuranceDocument, InsuranceStatus};
use coverage_flow::{
    DetailedAnalyzer, DocumentClassifier, DocumentKind, ExtractedFields, InsuranceStore, Result,
    with_timeout,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::service::AppState;

use super::{
    DETAILED_ANALYSIS_TIMEOUT, INSERT_TIMEOUT, INSURANCE_CLASSIFY_TIMEOUT, UploadedFile, store_file,
};

const SMART_NAME_MAX: usize = 120;

/// Best-effort cosmetic rename from whatever the classifier extracted:
/// provider, coverage type, document type and policy number joined with
/// separators. Falls back to the original name when nothing was extracted.
fn smart_file_name(extracted: &ExtractedFields, original: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(provider) = extracted.hospital_name.as_deref() {
        parts.push(provider);
    }
    if let Some(doc_type) = extracted.document_type.as_deref() {
        parts.push(doc_type);
    }
    if parts.is_empty() {
        return original.to_string();
    }

    let ext = original.rsplit('.').next().unwrap_or("pdf");
    let mut name = format!("{}.{}", parts.join(" - "), ext);
    if name.len() > SMART_NAME_MAX {
        // extracted names can be multibyte; cut on a char boundary
        let mut cut = SMART_NAME_MAX;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

pub async fn upload_insurance(
    state: &AppState,
    user_id: &str,
    document_type: &str,
    file: UploadedFile,
) -> Result<InsuranceDocument> {
    // Step 1: store the file; failure aborts.
    let (_, file_url) = store_file(state, user_id, &file).await?;

    // Step 2: insert the pending row.
    let now = Utc::now();
    let doc = InsuranceDocument {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        file_name: file.name.clone(),
        file_type: document_type.to_string(),
        file_url,
        file_size: file.bytes.len() as u64,
        status: InsuranceStatus::Pending,
        analysis_result: None,
        upload_date: now,
        created_at: now,
        updated_at: now,
    };
    let mut doc = with_timeout(state.insurance.insert(doc), INSERT_TIMEOUT, "document insert")
        .await?;
    info!(document_id = %doc.id, "insurance document row created");

    // Step 3: classify. A broken classification leaves the row pending; we
    // do not fabricate a verdict.
    let classifier = DocumentClassifier::new(state.gateway.clone());
    let verdict = with_timeout(
        async { Ok(classifier.classify(&file.bytes, &file.mime_type).await) },
        INSURANCE_CLASSIFY_TIMEOUT,
        "insurance classification",
    )
    .await;

    let verdict = match verdict {
        Ok(verdict) if !verdict.failed => verdict,
        Ok(_) | Err(_) => {
            warn!(document_id = %doc.id, "classification failed, leaving document pending");
            return Ok(doc);
        }
    };

    if !verdict.is_valid {
        doc.status = InsuranceStatus::Rejected;
        return state.insurance.update(doc).await;
    }

    // Strict type enforcement: a readable document that is not an insurance
    // document is rejected, not left pending.
    if verdict.kind != DocumentKind::Insurance {
        info!(document_id = %doc.id, kind = ?verdict.kind, "valid document of wrong type rejected");
        doc.status = InsuranceStatus::Rejected;
        return state.insurance.update(doc).await;
    }

    doc.file_name = smart_file_name(&verdict.extracted_data, &doc.file_name);
    if let Some(doc_type) = &verdict.extracted_data.document_type {
        doc.file_type = doc_type.clone();
    }

    // Step 4: detailed analysis, falling back to the classification payload
    // itself. An approved document never carries an empty analysis.
    let analyzer = DetailedAnalyzer::new(state.gateway.clone());
    let detailed = with_timeout(
        async { Ok(analyzer.analyze_insurance(&file.bytes, &file.mime_type).await) },
        DETAILED_ANALYSIS_TIMEOUT,
        "insurance analysis",
    )
    .await
    .ok()
    .flatten();

    doc.analysis_result = Some(match detailed {
        Some(analysis) => serde_json::to_value(&analysis)?,
        None => {
            warn!(document_id = %doc.id, "detailed analysis failed, storing classification payload");
            serde_json::to_value(&verdict)?
        }
    });
    doc.status = InsuranceStatus::Approved;

    state.insurance.update(doc).await
}
