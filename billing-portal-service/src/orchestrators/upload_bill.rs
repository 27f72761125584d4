//! Bill upload path.
//!
//! Cheap classification runs here, at upload time; the expensive detailed
//! analysis is deferred until the user asks for it or a recalculation
//! sweeps the bill. That split is what keeps upload latency bounded.

use chrono::{NaiveDate, Utc};
use coverage_flow::models::{Bill, BillStatus, PENDING_EXTRACTION};
use coverage_flow::{BillStore, CoreError, DocumentClassifier, Result, with_timeout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::service::AppState;

use super::{BILL_CLASSIFY_TIMEOUT, INSERT_TIMEOUT, UploadedFile, store_file};

/// Form input for a new bill. Manual fields may be blank when a file is
/// attached (auto-process mode); without a file they are all required.
#[derive(Debug, Default)]
pub struct NewBill {
    pub hospital_name: Option<String>,
    pub bill_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub file: Option<UploadedFile>,
}

pub async fn upload_bill(state: &AppState, user_id: &str, input: NewBill) -> Result<Bill> {
    if input.file.is_none()
        && (input.hospital_name.is_none() || input.bill_date.is_none() || input.amount.is_none())
    {
        return Err(CoreError::InvalidInput(
            "hospital name, date and amount are required when no file is attached".to_string(),
        ));
    }
    if let Some(amount) = input.amount {
        if amount < 0.0 {
            return Err(CoreError::InvalidInput("amount must not be negative".to_string()));
        }
    }

    // Step 1: store the file, if any. Failure here aborts the upload.
    let file_url = match &input.file {
        Some(file) => Some(store_file(state, user_id, file).await?.1),
        None => None,
    };

    // Step 2: insert the row. Placeholders fill any blank field when a file
    // was supplied; classification patches them shortly after.
    let now = Utc::now();
    let bill = Bill {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        hospital_name: input
            .hospital_name
            .clone()
            .unwrap_or_else(|| PENDING_EXTRACTION.to_string()),
        bill_date: input.bill_date.unwrap_or_else(|| now.date_naive()),
        amount: input.amount.unwrap_or(0.0),
        description: input.description.clone().unwrap_or_default(),
        file_url,
        status: BillStatus::Processing,
        analysis_result: None,
        created_at: now,
        updated_at: now,
    };

    let mut bill = with_timeout(state.bills.insert(bill), INSERT_TIMEOUT, "bill insert").await?;
    info!(bill_id = %bill.id, "bill row created");

    // Step 3: classify, then settle the status. Whatever happens from here
    // on, the bill must not stay in `processing`.
    let Some(file) = &input.file else {
        bill.status = BillStatus::Pending;
        return state.bills.update(bill).await;
    };

    let classifier = DocumentClassifier::new(state.gateway.clone());
    let verdict = with_timeout(
        async { Ok(classifier.classify(&file.bytes, &file.mime_type).await) },
        BILL_CLASSIFY_TIMEOUT,
        "bill classification",
    )
    .await;

    match verdict {
        Ok(verdict) if verdict.failed => {
            warn!(bill_id = %bill.id, "classification failed, releasing bill to pending");
            bill.status = BillStatus::Pending;
        }
        Ok(verdict) if verdict.is_valid => {
            let extracted = &verdict.extracted_data;
            if let Some(amount) = extracted.amount {
                bill.amount = amount;
            }
            if let Some(name) = &extracted.hospital_name {
                bill.hospital_name = name.clone();
            }
            if let Some(date) = extracted
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            {
                bill.bill_date = date;
            }
            if bill.description.is_empty() {
                if let Some(doc_type) = &extracted.document_type {
                    bill.description = doc_type.clone();
                }
            }
            bill.status = BillStatus::Pending;
            info!(bill_id = %bill.id, amount = bill.amount, "bill fields patched from extraction");
        }
        Ok(verdict) => {
            bill.status = BillStatus::Denied;
            bill.description = format!(
                "AI Flag: {}",
                verdict
                    .summary
                    .unwrap_or_else(|| "document was not recognized as a bill".to_string())
            );
        }
        Err(e) => {
            warn!(bill_id = %bill.id, error = %e, "classification timed out, releasing bill to pending");
            bill.status = BillStatus::Pending;
        }
    }

    state.bills.update(bill).await
}
