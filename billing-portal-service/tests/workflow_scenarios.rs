//! End-to-end workflow scenarios over in-memory stores and a scripted
//! extraction gateway.

use std::sync::Arc;

use async_trait::async_trait;
use billing_portal_service::orchestrators::{
    NewBill, UploadedFile, analyze_bill_on_demand, recalculate_bills, upload_bill,
    upload_insurance,
};
use billing_portal_service::service::AppState;
use chrono::{NaiveDate, Utc};
use coverage_flow::models::{Bill, BillStatus, InsuranceDocument, InsuranceStatus};
use coverage_flow::{
    BillStore, CoreError, ExtractionGateway, ImagePayload, InMemoryBillStore, InMemoryChatStore,
    InMemoryDocumentStore, InMemoryInsuranceStore, InsuranceStore, Result, summarize,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Gateway scripted per prompt kind. The three prompt templates are
/// distinguishable by their opening line.
struct ScriptedGateway {
    classify: Result<String>,
    analyze_bill: Result<String>,
    analyze_insurance: Result<String>,
}

impl ScriptedGateway {
    fn clone_result(r: &Result<String>) -> Result<String> {
        match r {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(CoreError::Gateway(e.to_string())),
        }
    }
}

#[async_trait]
impl ExtractionGateway for ScriptedGateway {
    async fn invoke(&self, prompt: &str, _image: Option<&ImagePayload>) -> Result<String> {
        if prompt.contains("document classifier") {
            Self::clone_result(&self.classify)
        } else if prompt.contains("medical billing analyst") {
            Self::clone_result(&self.analyze_bill)
        } else if prompt.contains("policy analyst") {
            Self::clone_result(&self.analyze_insurance)
        } else {
            Err(CoreError::Gateway(format!(
                "unexpected prompt: {}",
                &prompt[..40.min(prompt.len())]
            )))
        }
    }
}

fn gateway_down() -> Result<String> {
    Err(CoreError::Gateway("connection reset".to_string()))
}

fn test_state(gateway: ScriptedGateway) -> AppState {
    AppState {
        bills: Arc::new(InMemoryBillStore::new()),
        insurance: Arc::new(InMemoryInsuranceStore::new()),
        chat: Arc::new(InMemoryChatStore::new()),
        documents: Arc::new(InMemoryDocumentStore::new()),
        gateway: Arc::new(gateway),
        bucket: "documents".to_string(),
    }
}

fn pdf_file(name: &str) -> UploadedFile {
    UploadedFile {
        name: name.to_string(),
        mime_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.4 test bytes".to_vec(),
    }
}

const VALID_BILL_CLASSIFICATION: &str = r#"{
    "isValid": true,
    "type": "bill",
    "summary": "Itemized hospital bill from Mercy General",
    "extractedData": {
        "amount": 532.10,
        "date": "2024-03-02",
        "hospitalName": "Mercy General",
        "documentType": "Itemized Bill"
    }
}"#;

const VALID_INSURANCE_CLASSIFICATION: &str = r#"{
    "isValid": true,
    "type": "insurance",
    "summary": "Policy summary document",
    "extractedData": {
        "hospitalName": "Blue Shield",
        "documentType": "Policy Summary"
    }
}"#;

const BILL_ANALYSIS: &str = r#"{
    "overview": {
        "patientName": "Jane Doe",
        "hospitalName": "Mercy General",
        "date": "2024-03-02",
        "totalAmount": 532.10,
        "summary": "Emergency visit with imaging."
    },
    "services": [{"name": "X-ray", "code": "74010", "charge": 210.0}],
    "coveragePrediction": {
        "estimatedInsuranceCoverage": 400.0,
        "estimatedPatientResponsibility": 132.10,
        "confidence": "High",
        "reasoning": "20% coinsurance after met deductible"
    },
    "schemes": []
}"#;

const INSURANCE_ANALYSIS: &str = r#"{
    "overview": {"policyNumber": "BS-100", "insurerName": "Blue Shield"},
    "financials": {
        "deductible": {"individual": "$500", "family": "$1500"},
        "coinsuranceRate": {"inNetwork": "20%"}
    },
    "coverage": [],
    "benefits": [{"category": "Imaging", "description": "X-ray and MRI", "covered": true}],
    "exclusions": [],
    "recommendations": []
}"#;

// Scenario A: file-only upload, classifier extracts everything.
#[tokio::test]
async fn bill_upload_patches_fields_from_extraction() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("scan.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(bill.status, BillStatus::Pending);
    assert_eq!(bill.amount, 532.10);
    assert_eq!(bill.hospital_name, "Mercy General");
    assert_eq!(bill.bill_date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    assert!(bill.file_url.is_some());

    let stored = state.bills.get("alice", bill.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BillStatus::Pending);
}

// Scenario B: classifier network failure leaves placeholders but releases
// the bill - never stuck in processing, never denied.
#[tokio::test]
async fn bill_upload_survives_classifier_failure() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("scan.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(bill.status, BillStatus::Pending);
    assert_eq!(bill.hospital_name, "Pending AI Extraction");
    assert_eq!(bill.amount, 0.0);
}

#[tokio::test]
async fn bill_upload_denies_invalid_document() {
    let state = test_state(ScriptedGateway {
        classify: Ok(
            r#"{"isValid": false, "type": "other", "summary": "Photo of a cat"}"#.to_string(),
        ),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("cat.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(bill.status, BillStatus::Denied);
    assert!(bill.description.starts_with("AI Flag:"));
    // primitive fields keep their placeholders
    assert_eq!(bill.hospital_name, "Pending AI Extraction");
}

#[tokio::test]
async fn manual_bill_without_file_goes_straight_to_pending() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            hospital_name: Some("St. Luke's".to_string()),
            bill_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            amount: Some(88.0),
            description: Some("Follow-up visit".to_string()),
            file: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(bill.status, BillStatus::Pending);
    assert_eq!(bill.amount, 88.0);
}

#[tokio::test]
async fn manual_bill_missing_fields_is_rejected_before_any_write() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let result = upload_bill(&state, "alice", NewBill::default()).await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    assert!(state.bills.list_for_user("alice").await.unwrap().is_empty());
}

// Scenario C: valid document of the wrong type is rejected outright.
#[tokio::test]
async fn insurance_upload_rejects_wrong_type() {
    let state = test_state(ScriptedGateway {
        classify: Ok(
            r#"{"isValid": true, "type": "other", "summary": "A hospital bill"}"#.to_string(),
        ),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let doc = upload_insurance(&state, "alice", "policy", pdf_file("doc.pdf"))
        .await
        .unwrap();

    assert_eq!(doc.status, InsuranceStatus::Rejected);
    assert!(doc.analysis_result.is_none());
}

#[tokio::test]
async fn insurance_upload_approves_and_renames_on_full_analysis() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_INSURANCE_CLASSIFICATION.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: Ok(INSURANCE_ANALYSIS.to_string()),
    });

    let doc = upload_insurance(&state, "alice", "policy", pdf_file("scan001.pdf"))
        .await
        .unwrap();

    assert_eq!(doc.status, InsuranceStatus::Approved);
    assert_eq!(doc.file_name, "Blue Shield - Policy Summary.pdf");
    assert_eq!(doc.file_type, "Policy Summary");
    let analysis = doc.analysis_result.unwrap();
    assert_eq!(analysis["overview"]["insurerName"], "Blue Shield");
}

#[tokio::test]
async fn insurance_upload_falls_back_to_classification_payload() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_INSURANCE_CLASSIFICATION.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let doc = upload_insurance(&state, "alice", "policy", pdf_file("scan.pdf"))
        .await
        .unwrap();

    // Approved with the classification verdict standing in for the analysis.
    assert_eq!(doc.status, InsuranceStatus::Approved);
    let analysis = doc.analysis_result.unwrap();
    assert_eq!(analysis["isValid"], true);
    assert_eq!(analysis["type"], "insurance");
}

#[tokio::test]
async fn insurance_upload_stays_pending_on_classifier_failure() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let doc = upload_insurance(&state, "alice", "policy", pdf_file("scan.pdf"))
        .await
        .unwrap();

    assert_eq!(doc.status, InsuranceStatus::Pending);
    assert!(doc.analysis_result.is_none());
}

#[tokio::test]
async fn insurance_upload_rejects_invalid_document() {
    let state = test_state(ScriptedGateway {
        classify: Ok(r#"{"isValid": false, "type": "other", "summary": "Unreadable"}"#.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let doc = upload_insurance(&state, "alice", "policy", pdf_file("blur.pdf"))
        .await
        .unwrap();

    assert_eq!(doc.status, InsuranceStatus::Rejected);
}

async fn seed_approved_policy(state: &AppState, user_id: &str) {
    let now = Utc::now();
    state
        .insurance
        .insert(InsuranceDocument {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            file_name: "policy.pdf".to_string(),
            file_type: "Policy Summary".to_string(),
            file_url: "memory://documents/alice/policy.pdf".to_string(),
            file_size: 1024,
            status: InsuranceStatus::Approved,
            analysis_result: Some(serde_json::from_str(INSURANCE_ANALYSIS).unwrap()),
            upload_date: now,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
}

async fn seed_bill_without_file(state: &AppState, user_id: &str) -> Bill {
    let now = Utc::now();
    state
        .bills
        .insert(Bill {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            hospital_name: "Manual Entry Clinic".to_string(),
            bill_date: now.date_naive(),
            amount: 45.0,
            description: String::new(),
            file_url: None,
            status: BillStatus::Pending,
            analysis_result: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn on_demand_analysis_overwrites_columns_and_attaches_result() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: Ok(BILL_ANALYSIS.to_string()),
        analyze_insurance: gateway_down(),
    });

    seed_approved_policy(&state, "alice").await;
    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("scan.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(bill.analysis_result.is_none());

    let analyzed = analyze_bill_on_demand(&state, "alice", bill.id).await.unwrap();

    assert_eq!(analyzed.amount, 532.10);
    assert_eq!(analyzed.description, "Emergency visit with imaging.");
    let analysis = analyzed.analysis_result.unwrap();
    let prediction = analysis.coverage_prediction.unwrap();
    assert_eq!(prediction.estimated_insurance_coverage, Some(400.0));

    let stored = state.bills.get("alice", bill.id).await.unwrap().unwrap();
    assert!(stored.analysis_result.is_some());
}

#[tokio::test]
async fn on_demand_analysis_surfaces_no_result_as_gateway_error() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let bill = upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("scan.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let result = analyze_bill_on_demand(&state, "alice", bill.id).await;
    assert!(matches!(result, Err(CoreError::Gateway(_))));

    // the bill itself is untouched by the failed attempt
    let stored = state.bills.get("alice", bill.id).await.unwrap().unwrap();
    assert!(stored.analysis_result.is_none());
    assert_eq!(stored.status, BillStatus::Pending);
}

#[tokio::test]
async fn on_demand_analysis_rejects_bill_without_file() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let manual = seed_bill_without_file(&state, "alice").await;
    let result = analyze_bill_on_demand(&state, "alice", manual.id).await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

// Scenario D: three bills, one without a stored file. The sweep visits all
// three, analyzes two, and no failure escapes the loop.
#[tokio::test]
async fn recalculation_sweeps_all_bills_sequentially() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: Ok(BILL_ANALYSIS.to_string()),
        analyze_insurance: gateway_down(),
    });

    seed_approved_policy(&state, "alice").await;
    for name in ["first.pdf", "second.pdf"] {
        upload_bill(
            &state,
            "alice",
            NewBill {
                file: Some(pdf_file(name)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // object paths are timestamp-qualified per millisecond
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let manual = seed_bill_without_file(&state, "alice").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = recalculate_bills(&state, "alice", Some(tx)).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.analyzed, 2);

    let mut progress = Vec::new();
    while let Ok(n) = rx.try_recv() {
        progress.push(n);
    }
    assert_eq!(progress, vec![1, 2, 3]);

    let bills = state.bills.list_for_user("alice").await.unwrap();
    let analyzed: Vec<&Bill> = bills
        .iter()
        .filter(|b| b.analysis_result.is_some())
        .collect();
    assert_eq!(analyzed.len(), 2);
    for bill in analyzed {
        // primitive columns were overwritten from the analysis overview
        assert_eq!(bill.amount, 532.10);
        assert_eq!(bill.description, "Emergency visit with imaging.");
    }

    let untouched = state.bills.get("alice", manual.id).await.unwrap().unwrap();
    assert!(untouched.analysis_result.is_none());
}

#[tokio::test]
async fn recalculation_requires_an_analyzed_policy() {
    let state = test_state(ScriptedGateway {
        classify: gateway_down(),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    let result = recalculate_bills(&state, "alice", None).await;
    assert!(matches!(result, Err(CoreError::InvalidInput(_))));
}

#[tokio::test]
async fn recalculation_tolerates_per_bill_analysis_failure() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: gateway_down(),
        analyze_insurance: gateway_down(),
    });

    seed_approved_policy(&state, "alice").await;
    upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("bill.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let report = recalculate_bills(&state, "alice", None).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.analyzed, 0);
}

// Scenario E: a Low/0 prediction counts as analyzed and contributes zero
// insurance dollars; the flag for "not applicable" is the Low+0 combination.
#[tokio::test]
async fn summary_over_uploaded_and_recalculated_bills() {
    let state = test_state(ScriptedGateway {
        classify: Ok(VALID_BILL_CLASSIFICATION.to_string()),
        analyze_bill: Ok(BILL_ANALYSIS.to_string()),
        analyze_insurance: gateway_down(),
    });

    seed_approved_policy(&state, "alice").await;
    upload_bill(
        &state,
        "alice",
        NewBill {
            file: Some(pdf_file("bill.pdf")),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    seed_bill_without_file(&state, "alice").await;

    recalculate_bills(&state, "alice", None).await.unwrap();

    let bills = state.bills.list_for_user("alice").await.unwrap();
    let summary = summarize(&bills);
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.pending_analysis, 1);
    assert_eq!(summary.total_billed, 532.10 + 45.0);
    assert_eq!(summary.estimated_insurance, 400.0);
    assert_eq!(summary.estimated_patient, 132.10);

    // summarizing twice yields identical totals
    assert_eq!(summary, summarize(&bills));
}
