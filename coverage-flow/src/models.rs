//! Record and analysis shapes shared across the workflow.
//!
//! Everything the extraction gateway produces is duck-typed JSON from a
//! provider that guarantees no schema, so every AI-derived leaf field is
//! optional and defaulted. Readers must branch, never assume presence.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Processing,
    Paid,
    Denied,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Processing => "processing",
            BillStatus::Paid => "paid",
            BillStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BillStatus::Pending),
            "processing" => Some(BillStatus::Processing),
            "paid" => Some(BillStatus::Paid),
            "denied" => Some(BillStatus::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsuranceStatus {
    Pending,
    Approved,
    Rejected,
}

impl InsuranceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsuranceStatus::Pending => "pending",
            InsuranceStatus::Approved => "approved",
            InsuranceStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InsuranceStatus::Pending),
            "approved" => Some(InsuranceStatus::Approved),
            "rejected" => Some(InsuranceStatus::Rejected),
            _ => None,
        }
    }
}

/// Placeholder hospital name used when a bill is created in auto-process
/// mode, before classification has filled in the real fields.
pub const PENDING_EXTRACTION: &str = "Pending AI Extraction";

/// A hospital bill row. When `analysis_result` is present it is the
/// authoritative source for the display fields - the upload and
/// recalculation orchestrators overwrite the primitive columns from
/// `analysis_result.overview` whenever extraction succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub user_id: String,
    pub hospital_name: String,
    pub bill_date: NaiveDate,
    pub amount: f64,
    pub description: String,
    pub file_url: Option<String>,
    pub status: BillStatus,
    pub analysis_result: Option<BillAnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An uploaded insurance document row. `analysis_result` holds either a full
/// [`InsuranceAnalysisResult`] or, when the detailed analyzer failed but
/// classification succeeded, the raw classification payload - never empty on
/// an approved document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceDocument {
    pub id: Uuid,
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_url: String,
    pub file_size: u64,
    pub status: InsuranceStatus,
    pub analysis_result: Option<Value>,
    pub upload_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Low
    }
}

/// Structured bill analysis, attached to a [`Bill`]. Serialized with the
/// same camelCase keys the extraction prompt requests, so a gateway response
/// parses straight into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillAnalysisResult {
    pub overview: BillOverview,
    pub services: Vec<ServiceLine>,
    pub coverage_prediction: Option<CoveragePrediction>,
    pub schemes: Vec<Scheme>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillOverview {
    pub patient_name: Option<String>,
    pub hospital_name: Option<String>,
    pub date: Option<String>,
    pub total_amount: Option<f64>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceLine {
    pub name: Option<String>,
    pub code: Option<String>,
    pub charge: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoveragePrediction {
    pub estimated_insurance_coverage: Option<f64>,
    pub estimated_patient_responsibility: Option<f64>,
    pub confidence: Confidence,
    pub reasoning: Option<String>,
}

impl CoveragePrediction {
    /// A low-confidence zero estimate means "no basis to predict", not a
    /// confirmed zero-dollar coverage. The UI renders it as not applicable.
    pub fn is_not_applicable(&self) -> bool {
        self.confidence == Confidence::Low
            && self.estimated_insurance_coverage.unwrap_or(0.0) == 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scheme {
    pub name: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
}

/// Structured insurance-policy analysis, attached to an
/// [`InsuranceDocument`] and formatted into context text for bill analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsuranceAnalysisResult {
    pub overview: InsuranceOverview,
    pub financials: InsuranceFinancials,
    pub coverage: Vec<CoverageItem>,
    pub benefits: Vec<Benefit>,
    pub exclusions: Vec<Exclusion>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsuranceOverview {
    pub policy_number: Option<String>,
    pub insurer_name: Option<String>,
    pub policy_holder: Option<String>,
    pub effective_date: Option<String>,
    pub expiration_date: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsuranceFinancials {
    pub deductible: FamilySplit,
    pub out_of_pocket_max: FamilySplit,
    pub coinsurance_rate: NetworkSplit,
    pub copay: CopaySchedule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FamilySplit {
    pub individual: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSplit {
    pub in_network: Option<String>,
    pub out_of_network: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CopaySchedule {
    pub pcp: Option<String>,
    pub specialist: Option<String>,
    pub er: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverageItem {
    #[serde(rename = "type")]
    pub coverage_type: Option<String>,
    pub limit: Option<String>,
    pub deductible: Option<String>,
    pub copay: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Benefit {
    pub category: Option<String>,
    pub description: Option<String>,
    pub covered: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exclusion {
    pub item: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recommendation {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Confidence,
}

/// One turn in the dashboard chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bill_analysis_parses_with_missing_keys() {
        // The provider guarantees no schema - a bare object must parse.
        let result: BillAnalysisResult = serde_json::from_str("{}").unwrap();
        assert!(result.overview.total_amount.is_none());
        assert!(result.services.is_empty());
        assert!(result.coverage_prediction.is_none());
    }

    #[test]
    fn low_confidence_zero_coverage_is_not_applicable() {
        let prediction = CoveragePrediction {
            estimated_insurance_coverage: Some(0.0),
            estimated_patient_responsibility: Some(532.10),
            confidence: Confidence::Low,
            reasoning: None,
        };
        assert!(prediction.is_not_applicable());

        let confirmed_zero = CoveragePrediction {
            estimated_insurance_coverage: Some(0.0),
            confidence: Confidence::High,
            ..Default::default()
        };
        assert!(!confirmed_zero.is_not_applicable());
    }

    #[test]
    fn statuses_round_trip_through_text() {
        assert_eq!(BillStatus::parse("processing"), Some(BillStatus::Processing));
        assert_eq!(BillStatus::Processing.as_str(), "processing");
        assert_eq!(InsuranceStatus::parse("approved"), Some(InsuranceStatus::Approved));
        assert_eq!(BillStatus::parse("bogus"), None);
    }

    #[test]
    fn insurance_analysis_tolerates_foreign_payload() {
        // A classification payload stored as the fallback analysis must
        // still deserialize leniently when read back as a policy analysis.
        let fallback = serde_json::json!({
            "isValid": true,
            "type": "insurance",
            "summary": "Health insurance policy document"
        });
        let parsed: InsuranceAnalysisResult = serde_json::from_value(fallback).unwrap();
        assert!(parsed.overview.policy_number.is_none());
        assert!(parsed.coverage.is_empty());
    }
}
