//! Cost aggregation over a user's bills.
//!
//! Pure fold, safe to recompute on every dashboard read. Analyzed bills
//! contribute their predicted split; unanalyzed bills contribute only their
//! raw amount. Missing numeric fields count as zero, never as an error.

use serde::{Deserialize, Serialize};

use crate::models::Bill;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisState {
    Analyzed,
    PendingAnalysis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_billed: f64,
    pub estimated_insurance: f64,
    pub estimated_patient: f64,
    pub analyzed: usize,
    pub pending_analysis: usize,
}

/// Whether a bill's coverage split has been predicted yet.
pub fn analysis_state(bill: &Bill) -> AnalysisState {
    match &bill.analysis_result {
        Some(analysis) if analysis.coverage_prediction.is_some() => AnalysisState::Analyzed,
        _ => AnalysisState::PendingAnalysis,
    }
}

pub fn summarize(bills: &[Bill]) -> CostSummary {
    let mut summary = CostSummary::default();

    for bill in bills {
        match analysis_state(bill) {
            AnalysisState::Analyzed => {
                let analysis = bill.analysis_result.as_ref().unwrap();
                let prediction = analysis.coverage_prediction.as_ref().unwrap();

                summary.total_billed += analysis.overview.total_amount.unwrap_or(bill.amount);
                summary.estimated_insurance +=
                    prediction.estimated_insurance_coverage.unwrap_or(0.0);
                summary.estimated_patient +=
                    prediction.estimated_patient_responsibility.unwrap_or(0.0);
                summary.analyzed += 1;
            }
            AnalysisState::PendingAnalysis => {
                summary.total_billed += bill.amount;
                summary.pending_analysis += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BillAnalysisResult, BillOverview, BillStatus, Confidence, CoveragePrediction,
    };
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn bill(amount: f64, analysis: Option<BillAnalysisResult>) -> Bill {
        let now = Utc::now();
        Bill {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            hospital_name: "General".to_string(),
            bill_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount,
            description: String::new(),
            file_url: None,
            status: BillStatus::Pending,
            analysis_result: analysis,
            created_at: now,
            updated_at: now,
        }
    }

    fn analyzed(total: f64, insurance: f64, patient: f64) -> BillAnalysisResult {
        BillAnalysisResult {
            overview: BillOverview {
                total_amount: Some(total),
                ..Default::default()
            },
            coverage_prediction: Some(CoveragePrediction {
                estimated_insurance_coverage: Some(insurance),
                estimated_patient_responsibility: Some(patient),
                confidence: Confidence::Medium,
                reasoning: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn mixes_analyzed_and_pending_bills() {
        let bills = vec![
            bill(100.0, Some(analyzed(120.0, 90.0, 30.0))),
            bill(250.0, None),
        ];

        let summary = summarize(&bills);
        assert_eq!(summary.total_billed, 370.0);
        assert_eq!(summary.estimated_insurance, 90.0);
        assert_eq!(summary.estimated_patient, 30.0);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.pending_analysis, 1);
    }

    #[test]
    fn is_idempotent() {
        let bills = vec![bill(50.0, Some(analyzed(50.0, 40.0, 10.0))), bill(20.0, None)];
        assert_eq!(summarize(&bills), summarize(&bills));
    }

    #[test]
    fn zero_amount_unanalyzed_bill_contributes_nothing() {
        let bills = vec![bill(0.0, None)];
        let summary = summarize(&bills);
        assert_eq!(summary.total_billed, 0.0);
        assert_eq!(summary.estimated_insurance, 0.0);
        assert_eq!(summary.estimated_patient, 0.0);
    }

    #[test]
    fn missing_numerics_count_as_zero() {
        let analysis = BillAnalysisResult {
            coverage_prediction: Some(CoveragePrediction::default()),
            ..Default::default()
        };
        let bills = vec![bill(75.0, Some(analysis))];

        let summary = summarize(&bills);
        // overview.totalAmount absent, so the raw amount is used
        assert_eq!(summary.total_billed, 75.0);
        assert_eq!(summary.estimated_insurance, 0.0);
        assert_eq!(summary.analyzed, 1);
    }

    #[test]
    fn low_confidence_zero_split_still_counts_as_analyzed() {
        // Scenario: no policy context, analyzer returns a Low/0 prediction.
        // The bill is analyzed; the UI renders the coverage as N/A.
        let analysis = BillAnalysisResult {
            overview: BillOverview {
                total_amount: Some(532.10),
                ..Default::default()
            },
            coverage_prediction: Some(CoveragePrediction {
                estimated_insurance_coverage: Some(0.0),
                estimated_patient_responsibility: Some(532.10),
                confidence: Confidence::Low,
                reasoning: Some("no policy context".to_string()),
            }),
            ..Default::default()
        };
        let b = bill(532.10, Some(analysis));
        assert_eq!(analysis_state(&b), AnalysisState::Analyzed);
        assert!(
            b.analysis_result
                .as_ref()
                .unwrap()
                .coverage_prediction
                .as_ref()
                .unwrap()
                .is_not_applicable()
        );

        let summary = summarize(&[b]);
        assert_eq!(summary.estimated_insurance, 0.0);
        assert_eq!(summary.estimated_patient, 532.10);
    }
}
