//! Detailed document analysis - the expensive second tier.
//!
//! One vision call per document, with a large structured-output prompt. For
//! bills the prompt carries an optional context block describing the user's
//! active policy, so the model can ground its coverage prediction. Failures
//! are returned as `None` after logging; callers fall back to whatever
//! coarser result they already hold.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::gateway::{ExtractionGateway, ImagePayload, strip_code_fences};
use crate::models::{BillAnalysisResult, InsuranceAnalysisResult};

const BILL_PROMPT_HEADER: &str = r#"You are a medical billing analyst. Analyze the attached hospital bill and respond with ONLY this JSON structure, no commentary and no markdown fences:
{
  "overview": {
    "patientName": "...",
    "hospitalName": "...",
    "date": "YYYY-MM-DD",
    "totalAmount": number,
    "summary": "2-3 sentence plain-language summary of the bill"
  },
  "services": [
    { "name": "service description", "code": "billing code if shown", "charge": number }
  ],
  "coveragePrediction": {
    "estimatedInsuranceCoverage": number,
    "estimatedPatientResponsibility": number,
    "confidence": "Low" | "Medium" | "High",
    "reasoning": "how you arrived at the split"
  },
  "schemes": [
    { "name": "assistance program or discount that may apply", "value": "estimated value", "description": "..." }
  ]
}
Omit any field you cannot determine rather than guessing."#;

const BILL_PROMPT_WITH_CONTEXT: &str = r#"
The patient's active insurance policy is summarized below. Apply it when estimating the coverage split: respect deductibles, coinsurance rates, copays, covered benefits and exclusions.

--- ACTIVE POLICY ---
"#;

const BILL_PROMPT_NO_CONTEXT: &str = r#"
No insurance policy is on file for this patient. Set coveragePrediction.confidence to "Low", set estimatedInsuranceCoverage to 0, and explain in the reasoning that no policy context was available."#;

const INSURANCE_PROMPT: &str = r#"You are a health-insurance policy analyst. Analyze the attached insurance document and respond with ONLY this JSON structure, no commentary and no markdown fences:
{
  "overview": {
    "policyNumber": "...",
    "insurerName": "...",
    "policyHolder": "...",
    "effectiveDate": "YYYY-MM-DD",
    "expirationDate": "YYYY-MM-DD",
    "summary": "2-3 sentence plain-language summary of the policy"
  },
  "financials": {
    "deductible": { "individual": "...", "family": "..." },
    "outOfPocketMax": { "individual": "...", "family": "..." },
    "coinsuranceRate": { "inNetwork": "...", "outOfNetwork": "..." },
    "copay": { "pcp": "...", "specialist": "...", "er": "..." }
  },
  "coverage": [
    { "type": "coverage category", "limit": "...", "deductible": "...", "copay": "..." }
  ],
  "benefits": [
    { "category": "...", "description": "...", "covered": true or false }
  ],
  "exclusions": [
    { "item": "...", "reason": "..." }
  ],
  "recommendations": [
    { "title": "...", "description": "...", "priority": "Low" | "Medium" | "High" }
  ]
}
Omit any field you cannot determine rather than guessing."#;

pub struct DetailedAnalyzer {
    gateway: Arc<dyn ExtractionGateway>,
}

impl DetailedAnalyzer {
    pub fn new(gateway: Arc<dyn ExtractionGateway>) -> Self {
        Self { gateway }
    }

    /// Full bill analysis. `insurance_context` is the formatted active-policy
    /// block, when one exists.
    pub async fn analyze_bill(
        &self,
        bytes: &[u8],
        mime_type: &str,
        insurance_context: Option<&str>,
    ) -> Option<BillAnalysisResult> {
        let prompt = match insurance_context {
            Some(context) => format!(
                "{}{}{}\n--- END POLICY ---",
                BILL_PROMPT_HEADER, BILL_PROMPT_WITH_CONTEXT, context
            ),
            None => format!("{}{}", BILL_PROMPT_HEADER, BILL_PROMPT_NO_CONTEXT),
        };

        let result: Option<BillAnalysisResult> = self.invoke_structured(&prompt, bytes, mime_type).await;
        if let Some(analysis) = &result {
            info!(
                total = ?analysis.overview.total_amount,
                services = analysis.services.len(),
                "bill analysis complete"
            );
        }
        result
    }

    /// Full insurance-policy analysis.
    pub async fn analyze_insurance(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Option<InsuranceAnalysisResult> {
        let result: Option<InsuranceAnalysisResult> =
            self.invoke_structured(INSURANCE_PROMPT, bytes, mime_type).await;
        if let Some(analysis) = &result {
            info!(
                insurer = ?analysis.overview.insurer_name,
                benefits = analysis.benefits.len(),
                "insurance analysis complete"
            );
        }
        result
    }

    async fn invoke_structured<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Option<T> {
        let image = ImagePayload::from_bytes(bytes, mime_type);
        let raw = match self.gateway.invoke(prompt, Some(&image)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "detailed analysis gateway call failed");
                return None;
            }
        };

        match serde_json::from_str(strip_code_fences(&raw)) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(error = %e, "detailed analysis returned unparseable response");
                None
            }
        }
    }
}

fn text_or_na(value: &Value, keys: &[&str]) -> String {
    let mut current = value;
    for key in keys {
        current = &current[*key];
    }
    match current {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => "N/A".to_string(),
    }
}

/// Render a stored insurance analysis payload into the human-readable block
/// the bill prompt embeds. Works over raw JSON so it handles both a full
/// policy analysis and the classification-payload fallback; every absent
/// field renders as N/A and list sections are skipped when empty.
pub fn format_insurance_context(analysis: &Value) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Insurer: {}\nPolicy number: {}\nPolicy holder: {}\nEffective: {} to {}\n",
        text_or_na(analysis, &["overview", "insurerName"]),
        text_or_na(analysis, &["overview", "policyNumber"]),
        text_or_na(analysis, &["overview", "policyHolder"]),
        text_or_na(analysis, &["overview", "effectiveDate"]),
        text_or_na(analysis, &["overview", "expirationDate"]),
    ));

    out.push_str(&format!(
        "Deductible: {} individual / {} family\n\
         Out-of-pocket max: {} individual / {} family\n\
         Coinsurance: {} in-network / {} out-of-network\n\
         Copays: PCP {}, specialist {}, ER {}\n",
        text_or_na(analysis, &["financials", "deductible", "individual"]),
        text_or_na(analysis, &["financials", "deductible", "family"]),
        text_or_na(analysis, &["financials", "outOfPocketMax", "individual"]),
        text_or_na(analysis, &["financials", "outOfPocketMax", "family"]),
        text_or_na(analysis, &["financials", "coinsuranceRate", "inNetwork"]),
        text_or_na(analysis, &["financials", "coinsuranceRate", "outOfNetwork"]),
        text_or_na(analysis, &["financials", "copay", "pcp"]),
        text_or_na(analysis, &["financials", "copay", "specialist"]),
        text_or_na(analysis, &["financials", "copay", "er"]),
    ));

    if let Some(items) = analysis["coverage"].as_array() {
        if !items.is_empty() {
            out.push_str("Coverage:\n");
            for item in items {
                out.push_str(&format!(
                    "  - {}: limit {}, copay {}\n",
                    text_or_na(item, &["type"]),
                    text_or_na(item, &["limit"]),
                    text_or_na(item, &["copay"]),
                ));
            }
        }
    }

    if let Some(benefits) = analysis["benefits"].as_array() {
        if !benefits.is_empty() {
            out.push_str("Benefits:\n");
            for benefit in benefits {
                let covered = if benefit["covered"].as_bool().unwrap_or(false) {
                    "covered"
                } else {
                    "not covered"
                };
                out.push_str(&format!(
                    "  - {} ({}): {}\n",
                    text_or_na(benefit, &["category"]),
                    covered,
                    text_or_na(benefit, &["description"]),
                ));
            }
        }
    }

    if let Some(exclusions) = analysis["exclusions"].as_array() {
        if !exclusions.is_empty() {
            out.push_str("Exclusions:\n");
            for exclusion in exclusions {
                out.push_str(&format!(
                    "  - {}: {}\n",
                    text_or_na(exclusion, &["item"]),
                    text_or_na(exclusion, &["reason"]),
                ));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, Result};
    use crate::models::Confidence;
    use async_trait::async_trait;

    struct FixedGateway(Result<String>);

    #[async_trait]
    impl ExtractionGateway for FixedGateway {
        async fn invoke(&self, _prompt: &str, _image: Option<&ImagePayload>) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(CoreError::Gateway(e.to_string())),
            }
        }
    }

    struct PromptCapture(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl ExtractionGateway for PromptCapture {
        async fn invoke(&self, prompt: &str, _image: Option<&ImagePayload>) -> Result<String> {
            self.0.lock().unwrap().push(prompt.to_string());
            Ok("{}".to_string())
        }
    }

    #[tokio::test]
    async fn bill_analysis_parses_structured_response() {
        let gateway = Arc::new(FixedGateway(Ok(r#"{
            "overview": {"hospitalName": "Mercy General", "totalAmount": 532.10},
            "services": [{"name": "X-ray", "charge": 210.0}],
            "coveragePrediction": {
                "estimatedInsuranceCoverage": 400.0,
                "estimatedPatientResponsibility": 132.10,
                "confidence": "High",
                "reasoning": "80% coinsurance after met deductible"
            },
            "schemes": []
        }"#
        .to_string())));
        let analyzer = DetailedAnalyzer::new(gateway);

        let analysis = analyzer
            .analyze_bill(b"bytes", "application/pdf", Some("policy text"))
            .await
            .unwrap();
        assert_eq!(analysis.overview.total_amount, Some(532.10));
        let prediction = analysis.coverage_prediction.unwrap();
        assert_eq!(prediction.confidence, Confidence::High);
        assert_eq!(prediction.estimated_insurance_coverage, Some(400.0));
    }

    #[tokio::test]
    async fn gateway_failure_yields_none() {
        let gateway = Arc::new(FixedGateway(Err(CoreError::Gateway("down".to_string()))));
        let analyzer = DetailedAnalyzer::new(gateway);
        assert!(analyzer.analyze_bill(b"x", "image/png", None).await.is_none());
        assert!(analyzer.analyze_insurance(b"x", "image/png").await.is_none());
    }

    #[tokio::test]
    async fn prompt_carries_context_when_present() {
        let capture = Arc::new(PromptCapture(std::sync::Mutex::new(Vec::new())));
        let analyzer = DetailedAnalyzer::new(capture.clone());

        analyzer
            .analyze_bill(b"x", "image/png", Some("Deductible: $500"))
            .await;
        analyzer.analyze_bill(b"x", "image/png", None).await;

        let prompts = capture.0.lock().unwrap();
        assert!(prompts[0].contains("Deductible: $500"));
        assert!(prompts[1].contains("No insurance policy is on file"));
    }

    #[test]
    fn context_formatting_survives_empty_payload() {
        let text = format_insurance_context(&serde_json::json!({}));
        assert!(text.contains("Insurer: N/A"));
        assert!(text.contains("Copays: PCP N/A"));
        assert!(!text.contains("Benefits:"));
    }

    #[test]
    fn context_formatting_renders_policy_fields() {
        let analysis = serde_json::json!({
            "overview": {"insurerName": "Blue Shield", "policyNumber": "BS-100"},
            "financials": {
                "deductible": {"individual": "$500", "family": "$1500"},
                "coinsuranceRate": {"inNetwork": "20%"}
            },
            "benefits": [
                {"category": "Imaging", "description": "X-ray and MRI", "covered": true}
            ],
            "exclusions": [
                {"item": "Cosmetic surgery", "reason": "not medically necessary"}
            ]
        });

        let text = format_insurance_context(&analysis);
        assert!(text.contains("Insurer: Blue Shield"));
        assert!(text.contains("Deductible: $500 individual / $1500 family"));
        assert!(text.contains("Imaging (covered): X-ray and MRI"));
        assert!(text.contains("Cosmetic surgery: not medically necessary"));
    }

    #[test]
    fn context_round_trip_from_classification_fallback() {
        // An approved document may hold the classification payload instead
        // of a full policy analysis; formatting it must not panic.
        let fallback = serde_json::json!({
            "isValid": true,
            "type": "insurance",
            "summary": "Policy summary card"
        });
        let text = format_insurance_context(&fallback);
        assert!(text.contains("N/A"));
    }
}
