//! Coarse document classification.
//!
//! The cheap first tier of the two-tier analysis design: one vision call
//! that labels an upload as a bill, an insurance document, or neither, and
//! pulls a few coarse fields. Classification never fails from the caller's
//! point of view - any gateway or parse error collapses into an
//! `is_valid: false` verdict the orchestrators branch on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::gateway::{ExtractionGateway, ImagePayload, strip_code_fences};

const CLASSIFY_PROMPT: &str = r#"You are a healthcare document classifier.
Look at the attached document and decide whether it is a hospital bill, an insurance document (policy, card, or explanation of benefits), or something else.

Respond with ONLY this JSON, no commentary:
{
  "isValid": true or false,
  "type": "bill" | "insurance" | "other",
  "summary": "one sentence describing the document",
  "extractedData": {
    "amount": total amount as a number if visible,
    "date": "YYYY-MM-DD" if visible,
    "hospitalName": "facility or provider name" if visible,
    "documentType": "short label such as 'Itemized Bill' or 'Policy Summary'"
  }
}

Set isValid to true only when the document is clearly readable and is a genuine bill or insurance document.
Omit any extractedData field you cannot read. Do not wrap the JSON in markdown fences."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Bill,
    Insurance,
    Other,
}

impl Default for DocumentKind {
    fn default() -> Self {
        DocumentKind::Other
    }
}

/// Coarse fields the classifier may pull from a document. Every field is
/// best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFields {
    pub amount: Option<f64>,
    pub date: Option<String>,
    pub hospital_name: Option<String>,
    pub document_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Classification {
    pub is_valid: bool,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub summary: Option<String>,
    pub extracted_data: ExtractedFields,
    /// True when classification itself broke (gateway error, unusable
    /// text) rather than the model judging the document invalid. Not part
    /// of the wire shape; orchestrators leave failed uploads `pending`
    /// instead of denying them.
    #[serde(skip)]
    pub failed: bool,
}

impl Classification {
    /// Sentinel returned when the gateway failed or produced unusable text.
    fn failure(diagnostic: impl Into<String>) -> Self {
        Classification {
            is_valid: false,
            kind: DocumentKind::Other,
            summary: Some(diagnostic.into()),
            extracted_data: ExtractedFields::default(),
            failed: true,
        }
    }
}

pub struct DocumentClassifier {
    gateway: Arc<dyn ExtractionGateway>,
}

impl DocumentClassifier {
    pub fn new(gateway: Arc<dyn ExtractionGateway>) -> Self {
        Self { gateway }
    }

    /// Classify a document. Always returns a verdict; the caller enforces
    /// its own timeout budget around this call.
    pub async fn classify(&self, bytes: &[u8], mime_type: &str) -> Classification {
        let image = ImagePayload::from_bytes(bytes, mime_type);
        let raw = match self.gateway.invoke(CLASSIFY_PROMPT, Some(&image)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "classification gateway call failed");
                return Classification::failure(format!("Classification failed: {}", e));
            }
        };

        let cleaned = strip_code_fences(&raw);
        match serde_json::from_str::<Classification>(cleaned) {
            Ok(classification) => classification,
            Err(e) => {
                warn!(error = %e, "classifier returned unparseable response");
                Classification::failure("Classification failed: response was not valid JSON")
            }
        }
    }
}
