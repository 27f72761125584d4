pub mod analyzer;
pub mod classifier;
pub mod documents;
pub mod error;
pub mod gateway;
pub mod models;
pub mod postgres;
pub mod records;
pub mod retry;
pub mod summary;

// Re-export commonly used types
pub use analyzer::{DetailedAnalyzer, format_insurance_context};
pub use classifier::{Classification, DocumentClassifier, DocumentKind, ExtractedFields};
pub use documents::{
    DocumentStore, HttpDocumentStore, InMemoryDocumentStore, object_path, path_from_url,
};
pub use error::{CoreError, Result};
pub use gateway::{ExtractionGateway, ImagePayload, OpenRouterGateway, strip_code_fences};
pub use models::{
    Bill, BillAnalysisResult, BillStatus, ChatMessage, Confidence, CoveragePrediction,
    InsuranceAnalysisResult, InsuranceDocument, InsuranceStatus, PENDING_EXTRACTION,
};
pub use postgres::PostgresStores;
pub use records::{
    BillStore, ChatStore, InMemoryBillStore, InMemoryChatStore, InMemoryInsuranceStore,
    InsuranceStore,
};
pub use retry::{with_retry, with_timeout};
pub use summary::{AnalysisState, CostSummary, analysis_state, summarize};
