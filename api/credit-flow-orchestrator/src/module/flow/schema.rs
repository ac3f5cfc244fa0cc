use super::model::{
    ConsentDocument, EmploymentLink, MarginQuote, MarginRecord, ProfileSource, ProgressRecord,
    SimulationPayload, SubjectProfile,
};
use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FLOW_ORIGIN: &str = "PRESENCA_BANK";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Processing,
    Done,
    Error,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    ResolveSubject,
    GenerateDocument,
    DispatchSignature,
    QueryLinks,
    NormalizeLink,
    QueryMargin,
    QueryTables,
    AssembleSimulation,
    Done,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveSubject => "resolve_subject",
            Self::GenerateDocument => "generate_document",
            Self::DispatchSignature => "dispatch_signature",
            Self::QueryLinks => "query_links",
            Self::NormalizeLink => "normalize_link",
            Self::QueryMargin => "query_margin",
            Self::QueryTables => "query_tables",
            Self::AssembleSimulation => "assemble_simulation",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartFlowRequest {
    #[serde(alias = "subjectId")]
    pub cpf: String,
    #[serde(default, alias = "requestedAmount", alias = "valorPersonalizado")]
    pub requested_amount: Option<f64>,
    #[serde(default, alias = "prazoPersonalizado")]
    pub installments: Option<u32>,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFlowResponse {
    pub accepted: bool,
    pub subject_id: String,
    pub run_id: String,
    pub error_code: Option<String>,
    pub reason: String,
}

/// Outcome of one orchestrator run. Failures are reported here instead of
/// being raised past the orchestrator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub succeeded: bool,
    pub origin: String,
    pub run_id: String,
    pub subject_id: String,
    pub stage: FlowStage,
    pub error: Option<String>,
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    pub document: Option<ConsentDocument>,
    #[serde(default)]
    pub employment_links: Vec<Value>,
    pub employment: Option<EmploymentLink>,
    pub margin: Option<MarginQuote>,
    pub tables: Option<Value>,
    pub simulation: Option<SimulationPayload>,
    /// Always null: operation creation is left to manual review.
    #[serde(rename = "operacao")]
    pub operation: Option<Value>,
    pub profile: Option<SubjectProfile>,
    pub profile_source: Option<ProfileSource>,
    pub timestamp: String,
}

impl FlowResult {
    pub fn failure(run_id: &str, subject_id: &str, stage: FlowStage, err: &FlowError) -> Self {
        let missing_fields = match err {
            FlowError::IncompleteLead(missing) => missing.clone(),
            _ => Vec::new(),
        };
        Self {
            succeeded: false,
            origin: FLOW_ORIGIN.to_string(),
            run_id: run_id.to_string(),
            subject_id: subject_id.to_string(),
            stage,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            missing_fields,
            document: None,
            employment_links: Vec::new(),
            employment: None,
            margin: None,
            tables: None,
            simulation: None,
            operation: None,
            profile: None,
            profile_source: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatusResponse {
    pub found: bool,
    pub processing: bool,
    pub record: Option<ProgressRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginDataResponse {
    pub found: bool,
    pub margin_data: Option<MarginRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub cleared: bool,
    pub subject_id: String,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsView {
    pub total_subjects: usize,
    pub processing: usize,
    pub margin_entries: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub stats: CacheStatsView,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectPhaseRequest {
    #[serde(alias = "subjectId")]
    pub cpf: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturePhaseRequest {
    #[serde(alias = "subjectId")]
    pub cpf: String,
    #[serde(default, alias = "termoUrl", alias = "signUrl")]
    pub sign_url: Option<String>,
    #[serde(default, alias = "termoId", alias = "documentId")]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginPhaseRequest {
    #[serde(alias = "subjectId")]
    pub cpf: String,
    #[serde(default, alias = "termoId", alias = "documentId")]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub success: bool,
    pub subject_id: String,
    pub stage: String,
    pub result: Option<Value>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetricsView {
    pub flows_started: u64,
    pub flows_succeeded: u64,
    pub flows_failed: u64,
    pub rate_limit_retries: u64,
    pub link_poll_attempts: u64,
    pub signature_jobs: u64,
    pub last_error_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub env: String,
    pub partner_api_url: String,
    pub demo_profile_enabled: bool,
    pub cache: CacheStatsView,
    pub metrics: HealthMetricsView,
    pub reason: String,
}
