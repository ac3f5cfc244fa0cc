use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Structured view of a failed partner call. Classifiers and message extraction
/// work on this instead of on raw transport errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerFailure {
    pub status: Option<u16>,
    pub message: String,
    pub body: Option<Value>,
    pub retry_after: Option<Duration>,
}

impl PartnerFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            status,
            message: message.into(),
            body,
            retry_after: None,
        }
    }
}

impl std::fmt::Display for PartnerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "status={status} {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("invalid subject id `{0}`: expected 11 digits")]
    InvalidSubjectId(String),

    #[error("invalid phone format: {length} digits")]
    InvalidPhoneFormat { length: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("partner rate limit: {0}")]
    RateLimited(PartnerFailure),

    #[error("partner response carries no document id")]
    NoDocumentId,

    #[error("phone already registered at partner: {0}")]
    PhoneAlreadyRegistered(PartnerFailure),

    #[error("consent document {} is not signed: {failure}", document_id.as_deref().unwrap_or("<none>"))]
    DocumentNotSigned {
        document_id: Option<String>,
        failure: PartnerFailure,
    },

    #[error("empty response from partner: {0}")]
    EmptyResponse(&'static str),

    #[error("partner error: {0}")]
    Partner(PartnerFailure),

    #[error("partner transport error: {0}")]
    Transport(String),

    #[error("bearer token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("lead not found for subject {0}")]
    LeadNotFound(String),

    #[error("lead data incomplete: missing {}", .0.join(", "))]
    IncompleteLead(Vec<String>),

    #[error("no employment link after {attempts} attempts: {last_error}")]
    LinksExhausted { attempts: u32, last_error: String },

    #[error("signature dispatch failed: {0}")]
    SignatureDispatch(String),
}

impl FlowError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSubjectId(_) => "INVALID_SUBJECT_ID",
            Self::InvalidPhoneFormat { .. } => "INVALID_PHONE_FORMAT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::NoDocumentId => "NO_DOCUMENT_ID",
            Self::PhoneAlreadyRegistered(_) => "PHONE_ALREADY_REGISTERED",
            Self::DocumentNotSigned { .. } => "DOCUMENT_NOT_SIGNED",
            Self::EmptyResponse(_) => "EMPTY_RESPONSE",
            Self::Partner(_) => "PARTNER_ERROR",
            Self::Transport(_) => "PARTNER_UNAVAILABLE",
            Self::TokenUnavailable(_) => "TOKEN_UNAVAILABLE",
            Self::LeadNotFound(_) => "LEAD_NOT_FOUND",
            Self::IncompleteLead(_) => "INCOMPLETE_LEAD",
            Self::LinksExhausted { .. } => "LINKS_EXHAUSTED",
            Self::SignatureDispatch(_) => "SIGNATURE_DISPATCH_FAILED",
        }
    }
}
