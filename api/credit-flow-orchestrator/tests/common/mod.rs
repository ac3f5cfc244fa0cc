#![allow(dead_code)]

use async_trait::async_trait;
use credit_flow_orchestrator::app::AppState;
use credit_flow_orchestrator::config::environment::AppConfig;
use credit_flow_orchestrator::errors::{FlowError, PartnerFailure};
use credit_flow_orchestrator::infra::InfraClients;
use credit_flow_orchestrator::module::flow::model::{ConsentDocument, MarginQuote};
use credit_flow_orchestrator::service::lead_service::{Lead, LeadSource};
use credit_flow_orchestrator::service::partner_service::{
    ConsentRequest, MarginQuery, PartnerApi, TablesQuery,
};
use credit_flow_orchestrator::service::phone_service::normalize_phone;
use credit_flow_orchestrator::service::signature_queue_service::{
    SignatureDispatcher, SignatureJob, SignatureOutcome,
};
use credit_flow_orchestrator::service::subject_service::SubjectId;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const SUBJECT: &str = "16183805831";
pub const LEAD_PHONE: &str = "11987654321";

pub fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        partner_api_url: "https://partner.test".to_string(),
        partner_api_token: Some("token".to_string()),
        partner_tenant_id: "superuser".to_string(),
        partner_timeout_seconds: 30,
        partner_product_id: 28,
        retry_max_attempts: 5,
        retry_base_delay_ms: 2000,
        retry_max_delay_ms: 60_000,
        links_rate_limit_base_delay_ms: 30_000,
        link_poll_attempts: 5,
        link_poll_delay_seconds: 30,
        default_installments: 36,
        demo_profile_enabled: false,
        signature_concurrency: 2,
        signature_queue_capacity: 8,
        signature_timeout_ms: 60_000,
        webhook_token: None,
        crm_api_url: None,
        crm_api_key: None,
        crm_queue_id: None,
        crm_pipeline_ids: vec!["1".to_string()],
        cors_allowed_origins: vec!["http://localhost:3000".to_string()],
    }
}

/// Partner double. Records every call and answers from scripted state.
#[derive(Default)]
pub struct FakePartner {
    pub rejected_phones: Mutex<HashSet<String>>,
    pub generate_error: Mutex<Option<FlowError>>,
    pub consent_phones: Mutex<Vec<String>>,
    pub signed_documents: Mutex<Vec<String>>,
    pub link_script: Mutex<VecDeque<Result<Vec<Value>, FlowError>>>,
    pub link_calls: Mutex<u32>,
    pub margin_queries: Mutex<Vec<(String, String)>>,
    pub tables_calls: Mutex<u32>,
}

impl FakePartner {
    pub fn reject_phone(&self, phone: &str) {
        self.rejected_phones
            .lock()
            .expect("lock")
            .insert(phone.to_string());
    }

    pub fn script_links(&self, responses: Vec<Result<Vec<Value>, FlowError>>) {
        *self.link_script.lock().expect("lock") = responses.into();
    }

    pub fn link_calls(&self) -> u32 {
        *self.link_calls.lock().expect("lock")
    }

    pub fn consent_phones(&self) -> Vec<String> {
        self.consent_phones.lock().expect("lock").clone()
    }
}

pub fn default_link() -> Value {
    json!({"matricula": "98765", "cnpj": "12345678000199"})
}

pub fn partner_failure(message: &str) -> PartnerFailure {
    PartnerFailure::new(Some(400), message, Some(json!({ "message": message })))
}

#[async_trait]
impl PartnerApi for FakePartner {
    async fn generate_consent_document(
        &self,
        req: &ConsentRequest,
    ) -> Result<ConsentDocument, FlowError> {
        let phone = normalize_phone(&req.phone)?;
        self.consent_phones
            .lock()
            .expect("lock")
            .push(phone.clone());
        if let Some(err) = self.generate_error.lock().expect("lock").clone() {
            return Err(err);
        }
        if self.rejected_phones.lock().expect("lock").contains(&phone) {
            return Err(FlowError::PhoneAlreadyRegistered(partner_failure(
                "Telefone já utilizado",
            )));
        }
        Ok(ConsentDocument {
            id: "doc-1".to_string(),
            short_url: Some("https://sign.test/doc-1".to_string()),
            url: None,
            subject_id: req.subject_id.clone(),
            name: req.name.clone(),
            phone_used: phone,
            raw: json!({"autorizacaoId": "doc-1", "shortUrl": "https://sign.test/doc-1"}),
        })
    }

    async fn sign_consent_document(&self, document_id: &str) -> Result<Value, FlowError> {
        self.signed_documents
            .lock()
            .expect("lock")
            .push(document_id.to_string());
        Ok(json!({"success": true}))
    }

    async fn query_employment_links(
        &self,
        _subject_id: &SubjectId,
        _document_id: Option<&str>,
    ) -> Result<Vec<Value>, FlowError> {
        *self.link_calls.lock().expect("lock") += 1;
        self.link_script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(vec![default_link()]))
    }

    async fn query_margin(&self, query: &MarginQuery) -> Result<MarginQuote, FlowError> {
        self.margin_queries
            .lock()
            .expect("lock")
            .push((query.registration.clone(), query.employer_id.clone()));
        Ok(MarginQuote {
            amount: Some(1500.0),
            raw: json!({"valorMargem": 1500.0}),
        })
    }

    async fn query_available_tables(&self, _query: &TablesQuery) -> Result<Value, FlowError> {
        *self.tables_calls.lock().expect("lock") += 1;
        Ok(json!([{"id": 501, "nome": "Tabela Privado 36x"}]))
    }
}

#[derive(Default)]
pub struct FakeLeads {
    pub leads: Mutex<HashMap<String, Value>>,
    pub outage: Mutex<Option<FlowError>>,
}

impl FakeLeads {
    pub fn with_lead(subject: &str, detail: Value) -> Self {
        let leads = Self::default();
        leads.insert(subject, detail);
        leads
    }

    pub fn insert(&self, subject: &str, detail: Value) {
        self.leads
            .lock()
            .expect("lock")
            .insert(subject.to_string(), detail);
    }

    pub fn remove(&self, subject: &str) {
        self.leads.lock().expect("lock").remove(subject);
    }
}

pub fn maria_lead() -> Value {
    json!({
        "id": "lead-42",
        "nome": "Maria Silva",
        "telefone": LEAD_PHONE,
        "data_nascimento": "1985-04-12",
        "nome_mae": "Ana Silva",
        "sexo": "F"
    })
}

#[async_trait]
impl LeadSource for FakeLeads {
    async fn find_lead(&self, subject_id: &SubjectId) -> Result<Option<Lead>, FlowError> {
        if let Some(err) = self.outage.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(self
            .leads
            .lock()
            .expect("lock")
            .get(subject_id.as_str())
            .map(|detail| Lead {
                id: detail["id"].as_str().unwrap_or_default().to_string(),
                raw: detail.clone(),
            }))
    }

    async fn find_lead_by_id(&self, lead_id: &str) -> Result<Option<Value>, FlowError> {
        Ok(self
            .leads
            .lock()
            .expect("lock")
            .values()
            .find(|detail| detail["id"].as_str() == Some(lead_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeSignatures {
    pub jobs: Mutex<Vec<SignatureJob>>,
    pub fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl SignatureDispatcher for FakeSignatures {
    async fn enqueue_signature(&self, job: SignatureJob) -> Result<SignatureOutcome, FlowError> {
        self.jobs.lock().expect("lock").push(job);
        Ok(match self.fail_with.lock().expect("lock").clone() {
            Some(message) => SignatureOutcome {
                success: false,
                message,
            },
            None => SignatureOutcome {
                success: true,
                message: "signed".to_string(),
            },
        })
    }
}

pub struct Harness {
    pub state: AppState,
    pub partner: Arc<FakePartner>,
    pub leads: Arc<FakeLeads>,
    pub signatures: Arc<FakeSignatures>,
}

pub fn harness(config: AppConfig, leads: FakeLeads) -> Harness {
    let partner = Arc::new(FakePartner::default());
    let leads = Arc::new(leads);
    let signatures = Arc::new(FakeSignatures::default());
    let infra = InfraClients {
        partner: partner.clone(),
        leads: leads.clone(),
        signatures: signatures.clone(),
    };
    Harness {
        state: AppState::new(config, infra),
        partner,
        leads,
        signatures,
    }
}
