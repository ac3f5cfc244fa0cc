use crate::config::partner::CrmConfig;
use crate::errors::FlowError;
use crate::module::flow::model::SubjectProfile;
use crate::service::response_shape_service::{first_non_empty_array, first_string};
use crate::service::subject_service::{SubjectId, digits_only};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

const OPPORTUNITY_ARRAY_KEYS: &[&str] = &["data", "opportunities", "results"];
const CPF_FORM_FIELD: &str = "98011220";

const NAME_KEYS: &[&str] = &["nome", "name", "title", "fullname"];
const PHONE_KEYS: &[&str] = &["telefone", "phone", "mainphone", "celular"];
const EMAIL_KEYS: &[&str] = &["email"];
const BIRTH_DATE_KEYS: &[&str] = &["data_nascimento", "dataNascimento", "birthdate"];
const MOTHER_NAME_KEYS: &[&str] = &["nome_mae", "nomeMae"];
const SEX_KEYS: &[&str] = &["sexo", "sex"];

pub const DEFAULT_BIRTH_DATE: &str = "1990-01-01";
pub const DEFAULT_MOTHER_NAME: &str = "NOME MAE";
pub const DEFAULT_SEX: &str = "M";

/// Pipeline entry matching a subject. `raw` is the opportunity as returned by the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub raw: Value,
}

/// Validated lead contents needed to build a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadData {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: String,
    pub mother_name: Option<String>,
    pub sex: Option<String>,
    pub address: Value,
    pub bank_details: Value,
}

#[async_trait]
pub trait LeadSource: Send + Sync {
    async fn find_lead(&self, subject_id: &SubjectId) -> Result<Option<Lead>, FlowError>;
    async fn find_lead_by_id(&self, lead_id: &str) -> Result<Option<Value>, FlowError>;
}

/// Requires name, phone and birth date; reads top-level keys first, then `formsdata`.
pub fn validate_lead_fields(detail: &Value) -> Result<LeadData, FlowError> {
    let name = lead_field(detail, NAME_KEYS);
    let phone = lead_field(detail, PHONE_KEYS);
    let birth_date = lead_field(detail, BIRTH_DATE_KEYS);

    let missing = [("name", &name), ("phone", &phone), ("birth_date", &birth_date)]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(field, _)| field.to_string())
        .collect::<Vec<_>>();

    match (name, phone, birth_date) {
        (Some(name), Some(phone), Some(birth_date)) => Ok(LeadData {
            name,
            phone,
            email: lead_field(detail, EMAIL_KEYS),
            birth_date,
            mother_name: lead_field(detail, MOTHER_NAME_KEYS),
            sex: lead_field(detail, SEX_KEYS),
            address: lead_object(detail, &["endereco", "address"]),
            bank_details: lead_object(detail, &["dados_bancarios", "dadosBancarios"]),
        }),
        _ => Err(FlowError::IncompleteLead(missing)),
    }
}

fn lead_field(detail: &Value, keys: &[&str]) -> Option<String> {
    first_string(detail, keys).or_else(|| {
        detail
            .get("formsdata")
            .and_then(|forms| first_string(forms, keys))
    })
}

fn lead_object(detail: &Value, keys: &[&str]) -> Value {
    let forms = detail.get("formsdata");
    keys.iter()
        .find_map(|k| {
            detail
                .get(*k)
                .or_else(|| forms.and_then(|f| f.get(*k)))
                .filter(|v| v.is_object())
        })
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Whether the opportunity carries the subject's CPF in any of the places the
/// CRM forms put it.
pub fn opportunity_matches(opportunity: &Value, subject_id: &SubjectId) -> bool {
    let forms = opportunity.get("formsdata");
    [
        opportunity.get("mainmail"),
        forms.and_then(|f| f.get(CPF_FORM_FIELD)),
        forms.and_then(|f| f.get("cpf")),
        opportunity.get("cpf"),
    ]
    .into_iter()
    .flatten()
    .filter_map(|v| match v {
        Value::String(s) => Some(digits_only(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
    .any(|candidate| candidate == subject_id.as_str())
}

/// Scans the configured CRM pipelines. No CRM configured means no lead; a CRM
/// where every pipeline fails is an error, not an empty answer.
pub struct CrmLeadSource {
    http: Client,
    config: CrmConfig,
}

impl CrmLeadSource {
    pub fn new(config: CrmConfig) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("failed to build crm http client: {e}"))?;
        Ok(Self { http, config })
    }

    async fn pipeline_opportunities(&self, url: &str, pipeline_id: &str) -> Result<Vec<Value>, FlowError> {
        let resp = self
            .http
            .post(format!("{url}/getPipeOpportunities"))
            .json(&json!({
                "queueId": self.config.queue_id,
                "apiKey": self.config.api_key,
                "pipelineId": pipeline_id,
            }))
            .send()
            .await
            .map_err(|e| FlowError::Transport(format!("crm request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(FlowError::Transport(format!(
                "crm returned non-success status: {}",
                resp.status()
            )));
        }
        let payload = resp
            .json::<Value>()
            .await
            .map_err(|e| FlowError::Transport(format!("failed to parse crm payload: {e}")))?;
        Ok(first_non_empty_array(&payload, OPPORTUNITY_ARRAY_KEYS)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan<P>(&self, predicate: P) -> Result<Option<Value>, FlowError>
    where
        P: Fn(&Value) -> bool + Send + Sync,
    {
        let Some(url) = self.config.url.as_deref() else {
            return Ok(None);
        };
        let mut scanned = 0usize;
        let mut last_error = None;
        for pipeline_id in &self.config.pipeline_ids {
            match self.pipeline_opportunities(url, pipeline_id).await {
                Ok(opportunities) => {
                    scanned += 1;
                    if let Some(hit) = opportunities.into_iter().find(|o| predicate(o)) {
                        return Ok(Some(hit));
                    }
                }
                Err(e) => {
                    warn!(pipeline_id = %pipeline_id, error = %e, "crm pipeline scan failed");
                    last_error = Some(e);
                }
            }
        }
        // "No lead" is only an answer when at least one pipeline was actually read.
        match last_error {
            Some(e) if scanned == 0 => Err(e),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl LeadSource for CrmLeadSource {
    async fn find_lead(&self, subject_id: &SubjectId) -> Result<Option<Lead>, FlowError> {
        let hit = self.scan(|o| opportunity_matches(o, subject_id)).await?;
        let lead = hit.and_then(|raw| {
            let id = first_string(&raw, &["id"])?;
            Some(Lead { id, raw })
        });
        if let Some(lead) = &lead {
            info!(subject_id = %subject_id, lead_id = %lead.id, "lead found");
        }
        Ok(lead)
    }

    async fn find_lead_by_id(&self, lead_id: &str) -> Result<Option<Value>, FlowError> {
        self.scan(|o| first_string(o, &["id"]).as_deref() == Some(lead_id))
            .await
    }
}

/// Demo-only profile used when no lead and no approved simulation exist.
pub fn placeholder_profile(
    subject_id: &SubjectId,
    product_id: u32,
    requested_amount: f64,
    installments: u32,
) -> SubjectProfile {
    let number = rand::thread_rng().gen_range(100_000_000u32..1_000_000_000);
    SubjectProfile {
        name: format!("Cliente {subject_id}"),
        phone: format!("11{number}"),
        email: Some(format!("{subject_id}@gmail.com")),
        birth_date: Some(DEFAULT_BIRTH_DATE.to_string()),
        mother_name: Some(DEFAULT_MOTHER_NAME.to_string()),
        sex: Some(DEFAULT_SEX.to_string()),
        address: json!({
            "cep": "01310100",
            "rua": "Avenida Paulista",
            "numero": "1000",
            "bairro": "Bela Vista",
            "cidade": "São Paulo",
            "estado": "SP",
        }),
        bank_details: json!({}),
        product_id,
        requested_amount,
        installments,
        installment_value: 0.0,
    }
}

pub fn profile_from_lead(
    data: LeadData,
    product_id: u32,
    requested_amount: f64,
    installments: u32,
) -> SubjectProfile {
    SubjectProfile {
        name: data.name,
        phone: data.phone,
        email: data.email,
        birth_date: Some(data.birth_date),
        mother_name: data.mother_name,
        sex: Some(data.sex.unwrap_or_else(|| DEFAULT_SEX.to_string())),
        address: data.address,
        bank_details: data.bank_details,
        product_id,
        requested_amount,
        installments,
        installment_value: 0.0,
    }
}
