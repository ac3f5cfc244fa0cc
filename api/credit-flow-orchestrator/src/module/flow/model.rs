use super::schema::FlowStatus;
use crate::service::subject_service::SubjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One subject's progress as held by the status cache. `fields` accumulates
/// every step's output; updates overlay keys and never drop existing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub subject_id: SubjectId,
    pub status: FlowStatus,
    pub stage: String,
    pub started_at: String,
    pub last_updated_at: Option<String>,
    pub finished_at: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProgressRecord {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Fields a later phase needs as a unit to query margin and tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRecord {
    pub document_id: String,
    pub registration: String,
    pub employer_id: String,
    pub document_signed: bool,
    #[serde(default)]
    pub margin: Option<MarginQuote>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentDocument {
    pub id: String,
    pub short_url: Option<String>,
    pub url: Option<String>,
    pub subject_id: SubjectId,
    pub name: String,
    pub phone_used: String,
    pub raw: Value,
}

impl ConsentDocument {
    pub fn signing_url(&self) -> Option<&str> {
        self.short_url.as_deref().or(self.url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentLink {
    pub employer_id: String,
    pub registration: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginQuote {
    pub amount: Option<f64>,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Lead,
    ApprovedSimulation,
    DemoPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub mother_name: Option<String>,
    pub sex: Option<String>,
    #[serde(default)]
    pub address: Value,
    #[serde(default)]
    pub bank_details: Value,
    pub product_id: u32,
    pub requested_amount: f64,
    pub installments: u32,
    pub installment_value: f64,
}

/// Partner wire shape of the employment binding inside simulation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentBinding {
    #[serde(rename = "cnpjEmpregador")]
    pub employer_id: String,
    #[serde(rename = "registroEmpregaticio")]
    pub registration: String,
}

impl From<&EmploymentLink> for EmploymentBinding {
    fn from(link: &EmploymentLink) -> Self {
        Self {
            employer_id: link.employer_id.clone(),
            registration: link.registration.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub valor_solicitado: f64,
    pub quantidade_parcelas: u32,
    pub produto_id: u32,
    pub valor_parcela: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabela_id: Option<Value>,
}

/// Simulation-ready payload in the partner's field naming. Assembled for manual
/// review; nothing in this service submits it as an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationPayload {
    pub cpf: SubjectId,
    pub nome: String,
    pub telefone: String,
    pub data_nascimento: String,
    pub nome_mae: String,
    pub email: String,
    pub sexo: String,
    pub vinculo_empregaticio: EmploymentBinding,
    pub dados_bancarios: Value,
    pub endereco: Value,
    pub proposta: Proposal,
}
