use crate::config::partner::PartnerConfig;
use crate::errors::{FlowError, PartnerFailure};
use crate::module::flow::model::{
    ConsentDocument, EmploymentBinding, EmploymentLink, MarginQuote, SubjectProfile,
};
use crate::service::error_classifier_service::{
    extract_partner_message, is_document_not_signed, is_phone_already_registered,
};
use crate::service::link_service::{EMPLOYER_ID_LEN, normalize_employer_id};
use crate::service::phone_service::{normalize_phone, split_phone};
use crate::service::response_shape_service::{
    MARGIN_AMOUNT_KEYS, extract_document_id, extract_links, extract_margin, first_number,
    first_string,
};
use crate::service::retry_service::{RetryPolicy, execute_with_retry};
use crate::service::subject_service::{SubjectId, digits_only};
use crate::service::token_service::TokenProvider;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CONSENT_PATH: &str = "/consultas/termo-inss";
const LINKS_PATH: &str = "/v3/operacoes/consignado-privado/consultar-vinculos";
const MARGIN_PATH: &str = "/v3/operacoes/consignado-privado/consultar-margem";
const TABLES_PATH: &str = "/v3/tabelas/simulacao/inss/disponiveis";

#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub subject_id: SubjectId,
    pub name: String,
    pub phone: String,
    pub product_id: u32,
}

#[derive(Debug, Clone)]
pub struct MarginQuery {
    pub subject_id: SubjectId,
    pub registration: String,
    pub employer_id: String,
}

#[derive(Debug, Clone)]
pub struct TablesQuery {
    pub subject_id: SubjectId,
    pub profile: SubjectProfile,
    pub employment: EmploymentLink,
}

/// Calls against the partner bank. Every method goes through the retry
/// executor and returns already-normalized shapes.
#[async_trait]
pub trait PartnerApi: Send + Sync {
    async fn generate_consent_document(
        &self,
        req: &ConsentRequest,
    ) -> Result<ConsentDocument, FlowError>;

    async fn sign_consent_document(&self, document_id: &str) -> Result<Value, FlowError>;

    /// Empty when the partner answered without any link array.
    async fn query_employment_links(
        &self,
        subject_id: &SubjectId,
        document_id: Option<&str>,
    ) -> Result<Vec<Value>, FlowError>;

    async fn query_margin(&self, query: &MarginQuery) -> Result<MarginQuote, FlowError>;

    async fn query_available_tables(&self, query: &TablesQuery) -> Result<Value, FlowError>;
}

pub struct PresencaBankClient {
    http: Client,
    config: PartnerConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl PresencaBankClient {
    pub fn new(config: PartnerConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.relaxed_tls)
            .build()
            .map_err(|e| format!("failed to build partner http client: {e}"))?;
        if config.relaxed_tls {
            warn!(base_url = %config.base_url, "partner certificate checks relaxed");
        }
        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    async fn call(
        &self,
        policy: &RetryPolicy,
        label: &str,
        method: Method,
        path: &str,
        body: &Value,
        with_tenant: bool,
    ) -> Result<(StatusCode, Value), FlowError> {
        execute_with_retry(policy, label, || {
            self.send_once(method.clone(), path, body, with_tenant)
        })
        .await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        with_tenant: bool,
    ) -> Result<(StatusCode, Value), FlowError> {
        let token = self.tokens.valid_token().await?;
        let mut request = self
            .http
            .request(method, format!("{}{}", self.config.base_url, path))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(body);
        if with_tenant {
            request = request.header("tenant-id", &self.config.tenant_id);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FlowError::Transport(format!("partner request failed: {e}")))?;
        let status = resp.status();
        let retry_after = parse_retry_after(resp.headers());
        let text = resp
            .text()
            .await
            .map_err(|e| FlowError::Transport(format!("failed to read partner response: {e}")))?;
        let payload = parse_body(&text);

        if status.is_success() {
            return Ok((status, payload));
        }
        Err(failure_from_response(status, payload, retry_after))
    }
}

#[async_trait]
impl PartnerApi for PresencaBankClient {
    async fn generate_consent_document(
        &self,
        req: &ConsentRequest,
    ) -> Result<ConsentDocument, FlowError> {
        let phone = normalize_phone(&req.phone)?;
        let body = json!({
            "cpf": req.subject_id,
            "nome": req.name,
            "telefone": phone,
            "produtoId": req.product_id,
        });
        let label = format!("consent:{}", req.subject_id);
        let (_, payload) = self
            .call(&self.config.retry, &label, Method::POST, CONSENT_PATH, &body, false)
            .await
            .map_err(|err| match err {
                FlowError::Partner(failure) if is_phone_already_registered(&failure) => {
                    FlowError::PhoneAlreadyRegistered(failure)
                }
                other => other,
            })?;

        if payload.is_null() {
            return Err(FlowError::EmptyResponse("consent generation"));
        }
        let id = extract_document_id(&payload).ok_or(FlowError::NoDocumentId)?;
        info!(subject_id = %req.subject_id, document_id = %id, "consent document generated");
        Ok(ConsentDocument {
            id,
            short_url: first_string(&payload, &["shortUrl"]),
            url: first_string(&payload, &["url"]),
            subject_id: req.subject_id.clone(),
            name: req.name.clone(),
            phone_used: phone,
            raw: payload,
        })
    }

    async fn sign_consent_document(&self, document_id: &str) -> Result<Value, FlowError> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(FlowError::InvalidInput("document id is required".to_string()));
        }
        let path = format!("{CONSENT_PATH}/{document_id}");
        let label = format!("sign:{document_id}");
        let (status, payload) = self
            .call(
                &self.config.retry,
                &label,
                Method::PUT,
                &path,
                &device_fingerprint(),
                true,
            )
            .await?;
        if status != StatusCode::OK {
            return Err(FlowError::Partner(PartnerFailure::new(
                Some(status.as_u16()),
                format!("unexpected signing status {status}"),
                Some(payload),
            )));
        }
        info!(document_id, "consent document signed");
        if payload.is_null() {
            return Ok(json!({ "success": true, "termoId": document_id }));
        }
        Ok(payload)
    }

    async fn query_employment_links(
        &self,
        subject_id: &SubjectId,
        document_id: Option<&str>,
    ) -> Result<Vec<Value>, FlowError> {
        let mut body = json!({ "cpf": subject_id });
        if let Some(id) = document_id.filter(|id| !id.is_empty()) {
            body["termoId"] = json!(id);
            body["autorizacaoId"] = json!(id);
        }
        let label = format!("links:{subject_id}");
        let (_, payload) = self
            .call(&self.config.links_retry, &label, Method::POST, LINKS_PATH, &body, false)
            .await
            .map_err(|err| match err {
                FlowError::Partner(failure) if is_document_not_signed(&failure) => {
                    FlowError::DocumentNotSigned {
                        document_id: document_id.map(ToOwned::to_owned),
                        failure,
                    }
                }
                other => other,
            })?;
        let links = extract_links(&payload);
        info!(subject_id = %subject_id, links = links.len(), "employment links queried");
        Ok(links)
    }

    async fn query_margin(&self, query: &MarginQuery) -> Result<MarginQuote, FlowError> {
        let registration = query.registration.trim();
        if registration.is_empty() {
            return Err(FlowError::InvalidInput("registration is required".to_string()));
        }
        let raw_employer = digits_only(&query.employer_id);
        if raw_employer.is_empty() {
            return Err(FlowError::InvalidInput("employer id is required".to_string()));
        }
        let employer_id = normalize_employer_id(&raw_employer);
        if raw_employer.len() != EMPLOYER_ID_LEN {
            warn!(
                subject_id = %query.subject_id,
                original = %raw_employer,
                normalized = %employer_id,
                "employer id length adjusted"
            );
        }
        let body = json!({
            "cpf": query.subject_id,
            "matricula": registration,
            "cnpj": employer_id,
        });
        let label = format!("margin:{}", query.subject_id);
        let (_, payload) = self
            .call(&self.config.retry, &label, Method::POST, MARGIN_PATH, &body, false)
            .await?;
        let raw = extract_margin(&payload)?;
        let amount = first_number(&raw, MARGIN_AMOUNT_KEYS);
        info!(subject_id = %query.subject_id, amount = ?amount, "margin queried");
        Ok(MarginQuote { amount, raw })
    }

    async fn query_available_tables(&self, query: &TablesQuery) -> Result<Value, FlowError> {
        let body = tables_payload(query, self.config.product_id)?;
        let label = format!("tables:{}", query.subject_id);
        let (_, payload) = self
            .call(&self.config.retry, &label, Method::POST, TABLES_PATH, &body, false)
            .await?;
        let empty = match &payload {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return Err(FlowError::EmptyResponse("available tables"));
        }
        info!(subject_id = %query.subject_id, "available tables queried");
        Ok(payload)
    }
}

/// Borrower + proposal envelope of the tables endpoint.
pub fn tables_payload(query: &TablesQuery, default_product_id: u32) -> Result<Value, FlowError> {
    let profile = &query.profile;
    let phone = split_phone(&normalize_phone(&profile.phone)?);
    let product_id = if profile.product_id == 0 {
        default_product_id
    } else {
        profile.product_id
    };
    Ok(json!({
        "tomador": {
            "telefone": phone,
            "cpf": query.subject_id,
            "nome": profile.name,
            "dataNascimento": profile.birth_date.clone().unwrap_or_else(|| "1990-01-01".to_string()),
            "nomeMae": profile.mother_name.clone().unwrap_or_default(),
            "email": profile
                .email
                .clone()
                .unwrap_or_else(|| format!("{}@gmail.com", query.subject_id)),
            "sexo": profile.sex.clone().unwrap_or_else(|| "M".to_string()),
            "vinculoEmpregaticio": EmploymentBinding::from(&query.employment),
            "dadosBancarios": object_or_empty(&profile.bank_details),
            "endereco": object_or_empty(&profile.address),
        },
        "proposta": {
            "valorSolicitado": profile.requested_amount,
            "quantidadeParcelas": profile.installments,
            "produtoId": product_id,
            "valorParcela": profile.installment_value,
        },
        "documentos": [],
    }))
}

fn object_or_empty(value: &Value) -> Value {
    if value.is_null() { json!({}) } else { value.clone() }
}

fn device_fingerprint() -> Value {
    json!({
        "userAgent": "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "deviceType": "web",
        "operationalSystem": "Windows",
        "deviceName": "Chrome",
        "deviceModel": "Desktop",
        "geoLocation": {
            "latitude": "-23.5505",
            "longitude": "-46.6333",
        },
    })
}

pub fn failure_from_response(
    status: StatusCode,
    body: Value,
    retry_after: Option<Duration>,
) -> FlowError {
    let message = if body.is_null() {
        format!("partner returned {status}")
    } else {
        extract_partner_message(&body)
    };
    let body = (!body.is_null()).then_some(body);
    let mut failure = PartnerFailure::new(Some(status.as_u16()), message, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        failure.retry_after = retry_after;
        return FlowError::RateLimited(failure);
    }
    FlowError::Partner(failure)
}

/// Retry-After in whole seconds; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn profile() -> SubjectProfile {
        SubjectProfile {
            name: "Maria Silva".to_string(),
            phone: "(11) 98765-4321".to_string(),
            email: None,
            birth_date: None,
            mother_name: Some("Ana Silva".to_string()),
            sex: None,
            address: Value::Null,
            bank_details: json!({"banco": "001"}),
            product_id: 0,
            requested_amount: 0.0,
            installments: 36,
            installment_value: 0.0,
        }
    }

    #[test]
    fn rate_limit_status_carries_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = failure_from_response(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"message": "Too many requests"}),
            parse_retry_after(&headers),
        );
        match err {
            FlowError::RateLimited(failure) => {
                assert_eq!(failure.retry_after, Some(Duration::from_secs(7)));
                assert_eq!(failure.message, "Too many requests");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_statuses_become_partner_errors_with_extracted_message() {
        let err = failure_from_response(
            StatusCode::BAD_REQUEST,
            json!({"errors": ["Telefone já utilizado"]}),
            None,
        );
        match err {
            FlowError::Partner(failure) => {
                assert_eq!(failure.status, Some(400));
                assert_eq!(failure.message, "Telefone já utilizado");
                assert!(is_phone_already_registered(&failure));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = failure_from_response(StatusCode::BAD_GATEWAY, Value::Null, None);
        assert!(matches!(err, FlowError::Partner(ref f) if f.body.is_none()));
    }

    #[test]
    fn body_parsing_tolerates_plain_text() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"id\":1}"), json!({"id": 1}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn tables_payload_fills_defaults() {
        let query = TablesQuery {
            subject_id: SubjectId::parse("16183805831").expect("id"),
            profile: profile(),
            employment: EmploymentLink {
                employer_id: "12345678000199".to_string(),
                registration: "98765".to_string(),
            },
        };
        let body = tables_payload(&query, 28).expect("payload");
        let tomador = &body["tomador"];
        assert_eq!(tomador["telefone"], json!({"ddd": "11", "numero": "987654321"}));
        assert_eq!(tomador["dataNascimento"], "1990-01-01");
        assert_eq!(tomador["email"], "16183805831@gmail.com");
        assert_eq!(tomador["sexo"], "M");
        assert_eq!(tomador["endereco"], json!({}));
        assert_eq!(
            tomador["vinculoEmpregaticio"],
            json!({"cnpjEmpregador": "12345678000199", "registroEmpregaticio": "98765"})
        );
        assert_eq!(body["proposta"]["produtoId"], 28);
        assert_eq!(body["documentos"], json!([]));
    }
}
