//! Credit-flow orchestration: subject resolution, consent document, signature,
//! employment link, margin, tables and the simulation payload.
//!
//! Step functions raise; `run_flow` and the phase entry points are the only
//! places that turn a failure into a recorded outcome.

use crate::app::AppState;
use crate::config::partner::SignatureConfig;
use crate::errors::FlowError;
use crate::module::flow::model::{
    ConsentDocument, EmploymentBinding, EmploymentLink, MarginQuote, MarginRecord, ProfileSource,
    Proposal, SimulationPayload, SubjectProfile,
};
use crate::module::flow::schema::{
    FLOW_ORIGIN, FlowResult, FlowStage, FlowStatus, MarginPhaseRequest, SignaturePhaseRequest,
    StartFlowRequest,
};
use crate::service::lead_service::{
    DEFAULT_BIRTH_DATE, DEFAULT_MOTHER_NAME, DEFAULT_SEX, placeholder_profile, profile_from_lead,
    validate_lead_fields,
};
use crate::service::link_service::normalize_link;
use crate::service::metrics_service;
use crate::service::partner_service::{ConsentRequest, MarginQuery, TablesQuery};
use crate::service::phone_service::{fallback_phone, normalize_phone};
use crate::service::response_shape_service::{first_table_id, table_count};
use crate::service::signature_queue_service::{SignatureJob, SignatureOptions, SignatureOutcome};
use crate::service::subject_service::SubjectId;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

macro_rules! fields {
    ($($key:literal => $value:expr),* $(,)?) => {{
        let mut map = Map::new();
        $(map.insert($key.to_string(), json!($value));)*
        map
    }};
}

/// Runs the whole pipeline for one subject. Never raises: every failure comes
/// back as a `FlowResult` with `succeeded == false` and the failing stage.
pub async fn run_flow(state: &AppState, req: &StartFlowRequest, run_id: &str) -> FlowResult {
    let subject_id = match SubjectId::parse(&req.cpf) {
        Ok(id) => id,
        Err(e) => {
            warn!(run_id, error = %e, "flow rejected before start");
            return FlowResult::failure(run_id, req.cpf.trim(), FlowStage::ResolveSubject, &e);
        }
    };

    metrics_service::inc_flows_started();
    let initial = fields! { "run_id" => run_id, "origin" => FLOW_ORIGIN };
    if let Err(e) = state.cache.start_processing(subject_id.as_str(), initial) {
        return FlowResult::failure(run_id, subject_id.as_str(), FlowStage::ResolveSubject, &e);
    }
    info!(subject_id = %subject_id, run_id, "flow started");

    let mut stage = FlowStage::ResolveSubject;
    match execute(state, &subject_id, req, run_id, &mut stage).await {
        Ok(result) => {
            metrics_service::inc_flows_succeeded();
            let snapshot = serde_json::to_value(&result).unwrap_or(Value::Null);
            if let Err(e) = state.cache.finish(subject_id.as_str(), snapshot) {
                warn!(subject_id = %subject_id, error = %e, "failed to record flow result");
            }
            info!(subject_id = %subject_id, run_id, "flow finished");
            result
        }
        Err(e) => {
            metrics_service::inc_flows_failed();
            error!(
                subject_id = %subject_id,
                run_id,
                stage = stage.as_str(),
                error_code = e.code(),
                reason = %e,
                "flow failed"
            );
            if let Err(cache_err) =
                state
                    .cache
                    .mark_error(subject_id.as_str(), &e.to_string(), stage.as_str())
            {
                warn!(subject_id = %subject_id, error = %cache_err, "failed to record flow error");
            }
            FlowResult::failure(run_id, subject_id.as_str(), stage, &e)
        }
    }
}

async fn execute(
    state: &AppState,
    subject_id: &SubjectId,
    req: &StartFlowRequest,
    run_id: &str,
    stage: &mut FlowStage,
) -> Result<FlowResult, FlowError> {
    enter(state, subject_id, stage, FlowStage::ResolveSubject, Map::new())?;
    let (mut profile, source) =
        resolve_subject(state, subject_id, req.requested_amount, req.installments).await?;

    enter(
        state,
        subject_id,
        stage,
        FlowStage::GenerateDocument,
        fields! { "profile_source" => source, "name" => profile.name },
    )?;
    let document = generate_document(state, subject_id, &mut profile).await?;

    enter(
        state,
        subject_id,
        stage,
        FlowStage::DispatchSignature,
        document_fields(&document),
    )?;
    let outcome = dispatch_signature(
        state,
        subject_id,
        document.signing_url(),
        Some(document.id.as_str()),
    )
    .await?;
    let signed = outcome.as_ref().is_some_and(|o| o.success);

    enter(
        state,
        subject_id,
        stage,
        FlowStage::QueryLinks,
        fields! { "document_signed" => signed },
    )?;
    let links = poll_employment_links(state, subject_id, Some(document.id.as_str())).await?;

    enter(
        state,
        subject_id,
        stage,
        FlowStage::NormalizeLink,
        fields! { "links_found" => links.len() },
    )?;
    let employment = select_link(&links)?;

    enter(
        state,
        subject_id,
        stage,
        FlowStage::QueryMargin,
        fields! {
            "registration" => employment.registration,
            "employer_id" => employment.employer_id,
        },
    )?;
    let margin = query_margin(state, subject_id, &employment).await?;
    state.cache.save_margin_data(
        subject_id.as_str(),
        MarginRecord {
            document_id: document.id.clone(),
            registration: employment.registration.clone(),
            employer_id: employment.employer_id.clone(),
            document_signed: signed,
            margin: Some(margin.clone()),
            updated_at: None,
        },
    )?;

    enter(state, subject_id, stage, FlowStage::QueryTables, Map::new())?;
    let tables = query_tables(state, subject_id, &profile, &employment).await?;

    enter(
        state,
        subject_id,
        stage,
        FlowStage::AssembleSimulation,
        fields! {
            "tables_count" => table_count(&tables),
            "table_id" => first_table_id(&tables),
        },
    )?;
    let simulation = assemble_simulation(subject_id, &profile, &employment, &tables)?;

    *stage = FlowStage::Done;
    state.approved.save(subject_id, profile.clone());

    Ok(FlowResult {
        succeeded: true,
        origin: FLOW_ORIGIN.to_string(),
        run_id: run_id.to_string(),
        subject_id: subject_id.to_string(),
        stage: FlowStage::Done,
        error: None,
        error_code: None,
        missing_fields: Vec::new(),
        document: Some(document),
        employment_links: links,
        employment: Some(employment),
        margin: Some(margin),
        tables: Some(tables),
        simulation: Some(simulation),
        operation: None,
        profile: Some(profile),
        profile_source: Some(source),
        timestamp: Utc::now().to_rfc3339(),
    })
}

fn enter(
    state: &AppState,
    subject_id: &SubjectId,
    stage: &mut FlowStage,
    next: FlowStage,
    fields: Map<String, Value>,
) -> Result<(), FlowError> {
    *stage = next;
    state
        .cache
        .update_status(subject_id.as_str(), FlowStatus::Processing, next.as_str(), fields)?;
    Ok(())
}

fn document_fields(document: &ConsentDocument) -> Map<String, Value> {
    fields! {
        "document_id" => document.id,
        "short_url" => document.short_url,
        "url" => document.url,
    }
}

/// Lead source first, then a previously approved simulation, then (demo mode
/// only) a placeholder profile.
pub async fn resolve_subject(
    state: &AppState,
    subject_id: &SubjectId,
    requested_amount: Option<f64>,
    installments: Option<u32>,
) -> Result<(SubjectProfile, ProfileSource), FlowError> {
    let config = &state.config;
    let amount = requested_amount.unwrap_or(0.0);
    let term = installments.unwrap_or(config.default_installments);

    if let Some(lead) = state.infra.leads.find_lead(subject_id).await? {
        let detail = state
            .infra
            .leads
            .find_lead_by_id(&lead.id)
            .await?
            .ok_or_else(|| {
                FlowError::LeadNotFound(format!("{subject_id} (lead {} has no detail)", lead.id))
            })?;
        let data = validate_lead_fields(&detail)?;
        info!(subject_id = %subject_id, lead_id = %lead.id, "subject resolved from lead");
        return Ok((
            profile_from_lead(data, config.partner_product_id, amount, term),
            ProfileSource::Lead,
        ));
    }

    if let Some(approved) = state.approved.find_approved_simulation(subject_id) {
        let mut profile = approved.profile;
        if let Some(amount) = requested_amount {
            profile.requested_amount = amount;
        }
        if let Some(term) = installments {
            profile.installments = term;
        }
        info!(subject_id = %subject_id, "subject resolved from approved simulation");
        return Ok((profile, ProfileSource::ApprovedSimulation));
    }

    if config.demo_profile_enabled {
        warn!(subject_id = %subject_id, "no lead found; using demo placeholder profile");
        return Ok((
            placeholder_profile(subject_id, config.partner_product_id, amount, term),
            ProfileSource::DemoPlaceholder,
        ));
    }

    Err(FlowError::LeadNotFound(subject_id.to_string()))
}

/// Generates the consent document with the profile's phone. A "phone already
/// registered" rejection is retried once with the fallback phone, which then
/// replaces the profile's phone.
pub async fn generate_document(
    state: &AppState,
    subject_id: &SubjectId,
    profile: &mut SubjectProfile,
) -> Result<ConsentDocument, FlowError> {
    let mut request = ConsentRequest {
        subject_id: subject_id.clone(),
        name: profile.name.clone(),
        phone: profile.phone.clone(),
        product_id: profile.product_id,
    };
    match state.infra.partner.generate_consent_document(&request).await {
        Ok(document) => Ok(document),
        Err(FlowError::PhoneAlreadyRegistered(failure)) => {
            let fallback = fallback_phone(subject_id);
            warn!(
                subject_id = %subject_id,
                reason = %failure,
                "phone rejected as already registered; retrying with fallback phone"
            );
            request.phone = fallback.clone();
            let document = state
                .infra
                .partner
                .generate_consent_document(&request)
                .await?;
            profile.phone = fallback;
            Ok(document)
        }
        Err(e) => Err(e),
    }
}

/// Hands the signing URL to the signature queue and waits for its outcome.
/// Returns `None` when there is nothing to sign.
pub async fn dispatch_signature(
    state: &AppState,
    subject_id: &SubjectId,
    sign_url: Option<&str>,
    document_id: Option<&str>,
) -> Result<Option<SignatureOutcome>, FlowError> {
    let Some(sign_url) = sign_url.filter(|u| !u.trim().is_empty()) else {
        warn!(subject_id = %subject_id, "consent document has no signing url; skipping signature");
        return Ok(None);
    };
    let job = SignatureJob {
        subject_id: subject_id.clone(),
        sign_url: sign_url.to_string(),
        document_id: document_id.map(ToOwned::to_owned),
        options: SignatureOptions::from_config(&SignatureConfig::from_app(&state.config)),
    };
    let outcome = state.infra.signatures.enqueue_signature(job).await?;
    if outcome.success {
        info!(subject_id = %subject_id, "consent document signed");
    } else {
        warn!(
            subject_id = %subject_id,
            reason = %outcome.message,
            "signature reported failure; continuing"
        );
    }
    Ok(Some(outcome))
}

/// Polls the link query with a fixed delay until a non-empty list comes back.
pub async fn poll_employment_links(
    state: &AppState,
    subject_id: &SubjectId,
    document_id: Option<&str>,
) -> Result<Vec<Value>, FlowError> {
    let attempts = state.config.link_poll_attempts.max(1);
    let delay = Duration::from_secs(state.config.link_poll_delay_seconds);
    let mut last_error = None;

    for attempt in 1..=attempts {
        metrics_service::inc_link_poll_attempts();
        match state
            .infra
            .partner
            .query_employment_links(subject_id, document_id)
            .await
        {
            Ok(links) if !links.is_empty() => {
                info!(subject_id = %subject_id, attempt, links = links.len(), "employment links found");
                return Ok(links);
            }
            Ok(_) => {
                info!(subject_id = %subject_id, attempt, attempts, "no employment links yet");
                last_error = None;
            }
            Err(e) => {
                warn!(subject_id = %subject_id, attempt, attempts, error = %e, "employment link query failed");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            sleep(delay).await;
        }
    }

    Err(match last_error {
        Some(e @ FlowError::DocumentNotSigned { .. }) => e,
        Some(e) => FlowError::LinksExhausted {
            attempts,
            last_error: e.to_string(),
        },
        None => FlowError::LinksExhausted {
            attempts,
            last_error: "no employment links returned".to_string(),
        },
    })
}

/// The first link is the one the flow works with.
pub fn select_link(links: &[Value]) -> Result<EmploymentLink, FlowError> {
    let first = links
        .first()
        .ok_or(FlowError::EmptyResponse("employment links"))?;
    normalize_link(first)
}

pub async fn query_margin(
    state: &AppState,
    subject_id: &SubjectId,
    employment: &EmploymentLink,
) -> Result<MarginQuote, FlowError> {
    state
        .infra
        .partner
        .query_margin(&MarginQuery {
            subject_id: subject_id.clone(),
            registration: employment.registration.clone(),
            employer_id: employment.employer_id.clone(),
        })
        .await
}

pub async fn query_tables(
    state: &AppState,
    subject_id: &SubjectId,
    profile: &SubjectProfile,
    employment: &EmploymentLink,
) -> Result<Value, FlowError> {
    state
        .infra
        .partner
        .query_available_tables(&TablesQuery {
            subject_id: subject_id.clone(),
            profile: profile.clone(),
            employment: employment.clone(),
        })
        .await
}

/// Simulation-ready payload for manual review. Nothing here submits it.
pub fn assemble_simulation(
    subject_id: &SubjectId,
    profile: &SubjectProfile,
    employment: &EmploymentLink,
    tables: &Value,
) -> Result<SimulationPayload, FlowError> {
    Ok(SimulationPayload {
        cpf: subject_id.clone(),
        nome: profile.name.clone(),
        telefone: normalize_phone(&profile.phone)?,
        data_nascimento: profile
            .birth_date
            .clone()
            .unwrap_or_else(|| DEFAULT_BIRTH_DATE.to_string()),
        nome_mae: profile
            .mother_name
            .clone()
            .unwrap_or_else(|| DEFAULT_MOTHER_NAME.to_string()),
        email: profile
            .email
            .clone()
            .unwrap_or_else(|| format!("{subject_id}@gmail.com")),
        sexo: profile.sex.clone().unwrap_or_else(|| DEFAULT_SEX.to_string()),
        vinculo_empregaticio: EmploymentBinding::from(employment),
        dados_bancarios: object_or_empty(&profile.bank_details),
        endereco: object_or_empty(&profile.address),
        proposta: Proposal {
            valor_solicitado: profile.requested_amount,
            quantidade_parcelas: profile.installments,
            produto_id: profile.product_id,
            valor_parcela: profile.installment_value,
            tabela_id: first_table_id(tables),
        },
    })
}

fn object_or_empty(value: &Value) -> Value {
    if value.is_null() { json!({}) } else { value.clone() }
}

// Phase entry points. Each one can be called on its own; state between phases
// travels through the status cache.

/// Phase 1: resolve the subject and generate the consent document.
pub async fn run_document_phase(state: &AppState, cpf: &str) -> Result<Value, FlowError> {
    let subject_id = SubjectId::parse(cpf)?;
    state
        .cache
        .start_processing(subject_id.as_str(), fields! { "origin" => FLOW_ORIGIN })?;
    let outcome = async {
        let (mut profile, source) = resolve_subject(state, &subject_id, None, None).await?;
        let document = generate_document(state, &subject_id, &mut profile).await?;
        let mut update = document_fields(&document);
        update.insert("profile".to_string(), json!(profile));
        update.insert("profile_source".to_string(), json!(source));
        update.insert("name".to_string(), json!(profile.name));
        state.cache.update_status(
            subject_id.as_str(),
            FlowStatus::Processing,
            "document_generated",
            update,
        )?;
        Ok::<Value, FlowError>(json!({
            "document": document,
            "profile_source": source,
        }))
    }
    .await;
    record_phase_failure(state, &subject_id, FlowStage::GenerateDocument, outcome)
}

/// Phase 2: sign the document generated in phase 1 (or the one given).
pub async fn run_signature_phase(
    state: &AppState,
    req: &SignaturePhaseRequest,
) -> Result<Value, FlowError> {
    let subject_id = SubjectId::parse(&req.cpf)?;
    let record = state.cache.get_status(subject_id.as_str())?;
    let document_id = req.document_id.clone().or_else(|| {
        record
            .as_ref()
            .and_then(|r| r.field_str("document_id").map(ToOwned::to_owned))
    });
    let sign_url = req.sign_url.clone().or_else(|| {
        record.as_ref().and_then(|r| {
            r.field_str("short_url")
                .or_else(|| r.field_str("url"))
                .map(ToOwned::to_owned)
        })
    });
    let Some(sign_url) = sign_url else {
        return Err(FlowError::InvalidInput(
            "no signing url; run the document phase first".to_string(),
        ));
    };

    let outcome = async {
        let outcome = dispatch_signature(
            state,
            &subject_id,
            Some(sign_url.as_str()),
            document_id.as_deref(),
        )
        .await?
        .unwrap_or(SignatureOutcome {
            success: false,
            message: "nothing to sign".to_string(),
        });
        state.cache.update_status(
            subject_id.as_str(),
            FlowStatus::Processing,
            "document_signed",
            fields! {
                "document_signed" => outcome.success,
                "signature_message" => outcome.message,
            },
        )?;
        Ok::<Value, FlowError>(json!(outcome))
    }
    .await;
    record_phase_failure(state, &subject_id, FlowStage::DispatchSignature, outcome)
}

/// Phase 3: one link query, link normalization and the margin query.
pub async fn run_margin_phase(
    state: &AppState,
    req: &MarginPhaseRequest,
) -> Result<Value, FlowError> {
    let subject_id = SubjectId::parse(&req.cpf)?;
    let record = state.cache.get_status(subject_id.as_str())?;
    let document_id = req.document_id.clone().or_else(|| {
        record
            .as_ref()
            .and_then(|r| r.field_str("document_id").map(ToOwned::to_owned))
    });
    let document_signed = record
        .as_ref()
        .and_then(|r| r.fields.get("document_signed"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let outcome = async {
        let links = state
            .infra
            .partner
            .query_employment_links(&subject_id, document_id.as_deref())
            .await?;
        let employment = select_link(&links)?;
        let margin = query_margin(state, &subject_id, &employment).await?;
        let data = MarginRecord {
            document_id: document_id.clone().unwrap_or_default(),
            registration: employment.registration.clone(),
            employer_id: employment.employer_id.clone(),
            document_signed,
            margin: Some(margin.clone()),
            updated_at: None,
        };
        state.cache.save_margin_data(subject_id.as_str(), data.clone())?;
        state.cache.update_status(
            subject_id.as_str(),
            FlowStatus::Processing,
            "margin_queried",
            fields! { "links_found" => links.len() },
        )?;
        Ok::<Value, FlowError>(json!({
            "employment": employment,
            "margin": margin,
            "margin_data": data,
        }))
    }
    .await;
    record_phase_failure(state, &subject_id, FlowStage::QueryMargin, outcome)
}

/// Phase 4: tables and the simulation payload. Needs the margin data of phase 3.
pub async fn run_simulation_phase(state: &AppState, cpf: &str) -> Result<Value, FlowError> {
    let subject_id = SubjectId::parse(cpf)?;
    let Some(margin_data) = state.cache.get_margin_data(subject_id.as_str())? else {
        return Err(FlowError::InvalidInput(
            "no margin data; run the margin phase first".to_string(),
        ));
    };
    let cached_profile = state
        .cache
        .get_status(subject_id.as_str())?
        .and_then(|r| r.fields.get("profile").cloned())
        .and_then(|p| serde_json::from_value::<SubjectProfile>(p).ok());

    let outcome = async {
        let profile = match cached_profile {
            Some(profile) => profile,
            None => resolve_subject(state, &subject_id, None, None).await?.0,
        };
        let employment = EmploymentLink {
            employer_id: margin_data.employer_id.clone(),
            registration: margin_data.registration.clone(),
        };
        let tables = query_tables(state, &subject_id, &profile, &employment).await?;
        let simulation = assemble_simulation(&subject_id, &profile, &employment, &tables)?;
        state.approved.save(&subject_id, profile);
        state.cache.update_status(
            subject_id.as_str(),
            FlowStatus::Done,
            "simulation_ready",
            fields! {
                "tables_count" => table_count(&tables),
                "table_id" => first_table_id(&tables),
                "simulation" => simulation,
            },
        )?;
        Ok::<Value, FlowError>(json!({
            "tables": tables,
            "simulation": simulation,
            "operacao": Value::Null,
        }))
    }
    .await;
    record_phase_failure(state, &subject_id, FlowStage::QueryTables, outcome)
}

fn record_phase_failure(
    state: &AppState,
    subject_id: &SubjectId,
    stage: FlowStage,
    outcome: Result<Value, FlowError>,
) -> Result<Value, FlowError> {
    if let Err(e) = &outcome {
        metrics_service::set_last_error_ts(Utc::now().timestamp());
        if let Err(cache_err) = state
            .cache
            .mark_error(subject_id.as_str(), &e.to_string(), stage.as_str())
        {
            warn!(subject_id = %subject_id, error = %cache_err, "failed to record phase error");
        }
    }
    outcome
}
