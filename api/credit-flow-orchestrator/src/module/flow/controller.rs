use super::error::AppError;
use super::schema::{
    CacheStatsResponse, ClearCacheResponse, FlowStage, FlowStatusResponse, HealthMetricsView,
    HealthResponse, MarginDataResponse, MarginPhaseRequest, PhaseResponse, SignaturePhaseRequest,
    StartFlowRequest, StartFlowResponse, SubjectPhaseRequest,
};
use crate::app::AppState;
use crate::errors::FlowError;
use crate::service::flow_service;
use crate::service::metrics_service;
use crate::service::subject_service::SubjectId;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use tracing::{error, info};
use uuid::Uuid;

pub async fn start_flow(
    State(state): State<AppState>,
    Json(req): Json<StartFlowRequest>,
) -> Response {
    let subject_id = match SubjectId::parse(&req.cpf) {
        Ok(id) => id,
        Err(e) => return error_start(AppError::from(e), req.cpf.trim()).into_response(),
    };
    match state.cache.is_processing(subject_id.as_str()) {
        Ok(false) => {}
        Ok(true) => {
            return error_start(
                AppError::conflict("FLOW_IN_PROGRESS", "a flow is already running for this subject"),
                subject_id.as_str(),
            )
            .into_response();
        }
        Err(e) => return error_start(AppError::from(e), subject_id.as_str()).into_response(),
    }

    let run_id = format!("run-{}", Uuid::new_v4());
    if req.wait {
        let result = flow_service::run_flow(&state, &req, &run_id).await;
        let status = if result.succeeded {
            StatusCode::OK
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        return (status, Json(result)).into_response();
    }

    let mut initial = Map::new();
    initial.insert("run_id".to_string(), json!(run_id));
    if let Err(e) = state.cache.start_processing(subject_id.as_str(), initial) {
        return error_start(AppError::from(e), subject_id.as_str()).into_response();
    }
    let worker_state = state.clone();
    let worker_run_id = run_id.clone();
    tokio::spawn(async move {
        let result = flow_service::run_flow(&worker_state, &req, &worker_run_id).await;
        if !result.succeeded {
            info!(
                run_id = %worker_run_id,
                stage = result.stage.as_str(),
                "background flow ended with failure"
            );
        }
    });
    info!(subject_id = %subject_id, run_id = %run_id, "flow accepted");

    (
        StatusCode::ACCEPTED,
        Json(StartFlowResponse {
            accepted: true,
            subject_id: subject_id.to_string(),
            run_id,
            error_code: None,
            reason: "flow started".to_string(),
        }),
    )
        .into_response()
}

pub async fn get_flow_status(
    State(state): State<AppState>,
    Path(cpf): Path<String>,
) -> impl IntoResponse {
    let lookup = state.cache.get_status(&cpf).and_then(|record| {
        let processing = state.cache.is_processing(&cpf)?;
        Ok((record, processing))
    });
    match lookup {
        Ok((Some(record), processing)) => (
            StatusCode::OK,
            Json(FlowStatusResponse {
                found: true,
                processing,
                record: Some(record),
                error_code: None,
                reason: "status available".to_string(),
            }),
        ),
        Ok((None, _)) => error_status(AppError::not_found(
            "FLOW_NOT_FOUND",
            "no flow recorded for this subject",
        )),
        Err(e) => error_status(AppError::from(e)),
    }
}

pub async fn get_margin_data(
    State(state): State<AppState>,
    Path(cpf): Path<String>,
) -> impl IntoResponse {
    match state.cache.get_margin_data(&cpf) {
        Ok(Some(data)) => (
            StatusCode::OK,
            Json(MarginDataResponse {
                found: true,
                margin_data: Some(data),
                error_code: None,
                reason: "margin data available".to_string(),
            }),
        ),
        Ok(None) => error_margin(AppError::not_found(
            "MARGIN_NOT_FOUND",
            "no margin data recorded for this subject",
        )),
        Err(e) => error_margin(AppError::from(e)),
    }
}

pub async fn clear_flow(
    State(state): State<AppState>,
    Path(cpf): Path<String>,
) -> impl IntoResponse {
    match state.cache.clear(&cpf) {
        Ok(cleared) => (
            StatusCode::OK,
            Json(ClearCacheResponse {
                cleared,
                subject_id: cpf.trim().to_string(),
                error_code: None,
                reason: if cleared {
                    "cache cleared".to_string()
                } else {
                    "nothing cached for this subject".to_string()
                },
            }),
        ),
        Err(e) => {
            let err = AppError::from(e);
            error!(error_code = err.code, reason = %err.message, "cache clear rejected");
            (
                err.status,
                Json(ClearCacheResponse {
                    cleared: false,
                    subject_id: cpf.trim().to_string(),
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

pub async fn get_cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(CacheStatsResponse {
            stats: state.cache.stats(),
            subjects: state.cache.list_subjects(),
        }),
    )
}

pub async fn run_document_phase(
    State(state): State<AppState>,
    Json(req): Json<SubjectPhaseRequest>,
) -> impl IntoResponse {
    let outcome = flow_service::run_document_phase(&state, &req.cpf).await;
    phase_response(&req.cpf, "document_generated", FlowStage::GenerateDocument, outcome)
}

pub async fn run_signature_phase(
    State(state): State<AppState>,
    Json(req): Json<SignaturePhaseRequest>,
) -> impl IntoResponse {
    let outcome = flow_service::run_signature_phase(&state, &req).await;
    phase_response(&req.cpf, "document_signed", FlowStage::DispatchSignature, outcome)
}

pub async fn run_margin_phase(
    State(state): State<AppState>,
    Json(req): Json<MarginPhaseRequest>,
) -> impl IntoResponse {
    let outcome = flow_service::run_margin_phase(&state, &req).await;
    phase_response(&req.cpf, "margin_queried", FlowStage::QueryMargin, outcome)
}

pub async fn run_simulation_phase(
    State(state): State<AppState>,
    Json(req): Json<SubjectPhaseRequest>,
) -> impl IntoResponse {
    let outcome = flow_service::run_simulation_phase(&state, &req.cpf).await;
    phase_response(&req.cpf, "simulation_ready", FlowStage::QueryTables, outcome)
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = metrics_service::snapshot();
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "credit-flow-orchestrator".to_string(),
            env: state.config.rust_env.clone(),
            partner_api_url: state.config.partner_api_url.clone(),
            demo_profile_enabled: state.config.demo_profile_enabled,
            cache: state.cache.stats(),
            metrics: HealthMetricsView {
                flows_started: metrics.flows_started,
                flows_succeeded: metrics.flows_succeeded,
                flows_failed: metrics.flows_failed,
                rate_limit_retries: metrics.rate_limit_retries,
                link_poll_attempts: metrics.link_poll_attempts,
                signature_jobs: metrics.signature_jobs,
                last_error_ts: metrics.last_error_ts,
            },
            reason: "service healthy".to_string(),
        }),
    )
}

fn phase_response(
    cpf: &str,
    done_stage: &str,
    failed_stage: FlowStage,
    outcome: Result<Value, FlowError>,
) -> (StatusCode, Json<PhaseResponse>) {
    let subject_id = SubjectId::parse(cpf)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| cpf.trim().to_string());
    match outcome {
        Ok(result) => {
            info!(subject_id = %subject_id, stage = done_stage, "flow phase completed");
            (
                StatusCode::OK,
                Json(PhaseResponse {
                    success: true,
                    subject_id,
                    stage: done_stage.to_string(),
                    result: Some(result),
                    error_code: None,
                    reason: "phase completed".to_string(),
                }),
            )
        }
        Err(e) => {
            let err = AppError::from(e);
            error!(
                subject_id = %subject_id,
                stage = failed_stage.as_str(),
                error_code = err.code,
                reason = %err.message,
                "flow phase failed"
            );
            (
                err.status,
                Json(PhaseResponse {
                    success: false,
                    subject_id,
                    stage: failed_stage.as_str().to_string(),
                    result: None,
                    error_code: Some(err.code.to_string()),
                    reason: err.message,
                }),
            )
        }
    }
}

fn error_start(err: AppError, subject_id: &str) -> (StatusCode, Json<StartFlowResponse>) {
    error!(error_code = err.code, reason = %err.message, "flow start rejected");
    (
        err.status,
        Json(StartFlowResponse {
            accepted: false,
            subject_id: subject_id.to_string(),
            run_id: String::new(),
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_status(err: AppError) -> (StatusCode, Json<FlowStatusResponse>) {
    error!(error_code = err.code, reason = %err.message, "flow status lookup failed");
    (
        err.status,
        Json(FlowStatusResponse {
            found: false,
            processing: false,
            record: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}

fn error_margin(err: AppError) -> (StatusCode, Json<MarginDataResponse>) {
    error!(error_code = err.code, reason = %err.message, "margin data lookup failed");
    (
        err.status,
        Json(MarginDataResponse {
            found: false,
            margin_data: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
