mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use common::{FakeLeads, SUBJECT, harness, maria_lead, test_config};
use credit_flow_orchestrator::app::build_router;
use credit_flow_orchestrator::module::flow::model::MarginRecord;
use http::{Method, Request, StatusCode};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tower::util::ServiceExt;

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");
    let res = app.oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_service_and_cache() {
    let h = harness(test_config(), FakeLeads::default());

    let (status, body) = send(build_router(h.state.clone()), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "credit-flow-orchestrator");
    assert_eq!(body["cache"]["total_subjects"], 0);
    assert!(body["metrics"]["flows_started"].is_u64());
}

#[tokio::test]
async fn status_lookup_distinguishes_unknown_and_malformed_subjects() {
    let h = harness(test_config(), FakeLeads::default());

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        &format!("/v1/flows/{SUBJECT}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "FLOW_NOT_FOUND");

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        "/v1/flows/123/status",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_SUBJECT_ID");
}

#[tokio::test]
async fn second_start_for_a_running_subject_conflicts() {
    let h = harness(test_config(), FakeLeads::with_lead(SUBJECT, maria_lead()));
    h.state
        .cache
        .start_processing(SUBJECT, Map::new())
        .expect("start");

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows",
        Some(json!({"cpf": SUBJECT, "wait": true})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "FLOW_IN_PROGRESS");
    assert_eq!(body["accepted"], false);
    assert!(h.partner.consent_phones().is_empty());
}

#[tokio::test(start_paused = true)]
async fn waiting_start_returns_the_flow_result() {
    let h = harness(test_config(), FakeLeads::with_lead(SUBJECT, maria_lead()));

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows",
        Some(json!({"cpf": "161.838.058-31", "valorPersonalizado": 3000.0, "wait": true})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], true);
    assert_eq!(body["subject_id"], SUBJECT);
    assert_eq!(body["stage"], "done");
    assert_eq!(body["simulation"]["proposta"]["valorSolicitado"], 3000.0);
    assert_eq!(body.get("operacao"), Some(&Value::Null));

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        &format!("/v1/flows/{SUBJECT}/status"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processing"], false);
    assert_eq!(body["record"]["status"], "DONE");
}

#[tokio::test]
async fn waiting_start_reports_failures_as_unprocessable() {
    let h = harness(test_config(), FakeLeads::default());

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows",
        Some(json!({"cpf": SUBJECT, "wait": true})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["succeeded"], false);
    assert_eq!(body["error_code"], "LEAD_NOT_FOUND");
    assert_eq!(body["stage"], "resolve_subject");
}

#[tokio::test]
async fn background_start_is_accepted_and_marked_in_flight() {
    let h = harness(test_config(), FakeLeads::with_lead(SUBJECT, maria_lead()));

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows",
        Some(json!({"cpf": SUBJECT})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], true);
    assert!(body["run_id"].as_str().expect("run id").starts_with("run-"));
    assert!(
        h.state
            .cache
            .get_status(SUBJECT)
            .expect("valid")
            .is_some()
    );
}

#[tokio::test]
async fn margin_lookup_and_cache_clear() {
    let h = harness(test_config(), FakeLeads::default());

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        &format!("/v1/flows/{SUBJECT}/margin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "MARGIN_NOT_FOUND");

    h.state
        .cache
        .save_margin_data(
            SUBJECT,
            MarginRecord {
                document_id: "doc-1".to_string(),
                registration: "98765".to_string(),
                employer_id: "12345678000199".to_string(),
                document_signed: true,
                margin: None,
                updated_at: None,
            },
        )
        .expect("save");

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        &format!("/v1/flows/{SUBJECT}/margin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["margin_data"]["registration"], "98765");

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::DELETE,
        &format!("/v1/flows/{SUBJECT}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);
    assert!(h.state.cache.get_margin_data(SUBJECT).expect("valid").is_none());

    let (_, body) = send(
        build_router(h.state.clone()),
        Method::GET,
        "/v1/flows/cache/stats",
        None,
    )
    .await;
    assert_eq!(body["stats"]["margin_entries"], 0);
    assert_eq!(body["subjects"], json!([]));
}

#[tokio::test]
async fn document_phase_route_returns_generated_document() {
    let h = harness(test_config(), FakeLeads::with_lead(SUBJECT, maria_lead()));

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows/phases/document",
        Some(json!({"cpf": SUBJECT})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stage"], "document_generated");
    assert_eq!(body["result"]["document"]["id"], "doc-1");
}

#[tokio::test]
async fn simulation_phase_route_without_margin_is_rejected() {
    let h = harness(test_config(), FakeLeads::with_lead(SUBJECT, maria_lead()));

    let (status, body) = send(
        build_router(h.state.clone()),
        Method::POST,
        "/v1/flows/phases/simulation",
        Some(json!({"cpf": SUBJECT})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_INPUT");
}

#[tokio::test]
async fn webhook_requires_the_configured_token() {
    let mut config = test_config();
    config.webhook_token = Some("hook-secret".to_string());
    let h = harness(config, FakeLeads::default());
    let payload = json!({"event": "operacao_aprovada", "operacaoId": "op-1"}).to_string();

    let unsigned = Request::builder()
        .method(Method::POST)
        .uri("/v1/webhooks/partner")
        .header("content-type", "application/json")
        .body(Body::from(payload.clone()))
        .expect("request");
    let res = build_router(h.state.clone())
        .oneshot(unsigned)
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut hasher = Sha256::new();
    hasher.update(b"hook-secret:");
    hasher.update(payload.as_bytes());
    let signed = Request::builder()
        .method(Method::POST)
        .uri("/v1/webhooks/partner")
        .header("content-type", "application/json")
        .header("x-webhook-signature", hex::encode(hasher.finalize()))
        .body(Body::from(payload))
        .expect("request");
    let res = build_router(h.state.clone())
        .oneshot(signed)
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["received"], true);
    assert_eq!(body["operation_id"], "op-1");
}

#[tokio::test]
async fn webhook_rejects_malformed_payload() {
    let h = harness(test_config(), FakeLeads::default());

    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/webhooks/partner")
        .body(Body::from("not json"))
        .expect("request");
    let res = build_router(h.state.clone())
        .oneshot(req)
        .await
        .expect("response");

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
