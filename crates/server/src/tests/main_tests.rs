use super::*;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lifecycle::{
    DispatchError, DispatchReport, NotificationDispatcher, RecipientOutcome, RecipientResult,
    ResponsePayload,
};
use notifier::WebhookConfig;
use serde_json::{json, Value};
use shared::domain::{OfficeId, UserId};
use tower::ServiceExt;

struct AcceptAll;

#[async_trait]
impl NotificationDispatcher for AcceptAll {
    async fn send(
        &self,
        recipients: &[String],
        _payload: &ResponsePayload,
    ) -> Result<DispatchReport, DispatchError> {
        Ok(DispatchReport::new(
            recipients
                .iter()
                .map(|recipient| RecipientResult {
                    recipient: recipient.clone(),
                    outcome: RecipientOutcome::Delivered,
                })
                .collect(),
        ))
    }
}

fn auth_config() -> auth::AuthConfig {
    auth::AuthConfig {
        jwt_secret: "test-secret".into(),
        ttl_seconds: 300,
    }
}

fn bearer(viewer: &Viewer) -> String {
    let token = auth::mint_viewer_token(&auth_config(), viewer).expect("token");
    format!("Bearer {token}")
}

fn admin() -> String {
    bearer(&Viewer::admin(UserId(1)))
}

fn office(id: i64) -> String {
    bearer(&Viewer::office(UserId(100 + id), OfficeId(id)))
}

async fn test_app_with(
    dispatcher: Arc<dyn NotificationDispatcher>,
) -> (Router, broadcast::Receiver<ServerEvent>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext {
        storage,
        dispatcher,
        auth: auth_config(),
    };
    let (events, events_rx) = broadcast::channel(32);
    (build_router(Arc::new(AppState { api, events })), events_rx)
}

async fn test_app() -> (Router, broadcast::Receiver<ServerEvent>) {
    test_app_with(Arc::new(AcceptAll)).await
}

async fn call(app: &Router, method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        request = request.header("authorization", auth);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register(app: &Router, protocol: &str, office_id: i64) -> i64 {
    let (status, body) = call(
        app,
        "POST",
        "/complaints",
        Some(&admin()),
        Some(json!({
            "protocol": protocol,
            "category": "Iluminação pública",
            "description": "Poste apagado na esquina",
            "neighborhood": "Vila Nova",
            "citizen_name": "Joana",
            "citizen_phone": "5511977776666",
            "office_id": office_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["complaint"]["id"].as_i64().expect("id")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn requests_without_valid_token_are_unauthorized() {
    let (app, _) = test_app().await;
    let (status, body) = call(&app, "GET", "/complaints", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = call(&app, "GET", "/complaints", Some("Bearer nonsense"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn intake_is_admin_only_and_published() {
    let (app, mut events) = test_app().await;
    let (status, body) = call(
        &app,
        "POST",
        "/complaints",
        Some(&office(1)),
        Some(json!({
            "protocol": "2025-0001",
            "category": "c",
            "description": "d",
            "citizen_name": "n",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let id = register(&app, "2025-0002", 1).await;
    match events.try_recv().expect("event") {
        ServerEvent::ComplaintInserted { complaint } => assert_eq!(complaint.id.0, id),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn office_scope_applies_to_reads() {
    let (app, _) = test_app().await;
    let mine = register(&app, "2025-0010", 1).await;
    let theirs = register(&app, "2025-0011", 2).await;

    let (status, body) = call(&app, "GET", "/complaints", Some(&office(1)), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body
        .as_array()
        .expect("list")
        .iter()
        .filter_map(|view| view["complaint"]["id"].as_i64())
        .collect();
    assert_eq!(ids, vec![mine]);

    let (status, _) = call(
        &app,
        "GET",
        &format!("/complaints/{theirs}"),
        Some(&office(1)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, "GET", "/complaints/999", Some(&admin()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        "GET",
        "/complaints?status=Pendente",
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("list").len(), 2);

    let (status, body) = call(&app, "GET", "/reports/summary", Some(&office(2)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn complaint_lifecycle_over_http() {
    let (app, _) = test_app().await;
    let id = register(&app, "2025-0020", 3).await;
    let auth = office(3);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/complaints/{id}/status"),
        Some(&auth),
        Some(json!({ "status": "Em andamento" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation");

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/complaints/{id}"),
        Some(&auth),
        Some(json!({
            "status": "Resolvido",
            "deadline": "2099-01-31",
            "resolution_description": "Lâmpada trocada",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation");

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/complaints/{id}"),
        Some(&auth),
        Some(json!({
            "status": "Resolvido",
            "deadline": "2099-01-31",
            "resolution_description": "Lâmpada trocada",
            "image": {
                "filename": "poste.png",
                "mime_type": "image/png",
                "data_b64": STANDARD.encode(b"png-bytes"),
            },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complaint"]["status"], "Resolvido");
    assert_eq!(body["complaint"]["resolved_on_time"], true);
    assert_eq!(body["affordances"]["locked"], true);
    assert_eq!(body["affordances"]["can_send_response"], true);
    let image_id = body["complaint"]["resolution_images"][0]["image_id"]
        .as_i64()
        .expect("image id");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/complaints/{id}/status"),
        Some(&auth),
        Some(json!({ "status": "Em andamento" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let request = Request::get(format!("/complaints/{id}/images/{image_id}"))
        .header("authorization", &auth)
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).expect("type"),
        "image/png"
    );

    let (status, body) = call(
        &app,
        "POST",
        &format!("/complaints/{id}/response"),
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivered"], json!(["5511977776666"]));

    let (status, body) = call(
        &app,
        "POST",
        &format!("/complaints/{id}/response"),
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn unconfigured_webhook_is_bad_gateway_and_keeps_flag_clear() {
    let dispatcher = WebhookDispatcher::new(WebhookConfig::default()).expect("dispatcher");
    let (app, _) = test_app_with(Arc::new(dispatcher)).await;
    let id = register(&app, "2025-0030", 1).await;

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/complaints/{id}"),
        Some(&admin()),
        Some(json!({
            "status": "Informações Insuficientes",
            "deadline": "2099-01-31",
            "resolution_description": "Falta o endereço completo",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/complaints/{id}/response"),
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "upstream");

    let (_, body) = call(&app, "GET", &format!("/complaints/{id}"), Some(&admin()), None).await;
    assert_eq!(body["complaint"]["response_sent"], false);
    assert_eq!(body["affordances"]["can_send_response"], true);
}

#[test]
fn feed_only_forwards_visible_complaints() {
    let complaint: shared::domain::Complaint = serde_json::from_value(json!({
        "id": 1,
        "protocol": "2025-0040",
        "category": "c",
        "description": "d",
        "citizen_name": "n",
        "office_id": 2,
        "status": "Pendente",
        "response_sent": false,
        "created_at": "2025-05-01T12:00:00Z",
        "updated_at": "2025-05-01T12:00:00Z",
    }))
    .expect("complaint");
    let event = ServerEvent::ComplaintUpdated { complaint };

    assert!(visible_to(&Viewer::admin(UserId(1)), &event));
    assert!(visible_to(&Viewer::office(UserId(2), OfficeId(2)), &event));
    assert!(!visible_to(&Viewer::office(UserId(3), OfficeId(7)), &event));
    assert!(visible_to(
        &Viewer::office(UserId(3), OfficeId(7)),
        &ServerEvent::Error(ApiError::new(ErrorCode::Conflict, "lagged"))
    ));
}
