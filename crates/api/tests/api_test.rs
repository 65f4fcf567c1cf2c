use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use shiftfill_api::{create_app, AppState};
use shiftfill_dispatcher::{Collaborators, DispatchContext, DispatchService};
use shiftfill_domain::{CallOutcome, ReplyBody};
use shiftfill_infrastructure::InboundReplyBus;
use shiftfill_testing_utils::{
    test_config, MockEscalationNotifier, MockIntentClassifier, MockOutreachGateway,
    MockSchedulingSystem, ShiftGapBuilder,
};

struct TestApp {
    app: Router,
    service: Arc<DispatchService>,
    replies: InboundReplyBus,
}

fn test_app() -> TestApp {
    let ctx = DispatchContext::new(
        test_config(),
        Collaborators {
            scheduling: Arc::new(MockSchedulingSystem::with_pool(vec![])),
            gateway: Arc::new(MockOutreachGateway::new()),
            classifier: Arc::new(MockIntentClassifier::new()),
            notifier: Arc::new(MockEscalationNotifier::new()),
        },
    );
    let service = Arc::new(DispatchService::new(ctx));
    let replies = InboundReplyBus::new(16);
    let app = create_app(AppState {
        service: service.clone(),
        replies: replies.clone(),
    });
    TestApp {
        app,
        service,
        replies,
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = test_app();
    let (status, body) = call(&t.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_gaps"], 0);
}

#[tokio::test]
async fn test_open_and_fetch_gap() {
    let t = test_app();
    let gap = ShiftGapBuilder::new("gap-1").build();

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/gaps",
        Some(serde_json::to_value(&gap).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["gap_id"], "gap-1");

    let (status, body) = call(&t.app, "GET", "/api/gaps/gap-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["gap_id"], "gap-1");

    let (status, body) = call(&t.app, "GET", "/api/gaps", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = call(&t.app, "GET", "/api/gaps?status=filled", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    // 重复提交同一班次
    let (status, body) = call(
        &t.app,
        "POST",
        "/api/gaps",
        Some(serde_json::to_value(&gap).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "CONFLICT");
}

#[tokio::test]
async fn test_open_gap_validation() {
    let t = test_app();
    let now = chrono::Utc::now();

    let inverted = ShiftGapBuilder::new("gap-bad")
        .with_window(now + chrono::Duration::hours(5), now + chrono::Duration::hours(4))
        .build();
    let (status, _) = call(
        &t.app,
        "POST",
        "/api/gaps",
        Some(serde_json::to_value(&inverted).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let started = ShiftGapBuilder::new("gap-started")
        .starting_in(chrono::Duration::minutes(-30))
        .build();
    let (status, _) = call(
        &t.app,
        "POST",
        "/api/gaps",
        Some(serde_json::to_value(&started).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.service.active_count().await, 0);
}

#[tokio::test]
async fn test_unknown_gap_is_404() {
    let t = test_app();
    let (status, _) = call(&t.app, "GET", "/api/gaps/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&t.app, "POST", "/api/gaps/nope/resolve", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "GAP_NOT_FOUND");
}

#[tokio::test]
async fn test_resolve_tracked_gap() {
    let t = test_app();
    let gap = ShiftGapBuilder::new("gap-1").build();
    t.service.open_gap(gap).await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/gaps/gap-1/resolve",
        Some(json!({ "reason": "covered by office" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["message"], "covered by office");
}

#[tokio::test]
async fn test_sms_webhook_publishes_reply() {
    let t = test_app();
    let mut inbound = t.replies.subscribe();

    let (status, body) = call(
        &t.app,
        "POST",
        "/webhooks/sms",
        Some(json!({ "id": "sm-1", "from": "+15550001", "text": "YES" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscribers"], 1);

    let reply = inbound.next().await.unwrap();
    assert_eq!(reply.id, "sm-1");
    assert_eq!(reply.contact, "+15550001");
    assert_eq!(
        reply.body,
        ReplyBody::Text {
            text: "YES".to_string()
        }
    );
}

#[tokio::test]
async fn test_voice_webhook_publishes_outcome() {
    let t = test_app();
    let mut inbound = t.replies.subscribe();

    let (status, _) = call(
        &t.app,
        "POST",
        "/webhooks/voice",
        Some(json!({
            "id": "call-1",
            "from": "+15550002",
            "outcome": "declined",
            "received_at": "2026-03-01T08:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let reply = inbound.next().await.unwrap();
    assert_eq!(
        reply.body,
        ReplyBody::CallOutcome {
            outcome: CallOutcome::Declined
        }
    );
    assert_eq!(reply.received_at.to_rfc3339(), "2026-03-01T08:00:00+00:00");
}

#[tokio::test]
async fn test_webhook_without_id_is_rejected() {
    let t = test_app();
    let (status, _) = call(
        &t.app,
        "POST",
        "/webhooks/sms",
        Some(json!({ "id": " ", "from": "+15550001", "text": "yes" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
