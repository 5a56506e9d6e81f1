use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use relay_hub::admin::router;
use relay_hub::{Hub, Logger};

async fn call(hub: &Arc<Hub>, method: &str, uri: &str, body: &str) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(Arc::clone(hub), Logger::default())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

#[tokio::test]
async fn broadcast_endpoint_fans_out_trimmed_text() {
    let hub = Arc::new(Hub::new(4, 2, Logger::default()));
    let conn = hub.register("10.0.0.1:4000", CancellationToken::new()).unwrap();

    let (status, body) = call(&hub, "POST", "/broadcast", "  maintenance at noon \n").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["broadcasted"], "maintenance at noon");
    assert_eq!(
        conn.mailbox().try_dequeue(),
        Some(Bytes::from("maintenance at noon"))
    );
    assert_eq!(hub.metrics().msgs_out, 1);
}

#[tokio::test]
async fn broadcast_endpoint_rejects_bad_requests() {
    let hub = Arc::new(Hub::new(4, 2, Logger::default()));

    let (status, _) = call(&hub, "POST", "/broadcast", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&hub, "GET", "/broadcast", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(hub.metrics().msgs_out, 0);
}

#[tokio::test]
async fn clients_and_metrics_report_hub_state() {
    let hub = Arc::new(Hub::new(3, 1, Logger::default()));
    let a = hub.register("10.0.0.1:1", CancellationToken::new()).unwrap();
    let b = hub.register("10.0.0.2:2", CancellationToken::new()).unwrap();
    hub.broadcast("one");
    hub.broadcast("two");

    let (status, body) = call(&hub, "GET", "/clients", "").await;
    assert_eq!(status, StatusCode::OK);
    let clients: Value = serde_json::from_slice(&body).unwrap();
    let clients = clients.as_array().unwrap();
    assert_eq!(clients.len(), 2);
    assert_eq!(clients[0]["id"], a.id());
    assert_eq!(clients[1]["id"], b.id());
    assert_eq!(clients[1]["remote_addr"], "10.0.0.2:2");
    let since = clients[0]["connected_since"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(since).is_ok());

    let (status, body) = call(&hub, "GET", "/metrics", "").await;
    assert_eq!(status, StatusCode::OK);
    let metrics: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["clients"], 2);
    assert_eq!(metrics["max_clients"], 3);
    assert_eq!(metrics["msgs_out"], 2);
    assert_eq!(metrics["bytes_out"], 8);
    assert_eq!(metrics["drops"], 2);
}
