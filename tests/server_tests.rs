mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{NOW, config_in, line, open_storer};
use futures::StreamExt;
use logship::server::{AppState, create_router, serve};
use logship::{Broadcaster, PubSubConfig, StorerService};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::util::ServiceExt;

fn app_state(dir: &TempDir) -> Arc<AppState> {
    let (storer, _clock) = open_storer(config_in(dir.path()), NOW);
    let storer = StorerService::start(storer, Arc::new(Broadcaster::new(64)));
    Arc::new(AppState {
        storer,
        config: PubSubConfig::default(),
        history: None,
    })
}

async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
    create_router(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);

    let response = get(&state, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_pending_is_a_bare_array() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);

    assert_eq!(json_body(get(&state, "/pending").await).await, json!([]));

    state.storer.push_line(&line(NOW, "a")).unwrap();
    state.storer.push_line(&line(NOW + 1, "b")).unwrap();
    assert_eq!(
        json_body(get(&state, "/pending").await).await,
        json!([{"ms": NOW, "v": "a"}, {"ms": NOW + 1, "v": "b"}])
    );

    state.storer.flush().unwrap();
    assert_eq!(json_body(get(&state, "/pending").await).await, json!([]));
}

#[tokio::test]
async fn test_statusz_reports_stats() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);
    state.storer.push_line(&line(NOW, "a")).unwrap();
    state.storer.push_line("not json").unwrap();

    let response = get(&state, "/statusz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["stats"]["total_consumed"], json!(1));
    assert_eq!(body["stats"]["rejected"]["invalid_json"], json!(1));
    assert_eq!(body["subscribers"], json!(0));
}

#[tokio::test]
async fn test_stopped_storer_is_unavailable() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);
    state.storer.shutdown().unwrap();

    assert_eq!(
        get(&state, "/pending").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        get(&state, "/statusz").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    // Liveness does not depend on the storer.
    assert_eq!(get(&state, "/healthz").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_channel_streams_entry_events() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);
    state.storer.push_line(&line(NOW, "pending")).unwrap();

    let response = get(&state, "/pubsub/entries").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: entry"), "{text}");
    assert!(
        text.contains(&format!(r#"data: {{"entry":{{"ms":{NOW},"v":"pending"}}}}"#)),
        "{text}"
    );

    state.storer.push_line(&line(NOW + 1, "live")).unwrap();
    let second = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(second.to_vec()).unwrap();
    assert!(text.contains(r#""v":"live""#), "{text}");

    // Shutting the storer down ends the stream.
    state.storer.shutdown().unwrap();
    assert!(body.next().await.is_none());
}

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let dir = tempdir().unwrap();
    let state = app_state(&dir);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(serve(
        listener,
        state.clone(),
        state.storer.stopped(),
        Duration::from_millis(500),
    ));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");

    state.storer.shutdown().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
