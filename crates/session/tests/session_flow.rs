use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use genie_session::{QueryOptions, Session, SessionError, SessionState};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// In-process stand-in for the engine's HTTP API.
struct FakeEngine {
    calls: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
    config_code: AtomicI64,
    quit: Notify,
}

impl FakeEngine {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str, body: Option<Value>) {
        self.calls.lock().unwrap().push(call.to_string());
        if let Some(body) = body {
            self.bodies.lock().unwrap().push(body);
        }
    }
}

type Shared = State<Arc<FakeEngine>>;

async fn query(State(engine): Shared, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    engine.record("GET query", None);
    let q = params.get("q").cloned().unwrap_or_default();
    Json(json!({ "response": 200, "results": [{ "echo": q }] }))
}

async fn query_context(State(engine): Shared, Json(body): Json<Value>) -> Json<Value> {
    engine.record("POST queryContext", Some(body.clone()));
    Json(json!({
        "response": 200,
        "results": [{ "echo": body["q"] }],
        "dialog_state": "$dialogue @org.thingpedia.dialogue.transaction.execute;",
    }))
}

async fn set_num_results(State(engine): Shared, Json(body): Json<Value>) -> Json<Value> {
    engine.record("POST setNumResults", Some(body));
    Json(json!({ "response": engine.config_code.load(Ordering::SeqCst) }))
}

async fn neglect_filters(State(engine): Shared, Json(body): Json<Value>) -> Json<Value> {
    engine.record("POST neglectFilters", Some(body));
    Json(json!({ "response": 200 }))
}

async fn neglect_projections(State(engine): Shared, Json(body): Json<Value>) -> Json<Value> {
    engine.record("POST neglectProjections", Some(body));
    Json(json!({ "response": 200 }))
}

async fn direct_sentence_state(State(engine): Shared, Json(body): Json<Value>) -> Json<Value> {
    engine.record("POST toggleDirectSentenceState", Some(body));
    Json(json!({ "response": 200 }))
}

async fn clean(State(engine): Shared) -> Json<Value> {
    engine.record("POST clean", None);
    Json(json!({ "response": 200 }))
}

async fn quit(State(engine): Shared) -> Json<Value> {
    engine.record("POST quit", None);
    engine.quit.notify_one();
    Json(json!({ "response": 200 }))
}

async fn start_fake_engine() -> (Arc<FakeEngine>, String, JoinHandle<()>) {
    let engine = Arc::new(FakeEngine {
        calls: Mutex::new(Vec::new()),
        bodies: Mutex::new(Vec::new()),
        config_code: AtomicI64::new(200),
        quit: Notify::new(),
    });
    let app = Router::new()
        .route("/query", get(query))
        .route("/queryContext", post(query_context))
        .route("/setNumResults", post(set_num_results))
        .route("/neglectFilters", post(neglect_filters))
        .route("/neglectProjections", post(neglect_projections))
        .route("/toggleDirectSentenceState", post(direct_sentence_state))
        .route("/clean", post(clean))
        .route("/quit", post(quit))
        .with_state(Arc::clone(&engine));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::clone(&engine);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.quit.notified().await })
            .await
            .unwrap();
    });
    (engine, format!("http://{addr}"), server)
}

fn session(base_url: &str) -> Session {
    // No pooled connections, so a stopped engine is observed immediately.
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    Session::with_client(base_url, client).unwrap()
}

#[tokio::test]
async fn changed_num_results_is_pushed_once() {
    let (engine, url, _server) = start_fake_engine().await;
    let mut session = session(&url);
    let options = QueryOptions {
        num_results: Some(3),
        ..QueryOptions::default()
    };

    session.query("show me a restaurant", options.clone()).await.unwrap();
    assert_eq!(engine.calls(), vec!["POST setNumResults", "POST queryContext"]);
    assert_eq!(session.state().num_results, Some(3));

    session.query("what about cheaper", options).await.unwrap();
    assert_eq!(
        engine.calls(),
        vec!["POST setNumResults", "POST queryContext", "POST queryContext"]
    );
}

#[tokio::test]
async fn every_changed_setting_is_pushed_before_the_query() {
    let (engine, url, _server) = start_fake_engine().await;
    let mut session = session(&url);

    session
        .query(
            "find a cafe",
            QueryOptions {
                num_results: Some(5),
                neglect_filters: Some(vec!["price".into()]),
                neglect_projections: Some(vec!["id".into(), "geo".into()]),
                direct_sentence_state: Some(true),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        engine.calls(),
        vec![
            "POST setNumResults",
            "POST neglectFilters",
            "POST neglectProjections",
            "POST toggleDirectSentenceState",
            "POST queryContext",
        ]
    );
    assert_eq!(
        session.state(),
        &SessionState {
            num_results: Some(5),
            neglect_filters: Some(vec!["price".into()]),
            neglect_projections: Some(vec!["id".into(), "geo".into()]),
            direct_sentence_state: Some(true),
        }
    );
    let bodies = engine.bodies.lock().unwrap().clone();
    assert_eq!(bodies[0], json!({ "num_results": 5 }));
    assert_eq!(bodies[2], json!({ "neglect_projections": ["id", "geo"] }));
    assert_eq!(bodies[3], json!({ "direct_sentence_state": true }));
}

#[tokio::test]
async fn existing_state_uses_get_and_context_uses_post() {
    let (engine, url, _server) = start_fake_engine().await;
    let mut session = session(&url);

    let reply = session
        .query(
            "show me a chinese restaurant",
            QueryOptions {
                use_existing_state: true,
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reply["results"][0]["echo"], "show me a chinese restaurant");

    let reply = session
        .query(
            "book it",
            QueryOptions {
                dialog_state: Some("$dialogue @x.y;".into()),
                aux: Some(json!({ "user": "test" })),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reply["response"], 200);
    assert!(reply["dialog_state"].is_string());

    assert_eq!(engine.calls(), vec!["GET query", "POST queryContext"]);
    let bodies = engine.bodies.lock().unwrap().clone();
    assert_eq!(
        bodies[0],
        json!({ "q": "book it", "dialog_state": "$dialogue @x.y;", "aux": { "user": "test" } })
    );
}

#[tokio::test]
async fn rejected_setting_is_not_cached() {
    let (engine, url, _server) = start_fake_engine().await;
    engine.config_code.store(500, Ordering::SeqCst);
    let mut session = session(&url);
    let options = QueryOptions {
        num_results: Some(7),
        ..QueryOptions::default()
    };

    let reply = session.query("hello", options.clone()).await.unwrap();
    assert_eq!(reply["response"], 200);
    assert_eq!(session.state().num_results, None);

    // Still differs from the cache, so it is retried.
    session.query("hello again", options).await.unwrap();
    let pushes = engine
        .calls()
        .into_iter()
        .filter(|c| c == "POST setNumResults")
        .count();
    assert_eq!(pushes, 2);
}

#[tokio::test]
async fn explicit_setters_return_the_engine_reply() {
    let (engine, url, _server) = start_fake_engine().await;
    let mut session = session(&url);

    assert_eq!(session.set_num_results(2).await.unwrap(), json!({ "response": 200 }));
    assert_eq!(session.clean().await.unwrap(), json!({ "response": 200 }));
    assert_eq!(session.state().num_results, Some(2));

    session
        .query(
            "again",
            QueryOptions {
                num_results: Some(2),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        engine.calls(),
        vec!["POST setNumResults", "POST clean", "POST queryContext"]
    );
}

#[tokio::test]
async fn quit_stops_the_engine() {
    let (engine, url, server) = start_fake_engine().await;
    let mut session = session(&url);

    assert_eq!(session.quit().await.unwrap(), json!({ "response": 200 }));
    server.await.unwrap();
    assert_eq!(engine.calls(), vec!["POST quit"]);

    let err = session
        .query("anyone there?", QueryOptions::default())
        .await
        .unwrap_err();
    match err {
        SessionError::HttpError(err) => assert!(err.is_connect(), "{err}"),
        other => panic!("expected a connection error, got {other}"),
    }
}
