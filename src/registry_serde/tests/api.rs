use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use common::IdentifierNamer;
use registry_schema::{infer_schema, TableBuilder};
use registry_serde::{
    feed::{ApiClient, ApiConfig, ApiError, ApiFeed},
    ingest, DbConn, IngestOptions, SyncContext,
};
use serde_json::{json, Value};
use warp::{
    http::StatusCode,
    reply::{self, Json, WithStatus},
    Filter,
};

#[derive(Default)]
struct MockState {
    page_failures_left: AtomicUsize,
    down_hits: AtomicUsize,
    authorizations: Mutex<Vec<Option<String>>>,
}

fn respond(status: StatusCode, body: Value) -> WithStatus<Json> {
    reply::with_status(reply::json(&body), status)
}

fn page(cursor: Option<&str>) -> Value {
    match cursor {
        None => json!({
            "source": "mock register",
            "sourceDate": "2024-05-01T06:00:00Z",
            "results": [{
                "registerNumber": "R1",
                "name": "first",
                "accountDetails": {"registerEntryVersions": [{"version": 1}, {"version": 2}]}
            }],
            "cursor": "c2"
        }),
        Some(_) => json!({
            "source": "mock register",
            "results": [{"registerNumber": "R2", "name": "second", "version": 1}],
            "cursor": "c2"
        }),
    }
}

fn spawn_mock(state: Arc<MockState>) -> SocketAddr {
    let with_state = warp::any().map(move || state.clone());

    let statistics = warp::path!("statistics" / "registerentries")
        .map(|| {
            let stats = json!({"sourceDate": "2024-05-01T06:00:00Z", "registerEntriesCount": 2});
            respond(StatusCode::OK, stats)
        });

    let pages = warp::path!("registerentries")
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state.clone())
        .map(|query: HashMap<String, String>, auth: Option<String>, state: Arc<MockState>| {
            if let Ok(mut seen) = state.authorizations.lock() {
                seen.push(auth);
            }
            let failing = state
                .page_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return respond(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "try later"}));
            }
            if query.get("format").map(String::as_str) != Some("json") {
                return respond(StatusCode::BAD_REQUEST, json!({"error": "format"}));
            }
            respond(StatusCode::OK, page(query.get("cursor").map(String::as_str)))
        });

    let versions =
        warp::path!("registerentries" / String / i64).map(|number: String, version: i64| {
            if number == "R1" && version == 2 {
                return respond(StatusCode::NOT_FOUND, json!({"error": "gone"}));
            }
            let name = format!("{number} v{version}");
            respond(StatusCode::OK, json!({"registerNumber": number, "name": name}))
        });

    let down = warp::path!("down").and(with_state.clone()).map(|state: Arc<MockState>| {
        state.down_hits.fetch_add(1, Ordering::SeqCst);
        respond(StatusCode::BAD_GATEWAY, json!({}))
    });

    let rejected = warp::path!("rejected")
        .map(|| respond(StatusCode::UNAUTHORIZED, json!({"error": "key"})));

    let routes = warp::get().and(
        statistics
            .or(pages)
            .unify()
            .or(versions)
            .unify()
            .or(down)
            .unify()
            .or(rejected)
            .unify(),
    );
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn config(addr: SocketAddr, max_retries: u32) -> ApiConfig {
    ApiConfig {
        url: format!("http://{addr}/"),
        api_key: Some("secret".to_string()),
        timeout: Duration::from_secs(5),
        max_retries,
        backoff_factor: 0.01,
        backoff_max: 0.02,
    }
}

fn register_spec() -> Result<SyncContext> {
    let mut builder = TableBuilder::new(IdentifierNamer::default());
    let entries = infer_schema(
        &json!({
            "registerNumber": "R1",
            "name": "x",
            "version": 1,
            "source": "s",
            "sourceDate": "2024-05-01T06:00:00Z",
            "accountDetails": {"registerEntryVersions": [{"version": 1}]}
        }),
        "register_entries",
    )?;
    builder.add_root(&entries, &["registerNumber".to_string()])?;
    let versions = infer_schema(
        &json!({"registerNumber": "R1", "version": 1, "name": "x"}),
        "register_entry_versions",
    )?;
    builder.add_root(&versions, &["registerNumber".to_string(), "version".to_string()])?;
    let statistics = infer_schema(
        &json!({"sourceDate": "2024-05-01T06:00:00Z", "registerEntriesCount": 1}),
        "statistics_register_entries",
    )?;
    builder.add_root(&statistics, &["sourceDate".to_string()])?;
    Ok(SyncContext::new(Arc::new(builder.finish())))
}

#[tokio::test]
async fn api_feed_follows_cursor_and_routes_roots() -> Result<()> {
    let state = Arc::new(MockState {
        page_failures_left: AtomicUsize::new(1),
        ..Default::default()
    });
    let addr = spawn_mock(state.clone());

    let context = Arc::new(register_spec()?);
    let mut dbc = DbConn::open_in_memory()?;
    dbc.apply_schema(context.spec())?;

    let client = ApiClient::new(config(addr, 2))?;
    let mut feed = ApiFeed::new(client, "register_entries")
        .with_versions("register_entry_versions")
        .with_statistics("statistics_register_entries");
    let (summary, dbc) = ingest(&mut feed, dbc, context, &IngestOptions::default()).await?;
    assert_eq!((summary.processed, summary.failed), (5, 0));

    let count = |table: &str| -> rusqlite::Result<i64> {
        dbc.conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
    };
    assert_eq!(count("register_entries")?, 2);
    assert_eq!(count("register_entry_versions")?, 2);
    assert_eq!(count("statistics_register_entries")?, 1);

    let versions: Vec<(String, i64)> = {
        let mut stmt = dbc.conn.prepare(
            "SELECT register_number, version FROM register_entry_versions ORDER BY register_number",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    assert_eq!(versions, vec![("R1".to_string(), 1), ("R2".to_string(), 1)]);

    let sourced: i64 = dbc.conn.query_row(
        "SELECT COUNT(*) FROM register_entries WHERE source = 'mock register'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(sourced, 2);

    // one failed attempt plus two pages; the repeated cursor ends the walk
    let authorizations = state.authorizations.lock().map(|seen| seen.clone()).unwrap_or_default();
    assert_eq!(authorizations, vec![Some("ApiKey secret".to_string()); 3]);
    Ok(())
}

#[tokio::test]
async fn not_found_is_not_retried() -> Result<()> {
    let addr = spawn_mock(Arc::new(MockState::default()));
    let client = ApiClient::new(config(addr, 3))?;
    let err = client.get_json("registerentries/R1/2", &[]).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn retries_stop_after_max_attempts() -> Result<()> {
    let state = Arc::new(MockState::default());
    let addr = spawn_mock(state.clone());
    let client = ApiClient::new(config(addr, 2))?;

    let err = client.get_json("down", &[]).await.unwrap_err();
    assert!(matches!(err, ApiError::Exhausted { attempts: 3, .. }), "{err}");
    assert_eq!(state.down_hits.load(Ordering::SeqCst), 3);

    let err = client.get_json("rejected", &[]).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }), "{err}");
    Ok(())
}
