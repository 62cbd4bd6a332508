//! End-to-end tests over real HTTP and channel connections.

mod common;

use anyhow::Result;
use axum::{Router, routing::any};
use reqwest::StatusCode;
use serde_json::{Value, json};

use common::{TestServer, collect_until, next_event, send_text};

fn landscape_files() -> Value {
    json!({
        "files": {
            "settings.yml": "S1",
            "landscape.yml": "L1",
            "guide.yml": "G1",
            "cached_logos/a.svg": "<svg/>"
        }
    })
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let server = TestServer::start().await?;
    let body: Value = server.get("/health").send().await?.json().await?;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_channel_announces_session_and_sets_cookie() -> Result<()> {
    let server = TestServer::start().await?;
    let (_socket, id, cookie) = server.connect(None).await?;

    assert!(cookie.starts_with(&format!("vantage_session={id};")));
    assert!(server.registry.get(&id).is_ok());

    let (_other, other_id, _) = server.connect(None).await?;
    assert_ne!(id, other_id);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_reports_known_ids() -> Result<()> {
    let server = TestServer::start().await?;
    let (_socket, id, _) = server.connect(None).await?;

    let resp = server
        .post("/api/sessions/does-not-exist/upload")
        .json(&landscape_files())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "unknown_session");
    assert_eq!(body["known_sessions"], json!([id]));
    Ok(())
}

#[tokio::test]
async fn test_upload_then_files_round_trip() -> Result<()> {
    let server = TestServer::start().await?;
    let (_socket, id, _) = server.connect(None).await?;

    let report: Value = server
        .post(&format!("/api/sessions/{id}/upload"))
        .json(&landscape_files())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(report["written"].as_array().map(Vec::len), Some(4));

    let files: Value = server
        .get(&format!("/api/sessions/{id}/files"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(files["landscape.yml"]["content"], "L1");
    assert_eq!(files["cached_logos/a.svg"]["content"], "<svg/>");

    // Re-uploading without the logo deletes it.
    let mut smaller = landscape_files();
    if let Some(files) = smaller["files"].as_object_mut() {
        files.remove("cached_logos/a.svg");
    }
    let report: Value = server
        .post(&format!("/api/sessions/{id}/upload"))
        .json(&smaller)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(report["deleted"], json!(["cached_logos/a.svg"]));
    assert_eq!(report["unchanged"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_fetch_streams_output_and_delta() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut socket, id, _) = server.connect(None).await?;

    let resp = server
        .post(&format!("/api/sessions/{id}/fetch"))
        .json(&landscape_files())
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let started: Value = resp.json().await?;
    assert_eq!(started["kind"], "fetch");

    let events = collect_until(&mut socket, |e| {
        e["type"] == "status" && e["status"] != "progress"
    })
    .await?;

    assert_eq!(events[0], json!({"type": "status", "target": "fetch", "status": "progress"}));
    assert!(events.contains(&json!({"type": "message", "target": "fetch", "text": "fetching"})));

    let finish = events.iter().position(|e| e["type"] == "finish").unwrap();
    let files = events.iter().position(|e| e["type"] == "files").unwrap();
    assert!(finish < files);
    assert_eq!(events[finish]["code"], 0);

    let mut changes = events[files]["changes"].as_array().unwrap().clone();
    changes.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
    assert_eq!(
        changes,
        vec![
            json!({"kind": "deleted", "path": "guide.yml"}),
            json!({"kind": "modified", "path": "landscape.yml", "content": "L2", "encoding": "utf8"}),
        ]
    );
    assert_eq!(events.last().unwrap()["status"], "success");
    Ok(())
}

#[tokio::test]
async fn test_failed_fetch_reports_failure() -> Result<()> {
    let server = TestServer::start_with(
        vantage_supervisor::CommandSpec::shell("echo broken >&2; exit 3"),
        vantage_supervisor::CommandSpec::shell("exit 1"),
    )
    .await?;
    let (mut socket, id, _) = server.connect(None).await?;

    server
        .post(&format!("/api/sessions/{id}/fetch"))
        .send()
        .await?;
    let events = collect_until(&mut socket, |e| {
        e["type"] == "status" && e["status"] != "progress"
    })
    .await?;

    assert!(events.contains(&json!({"type": "message", "target": "fetch", "text": "broken"})));
    assert!(events.contains(&json!({"type": "finish", "target": "fetch", "code": 3})));
    assert_eq!(events.last().unwrap()["status"], "failure");
    Ok(())
}

#[tokio::test]
async fn test_preview_startup_failure_is_reported() -> Result<()> {
    let server = TestServer::start_with(
        vantage_supervisor::CommandSpec::shell("true"),
        vantage_supervisor::CommandSpec::shell("echo no config >&2; exit 1"),
    )
    .await?;
    let (mut socket, id, _) = server.connect(None).await?;

    let resp = server
        .post(&format!("/api/sessions/{id}/preview"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "startup_failed");

    let events = collect_until(&mut socket, |e| {
        e["type"] == "status" && e["status"] == "failure"
    })
    .await?;
    assert!(events.iter().any(|e| e["type"] == "finish" && e["code"] == 1));
    Ok(())
}

#[tokio::test]
async fn test_preview_is_proxied() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut socket, id, cookie) = server.connect(None).await?;

    // Without a preview the proxy answers with a synthesized error.
    let resp = server
        .get("/preview/index.html")
        .header("x-vantage-session", &id)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let preview: Value = server
        .post(&format!("/api/sessions/{id}/preview"))
        .json(&landscape_files())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(preview["path"], "/preview/");
    let port = preview["port"].as_u64().unwrap() as u16;

    let events = collect_until(&mut socket, |e| e["type"] == "status" && e["status"] == "success").await?;
    assert!(events.iter().any(|e| e["text"] == format!("READY on {port}")));

    // The preview job only announces readiness; stand in for the server it
    // would have started on the allocated port.
    let upstream = Router::new().fallback(any(|req: axum::extract::Request| async move {
        let target = req.uri().to_string();
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .unwrap_or_default();
        (
            [("x-upstream", "yes")],
            format!("{target}|{}", String::from_utf8_lossy(&body)),
        )
    }));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, upstream).await;
    });

    let cookie_pair = cookie.split(';').next().unwrap_or_default().to_string();
    let resp = server
        .post("/preview/data/items.json?x=1")
        .header("cookie", cookie_pair)
        .body("payload")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-upstream"], "yes");
    assert_eq!(resp.text().await?, "/preview/data/items.json?x=1|payload");

    // Killing the preview makes the proxy refuse again.
    let killed: Value = server
        .delete(&format!("/api/sessions/{id}/jobs/preview"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(killed["killed"], true);
    let resp = server
        .get("/preview/")
        .header("x-vantage-session", &id)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn test_reconnect_replays_missed_events() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut socket, id, _) = server.connect(None).await?;
    socket.close(None).await?;
    server
        .wait_for_session(&id, |s| s["connected"] == false)
        .await?;

    server
        .post(&format!("/api/sessions/{id}/fetch"))
        .json(&landscape_files())
        .send()
        .await?;
    // The job state flips only after its last event was emitted.
    server
        .wait_for_session(&id, |s| s["fetch"] == "succeeded")
        .await?;

    let (mut socket, resumed, _) = server.connect(Some(&id)).await?;
    assert_eq!(resumed, id);
    let events = collect_until(&mut socket, |e| {
        e["type"] == "status" && e["status"] == "success"
    })
    .await?;
    assert_eq!(events[0]["status"], "progress");
    assert!(events.iter().any(|e| e["type"] == "files"));
    Ok(())
}

#[tokio::test]
async fn test_resume_of_unknown_session_creates_new_one() -> Result<()> {
    let server = TestServer::start().await?;
    let (_socket, id, _) = server.connect(Some("gone")).await?;
    assert_ne!(id, "gone");
    assert!(server.registry.get(&id).is_ok());
    Ok(())
}

#[tokio::test]
async fn test_ping_pong_and_bad_frames() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut socket, _id, _) = server.connect(None).await?;

    send_text(&mut socket, r#"{"type":"ping"}"#).await?;
    assert_eq!(next_event(&mut socket).await?, json!({"type": "pong"}));

    send_text(&mut socket, "not json").await?;
    let error = next_event(&mut socket).await?;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "parse_error");
    Ok(())
}

#[tokio::test]
async fn test_delete_session_removes_workspace() -> Result<()> {
    let server = TestServer::start().await?;
    let (_socket, id, _) = server.connect(None).await?;
    let workspace = server.temp_dir.path().join(&id);
    assert!(workspace.is_dir());

    let resp = server.delete(&format!("/api/sessions/{id}")).send().await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!workspace.exists());

    let list: Value = server.get("/api/sessions").send().await?.json().await?;
    assert_eq!(list["total"], 0);
    Ok(())
}
