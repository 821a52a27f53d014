mod common;

use axum::http::{header, Method, StatusCode};
use brainstorm_service::models::UsageTier;
use common::TestApp;
use serde_json::{json, Value};

fn speakers(session: &Value) -> Vec<String> {
    session["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["speaker"].as_str().unwrap().to_string())
        .collect()
}

async fn get_session(app: &TestApp, token: &str, id: &str) -> Value {
    let (status, body) = app
        .request(Method::GET, &format!("/brainstorm/{}", id), Some(token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.request(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_authentication_is_required() {
    let app = TestApp::new();

    let (status, _) = app.request(Method::GET, "/brainstorm", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::GET, "/brainstorm", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Valid signature, but the identity layer has never heard of them
    let ghost = app.token("ghost");
    let (status, _) = app.request(Method::GET, "/brainstorm", Some(&ghost), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.user("mallory", UsageTier::Free);
    app.accounts.set_active("mallory", false);
    let (status, _) = app.request(Method::GET, "/brainstorm", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_start_session() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);

    let (status, body) = app
        .request(
            Method::POST,
            "/brainstorm",
            Some(&token),
            Some(json!({
                "topic": "AI Ethics",
                "description": "Where should the lines be drawn?",
                "settings": { "turnDuration": 45, "maxTurns": 6, "format": "debate" }
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["currentTurn"], 0);
    assert_eq!(body["isFinished"], false);
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["settings"]["format"], "debate");
    assert_eq!(body["participants"]["claude"]["model"], "claude-test");
    assert!(body["participants"]["grok"]["systemPrompt"]
        .as_str()
        .unwrap()
        .contains("AI Ethics"));
}

#[tokio::test]
async fn test_start_session_validation() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);

    let (status, _) = app
        .request(Method::POST, "/brainstorm", Some(&token), Some(json!({ "topic": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::POST,
            "/brainstorm",
            Some(&token),
            Some(json!({ "topic": "AI Ethics", "settings": { "maxTurns": 51 } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::POST,
            "/brainstorm",
            Some(&token),
            Some(json!({ "topic": "AI Ethics", "settings": { "turnDuration": 5 } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_turns_alternate_until_finished() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;

    for _ in 0..2 {
        let (status, _) = app.continue_turn(&token, &id).await;
        assert_eq!(status, StatusCode::OK);
    }
    let session = get_session(&app, &token, &id).await;
    assert_eq!(speakers(&session), vec!["claude", "grok"]);
    assert_eq!(session["currentTurn"], 1);

    for _ in 0..2 {
        let (status, _) = app.continue_turn(&token, &id).await;
        assert_eq!(status, StatusCode::OK);
    }
    let session = get_session(&app, &token, &id).await;
    assert_eq!(session["currentTurn"], 2);
    assert_eq!(session["isFinished"], false);

    for _ in 0..6 {
        let (status, _) = app.continue_turn(&token, &id).await;
        assert_eq!(status, StatusCode::OK);
    }
    let session = get_session(&app, &token, &id).await;
    assert_eq!(session["currentTurn"], 5);
    assert_eq!(session["isFinished"], true);
    assert_eq!(session["status"], "active");

    let (status, _) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let spoken = speakers(&session);
    assert!(spoken.windows(2).all(|pair| pair[0] != pair[1]));
    assert_eq!(app.claude.calls(), 5);
    assert_eq!(app.grok.calls(), 5);
}

#[tokio::test]
async fn test_pause_blocks_turns_until_resumed() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;

    let (status, body) = app
        .request(Method::POST, &format!("/brainstorm/{}/pause", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Pausing twice is not a legal transition
    let (status, _) = app
        .request(Method::POST, &format!("/brainstorm/{}/pause", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(Method::POST, &format!("/brainstorm/{}/resume", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speaker"], "claude");
}

#[tokio::test]
async fn test_provider_failure_moves_session_to_error() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;

    let (status, first) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::OK);

    app.grok.set_failing(true);
    let (status, _) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let session = get_session(&app, &token, &id).await;
    assert_eq!(session["status"], "error");
    assert!(session["error"].as_str().unwrap().contains("Grok"));
    let messages = session["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], first["id"]);
    assert_eq!(messages[0]["content"], first["content"]);

    // No silent retry once the provider recovers
    app.grok.set_failing(false);
    let (status, _) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;

    let (status, body) = app
        .request(Method::POST, &format!("/brainstorm/{}/stop", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["isFinished"], true);
    assert!(body["completedAt"].is_string());
    assert!(body["duration"].is_number());

    for action in ["pause", "resume", "continue"] {
        let (status, _) = app
            .request(
                Method::POST,
                &format!("/brainstorm/{}/{}", id, action),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{} after stop", action);
    }

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/brainstorm/{}/message", id),
            Some(&token),
            Some(json!({ "content": "one more thing" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_user_messages() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;
    let uri = format!("/brainstorm/{}/message", id);

    let (status, _) = app
        .request(Method::POST, &uri, Some(&token), Some(json!({ "content": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .request(
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({
                "content": "",
                "attachments": [{
                    "name": "notes.pdf",
                    "url": "uploads/notes.pdf",
                    "size": 2048,
                    "mimeType": "application/pdf"
                }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speaker"], "user");
    assert_eq!(body["attachments"][0]["type"], "document");

    let (status, _) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({ "content": "Consider the regulators too." })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // An interjection neither counts as a turn nor resets the alternation
    let (status, body) = app.continue_turn(&token, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speaker"], "grok");

    let session = get_session(&app, &token, &id).await;
    assert_eq!(speakers(&session), vec!["user", "claude", "user", "grok"]);
    assert_eq!(session["currentTurn"], 1);
}

#[tokio::test]
async fn test_foreign_sessions_are_not_found() {
    let app = TestApp::new();
    let alice = app.user("alice", UsageTier::Free);
    let bob = app.user("bob", UsageTier::Free);
    let id = app.start_session(&alice, 5).await;

    let (foreign_status, foreign_body) = app
        .request(Method::GET, &format!("/brainstorm/{}", id), Some(&bob), None)
        .await;
    let (missing_status, missing_body) = app
        .request(Method::GET, "/brainstorm/does-not-exist", Some(&bob), None)
        .await;
    assert_eq!(foreign_status, StatusCode::NOT_FOUND);
    assert_eq!(missing_status, StatusCode::NOT_FOUND);
    assert_eq!(foreign_body, missing_body);

    let (status, _) = app.continue_turn(&bob, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::DELETE, &format!("/brainstorm/{}", id), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.request(Method::GET, "/brainstorm", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_and_delete() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let first = app.start_session(&token, 5).await;
    let second = app.start_session(&token, 8).await;

    let (status, body) = app.request(Method::GET, "/brainstorm", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));

    let (status, _) = app
        .request(Method::DELETE, &format!("/brainstorm/{}", first), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, &format!("/brainstorm/{}", first), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_export_transcript() {
    let app = TestApp::new();
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;
    app.continue_turn(&token, &id).await;
    app.continue_turn(&token, &id).await;

    let (status, headers, body) = app
        .raw_request(
            Method::GET,
            &format!("/brainstorm/{}/export?format=markdown", id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("brainstorm-{}.md", id)));
    let markdown = String::from_utf8(body).unwrap();
    assert!(markdown.starts_with("# AI Ethics"));

    let (status, _, body) = app
        .raw_request(
            Method::GET,
            &format!("/brainstorm/{}/export", id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let exported: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(exported["id"], id.as_str());
    assert_eq!(exported["currentTurn"], 1);
}

#[tokio::test]
async fn test_daily_usage_limit() {
    let app = TestApp::with_options(3, std::time::Duration::ZERO);
    let token = app.user("alice", UsageTier::Free);
    let id = app.start_session(&token, 5).await;

    for _ in 0..3 {
        let (status, _) = app.continue_turn(&token, &id).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, body) = app
        .raw_request(
            Method::POST,
            &format!("/brainstorm/{}/continue", id),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["details"]["limit"], 3);
    assert_eq!(body["details"]["used"], 3);
    assert!(body["details"]["resetAt"].is_string());

    // The refused turn never reached a provider
    assert_eq!(app.claude.calls() + app.grok.calls(), 3);

    let (status, usage) = app.request(Method::GET, "/usage/today", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["tier"], "free");
    assert_eq!(usage["used"], 3);
    assert_eq!(usage["limit"], 3);

    assert_eq!(app.usage.records().await.len(), 3);
}

#[tokio::test]
async fn test_business_tier_is_never_blocked() {
    let app = TestApp::with_options(1, std::time::Duration::ZERO);
    let token = app.user("acme", UsageTier::Business);
    let id = app.start_session(&token, 5).await;

    for _ in 0..4 {
        let (status, _) = app.continue_turn(&token, &id).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, usage) = app.request(Method::GET, "/usage/today", Some(&token), None).await;
    assert_eq!(usage["used"], 4);
    assert!(usage["limit"].is_null());
}
