mod common;

use axum::http::header;
use chrono::{Duration, Utc};
use common::{
    body_json, location, TestApp, DEV_PASSWORD, DEV_USER, OPERATOR_PASSWORD, OPERATOR_USER,
};

fn cookie_for(session_id: &str) -> String {
    format!("td_session={}", session_id)
}

#[tokio::test]
async fn developer_routes_require_a_session() {
    let app = TestApp::new();
    assert_eq!(app.get("/developer/dashboard", None).await.status(), 401);
    assert_eq!(
        app.get("/developer/dashboard", Some("td_session=not-a-session"))
            .await
            .status(),
        401
    );
}

#[tokio::test]
async fn non_developer_roles_are_forbidden() {
    let app = TestApp::new();
    let cookie = app.login_cookie(OPERATOR_USER, OPERATOR_PASSWORD).await;

    assert_eq!(app.get("/developer/dashboard", Some(&cookie)).await.status(), 403);
    let res = app
        .post_json("/developer/logout-all", Some(&cookie), serde_json::json!({}))
        .await;
    assert_eq!(res.status(), 403);
    assert!(app
        .audit
        .actions()
        .iter()
        .all(|a| a != "logout_all_sessions"));
}

#[tokio::test]
async fn developer_reaches_the_dashboard() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    let res = app.get("/developer/dashboard", Some(&cookie)).await;
    assert_eq!(res.status(), 200);
    let body = body_json(res).await;
    assert_eq!(body["store_healthy"], true);
    assert_eq!(body["maintenance"]["status"], "disabled");
    assert_eq!(body["sessions"]["active_sessions"], 1);
    assert_eq!(body["sessions"]["approximate"], true);
    assert_eq!(body["backups_supported"], true);
}

#[tokio::test]
async fn inactive_session_redirects_to_login_and_clears_cookie() {
    let app = TestApp::new();
    let stale = app
        .state
        .sessions
        .start_at(1, Utc::now() - Duration::minutes(31))
        .await;

    let res = app
        .get("/developer/dashboard", Some(&cookie_for(&stale.session_id)))
        .await;
    assert_eq!(res.status(), 303);
    assert_eq!(location(&res), Some("/auth/login?expired=1"));

    let removal = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(removal.starts_with("td_session=;") || removal.starts_with("td_session=\"\""));
    assert!(removal.contains("Max-Age=0"));

    // The record is gone, so the same cookie is now simply invalid.
    let res = app
        .get("/developer/dashboard", Some(&cookie_for(&stale.session_id)))
        .await;
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn activity_just_inside_the_lifetime_keeps_the_session() {
    let app = TestApp::new();
    let session = app
        .state
        .sessions
        .start_at(1, Utc::now() - Duration::minutes(29))
        .await;

    let cookie = cookie_for(&session.session_id);
    assert_eq!(app.get("/developer/sessions", Some(&cookie)).await.status(), 200);

    // That request refreshed the activity timestamp.
    let refreshed = app.get("/developer/sessions", Some(&cookie)).await;
    assert_eq!(refreshed.status(), 200);
}

#[tokio::test]
async fn logout_ends_only_the_callers_session() {
    let app = TestApp::new();
    let first = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let second = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    let res = app
        .post_json("/auth/logout", Some(&first), serde_json::json!({}))
        .await;
    assert_eq!(res.status(), 200);
    let removal = res
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(removal.contains("Max-Age=0"));

    assert_eq!(app.get("/developer/sessions", Some(&first)).await.status(), 401);
    assert_eq!(app.get("/developer/sessions", Some(&second)).await.status(), 200);

    let logouts: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "logout")
        .collect();
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].actor_id, Some(1));
}

#[tokio::test]
async fn logout_without_a_session_still_succeeds() {
    let app = TestApp::new();
    let res = app.post_json("/auth/logout", None, serde_json::json!({})).await;
    assert_eq!(res.status(), 200);
    assert!(app.audit.records().is_empty());
}

#[tokio::test]
async fn logout_all_revokes_every_session_including_the_callers() {
    let app = TestApp::new();
    let dev = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let operator = app.login_cookie(OPERATOR_USER, OPERATOR_PASSWORD).await;

    let res = app.get("/developer/sessions", Some(&dev)).await;
    assert_eq!(body_json(res).await["active_sessions"], 2);

    let res = app
        .post_json("/developer/logout-all", Some(&dev), serde_json::json!({}))
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(body_json(res).await["sessions_flushed"], 2);

    assert_eq!(app.get("/developer/sessions", Some(&dev)).await.status(), 401);
    assert_eq!(app.get("/developer/sessions", Some(&operator)).await.status(), 401);

    let dev = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let res = app.get("/developer/sessions", Some(&dev)).await;
    assert_eq!(body_json(res).await["active_sessions"], 1);

    let flushes: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "logout_all_sessions")
        .collect();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].details.as_deref(), Some("sessions=2"));
}

#[tokio::test]
async fn deactivated_account_loses_its_session() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    app.directory.set_active(1, false);

    assert_eq!(app.get("/developer/sessions", Some(&cookie)).await.status(), 401);

    app.directory.set_active(1, true);
    // The session was ended, not just refused once.
    assert_eq!(app.get("/developer/sessions", Some(&cookie)).await.status(), 401);
}

#[tokio::test]
async fn deactivation_leaves_the_actors_audit_records_untouched() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let res = app
        .post_json("/developer/logout-all", Some(&cookie), serde_json::json!({}))
        .await;
    assert_eq!(res.status(), 200);

    let before = app.state.admin.recent_audit(50, 0).await.unwrap();
    assert_eq!(before.len(), 2);
    assert!(before
        .iter()
        .all(|r| r.actor_id == Some(1) && r.actor_name.as_deref() == Some(DEV_USER)));

    app.directory.set_active(1, false);
    assert_eq!(app.login(DEV_USER, DEV_PASSWORD).await.status(), 403);

    let after = app.state.admin.recent_audit(50, 0).await.unwrap();
    // Only the refused login was added; the earlier records are unchanged.
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].action, "login_failure");
    assert_eq!(&after[1..], &before[..]);
}

#[tokio::test]
async fn session_survives_a_store_outage_on_the_same_worker() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    app.store.set_available(false);

    let res = app.get("/developer/sessions", Some(&cookie)).await;
    assert_eq!(res.status(), 200);
    let body = body_json(res).await;
    assert!(body["active_sessions"].is_null());
}
