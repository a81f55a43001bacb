mod common;

use common::{
    body_json, location, TestApp, DEV_PASSWORD, DEV_USER, OPERATOR_PASSWORD, OPERATOR_USER,
    SQLITE_URL,
};
use control_plane::models::{Actor, RequestOrigin};
use control_plane::services::backup::ToolCall;
use serde_json::json;
use std::fs::File;
use std::time::{Duration, SystemTime};

fn restore_body(backup: &str) -> serde_json::Value {
    json!({ "backup": backup, "confirm": "RESTORE", "confirm2": "RESTORE" })
}

async fn create_backup(app: &TestApp, cookie: &str) -> String {
    let res = app.post_json("/developer/backups", Some(cookie), json!({})).await;
    assert_eq!(res.status(), 200);
    body_json(res).await["backup"]["file_name"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn created_backup_is_listed_and_audited() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    let name = create_backup(&app, &cookie).await;
    assert!(name.starts_with("td_backup_") && name.ends_with(".sql"));

    let res = app.get("/developer/backups", Some(&cookie)).await;
    let body = body_json(res).await;
    assert_eq!(body["supported"], true);
    assert_eq!(body["backups"][0]["file_name"], name.as_str());
    assert!(body["backups"][0]["size_bytes"].as_u64().unwrap() > 0);

    let created: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "backup_created")
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].resource_id.as_deref(), Some(name.as_str()));
}

#[tokio::test]
async fn failed_dump_reports_diagnostic_and_leaves_no_artifact() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    app.tool.fail_dump(true);

    let res = app.post_json("/developer/backups", Some(&cookie), json!({})).await;
    assert_eq!(res.status(), 502);
    let body = body_json(res).await;
    assert!(body["details"]
        .as_str()
        .unwrap()
        .contains("connection to server failed"));

    let res = app.get("/developer/backups", Some(&cookie)).await;
    assert_eq!(body_json(res).await["backups"], json!([]));
    assert!(app.audit.actions().iter().all(|a| a != "backup_created"));
}

#[tokio::test]
async fn non_durable_database_reports_unsupported() {
    let app = TestApp::with_database(SQLITE_URL);
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    let res = app.get("/developer/backups", Some(&cookie)).await;
    assert_eq!(body_json(res).await["supported"], false);

    let res = app.post_json("/developer/backups", Some(&cookie), json!({})).await;
    assert_eq!(res.status(), 409);

    let res = app
        .post_json(
            "/developer/backups/restore",
            Some(&cookie),
            restore_body("td_backup_20260101_000000.sql"),
        )
        .await;
    assert_eq!(res.status(), 409);
    assert!(app.tool.calls().is_empty());
}

#[tokio::test]
async fn restore_requires_matching_confirmations() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let name = create_backup(&app, &cookie).await;

    let res = app
        .post_json(
            "/developer/backups/restore",
            Some(&cookie),
            json!({ "backup": name, "confirm": "RESTORE", "confirm2": "RESTOR" }),
        )
        .await;
    assert_eq!(res.status(), 422);

    let res = app
        .post_json(
            "/developer/backups/restore",
            Some(&cookie),
            json!({ "backup": name, "confirm": "yes", "confirm2": "yes" }),
        )
        .await;
    assert_eq!(res.status(), 400);

    assert_eq!(app.tool.calls().len(), 1);
    assert!(!app.state.maintenance.is_enabled().await);
}

#[tokio::test]
async fn restore_rejects_paths_outside_the_backup_directory() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    for requested in [
        "../../etc/passwd",
        "/etc/passwd",
        "td_backup_20260101_000000.sql.gz",
        "td_backup_20260101_000000.sql",
    ] {
        let res = app
            .post_json(
                "/developer/backups/restore",
                Some(&cookie),
                restore_body(requested),
            )
            .await;
        assert_eq!(res.status(), 400, "{} was not rejected", requested);
    }

    assert!(app.tool.calls().is_empty());
    assert!(!app.state.maintenance.is_enabled().await);
    assert!(app.audit.actions().iter().all(|a| a != "restore_db"));
}

#[tokio::test]
async fn successful_restore_logs_everyone_out_and_leaves_maintenance_on() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let operator = app.login_cookie(OPERATOR_USER, OPERATOR_PASSWORD).await;
    let name = create_backup(&app, &cookie).await;

    let res = app
        .post_json("/developer/backups/restore", Some(&cookie), restore_body(&name))
        .await;
    assert_eq!(res.status(), 200);
    let body = body_json(res).await;
    assert_eq!(body["state"], "done");
    assert_eq!(
        body["transitions"],
        json!(["idle", "maintenance_on", "sessions_flushed", "restoring", "done"])
    );
    assert_eq!(body["maintenance_enabled"], true);

    assert!(app.state.maintenance.is_enabled().await);
    assert_eq!(app.get("/developer/sessions", Some(&cookie)).await.status(), 401);
    assert_eq!(app.get("/developer/sessions", Some(&operator)).await.status(), 401);
    assert!(matches!(app.tool.calls().last(), Some(ToolCall::Restore(_))));

    let restores: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "restore_db")
        .collect();
    assert_eq!(restores.len(), 1);
    assert_eq!(restores[0].resource_id.as_deref(), Some(name.as_str()));

    // Nobody signs back in until maintenance is lifted from the shell.
    let res = app.login(DEV_USER, DEV_PASSWORD).await;
    assert_eq!(res.status(), 303);
    assert_eq!(location(&res), Some("/maintenance"));

    app.state
        .admin
        .set_maintenance(false, Actor::cli(), &RequestOrigin::default())
        .await
        .unwrap();
    let lifted: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "maintenance_toggle")
        .collect();
    assert_eq!(lifted.len(), 1);
    assert_eq!(lifted[0].actor_id, None);
    assert_eq!(lifted[0].actor_name.as_deref(), Some("cli"));

    assert_eq!(app.login(DEV_USER, DEV_PASSWORD).await.status(), 200);
}

#[tokio::test]
async fn failed_restore_rolls_back_maintenance() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    let name = create_backup(&app, &cookie).await;
    app.tool.fail_restore(true);

    let res = app
        .post_json("/developer/backups/restore", Some(&cookie), restore_body(&name))
        .await;
    assert_eq!(res.status(), 502);
    let details = body_json(res).await["details"].as_str().unwrap().to_string();
    assert!(details.contains("syntax error"));
    assert!(details.contains("Maintenance mode has been disabled."));

    assert!(!app.state.maintenance.is_enabled().await);
    assert_eq!(
        app.audit
            .actions()
            .iter()
            .filter(|a| a.as_str() == "restore_db")
            .count(),
        1
    );
}

#[tokio::test]
async fn prune_removes_only_expired_artifacts() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;

    let old = app.backup_dir.path().join("td_backup_20250101_000000.sql");
    let recent = app.backup_dir.path().join("td_backup_20250102_000000.sql");
    let foreign = app.backup_dir.path().join("notes.sql");
    for (path, age_days) in [(&old, 40), (&recent, 29), (&foreign, 90)] {
        std::fs::write(path, b"-- dump").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * 86_400);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    let res = app
        .post_json("/developer/backups/prune", Some(&cookie), json!({}))
        .await;
    assert_eq!(res.status(), 200);
    let body = body_json(res).await;
    assert_eq!(body["removed"], json!(["td_backup_20250101_000000.sql"]));
    assert_eq!(body["failed"], json!([]));

    assert!(!old.exists());
    assert!(recent.exists());
    assert!(foreign.exists());

    let pruned: Vec<_> = app
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == "backups_pruned")
        .collect();
    assert_eq!(pruned.len(), 1);

    // Nothing left to remove: no second audit record.
    let res = app
        .post_json("/developer/backups/prune", Some(&cookie), json!({}))
        .await;
    assert_eq!(body_json(res).await["removed"], json!([]));
    assert_eq!(
        app.audit
            .actions()
            .iter()
            .filter(|a| a.as_str() == "backups_pruned")
            .count(),
        1
    );
}

#[tokio::test]
async fn audit_trail_lists_newest_first() {
    let app = TestApp::new();
    let cookie = app.login_cookie(DEV_USER, DEV_PASSWORD).await;
    create_backup(&app, &cookie).await;

    let res = app.get("/developer/audit?limit=1", Some(&cookie)).await;
    assert_eq!(res.status(), 200);
    let body = body_json(res).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["action"], "backup_created");

    let res = app.get("/developer/audit?limit=10&offset=1", Some(&cookie)).await;
    let body = body_json(res).await;
    assert_eq!(body[0]["action"], "login_success");
}
