//! Integration tests for campus-market
//!
//! CLI behaviour through the built binary, and a full marketplace flow
//! through the public library router.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a campus-market Command isolated from the caller's
/// environment.
fn market(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("campus-market");
    cmd.current_dir(dir.path())
        .env_remove("DB_URL")
        .env_remove("MARKET_PORT")
        .env_remove("MARKET_DEBUG")
        .env_remove("MARKET_ADMIN_EMAIL")
        .env_remove("MARKET_ADMIN_PASSWORD")
        .env("RUST_LOG", "warn");
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        market(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        market(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        market(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Database Commands
// =============================================================================

mod db_commands {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("data").join("market.db");
        market(&dir)
            .arg("init-db")
            .arg("--db")
            .arg(&db)
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(db.exists());
    }

    #[test]
    fn test_init_db_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("market.db");
        for _ in 0..2 {
            market(&dir).arg("init-db").arg("--db").arg(&db).assert().success();
        }
    }

    #[test]
    fn test_seed_loads_fixtures() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("market.db");
        market(&dir)
            .arg("seed")
            .arg("--db")
            .arg(&db)
            .assert()
            .success()
            .stdout(predicate::str::contains("Seeded"));

        let conn = rusqlite::Connection::open(&db).unwrap();
        let projects: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(projects, 25);
        let jobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(jobs, 6);

        // Seeding again resets rather than duplicating.
        market(&dir).arg("seed").arg("--db").arg(&db).assert().success();
        let projects: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(projects, 25);
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_file_is_read() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("marketplace.toml"),
            "port = 8088\nadmin_email = \"root@x.com\"\nadmin_password = \"hunter2\"\n",
        )
        .unwrap();
        market(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 8088"))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marketplace.toml"), "port = 8088\n").unwrap();
        market(&dir)
            .env("MARKET_PORT", "9099")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9099"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marketplace.toml"), "port = 0\n").unwrap();
        market(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("port must be non-zero"));
        market(&dir)
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn test_unknown_config_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marketplace.toml"), "prot = 1\n").unwrap();
        market(&dir).args(["config", "show"]).assert().failure();
    }
}

// =============================================================================
// End-to-end API flow
// =============================================================================

mod api_flow {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use campus_market::config::AppConfig;
    use campus_market::market::db::MarketDb;
    use campus_market::market::password::Hasher;
    use campus_market::market::server::{build_router, build_state};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        let config = AppConfig::default();
        let db = MarketDb::new_in_memory().unwrap();
        build_router(build_state(&config, db, Hasher::fast()), false)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register an account and log in; returns (user id, token).
    async fn signup(app: &Router, email: &str, account_type: &str) -> (i64, String) {
        let (status, user) = call(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "name": email,
                "email": email,
                "password": "pw",
                "password2": "pw",
                "account_type": account_type,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, login) = call(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": email, "password": "pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (
            user["id"].as_i64().unwrap(),
            login["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_project_to_team_to_chat() {
        let app = app();
        let (_, business) = signup(&app, "biz@x.com", "business").await;
        let (instructor_id, instructor) = signup(&app, "prof@x.com", "instructor").await;
        let (student_id, student) = signup(&app, "kid@x.com", "student").await;

        // Business posts; the project waits for approval.
        let (_, project) = call(
            &app,
            "POST",
            "/api/projects",
            Some(&business),
            Some(json!({"name": "Shop", "description": "Online shop"})),
        )
        .await;
        let project_id = project["id"].as_i64().unwrap();
        let (_, listing) = call(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(listing["total"], 0);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/projects/{}/approve", project_id),
            Some(&instructor),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, listing) = call(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(listing["total"], 1);

        // Student joins the instructor.
        let (_, request) = call(
            &app,
            "POST",
            "/api/instructor-requests",
            Some(&student),
            Some(json!({"instructor_id": instructor_id})),
        )
        .await;
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/instructor-requests/{}/accept", request["id"]),
            Some(&instructor),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Instructor forms a team on the project and adds the student.
        let (status, team) = call(
            &app,
            "POST",
            "/api/mgt/groups",
            Some(&instructor),
            Some(json!({"name": "Alpha", "project_id": project_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(
            &app,
            "PUT",
            &format!("/api/mgt/students/{}/team", student_id),
            Some(&instructor),
            Some(json!({"team_id": team["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, detail) = call(
            &app,
            "GET",
            &format!("/api/projects/{}", project_id),
            Some(&student),
            None,
        )
        .await;
        assert_eq!(detail["project"]["status"], "taken");
        assert_eq!(detail["can_chat"], true);

        // The team member and the owner share the project room.
        let room = format!("/api/chat/project-{}/messages", project_id);
        let (status, _) = call(
            &app,
            "POST",
            &room,
            Some(&student),
            Some(json!({"message": "Hi!"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, history) = call(&app, "GET", &room, Some(&business), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["email"], "kid@x.com");

        let (_, profile) = call(&app, "GET", "/api/profile", Some(&student), None).await;
        assert_eq!(profile["team"]["name"], "Alpha");
        assert_eq!(profile["instructor"]["id"], instructor_id);
    }

    #[tokio::test]
    async fn test_job_application_chat() {
        let app = app();
        let (_, business) = signup(&app, "biz@x.com", "business").await;
        let (_, alumnus) = signup(&app, "old@x.com", "alumni").await;
        let (_, stranger) = signup(&app, "who@x.com", "student").await;

        let (_, job) = call(
            &app,
            "POST",
            "/api/jobs",
            Some(&business),
            Some(json!({"title": "Dev", "description": "Write code"})),
        )
        .await;
        let job_uri = format!("/api/jobs/{}", job["id"]);
        let (status, _) = call(&app, "GET", &job_uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        call(
            &app,
            "PUT",
            &job_uri,
            Some(&business),
            Some(json!({"title": "Dev", "description": "Write code", "status": "open"})),
        )
        .await;

        let (status, application) = call(
            &app,
            "POST",
            &format!("{}/applications", job_uri),
            Some(&alumnus),
            Some(json!({"message": "Hire me"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let room = format!("/api/chat/application-{}/messages", application["id"]);
        let (status, _) = call(
            &app,
            "POST",
            &room,
            Some(&business),
            Some(json!({"message": "Interview?"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, history) = call(&app, "GET", &room, Some(&alumnus), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
        let (status, _) = call(&app, "GET", &room, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
