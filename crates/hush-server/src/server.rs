use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::require_api_key,
    handlers::{
        create_secret_sharing, delete_secret_sharing, health, list_secret_sharing,
        purge_secret_sharing, reveal_secret_sharing, update_secret_sharing,
        valid_secret_sharing,
    },
    sharing::SharingService,
    store::Store,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for project routes ($HUSH_API_KEY or $HUSH_API_KEY_FILE).
    pub api_key: String,
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HUSH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HUSH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            api_key: String::new(),
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("HUSH_CORS_ORIGINS").ok(),
        }
    }
}

/// Read a key from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_key_file(path: &std::path::Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve the API key from `HUSH_API_KEY_FILE` (preferred) or `HUSH_API_KEY`.
pub fn resolve_api_key() -> Result<String> {
    if let Ok(path) = std::env::var("HUSH_API_KEY_FILE") {
        let key = read_key_file(std::path::Path::new(&path))?;
        if std::env::var("HUSH_API_KEY").is_ok() {
            warn!("both HUSH_API_KEY and HUSH_API_KEY_FILE are set; using file");
        }
        return Ok(key);
    }
    let key = std::env::var("HUSH_API_KEY")
        .context("HUSH_API_KEY or HUSH_API_KEY_FILE environment variable is required")?;
    if key.trim().is_empty() {
        anyhow::bail!("HUSH_API_KEY must not be empty");
    }
    Ok(key)
}

/// Directory holding `hush.db`: the configured one, else the platform data
/// dir (`~/.local/share/hush` on Linux). Created when missing.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "hush")
            .context("no HUSH_DATA_DIR and no platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir: {}", dir.display()))?;
    Ok(dir)
}

/// Build the API router. CORS and tracing layers are added by [`run`].
pub fn router(state: AppState) -> Router {
    // Viewers never authenticate.
    let public = Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/secret-sharing/valid/{slug}",
            get(valid_secret_sharing),
        )
        .route(
            "/api/v1/secret-sharing/reveal/{slug}",
            get(reveal_secret_sharing),
        );

    let protected = Router::new()
        .route(
            "/api/v1/workspace/{project_id}/secret-sharing",
            get(list_secret_sharing)
                .post(create_secret_sharing)
                .delete(purge_secret_sharing),
        )
        .route(
            "/api/v1/workspace/{project_id}/secret-sharing/{id}",
            put(update_secret_sharing).delete(delete_secret_sharing),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    if cfg.api_key.is_empty() {
        anyhow::bail!("an API key is required to serve project routes");
    }

    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("hush.db");
    let store = Store::open(&db_path).context("open store")?;

    let state = AppState {
        sharing: SharingService::new(store),
        api_key: cfg.api_key,
    };

    let app = router(state)
        .layer(build_cors(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "hush server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tower::ServiceExt;

    const KEY: &str = "test-api-key";

    fn app() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let state = AppState {
            sharing: SharingService::new(store),
            api_key: KEY.into(),
        };
        (router(state), dir)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {KEY}"));
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn public(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn create_body(slug: &str, value: &str, read_only_once: bool) -> Value {
        let minutes: i64 = value.parse().unwrap();
        json!({
            "secretContent": "Y2lwaGVydGV4dA==",
            "expireAtValue": value,
            "expireAtDate": (Utc::now() + Duration::minutes(minutes)).to_rfc3339(),
            "expireAtUnit": "min",
            "pathSlug": slug,
            "readOnlyOnce": read_only_once,
            "isPasswordProtected": false,
            "iv": "AAAAAAAAAAAAAAAAAAAAAA=="
        })
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _dir) = app();
        let (status, body) = send(&app, public("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn project_routes_require_bearer() {
        let (app, _dir) = app();
        let (status, body) = send(&app, public("/api/v1/workspace/p1/secret-sharing")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing or invalid API key");

        let wrong = Request::get("/api/v1/workspace/p1/secret-sharing")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn read_once_lifecycle_over_http() {
        let (app, _dir) = app();
        let (status, body) = send(
            &app,
            authed(
                "POST",
                "/api/v1/workspace/p1/secret-sharing",
                Some(create_body("abc-def-ghi", "1", true)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["secretSharing"]["pathSlug"], "abc-def-ghi");
        assert_eq!(body["secretSharing"]["projectId"], "p1");

        let (_, valid) = send(&app, public("/api/v1/secret-sharing/valid/abc-def-ghi")).await;
        assert_eq!(valid, Value::Bool(true));

        let (status, revealed) =
            send(&app, public("/api/v1/secret-sharing/reveal/abc-def-ghi")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(revealed["cipher"], "Y2lwaGVydGV4dA==");
        assert_eq!(revealed["iv"], "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(revealed["isPasswordProtected"], false);

        let (status, err) = send(&app, public("/api/v1/secret-sharing/reveal/abc-def-ghi")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "secret is invalid or has expired");

        let (_, valid) = send(&app, public("/api/v1/secret-sharing/valid/abc-def-ghi")).await;
        assert_eq!(valid, Value::Bool(false));
    }

    #[tokio::test]
    async fn expired_and_unknown_look_the_same() {
        let (app, _dir) = app();
        send(
            &app,
            authed(
                "POST",
                "/api/v1/workspace/p1/secret-sharing",
                Some(create_body("zero", "0", false)),
            ),
        )
        .await;

        let (s1, e1) = send(&app, public("/api/v1/secret-sharing/reveal/zero")).await;
        let (s2, e2) = send(&app, public("/api/v1/secret-sharing/reveal/never")).await;
        assert_eq!(s1, StatusCode::NOT_FOUND);
        assert_eq!((s1, e1), (s2, e2));
    }

    #[tokio::test]
    async fn duplicate_slug_is_bad_request() {
        let (app, _dir) = app();
        let req = || {
            authed(
                "POST",
                "/api/v1/workspace/p1/secret-sharing",
                Some(create_body("dup", "5", false)),
            )
        };
        assert_eq!(send(&app, req()).await.0, StatusCode::OK);
        let (status, body) = send(&app, req()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Path (/dup) already taken");
    }

    #[tokio::test]
    async fn manage_list_update_delete() {
        let (app, _dir) = app();
        let (_, created) = send(
            &app,
            authed(
                "POST",
                "/api/v1/workspace/p1/secret-sharing",
                Some(create_body("manage", "5", false)),
            ),
        )
        .await;
        let id = created["secretSharing"]["id"].as_str().unwrap().to_owned();

        let (status, listed) =
            send(&app, authed("GET", "/api/v1/workspace/p1/secret-sharing", None)).await;
        assert_eq!(status, StatusCode::OK);
        let rows = listed["secretSharing"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["secretContent"], "");

        let (status, updated) = send(
            &app,
            authed(
                "PUT",
                &format!("/api/v1/workspace/p1/secret-sharing/{id}"),
                Some(json!({
                    "expireAtValue": "2",
                    "expireAtDate": (Utc::now() + Duration::days(2)).to_rfc3339(),
                    "expireAtUnit": "day"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["secretSharing"]["expireAtUnit"], "day");
        assert_eq!(updated["secretSharing"]["expireAtValue"], 2);

        let (status, deleted) = send(
            &app,
            authed(
                "DELETE",
                &format!("/api/v1/workspace/p1/secret-sharing/{id}"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["secretSharing"]["id"], id.as_str());

        let (status, _) = send(
            &app,
            authed(
                "DELETE",
                &format!("/api/v1/workspace/p1/secret-sharing/{id}"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let (app, _dir) = app();
        let mut body = create_body("blank", "5", false);
        body["secretContent"] = json!("   ");
        let (status, err) = send(
            &app,
            authed("POST", "/api/v1/workspace/p1/secret-sharing", Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "Secret Content is required field");
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_bad_request() {
        let (app, _dir) = app();
        let mut body = create_body("abc", "5", false);
        body["expireAtValue"] = json!("abc");
        let resp = app
            .clone()
            .oneshot(authed(
                "POST",
                "/api/v1/workspace/p1/secret-sharing",
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "application/json"
        );
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let err: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(err["error"]
            .as_str()
            .unwrap()
            .contains("Enter a valid number"));

        let (status, err) = send(
            &app,
            authed(
                "PUT",
                "/api/v1/workspace/p1/secret-sharing/some-id",
                Some(json!({ "expireAtValue": 1, "expireAtUnit": "week" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(err["error"].is_string());
    }

    #[tokio::test]
    async fn purge_removes_only_that_project() {
        let (app, _dir) = app();
        for (project, slug) in [("p1", "a"), ("p1", "b"), ("p2", "c")] {
            let (status, _) = send(
                &app,
                authed(
                    "POST",
                    &format!("/api/v1/workspace/{project}/secret-sharing"),
                    Some(create_body(slug, "5", false)),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app,
            authed("DELETE", "/api/v1/workspace/p1/secret-sharing", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);

        let (_, valid) = send(&app, public("/api/v1/secret-sharing/valid/a")).await;
        assert_eq!(valid, Value::Bool(false));
        let (_, valid) = send(&app, public("/api/v1/secret-sharing/valid/c")).await;
        assert_eq!(valid, Value::Bool(true));

        let unauthed = Request::delete("/api/v1/workspace/p2/secret-sharing")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, unauthed).await.0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn configured_data_dir_is_created() {
        let root = tempdir().unwrap();
        let wanted = root.path().join("nested").join("data");
        let dir = resolve_data_dir(Some(&wanted)).unwrap();
        assert_eq!(dir, wanted);
        assert!(dir.is_dir());
    }
}
