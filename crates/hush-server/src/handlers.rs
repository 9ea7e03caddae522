use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::json;

use crate::{
    error::SharingError,
    store::{ExpiryUnit, NewShare, RevealedSecret, SecretShare, ShareDuration},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Bodies ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub secret_content: String,
    #[serde(deserialize_with = "expire_value")]
    pub expire_at_value: u32,
    pub expire_at_date: DateTime<Utc>,
    pub expire_at_unit: ExpiryUnit,
    pub path_slug: String,
    pub read_only_once: Option<bool>,
    pub is_password_protected: bool,
    pub iv: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDurationRequest {
    #[serde(deserialize_with = "expire_value")]
    pub expire_at_value: u32,
    pub expire_at_date: DateTime<Utc>,
    pub expire_at_unit: ExpiryUnit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSharingResponse {
    pub secret_sharing: SecretShare,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSharingListResponse {
    pub secret_sharing: Vec<SecretShare>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

/// Accepts `5` or `"5"`; the browser client sends the duration as a string.
fn expire_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
            .parse()
            .map_err(|_| de::Error::custom("expireAtValue is out of range")),
        Raw::Text(_) => Err(de::Error::custom("Enter a valid number")),
    }
}

// ── Project routes ────────────────────────────────────────────────────────────

pub async fn list_secret_sharing(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<SecretSharingListResponse>, SharingError> {
    let secret_sharing = state.sharing.list(&project_id)?;
    Ok(Json(SecretSharingListResponse { secret_sharing }))
}

pub async fn create_secret_sharing(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<SecretSharingResponse>, SharingError> {
    let Json(body) = payload?;
    let secret_sharing = state.sharing.create(NewShare {
        project_id,
        secret_content: body.secret_content,
        iv: body.iv,
        path_slug: body.path_slug,
        expire_at_value: body.expire_at_value,
        expire_at_unit: body.expire_at_unit,
        expire_at: body.expire_at_date,
        is_password_protected: body.is_password_protected,
        read_only_once: body.read_only_once.unwrap_or(false),
    })?;
    Ok(Json(SecretSharingResponse { secret_sharing }))
}

pub async fn update_secret_sharing(
    State(state): State<AppState>,
    Path((project_id, id)): Path<(String, String)>,
    payload: Result<Json<UpdateDurationRequest>, JsonRejection>,
) -> Result<Json<SecretSharingResponse>, SharingError> {
    let Json(body) = payload?;
    let secret_sharing = state.sharing.update_duration(
        &id,
        &project_id,
        ShareDuration {
            expire_at_value: body.expire_at_value,
            expire_at_unit: body.expire_at_unit,
            expire_at: body.expire_at_date,
        },
    )?;
    Ok(Json(SecretSharingResponse { secret_sharing }))
}

pub async fn delete_secret_sharing(
    State(state): State<AppState>,
    Path((project_id, id)): Path<(String, String)>,
) -> Result<Json<SecretSharingResponse>, SharingError> {
    let secret_sharing = state.sharing.delete(&id, &project_id)?;
    Ok(Json(SecretSharingResponse { secret_sharing }))
}

/// Cascade used when the owning project goes away.
pub async fn purge_secret_sharing(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<PurgeResponse>, SharingError> {
    let deleted = state.sharing.purge_project(&project_id)?;
    Ok(Json(PurgeResponse { deleted }))
}

// ── Public routes ─────────────────────────────────────────────────────────────

pub async fn valid_secret_sharing(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<bool>, SharingError> {
    Ok(Json(state.sharing.is_valid(&slug)?))
}

pub async fn reveal_secret_sharing(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<RevealedSecret>, SharingError> {
    Ok(Json(state.sharing.reveal(&slug)?))
}
