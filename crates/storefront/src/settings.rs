// =============================================================================
// Storefront Backend - Site Settings API
// =============================================================================
// Per-key JSON values (store name, banner text, shipping thresholds, ...)
// read by the storefront and edited from the back-office.
// =============================================================================

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{AdminUser, SuperAdminUser};
use crate::db::Setting;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl From<Setting> for SettingResponse {
    fn from(s: Setting) -> Self {
        // Rows written outside the API may hold bare text
        let value = serde_json::from_str(&s.value).unwrap_or(serde_json::Value::String(s.value));
        Self {
            key: s.key,
            value,
            updated_at: s.updated_at,
        }
    }
}

pub fn validate_key(key: &str) -> Result<(), AppError> {
    let ok = (1..=64).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'));

    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid setting key {key:?}")))
    }
}

pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SettingResponse>, AppError> {
    validate_key(&key)?;
    let setting = state
        .db
        .find_setting(&key)
        .await?
        .ok_or(AppError::NotFound("Setting"))?;

    Ok(Json(setting.into()))
}

pub async fn list_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<SettingResponse>>, AppError> {
    let settings = state.db.list_settings().await?;
    Ok(Json(settings.into_iter().map(Into::into).collect()))
}

pub async fn put_setting(
    State(state): State<AppState>,
    SuperAdminUser(admin): SuperAdminUser,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<SettingResponse>, AppError> {
    validate_key(&key)?;
    let setting = state.db.upsert_setting(&key, &value.to_string()).await?;

    tracing::info!(key = %key, admin_id = %admin.user_id, "Setting updated");
    Ok(Json(setting.into()))
}

pub async fn delete_setting(
    State(state): State<AppState>,
    _admin: SuperAdminUser,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    validate_key(&key)?;
    if !state.db.delete_setting(&key).await? {
        return Err(AppError::NotFound("Setting"));
    }
    Ok(StatusCode::NO_CONTENT)
}
