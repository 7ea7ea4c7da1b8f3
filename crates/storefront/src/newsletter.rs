// =============================================================================
// Storefront Backend - Newsletter API
// =============================================================================

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::auth::AdminUser;
use crate::db::Subscriber;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewsletterRequest {
    pub email: String,
}

/// Trim and lower-case an address, rejecting anything that is not
/// `local@domain.tld` shaped.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    let invalid = || AppError::Validation(format!("invalid email address {raw:?}"));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let well_formed = !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'));

    if !well_formed {
        return Err(invalid());
    }
    Ok(email)
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<NewsletterRequest>,
) -> Result<Json<Subscriber>, AppError> {
    let email = normalize_email(&req.email)?;
    let subscriber = state.db.upsert_subscriber(&email).await?;

    tracing::info!("Newsletter subscription recorded");
    Ok(Json(subscriber))
}

/// Unknown addresses succeed too, so the endpoint does not leak membership.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<NewsletterRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = normalize_email(&req.email)?;
    state.db.deactivate_subscriber(&email).await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_subscribers(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<Subscriber>>, AppError> {
    Ok(Json(state.db.list_active_subscribers().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jo@Example.COM ").unwrap(), "jo@example.com");
        assert!(normalize_email("jo@example").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("jo@@example.com").is_err());
        assert!(normalize_email("jo smith@example.com").is_err());
        assert!(normalize_email("jo@.com").is_err());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (db, _dir) = test_db().await;

        let first = db.upsert_subscriber("jo@example.com").await.unwrap();
        let again = db.upsert_subscriber("jo@example.com").await.unwrap();
        assert_eq!(first.subscribed_at, again.subscribed_at);
        assert_eq!(db.list_active_subscribers().await.unwrap().len(), 1);

        assert!(db.deactivate_subscriber("jo@example.com").await.unwrap());
        assert!(db.list_active_subscribers().await.unwrap().is_empty());
        assert!(!db.deactivate_subscriber("nobody@example.com").await.unwrap());

        let back = db.upsert_subscriber("jo@example.com").await.unwrap();
        assert!(back.is_active);
        assert_eq!(db.list_active_subscribers().await.unwrap().len(), 1);
    }
}
