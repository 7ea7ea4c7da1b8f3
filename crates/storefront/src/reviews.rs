// =============================================================================
// Storefront Backend - Reviews API
// =============================================================================
// Every mutation (create / approve / reject / delete) writes the review and
// reconciles the product's aggregates in one transaction. The review write is
// the transaction's first statement, so the recompute reads after it and the
// client never sees the mutation succeed with stale aggregates.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::aggregates::{reconcile, ReconcileOutcome};
use crate::auth::{AdminUser, AuthUser};
use crate::db::{Database, Review};
use crate::error::AppError;
use crate::AppState;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i64,
    pub title: String,
    pub comment: String,
}

impl CreateReviewRequest {
    fn validate(&self) -> Result<(), AppError> {
        if !(1..=5).contains(&self.rating) {
            return Err(AppError::Validation("rating must be between 1 and 5".into()));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title is required".into()));
        }
        if self.comment.trim().is_empty() {
            return Err(AppError::Validation("comment is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewStatusQuery {
    pub status: Option<String>,
}

// =============================================================================
// Mutations
// =============================================================================

/// Create a review and reconcile its product.
pub async fn create_review(
    db: &Database,
    user_id: &str,
    product_id: &str,
    req: &CreateReviewRequest,
    auto_approve: bool,
) -> Result<Review, AppError> {
    req.validate()?;

    db.find_product_by_id(product_id)
        .await?
        .ok_or(AppError::NotFound("Product"))?;
    let verified_purchase = db.has_purchased(user_id, product_id).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut tx = db.pool().begin().await?;

    let review = sqlx::query_as::<_, Review>(
        r#"
        INSERT INTO reviews (id, product_id, user_id, rating, title, comment, verified_purchase, is_approved, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(product_id)
    .bind(user_id)
    .bind(req.rating)
    .bind(req.title.trim())
    .bind(req.comment.trim())
    .bind(verified_purchase)
    .bind(auto_approve)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await
    .map_err(insert_error)?;

    reconcile(&mut tx, product_id).await?;
    tx.commit().await?;

    tracing::info!(review_id = %review.id, product_id, approved = review.is_approved, "Review created");
    Ok(review)
}

fn insert_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict("you have already reviewed this product".into());
        }
        if db_err.is_foreign_key_violation() {
            return AppError::NotFound("Product");
        }
    }
    AppError::Database(err)
}

/// Set a review's approval flag and reconcile its product.
pub async fn set_review_approval(
    db: &Database,
    review_id: &str,
    approved: bool,
) -> Result<Review, AppError> {
    let mut tx = db.pool().begin().await?;

    let review = sqlx::query_as::<_, Review>(
        "UPDATE reviews SET is_approved = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(approved)
    .bind(Utc::now().to_rfc3339())
    .bind(review_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Review"))?;

    reconcile(&mut tx, &review.product_id).await?;
    tx.commit().await?;

    tracing::info!(review_id, product_id = %review.product_id, approved, "Review moderated");
    Ok(review)
}

/// Delete a review. Owners may delete their own; admins may delete any.
pub async fn delete_review(db: &Database, review_id: &str, requester: &AuthUser) -> Result<(), AppError> {
    let mut tx = db.pool().begin().await?;

    let product_id = sqlx::query_scalar::<_, String>(
        "DELETE FROM reviews WHERE id = ? AND (user_id = ? OR ?) RETURNING product_id",
    )
    .bind(review_id)
    .bind(&requester.user_id)
    .bind(requester.is_admin())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(product_id) = product_id else {
        tx.rollback().await?;
        return match db.find_review_by_id(review_id).await? {
            Some(_) => Err(AppError::Forbidden),
            None => Err(AppError::NotFound("Review")),
        };
    };

    if let ReconcileOutcome::ProductNotFound = reconcile(&mut tx, &product_id).await? {
        tracing::warn!(review_id, %product_id, "Deleted review referenced a missing product");
    }
    tx.commit().await?;

    tracing::info!(review_id, %product_id, user_id = %requester.user_id, "Review deleted");
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// Approved reviews of a product.
pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<Vec<Review>>, AppError> {
    state
        .db
        .find_product_by_id(&product_id)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    Ok(Json(state.db.list_approved_reviews(&product_id).await?))
}

pub async fn post_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let review = create_review(
        &state.db,
        &user.user_id,
        &product_id,
        &req,
        state.config.reviews_auto_approve,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(review)))
}

/// The caller's own reviews, approved or not.
pub async fn get_my_reviews(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Review>>, AppError> {
    Ok(Json(state.db.list_reviews_by_user(&user.user_id).await?))
}

pub async fn remove_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(review_id): Path<String>,
) -> Result<StatusCode, AppError> {
    delete_review(&state.db, &review_id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Moderation queue. `status` is `pending`, `approved` or `all` (default).
pub async fn admin_list_reviews(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ReviewStatusQuery>,
) -> Result<Json<Vec<Review>>, AppError> {
    let approved = match query.status.as_deref() {
        None | Some("all") => None,
        Some("pending") => Some(false),
        Some("approved") => Some(true),
        Some(other) => {
            return Err(AppError::Validation(format!("unknown review status {other:?}")));
        }
    };

    Ok(Json(state.db.list_reviews(approved).await?))
}

pub async fn approve_review(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(review_id): Path<String>,
) -> Result<Json<Review>, AppError> {
    Ok(Json(set_review_approval(&state.db, &review_id, true).await?))
}

pub async fn reject_review(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(review_id): Path<String>,
) -> Result<Json<Review>, AppError> {
    Ok(Json(set_review_approval(&state.db, &review_id, false).await?))
}
