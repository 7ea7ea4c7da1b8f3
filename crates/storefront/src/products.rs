// =============================================================================
// Storefront Backend - Catalog API
// =============================================================================
// Request payloads are `ProductFields`, which has no aggregate fields: a
// client-sent `rating` or `reviews_count` is ignored by deserialization.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::auth::AdminUser;
use crate::db::{Product, ProductFields, ProductQuery};
use crate::error::AppError;
use crate::AppState;

fn validate(fields: &ProductFields) -> Result<(), AppError> {
    if fields.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".into()));
    }
    if fields.category.trim().is_empty() {
        return Err(AppError::Validation("category is required".into()));
    }
    if fields.price_cents < 0 {
        return Err(AppError::Validation("price_cents must not be negative".into()));
    }
    if fields.stock < 0 {
        return Err(AppError::Validation("stock must not be negative".into()));
    }
    Ok(())
}

// =============================================================================
// Public
// =============================================================================

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<Product>>, AppError> {
    Ok(Json(state.db.list_products(&query).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, AppError> {
    let product = state
        .db
        .find_product_by_id(&id)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    Ok(Json(product))
}

// =============================================================================
// Admin
// =============================================================================

pub async fn create_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(fields): Json<ProductFields>,
) -> Result<impl IntoResponse, AppError> {
    validate(&fields)?;
    let product = state.db.insert_product(&fields).await?;

    tracing::info!(product_id = %product.id, admin_id = %admin.user_id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(fields): Json<ProductFields>,
) -> Result<Json<Product>, AppError> {
    validate(&fields)?;
    let product = state
        .db
        .update_product(&id, &fields)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.db.delete_product(&id).await? {
        return Err(AppError::NotFound("Product"));
    }

    tracing::info!(product_id = %id, admin_id = %admin.user_id, "Product deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Run the aggregate repair sweep over the whole catalog.
pub async fn reconcile_catalog(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let reconciled = state.db.reconcile_all().await?;
    Ok(Json(serde_json::json!({ "reconciled": reconciled })))
}
