// =============================================================================
// Storefront Backend - Library Root
// =============================================================================
// Table of Contents:
// 1. Modules
// 2. Application State
// 3. Router Setup
// =============================================================================

// -----------------------------------------------------------------------------
// 1. Modules
// -----------------------------------------------------------------------------

pub mod aggregates;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod newsletter;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod settings;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;

// -----------------------------------------------------------------------------
// 2. Application State
// -----------------------------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
}

// -----------------------------------------------------------------------------
// 3. Router Setup
// -----------------------------------------------------------------------------

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.frontend_url == "*" {
        return cors.allow_origin(Any);
    }
    match config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(origin = %config.frontend_url, "FRONTEND_URL is not a valid origin, CORS disabled");
            cors
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Auth
        .route("/api/auth/me", get(auth::get_current_user))
        // Catalog
        .route("/api/products", get(products::list_products).post(products::create_product))
        .route(
            "/api/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        // Reviews
        .route(
            "/api/products/:id/reviews",
            get(reviews::list_product_reviews).post(reviews::post_review),
        )
        .route("/api/reviews/mine", get(reviews::get_my_reviews))
        .route("/api/reviews/:id", delete(reviews::remove_review))
        // Orders
        .route("/api/orders", post(orders::create_order))
        .route("/api/orders/mine", get(orders::get_my_orders))
        .route("/api/orders/:id", get(orders::get_order))
        // Newsletter
        .route("/api/newsletter/subscribe", post(newsletter::subscribe))
        .route("/api/newsletter/unsubscribe", post(newsletter::unsubscribe))
        // Settings (public read)
        .route("/api/settings/:key", get(settings::get_setting))
        // Back-office
        .route("/api/admin/reviews", get(reviews::admin_list_reviews))
        .route("/api/admin/reviews/:id/approve", post(reviews::approve_review))
        .route("/api/admin/reviews/:id/reject", post(reviews::reject_review))
        .route("/api/admin/products/reconcile", post(products::reconcile_catalog))
        .route("/api/admin/orders", get(orders::admin_list_orders))
        .route("/api/admin/orders/:id/status", put(orders::admin_update_order_status))
        .route("/api/admin/newsletter", get(newsletter::list_subscribers))
        .route("/api/admin/settings", get(settings::list_settings))
        .route(
            "/api/admin/settings/:key",
            put(settings::put_setting).delete(settings::delete_setting),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::db::Role;
    use crate::test_support::{bearer, seed_product, seed_user, seed_user_with_role, test_state};

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        seed_product(&state.db, "Kettle").await;

        // The configured URL points at the database the state is serving
        let reopened = Database::new(&state.config.database_url, 1).await.unwrap();
        assert_eq!(reopened.list_product_ids().await.unwrap().len(), 1);

        let app = create_router(state);

        let response = send(&app, "GET", "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_review_lifecycle_over_http() {
        let (state, _dir) = test_state().await;
        let product = seed_product(&state.db, "Kettle").await;
        let buyer = seed_user(&state.db, "buyer").await;
        let admin = seed_user_with_role(&state.db, "admin", Role::Admin).await;
        let buyer_token = bearer(&state, &buyer.id);
        let admin_token = bearer(&state, &admin.id);
        let app = create_router(state);

        let reviews_uri = format!("/api/products/{}/reviews", product.id);
        let review = json!({ "rating": 4, "title": "Good", "comment": "Boils fast" });

        // Anonymous writes are refused
        let response = send(&app, "POST", &reviews_uri, None, Some(review.clone())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, "POST", &reviews_uri, Some(&buyer_token), Some(review)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["is_approved"], json!(false));
        let review_id = created["id"].as_str().unwrap().to_string();

        // Pending reviews are neither listed nor counted
        let listed = json_body(send(&app, "GET", &reviews_uri, None, None).await).await;
        assert_eq!(listed, json!([]));

        // Customers cannot moderate
        let approve_uri = format!("/api/admin/reviews/{review_id}/approve");
        let response = send(&app, "POST", &approve_uri, Some(&buyer_token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, "POST", &approve_uri, Some(&admin_token), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let product_uri = format!("/api/products/{}", product.id);
        let stored = json_body(send(&app, "GET", &product_uri, None, None).await).await;
        assert_eq!(stored["reviews_count"], json!(1));
        assert_eq!(stored["rating"], json!(4.0));

        let response = send(&app, "DELETE", &format!("/api/reviews/{review_id}"), Some(&buyer_token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let stored = json_body(send(&app, "GET", &product_uri, None, None).await).await;
        assert_eq!(stored["reviews_count"], json!(0));
        assert_eq!(stored["rating"], json!(5.0));
    }

    #[tokio::test]
    async fn test_admin_product_payload_ignores_aggregates() {
        let (state, _dir) = test_state().await;
        let admin = seed_user_with_role(&state.db, "admin", Role::Admin).await;
        let token = bearer(&state, &admin.id);
        let app = create_router(state);

        let payload = json!({
            "name": "Lamp",
            "category": "home",
            "price_cents": 2500,
            "stock": 3,
            "rating": 1.0,
            "reviews_count": 40
        });
        let response = send(&app, "POST", "/api/products", Some(&token), Some(payload)).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let created = json_body(response).await;
        assert_eq!(created["reviews_count"], json!(0));
        assert_eq!(created["rating"], json!(5.0));

        let response = send(&app, "POST", "/api/admin/products/reconcile", Some(&token), None).await;
        assert_eq!(json_body(response).await, json!({ "reconciled": 1 }));
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_as_503() {
        let (state, _dir) = test_state().await;
        let product = seed_product(&state.db, "Kettle").await;
        let buyer = seed_user(&state.db, "buyer").await;
        let token = bearer(&state, &buyer.id);

        // Make the product row unwritable so the aggregate update fails
        sqlx::query(
            r#"
            CREATE TRIGGER freeze_products BEFORE UPDATE ON products
            BEGIN SELECT RAISE(ABORT, 'products are read-only'); END
            "#,
        )
        .execute(state.db.pool())
        .await
        .unwrap();

        let db = state.db.clone();
        let app = create_router(state);
        let review = json!({ "rating": 2, "title": "Meh", "comment": "Fine" });
        let response = send(
            &app,
            "POST",
            &format!("/api/products/{}/reviews", product.id),
            Some(&token),
            Some(review),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // The review insert was rolled back with the failed recompute
        assert!(db.list_reviews_by_user(&buyer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_roles() {
        let (state, _dir) = test_state().await;
        let admin = seed_user_with_role(&state.db, "admin", Role::Admin).await;
        let root = seed_user_with_role(&state.db, "root", Role::SuperAdmin).await;
        let admin_token = bearer(&state, &admin.id);
        let root_token = bearer(&state, &root.id);
        let app = create_router(state);

        let value = json!({ "text": "Spring sale" });
        let response = send(&app, "PUT", "/api/admin/settings/banner", Some(&admin_token), Some(value.clone())).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, "PUT", "/api/admin/settings/banner", Some(&root_token), Some(value.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let stored = json_body(send(&app, "GET", "/api/settings/banner", None, None).await).await;
        assert_eq!(stored["value"], value);

        let response = send(&app, "GET", "/api/settings/missing", None, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_newsletter_over_http() {
        let (state, _dir) = test_state().await;
        let app = create_router(state);

        let response = send(&app, "POST", "/api/newsletter/subscribe", None, Some(json!({ "email": "not-an-email" }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, "POST", "/api/newsletter/subscribe", None, Some(json!({ "email": "Jo@Example.com" }))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["email"], json!("jo@example.com"));
    }
}
