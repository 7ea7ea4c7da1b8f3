// Fixtures shared by the unit tests: a throwaway on-disk database per test.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::auth::generate_token;
use crate::config::Config;
use crate::db::{Database, Product, ProductFields, Review, Role, User};
use crate::AppState;

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("storefront.db").display())
}

pub async fn test_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let db = Database::new(&database_url(&dir), 5).await.unwrap();
    db.run_migrations().await.unwrap();
    (db, dir)
}

pub async fn test_state() -> (AppState, TempDir) {
    let (db, dir) = test_db().await;
    let state = AppState {
        config: Arc::new(Config::for_tests(&database_url(&dir))),
        db,
    };
    (state, dir)
}

pub fn bearer(state: &AppState, user_id: &str) -> String {
    generate_token(user_id, &state.config.jwt_secret, 1).unwrap()
}

pub async fn seed_user_with_role(db: &Database, name: &str, role: Role) -> User {
    let id = uuid::Uuid::new_v4().to_string();
    db.create_user(&id, name, &format!("{name}@example.com"), role)
        .await
        .unwrap()
}

pub async fn seed_user(db: &Database, name: &str) -> User {
    seed_user_with_role(db, name, Role::Customer).await
}

pub fn fields(name: &str, category: &str, price_cents: i64) -> ProductFields {
    ProductFields {
        name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        price_cents,
        stock: 10,
        image_url: None,
        is_active: true,
    }
}

pub async fn seed_product(db: &Database, name: &str) -> Product {
    db.insert_product(&fields(name, "general", 1000)).await.unwrap()
}

/// Insert a review row directly, without reconciling its product.
pub async fn seed_review(
    db: &Database,
    product_id: &str,
    user_id: &str,
    rating: i64,
    approved: bool,
) -> Review {
    let now = Utc::now().to_rfc3339();
    sqlx::query_as::<_, Review>(
        r#"
        INSERT INTO reviews (id, product_id, user_id, rating, title, comment, verified_purchase, is_approved, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'title', 'comment', 0, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(product_id)
    .bind(user_id)
    .bind(rating)
    .bind(approved)
    .bind(&now)
    .bind(&now)
    .fetch_one(db.pool())
    .await
    .unwrap()
}
