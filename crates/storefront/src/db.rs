// =============================================================================
// Storefront Backend - Database Layer
// =============================================================================

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

// -----------------------------------------------------------------------------
// Models
// -----------------------------------------------------------------------------

/// User model. Accounts are provisioned by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "customer" => Some(Role::Customer),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}


impl User {
    /// Unknown role strings degrade to the least privileged role.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::Customer)
    }
}

/// Catalog product. `reviews_count` and `rating` are maintained by the
/// aggregate reconciler and never written from request payloads.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub stock: i64,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub reviews_count: i64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable product fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub stock: i64,
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: String,
    pub product_id: String,
    pub user_id: String,
    pub rating: i64,
    pub title: String,
    pub comment: String,
    pub verified_purchase: bool,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub total_cents: i64,
    pub shipping_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order line with a name/price snapshot taken at placement time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: Option<String>,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscriber {
    pub email: String,
    pub is_active: bool,
    pub subscribed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Catalog listing filters.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables and indexes. Safe to run on every start.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL DEFAULT 'customer',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
                stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
                image_url TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                reviews_count INTEGER NOT NULL DEFAULT 0 CHECK (reviews_count >= 0),
                rating REAL NOT NULL DEFAULT 5.0 CHECK (rating >= 0.0 AND rating <= 5.0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                title TEXT NOT NULL,
                comment TEXT NOT NULL,
                verified_purchase INTEGER NOT NULL DEFAULT 0,
                is_approved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(product_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                status TEXT NOT NULL DEFAULT 'pending',
                total_cents INTEGER NOT NULL,
                shipping_address TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_items (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id TEXT REFERENCES products(id) ON DELETE SET NULL,
                product_name TEXT NOT NULL,
                unit_price_cents INTEGER NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS newsletter_subscribers (
                email TEXT PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 1,
                subscribed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The aggregate recompute filters on (product_id, is_approved)
        let _ = sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reviews_product_approved ON reviews(product_id, is_approved)",
        )
        .execute(&self.pool)
        .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_user ON reviews(user_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_category ON products(category)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id)")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)")
            .execute(&self.pool)
            .await;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // =========================================================================
    // User Methods
    // =========================================================================

    /// Find user by ID.
    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Provision a user record.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        role: Role,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(role.as_str())
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
    }

    // =========================================================================
    // Product Methods
    // =========================================================================

    /// Find product by ID.
    pub async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List active products matching the query.
    pub async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, sqlx::Error> {
        let order_by = match query.sort.as_deref() {
            Some("price_asc") => "price_cents ASC",
            Some("price_desc") => "price_cents DESC",
            Some("rating") => "rating DESC, reviews_count DESC",
            _ => "created_at DESC",
        };
        let sql = format!(
            r#"
            SELECT * FROM products
            WHERE is_active = 1
              AND (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR name LIKE '%' || ?2 || '%')
            ORDER BY {order_by}
            "#
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(query.category.as_deref())
            .bind(query.q.as_deref())
            .fetch_all(&self.pool)
            .await
    }

    /// Insert a product with pristine review aggregates.
    pub async fn insert_product(&self, fields: &ProductFields) -> Result<Product, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (id, name, description, category, price_cents, stock, image_url, is_active, reviews_count, rating, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 5.0, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.category)
        .bind(fields.price_cents)
        .bind(fields.stock)
        .bind(&fields.image_url)
        .bind(fields.is_active)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
    }

    /// Update editable product fields. Aggregates are left untouched.
    pub async fn update_product(
        &self,
        id: &str,
        fields: &ProductFields,
    ) -> Result<Option<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
            SET name = ?, description = ?, category = ?, price_cents = ?, stock = ?,
                image_url = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.category)
        .bind(fields.price_cents)
        .bind(fields.stock)
        .bind(&fields.image_url)
        .bind(fields.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a product. Returns whether a row was removed.
    pub async fn delete_product(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// IDs of every product, active or not.
    pub async fn list_product_ids(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT id FROM products ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
    }

    // =========================================================================
    // Review Methods
    // =========================================================================

    /// Find review by ID.
    pub async fn find_review_by_id(&self, id: &str) -> Result<Option<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Approved reviews of a product, newest first.
    pub async fn list_approved_reviews(&self, product_id: &str) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE product_id = ? AND is_approved = 1 ORDER BY created_at DESC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
    }

    /// All reviews written by a user.
    pub async fn list_reviews_by_user(&self, user_id: &str) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Moderation listing. `approved = None` returns every review.
    pub async fn list_reviews(&self, approved: Option<bool>) -> Result<Vec<Review>, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE (?1 IS NULL OR is_approved = ?1) ORDER BY created_at DESC",
        )
        .bind(approved)
        .fetch_all(&self.pool)
        .await
    }

    /// Whether a user has a non-cancelled order containing the product.
    pub async fn has_purchased(&self, user_id: &str, product_id: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM orders o
                INNER JOIN order_items i ON i.order_id = o.id
                WHERE o.user_id = ? AND i.product_id = ? AND o.status != 'cancelled'
            )
            "#,
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
    }

    // =========================================================================
    // Order Methods
    // =========================================================================

    /// Find order by ID.
    pub async fn find_order_by_id(&self, id: &str) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Lines of an order.
    pub async fn get_order_items(&self, order_id: &str) -> Result<Vec<OrderItem>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = ? ORDER BY rowid")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Orders placed by a user, newest first.
    pub async fn list_orders_by_user(&self, user_id: &str) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Every order, optionally filtered by status.
    pub async fn list_orders(&self, status: Option<&str>) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
    }

    // =========================================================================
    // Newsletter Methods
    // =========================================================================

    /// Subscribe an email, reactivating a previous subscription.
    pub async fn upsert_subscriber(&self, email: &str) -> Result<Subscriber, sqlx::Error> {
        let now = Utc::now().to_rfc3339();

        sqlx::query_as::<_, Subscriber>(
            r#"
            INSERT INTO newsletter_subscribers (email, is_active, subscribed_at, updated_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                is_active = 1,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(email)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
    }

    /// Deactivate a subscription. Returns whether the email was known.
    pub async fn deactivate_subscriber(&self, email: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE newsletter_subscribers SET is_active = 0, updated_at = ? WHERE email = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active subscribers, oldest first.
    pub async fn list_active_subscribers(&self) -> Result<Vec<Subscriber>, sqlx::Error> {
        sqlx::query_as::<_, Subscriber>(
            "SELECT * FROM newsletter_subscribers WHERE is_active = 1 ORDER BY subscribed_at",
        )
        .fetch_all(&self.pool)
        .await
    }

    // =========================================================================
    // Settings Methods
    // =========================================================================

    pub async fn find_setting(&self, key: &str) -> Result<Option<Setting>, sqlx::Error> {
        sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_settings(&self) -> Result<Vec<Setting>, sqlx::Error> {
        sqlx::query_as::<_, Setting>("SELECT * FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert_setting(&self, key: &str, value: &str) -> Result<Setting, sqlx::Error> {
        sqlx::query_as::<_, Setting>(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete_setting(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
