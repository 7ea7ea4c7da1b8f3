// =============================================================================
// Storefront Backend - Orders API
// =============================================================================

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, AuthUser};
use crate::db::{Database, Order, OrderItem};
use crate::error::AppError;
use crate::AppState;

// =============================================================================
// Status Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Paid, Shipped) | (Shipped, Delivered) | (Pending, Cancelled) | (Paid, Cancelled)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(AppError::Validation(format!("unknown order status {other:?}"))),
        }
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

// =============================================================================
// Operations
// =============================================================================

/// Place an order. Stock is reserved line by line inside one transaction;
/// any line that cannot be filled rolls the whole order back.
pub async fn place_order(
    db: &Database,
    user_id: &str,
    req: &PlaceOrderRequest,
) -> Result<OrderResponse, AppError> {
    let shipping_address = req.shipping_address.trim();
    if shipping_address.is_empty() {
        return Err(AppError::Validation("shipping_address is required".into()));
    }
    if req.items.is_empty() {
        return Err(AppError::Validation("an order needs at least one item".into()));
    }

    // Merge repeated products so each row is decremented once
    let mut lines: BTreeMap<&str, i64> = BTreeMap::new();
    for item in &req.items {
        if item.quantity < 1 {
            return Err(AppError::Validation("quantity must be at least 1".into()));
        }
        let merged = lines.entry(item.product_id.as_str()).or_default();
        *merged = merged.checked_add(item.quantity).ok_or_else(quantity_overflow)?;
    }

    let order_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut tx = db.pool().begin().await?;

    let mut snapshots = Vec::with_capacity(lines.len());
    for (&product_id, &quantity) in &lines {
        let reserved = sqlx::query_as::<_, (String, i64)>(
            r#"
            UPDATE products
            SET stock = stock - ?1, updated_at = ?2
            WHERE id = ?3 AND is_active = 1 AND stock >= ?1
            RETURNING name, price_cents
            "#,
        )
        .bind(quantity)
        .bind(&now)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        match reserved {
            Some((name, price_cents)) => snapshots.push((product_id, name, price_cents, quantity)),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM products WHERE id = ? AND is_active = 1)",
                )
                .bind(product_id)
                .fetch_one(&mut *tx)
                .await?;

                return Err(if exists {
                    AppError::Validation(format!("insufficient stock for product {product_id}"))
                } else {
                    AppError::NotFound("Product")
                });
            }
        }
    }

    let total_cents = snapshots
        .iter()
        .try_fold(0i64, |total, (_, _, price, qty)| {
            price.checked_mul(*qty).and_then(|line| total.checked_add(line))
        })
        .ok_or_else(quantity_overflow)?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (id, user_id, status, total_cents, shipping_address, created_at, updated_at)
        VALUES (?, ?, 'pending', ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&order_id)
    .bind(user_id)
    .bind(total_cents)
    .bind(shipping_address)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    let mut items = Vec::with_capacity(snapshots.len());
    for (product_id, name, unit_price_cents, quantity) in snapshots {
        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (id, order_id, product_id, product_name, unit_price_cents, quantity)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&order_id)
        .bind(product_id)
        .bind(&name)
        .bind(unit_price_cents)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;
        items.push(item);
    }

    tx.commit().await?;

    tracing::info!(order_id = %order.id, user_id, total_cents, "Order placed");
    Ok(OrderResponse { order, items })
}

fn quantity_overflow() -> AppError {
    AppError::Validation("order quantity is too large".into())
}

/// Move an order along its lifecycle. Cancelling restocks every line whose
/// product still exists.
pub async fn update_order_status(
    db: &Database,
    order_id: &str,
    next: OrderStatus,
) -> Result<Order, AppError> {
    let mut tx = db.pool().begin().await?;

    // Compare-and-set against each status the transition may start from
    let allowed_from: Vec<&str> = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ]
    .iter()
    .filter(|from| from.can_transition_to(next))
    .map(|from| from.as_str())
    .collect();

    let mut updated = None;
    for from in &allowed_from {
        updated = sqlx::query_as::<_, Order>(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ? RETURNING *",
        )
        .bind(next.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(order_id)
        .bind(*from)
        .fetch_optional(&mut *tx)
        .await?;
        if updated.is_some() {
            break;
        }
    }

    let Some(order) = updated else {
        tx.rollback().await?;
        return match db.find_order_by_id(order_id).await? {
            Some(current) => Err(AppError::Validation(format!(
                "cannot move order from {} to {}",
                current.status,
                next.as_str()
            ))),
            None => Err(AppError::NotFound("Order")),
        };
    };

    if next == OrderStatus::Cancelled {
        sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + (
                SELECT COALESCE(SUM(i.quantity), 0) FROM order_items i
                WHERE i.order_id = ?1 AND i.product_id = products.id
            )
            WHERE id IN (SELECT product_id FROM order_items WHERE order_id = ?1 AND product_id IS NOT NULL)
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(order_id, status = next.as_str(), "Order status updated");
    Ok(order)
}

async fn load_order(db: &Database, order: Order) -> Result<OrderResponse, AppError> {
    let items = db.get_order_items(&order.id).await?;
    Ok(OrderResponse { order, items })
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = place_order(&state.db, &user.user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let mut responses = Vec::new();
    for order in state.db.list_orders_by_user(&user.user_id).await? {
        responses.push(load_order(&state.db, order).await?);
    }
    Ok(Json(responses))
}

/// Owners and admins only; others get a 404 rather than a 403.
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .db
        .find_order_by_id(&order_id)
        .await?
        .filter(|o| o.user_id == user.user_id || user.is_admin())
        .ok_or(AppError::NotFound("Order"))?;

    Ok(Json(load_order(&state.db, order).await?))
}

pub async fn admin_list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(raw.parse::<OrderStatus>()?.as_str()),
        None => None,
    };
    Ok(Json(state.db.list_orders(status).await?))
}

pub async fn admin_update_order_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(order_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(update_order_status(&state.db, &order_id, req.status).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fields, seed_product, seed_user, test_db};

    fn line(product_id: &str, quantity: i64) -> OrderLineRequest {
        OrderLineRequest {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    fn order_of(items: Vec<OrderLineRequest>) -> PlaceOrderRequest {
        PlaceOrderRequest {
            items,
            shipping_address: "1 Main St".into(),
        }
    }

    async fn stock(db: &Database, id: &str) -> i64 {
        db.find_product_by_id(id).await.unwrap().unwrap().stock
    }

    #[test]
    fn test_status_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[tokio::test]
    async fn test_place_order_reserves_stock() {
        let (db, _dir) = test_db().await;
        let p = seed_product(&db, "Kettle").await; // 10 in stock at 1000 cents
        let u = seed_user(&db, "buyer").await;

        let placed = place_order(&db, &u.id, &order_of(vec![line(&p.id, 2), line(&p.id, 1)]))
            .await
            .unwrap();

        assert_eq!(placed.order.status, "pending");
        assert_eq!(placed.order.total_cents, 3000);
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].quantity, 3);
        assert_eq!(placed.items[0].product_name, "Kettle");
        assert_eq!(stock(&db, &p.id).await, 7);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back() {
        let (db, _dir) = test_db().await;
        let a = seed_product(&db, "A").await;
        let b = seed_product(&db, "B").await;
        let u = seed_user(&db, "buyer").await;

        let err = place_order(&db, &u.id, &order_of(vec![line(&a.id, 2), line(&b.id, 11)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(stock(&db, &a.id).await, 10);
        assert!(db.list_orders_by_user(&u.id).await.unwrap().is_empty());

        let err = place_order(&db, &u.id, &order_of(vec![line("missing", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Product")));

        let err = place_order(&db, &u.id, &order_of(vec![line(&a.id, 0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_oversized_quantities_are_rejected() {
        let (db, _dir) = test_db().await;
        let p = seed_product(&db, "Kettle").await;
        let u = seed_user(&db, "buyer").await;

        let err = place_order(&db, &u.id, &order_of(vec![line(&p.id, i64::MAX), line(&p.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(stock(&db, &p.id).await, 10);

        // Enough stock to reserve, but the order total does not fit
        let mut bulk = fields("Bulk", "general", 1000);
        bulk.stock = i64::MAX;
        let bulk = db.insert_product(&bulk).await.unwrap();
        let err = place_order(&db, &u.id, &order_of(vec![line(&bulk.id, i64::MAX / 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(stock(&db, &bulk.id).await, i64::MAX);
        assert!(db.list_orders_by_user(&u.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_restocks() {
        let (db, _dir) = test_db().await;
        let p = seed_product(&db, "Lamp").await;
        let u = seed_user(&db, "buyer").await;
        let placed = place_order(&db, &u.id, &order_of(vec![line(&p.id, 4)])).await.unwrap();
        assert_eq!(stock(&db, &p.id).await, 6);

        let paid = update_order_status(&db, &placed.order.id, OrderStatus::Paid).await.unwrap();
        assert_eq!(paid.status, "paid");

        update_order_status(&db, &placed.order.id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(stock(&db, &p.id).await, 10);

        // Cancelled is terminal, so stock is never returned twice
        let err = update_order_status(&db, &placed.order.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(stock(&db, &p.id).await, 10);

        let err = update_order_status(&db, "missing", OrderStatus::Paid).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Order")));
    }

    #[tokio::test]
    async fn test_deleted_product_keeps_order_snapshot() {
        let (db, _dir) = test_db().await;
        let p = seed_product(&db, "Chair").await;
        let u = seed_user(&db, "buyer").await;
        let placed = place_order(&db, &u.id, &order_of(vec![line(&p.id, 1)])).await.unwrap();

        assert!(db.delete_product(&p.id).await.unwrap());

        let items = db.get_order_items(&placed.order.id).await.unwrap();
        assert_eq!(items[0].product_id, None);
        assert_eq!(items[0].product_name, "Chair");
        assert_eq!(items[0].unit_price_cents, 1000);

        // Cancelling with a vanished product still succeeds
        update_order_status(&db, &placed.order.id, OrderStatus::Cancelled).await.unwrap();
    }
}
