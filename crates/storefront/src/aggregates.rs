// =============================================================================
// Storefront Backend - Review Aggregates
// =============================================================================
// Keeps `products.reviews_count` and `products.rating` equal to the count and
// rounded mean of the product's approved reviews.
//
// Callers run `reconcile` on the same connection (transaction) that performed
// the review mutation, after that mutation. The transaction therefore already
// holds SQLite's write lock when the recompute reads, so the count/sum it sees
// includes its own mutation and cannot be torn by a concurrent writer.
// =============================================================================

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::Database;

/// Rating published for a product with no approved reviews.
pub const DEFAULT_RATING: f64 = 5.0;

/// Recomputed aggregate fields of one product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReviewAggregate {
    pub reviews_count: i64,
    pub rating: f64,
}

impl ReviewAggregate {
    /// Build the aggregate from the approved-review count and rating sum.
    ///
    /// The mean is rounded to one decimal, halves away from zero. The
    /// arithmetic is done in integer tenths so `4.25` really is a half.
    pub fn from_totals(count: i64, sum: i64) -> Self {
        if count <= 0 {
            return Self {
                reviews_count: 0,
                rating: DEFAULT_RATING,
            };
        }

        // round(10 * sum / count) == floor((20 * sum + count) / (2 * count)) for sum >= 0
        let tenths = (20 * sum + count).div_euclid(2 * count);

        Self {
            reviews_count: count,
            rating: tenths as f64 / 10.0,
        }
    }
}

/// Result of a reconcile that reached the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// The product row now holds these values.
    Updated(ReviewAggregate),
    /// No such product. Nothing was written.
    ProductNotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("review aggregates for product {product_id} could not be reconciled: {source}")]
    StorageUnavailable {
        product_id: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Recompute and persist the review aggregates of one product.
///
/// Issues exactly one read (count + sum of approved ratings) and one
/// single-statement update, both scoped to `product_id`.
pub async fn reconcile(
    conn: &mut SqliteConnection,
    product_id: &str,
) -> Result<ReconcileOutcome, ReconcileError> {
    let storage = |source: sqlx::Error| ReconcileError::StorageUnavailable {
        product_id: product_id.to_string(),
        source,
    };

    let (count, sum) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(rating), 0)
        FROM reviews
        WHERE product_id = ? AND is_approved = 1
        "#,
    )
    .bind(product_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage)?;

    let aggregate = ReviewAggregate::from_totals(count, sum);

    let result = sqlx::query(
        "UPDATE products SET reviews_count = ?, rating = ?, updated_at = ? WHERE id = ?",
    )
    .bind(aggregate.reviews_count)
    .bind(aggregate.rating)
    .bind(Utc::now().to_rfc3339())
    .bind(product_id)
    .execute(&mut *conn)
    .await
    .map_err(storage)?;

    if result.rows_affected() == 0 {
        tracing::warn!(product_id, "Skipping review aggregates for missing product");
        return Ok(ReconcileOutcome::ProductNotFound);
    }

    tracing::debug!(
        product_id,
        reviews_count = aggregate.reviews_count,
        rating = aggregate.rating,
        "Review aggregates reconciled"
    );
    Ok(ReconcileOutcome::Updated(aggregate))
}

impl Database {
    /// Reconcile one product in its own short transaction.
    pub async fn reconcile_product(&self, product_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let storage = |source: sqlx::Error| ReconcileError::StorageUnavailable {
            product_id: product_id.to_string(),
            source,
        };

        let mut tx = self.pool().begin().await.map_err(storage)?;
        let outcome = reconcile(&mut tx, product_id).await?;
        tx.commit().await.map_err(storage)?;

        Ok(outcome)
    }

    /// Repair sweep: reconcile every product, one transaction each.
    ///
    /// Returns how many products were processed. A product deleted while the
    /// sweep runs still counts as processed; nothing is written for it.
    pub async fn reconcile_all(&self) -> Result<usize, ReconcileError> {
        let ids = self
            .list_product_ids()
            .await
            .map_err(|source| ReconcileError::StorageUnavailable {
                product_id: "*".to_string(),
                source,
            })?;

        let mut skipped = 0;
        for id in &ids {
            if let ReconcileOutcome::ProductNotFound = self.reconcile_product(id).await? {
                skipped += 1;
            }
        }

        tracing::info!(processed = ids.len(), skipped, "Review aggregate sweep complete");
        Ok(ids.len())
    }
}
