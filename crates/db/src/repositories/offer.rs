use sqlx::{sqlite::SqliteRow, Row};

use haggle_core::domain::buyer::BuyerId;
use haggle_core::domain::message::MessageId;
use haggle_core::domain::offer::{OfferId, SellerOffer, TrackedOffer};
use haggle_core::domain::thread::{display_name, SellerType, ThreadId};

use super::{format_timestamp, parse_enum, parse_timestamp, OfferRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOfferRepository {
    pool: DbPool,
}

impl SqlOfferRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OfferRepository for SqlOfferRepository {
    async fn create(&self, buyer_id: &BuyerId, offer: TrackedOffer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tracked_offer (id, buyer_id, thread_id, message_id, offer_text, tracked_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&offer.id.0)
        .bind(&buyer_id.0)
        .bind(&offer.thread_id.0)
        .bind(offer.message_id.as_ref().map(|id| id.0.as_str()))
        .bind(&offer.offer_text)
        .bind(format_timestamp(offer.tracked_at))
        .execute(&self.pool)
        .await
        .map_err(|error| RepositoryError::from_write(error, "offer"))?;

        Ok(())
    }

    async fn list_for_buyer(
        &self,
        buyer_id: &BuyerId,
        limit: u32,
    ) -> Result<Vec<SellerOffer>, RepositoryError> {
        // Archived threads keep their seller name; a missing thread row leaves it unknown.
        let rows = sqlx::query(
            "SELECT o.id, o.thread_id, o.message_id, o.offer_text, o.tracked_at,
                    t.seller_name, t.seller_type, t.phone
             FROM tracked_offer o
             LEFT JOIN thread t ON t.id = o.thread_id AND t.buyer_id = o.buyer_id
             WHERE o.buyer_id = ?
             ORDER BY o.tracked_at DESC, o.rowid DESC
             LIMIT ?",
        )
        .bind(&buyer_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(seller_offer_from_row).collect()
    }

    async fn delete(&self, buyer_id: &BuyerId, id: &OfferId) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM tracked_offer WHERE id = ? AND buyer_id = ?")
            .bind(&id.0)
            .bind(&buyer_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }
}

fn seller_offer_from_row(row: SqliteRow) -> Result<SellerOffer, RepositoryError> {
    let seller_name: Option<String> = row.try_get("seller_name")?;
    let phone: Option<String> = row.try_get("phone")?;
    let seller_type = row
        .try_get::<Option<String>, _>("seller_type")?
        .map(|value| parse_enum("seller_type", &value, SellerType::parse))
        .transpose()?;

    Ok(SellerOffer {
        offer: TrackedOffer {
            id: OfferId(row.try_get("id")?),
            thread_id: ThreadId(row.try_get("thread_id")?),
            message_id: row.try_get::<Option<String>, _>("message_id")?.map(MessageId),
            offer_text: row.try_get("offer_text")?,
            tracked_at: parse_timestamp("tracked_at", row.try_get("tracked_at")?)?,
        },
        seller_display_name: seller_name.map(|name| display_name(&name, phone.as_deref())),
        seller_type,
    })
}
