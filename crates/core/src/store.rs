use async_trait::async_trait;
use thiserror::Error;

use crate::category::CatchAllSet;
use crate::period::DateRange;
use crate::summary::{CatchAllPage, Page, SummaryReducer};
use crate::transaction::{CategorizedTransaction, StoredTransaction};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Amount out of range for storage: {0}")]
    AmountOutOfRange(String),
    #[error("Corrupt stored row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// Persistence for categorized transactions, scoped per user.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts every transaction whose `(user_id, content_hash)` is not
    /// already stored and silently ignores the rest. Returns the number of
    /// rows actually inserted.
    async fn insert_new(
        &self,
        user_id: &str,
        transactions: &[CategorizedTransaction],
    ) -> Result<u64, StoreError>;

    /// Transactions of `user_id`, oldest first, optionally restricted to a
    /// date range.
    async fn list_range(
        &self,
        user_id: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<StoredTransaction>, StoreError>;

    /// Manual override: stores `category` and clears the auto flag.
    /// Returns `false` if the user owns no transaction with that id.
    async fn set_category(&self, user_id: &str, id: i64, category: &str) -> Result<bool, StoreError>;

    /// One page of the user's transactions filed under `catch_all`, most
    /// recent first (ties by id, descending), with the total match count.
    /// The default loads every row and pages in memory; backends that can
    /// filter and page themselves should override it.
    async fn list_catch_all(
        &self,
        user_id: &str,
        catch_all: &CatchAllSet,
        page: Page,
    ) -> Result<CatchAllPage, StoreError> {
        let transactions = self.list_range(user_id, None).await?;
        Ok(SummaryReducer::new(catch_all.clone()).catch_all(&transactions, page))
    }
}
