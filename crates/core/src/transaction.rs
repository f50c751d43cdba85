use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::Money;

/// A row lifted out of a bank export whose date, label and amount columns
/// were all resolved. `date` is ISO `YYYY-MM-DD` when the source format was
/// recognized and the raw text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRow {
    pub date: String,
    pub label: String,
    pub amount: Decimal,
    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedTransaction {
    pub date: NaiveDate,
    pub label: String,
    pub amount: Money,
    pub account: Option<String>,
    pub category: String,
    pub auto_categorized: bool,
    pub content_hash: String,
}

/// A transaction as read back from the store. `category` is whatever is
/// persisted, including manual overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub user_id: String,
    #[serde(flatten)]
    pub transaction: CategorizedTransaction,
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredTransaction {
    pub fn date(&self) -> NaiveDate {
        self.transaction.date
    }

    pub fn amount(&self) -> Money {
        self.transaction.amount
    }

    pub fn category(&self) -> &str {
        &self.transaction.category
    }
}
