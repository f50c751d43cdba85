//! Month × category reduction of categorized transactions.
//!
//! Buckets are rebuilt from whatever the store currently holds on every
//! request; nothing here is cached or persisted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::category::CatchAllSet;
use crate::money::Money;
use crate::period::{DateRange, PeriodError, YearMonth};
use crate::transaction::{CategorizedTransaction, StoredTransaction};

/// Months covered by a summary when the caller gives no bounds.
pub const DEFAULT_SUMMARY_MONTHS: u32 = 12;

pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Anything that can be folded into a month/category bucket.
pub trait LedgerEntry {
    fn entry_date(&self) -> NaiveDate;
    fn entry_amount(&self) -> Money;
    fn entry_category(&self) -> &str;
}

impl LedgerEntry for CategorizedTransaction {
    fn entry_date(&self) -> NaiveDate {
        self.date
    }
    fn entry_amount(&self) -> Money {
        self.amount
    }
    fn entry_category(&self) -> &str {
        &self.category
    }
}

impl LedgerEntry for StoredTransaction {
    fn entry_date(&self) -> NaiveDate {
        self.transaction.date
    }
    fn entry_amount(&self) -> Money {
        self.transaction.amount
    }
    fn entry_category(&self) -> &str {
        &self.transaction.category
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthCategoryBucket {
    pub year_month: YearMonth,
    pub category: String,
    /// Sum of non-negative amounts.
    pub income: Money,
    /// Sum of negative amounts, so never above zero.
    pub expense: Money,
    pub net: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub range: DateRange,
    pub buckets: Vec<MonthCategoryBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Clamps `limit` into `1..=500` (default 100).
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Page {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchAllPage {
    pub items: Vec<StoredTransaction>,
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
}

/// Resolves optional `YYYY-MM` bounds: `from` starts on the first day of its
/// month, `to` ends on the last day of its month (or today when absent), and
/// a missing `from` defaults to twelve calendar months ending with `to`.
pub fn resolve_range(
    from: Option<YearMonth>,
    to: Option<YearMonth>,
    today: NaiveDate,
) -> Result<DateRange, PeriodError> {
    let end = to.map(YearMonth::last_day).unwrap_or(today);
    match from {
        Some(from) => Ok(DateRange::new(from.first_day(), end)),
        None => DateRange::calendar_months_ending(end, DEFAULT_SUMMARY_MONTHS),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryReducer {
    catch_all: CatchAllSet,
}

impl SummaryReducer {
    pub fn new(catch_all: CatchAllSet) -> Self {
        Self { catch_all }
    }

    pub fn catch_all_set(&self) -> &CatchAllSet {
        &self.catch_all
    }

    /// Folds `transactions` into buckets sorted by `(year_month, category)`.
    /// Without a range, the twelve calendar months ending today are used.
    pub fn build_summary<T: LedgerEntry>(
        &self,
        transactions: &[T],
        range: Option<DateRange>,
        today: NaiveDate,
    ) -> Result<Summary, PeriodError> {
        let range = match range {
            Some(range) => range,
            None => DateRange::calendar_months_ending(today, DEFAULT_SUMMARY_MONTHS)?,
        };

        let mut grid: BTreeMap<(YearMonth, &str), (Money, Money)> = BTreeMap::new();
        for tx in transactions {
            let date = tx.entry_date();
            if !range.contains(date) {
                continue;
            }
            let amount = tx.entry_amount();
            let cell = grid
                .entry((YearMonth::of(date), tx.entry_category()))
                .or_insert((Money::zero(), Money::zero()));
            if amount.is_negative() {
                cell.1 = cell.1 + amount;
            } else {
                cell.0 = cell.0 + amount;
            }
        }

        let buckets = grid
            .into_iter()
            .map(|((year_month, category), (income, expense))| MonthCategoryBucket {
                year_month,
                category: category.to_string(),
                income,
                expense,
                net: income + expense,
            })
            .collect();

        Ok(Summary { range, buckets })
    }

    /// Transactions still sitting in a catch-all bucket, most recent first.
    pub fn catch_all(&self, transactions: &[StoredTransaction], page: Page) -> CatchAllPage {
        let mut matching: Vec<&StoredTransaction> = transactions
            .iter()
            .filter(|tx| self.catch_all.contains(tx.category()))
            .collect();
        matching.sort_by(|a, b| b.date().cmp(&a.date()).then(b.id.cmp(&a.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        CatchAllPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}
