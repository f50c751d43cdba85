use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use patrimo_core::{CategorizedTransaction, Money, RawTransactionRow, StoreError, TransactionStore};

use crate::csv::{normalize_csv, normalize_date, CsvError, NormalizeConfig};
use crate::hash::compute_hash;
use crate::rules::CategoryRuleEngine;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one import call.
/// `received == inserted + duplicates + rejected + skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Data rows seen, including skipped ones.
    pub received: usize,
    /// Rows newly stored.
    pub inserted: usize,
    /// Accepted rows whose fingerprint was already stored for the user.
    pub duplicates: usize,
    /// Rows whose date does not normalize to ISO, or with a blank label.
    pub rejected: usize,
    /// CSV rows dropped by the normalizer for missing fields.
    pub skipped: usize,
}

/// Orchestrates: normalize → validate → categorize → hash → insert-or-ignore.
pub struct Importer {
    engine: CategoryRuleEngine,
}

impl Importer {
    pub fn new(engine: CategoryRuleEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &CategoryRuleEngine {
        &self.engine
    }

    /// Normalizes `text` and imports the resulting rows. A malformed file is
    /// rejected as a whole before anything is stored.
    pub async fn import_csv(
        &self,
        store: &dyn TransactionStore,
        user_id: &str,
        text: &str,
        config: &NormalizeConfig,
    ) -> Result<ImportReport, ImportError> {
        let normalized = normalize_csv(text, config)?;
        let mut report = self.import_rows(store, user_id, &normalized.rows).await?;
        report.received += normalized.skipped;
        report.skipped = normalized.skipped;
        Ok(report)
    }

    /// Imports rows that were already normalized (by a client or by
    /// [`normalize_csv`]).
    pub async fn import_rows(
        &self,
        store: &dyn TransactionStore,
        user_id: &str,
        rows: &[RawTransactionRow],
    ) -> Result<ImportReport, ImportError> {
        let (accepted, rejected) = self.prepare(user_id, rows);

        let inserted = if accepted.is_empty() {
            0
        } else {
            store.insert_new(user_id, &accepted).await? as usize
        };

        let report = ImportReport {
            received: rows.len(),
            inserted,
            duplicates: accepted.len().saturating_sub(inserted),
            rejected,
            skipped: 0,
        };
        info!(
            user_id,
            received = report.received,
            inserted = report.inserted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "Budget import finished"
        );
        Ok(report)
    }

    /// Categorizes and fingerprints the valid rows; returns them with the
    /// number of rows rejected.
    pub fn prepare(&self, user_id: &str, rows: &[RawTransactionRow]) -> (Vec<CategorizedTransaction>, usize) {
        let mut accepted = Vec::with_capacity(rows.len());
        let mut rejected = 0;

        for row in rows {
            let label = row.label.trim();
            let date = match NaiveDate::parse_from_str(&normalize_date(&row.date), "%Y-%m-%d") {
                Ok(date) if !label.is_empty() => date,
                _ => {
                    debug!(date = %row.date, label, "Rejecting row");
                    rejected += 1;
                    continue;
                }
            };

            let amount = Money::from_decimal(row.amount);
            let iso_date = date.format("%Y-%m-%d").to_string();
            accepted.push(CategorizedTransaction {
                date,
                label: label.to_string(),
                amount,
                account: row.account.clone().filter(|a| !a.trim().is_empty()),
                category: self.engine.categorize(label, amount).to_string(),
                auto_categorized: true,
                content_hash: compute_hash(user_id, &iso_date, label, amount),
            });
        }

        (accepted, rejected)
    }
}

impl Default for Importer {
    fn default() -> Self {
        Self::new(CategoryRuleEngine::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
