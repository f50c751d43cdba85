use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use patrimo_core::{
    CatchAllPage, CatchAllSet, CategorizedTransaction, DateRange, Money, Page, StoreError,
    StoredTransaction, TransactionStore,
};
use patrimo_dvf::{DvfRow, PropertyType, SaleQuery, SaleRecord, SaleSource, SourceError};

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Opens (creating if needed) the database at `url`, e.g.
/// `sqlite:patrimo.db` or `sqlite::memory:`, and applies migrations.
pub async fn create_db(url: &str) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS budget_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            label TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            account TEXT,
            category TEXT NOT NULL,
            auto_category INTEGER NOT NULL DEFAULT 1,
            tx_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, tx_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_budget_transactions_user_date ON budget_transactions (user_id, date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dvf_raw (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date_mutation TEXT NOT NULL,
            nature_mutation TEXT NOT NULL,
            code_commune TEXT NOT NULL,
            type_local TEXT,
            surface_reelle_bati REAL,
            valeur_fonciere REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dvf_raw_commune_date ON dvf_raw (code_commune, date_mutation)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Bulk-loads raw DVF rows. Returns the number of rows written.
pub async fn insert_dvf_rows(pool: &DbPool, rows: &[DvfRow]) -> Result<u64, StorageError> {
    let mut tx = pool.begin().await?;
    let mut written = 0;
    for row in rows {
        written += sqlx::query(
            "INSERT INTO dvf_raw (date_mutation, nature_mutation, code_commune, type_local, surface_reelle_bati, valeur_fonciere) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.date_mutation)
        .bind(&row.nature_mutation)
        .bind(&row.code_commune)
        .bind(&row.type_local)
        .bind(row.surface_reelle_bati)
        .bind(row.valeur_fonciere)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

type TransactionRow = (
    i64,
    String,
    String,
    String,
    i64,
    Option<String>,
    String,
    bool,
    String,
    Option<String>,
);

const SELECT_TRANSACTIONS: &str = "SELECT id, user_id, date, label, amount_cents, account, category, auto_category, tx_hash, created_at FROM budget_transactions";

fn to_stored(r: TransactionRow) -> Result<StoredTransaction, StoreError> {
    let date = NaiveDate::parse_from_str(&r.2, "%Y-%m-%d").map_err(|e| StoreError::CorruptRow {
        id: r.0,
        reason: format!("date '{}': {e}", r.2),
    })?;
    let created_at = r
        .9
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .map(|dt| dt.and_utc());
    Ok(StoredTransaction {
        id: r.0,
        user_id: r.1,
        transaction: CategorizedTransaction {
            date,
            label: r.3,
            amount: Money::from_cents(r.4),
            account: r.5,
            category: r.6,
            auto_categorized: r.7,
            content_hash: r.8,
        },
        created_at,
    })
}

pub struct SqliteTransactionStore {
    pool: DbPool,
}

impl SqliteTransactionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for SqliteTransactionStore {
    async fn insert_new(
        &self,
        user_id: &str,
        transactions: &[CategorizedTransaction],
    ) -> Result<u64, StoreError> {
        let mut db_tx = self.pool.begin().await.map_err(backend)?;
        let mut inserted = 0;
        for tx in transactions {
            let cents = tx
                .amount
                .to_cents()
                .ok_or_else(|| StoreError::AmountOutOfRange(tx.amount.to_string()))?;
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO budget_transactions (user_id, date, label, amount_cents, account, category, auto_category, tx_hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(tx.date)
            .bind(&tx.label)
            .bind(cents)
            .bind(&tx.account)
            .bind(&tx.category)
            .bind(tx.auto_categorized)
            .bind(&tx.content_hash)
            .execute(&mut *db_tx)
            .await
            .map_err(backend)?
            .rows_affected();
        }
        db_tx.commit().await.map_err(backend)?;
        debug!(user_id, offered = transactions.len(), inserted, "Stored budget transactions");
        Ok(inserted)
    }

    async fn list_range(
        &self,
        user_id: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let rows = match range {
            Some(range) => {
                sqlx::query_as::<_, TransactionRow>(&format!(
                    "{SELECT_TRANSACTIONS} WHERE user_id = ? AND date >= ? AND date <= ? ORDER BY date, id"
                ))
                .bind(user_id)
                .bind(range.start)
                .bind(range.end)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TransactionRow>(&format!(
                    "{SELECT_TRANSACTIONS} WHERE user_id = ? ORDER BY date, id"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        rows.into_iter().map(to_stored).collect()
    }

    async fn set_category(&self, user_id: &str, id: i64, category: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE budget_transactions SET category = ?, auto_category = 0 WHERE id = ? AND user_id = ?",
        )
        .bind(category)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_catch_all(
        &self,
        user_id: &str,
        catch_all: &CatchAllSet,
        page: Page,
    ) -> Result<CatchAllPage, StoreError> {
        let categories = catch_all.categories();
        if categories.is_empty() {
            return Ok(CatchAllPage { items: Vec::new(), total: 0, limit: page.limit, offset: page.offset });
        }
        let filter = format!(
            "WHERE user_id = ? AND category IN ({})",
            vec!["?"; categories.len()].join(", ")
        );

        let count_sql = format!("SELECT COUNT(*) FROM budget_transactions {filter}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql).bind(user_id);
        for category in categories {
            count = count.bind(category);
        }
        let (total,) = count.fetch_one(&self.pool).await.map_err(backend)?;

        let page_sql = format!("{SELECT_TRANSACTIONS} {filter} ORDER BY date DESC, id DESC LIMIT ? OFFSET ?");
        let mut rows = sqlx::query_as::<_, TransactionRow>(&page_sql).bind(user_id);
        for category in categories {
            rows = rows.bind(category);
        }
        let rows = rows
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(CatchAllPage {
            items: rows.into_iter().map(to_stored).collect::<Result<_, _>>()?,
            total: total as usize,
            limit: page.limit,
            offset: page.offset,
        })
    }
}

/// Sale source over the `dvf_raw` table; the whole filter runs in SQL.
pub struct SqliteSaleSource {
    pool: DbPool,
}

impl SqliteSaleSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SaleSource for SqliteSaleSource {
    async fn fetch_sales(&self, query: &SaleQuery) -> Result<Vec<SaleRecord>, SourceError> {
        let rows = sqlx::query_as::<_, (String, f64, f64, NaiveDate)>(
            r#"
            SELECT type_local, valeur_fonciere, surface_reelle_bati, date_mutation
            FROM dvf_raw
            WHERE code_commune = ?
              AND nature_mutation = 'Vente'
              AND type_local IN ('Appartement', 'Maison')
              AND surface_reelle_bati BETWEEN ? AND ?
              AND date_mutation >= ?
              AND date_mutation <= ?
              AND valeur_fonciere IS NOT NULL
            "#,
        )
        .bind(&query.municipality_code)
        .bind(query.surface_min)
        .bind(query.surface_max)
        .bind(query.window.start)
        .bind(query.window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SourceError::Unavailable(Box::new(e)))?;

        Ok(rows
            .into_iter()
            .filter_map(|(type_local, price, surface, date)| {
                Some(SaleRecord {
                    property_type: PropertyType::from_dvf_label(&type_local)?,
                    price,
                    surface,
                    date,
                })
            })
            .collect())
    }
}
