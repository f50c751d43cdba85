use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use patrimo_core::{
    is_known_category, resolve_range, CatchAllPage, Page, RawTransactionRow, Summary, YearMonth,
};
use patrimo_dvf::{Commune, PriceQueryResult};
use patrimo_import::{ImportReport, NormalizeConfig};

use crate::{AppError, AppState, USER_HEADER};

/// The calling user, from the `x-user-id` header.
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| AppError::unauthorized(format!("Missing {USER_HEADER} header")))
    }
}

pub async fn health() -> &'static str {
    "ok"
}

/// Either rows already normalized by the client or a raw CSV export.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ImportRequest {
    Rows {
        rows: Vec<RawTransactionRow>,
    },
    Csv {
        csv: String,
        #[serde(default)]
        delimiter: Option<char>,
        #[serde(default = "default_true")]
        has_header: bool,
    },
}

fn default_true() -> bool {
    true
}

pub async fn import_transactions(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportReport>, AppError> {
    let store = state.store.as_ref();
    let report = match request {
        ImportRequest::Rows { rows } => state.importer.import_rows(store, &user_id, &rows).await?,
        ImportRequest::Csv { csv, delimiter, has_header } => {
            let config = NormalizeConfig {
                delimiter,
                has_header,
                ..NormalizeConfig::default()
            };
            state.importer.import_csv(store, &user_id, &csv, &config).await?
        }
    };
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

fn parse_month(name: &str, value: Option<&str>) -> Result<Option<YearMonth>, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim()
                .parse::<YearMonth>()
                .map_err(|_| AppError::bad_request(format!("Invalid {name}: expected YYYY-MM")))
        })
        .transpose()
}

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<SummaryParams>,
) -> Result<Json<Summary>, AppError> {
    let from = parse_month("from", params.from.as_deref())?;
    let to = parse_month("to", params.to.as_deref())?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppError::bad_request("from must not be after to"));
        }
    }

    let today = state.clock.today();
    let range = resolve_range(from, to, today)?;
    let transactions = state.store.list_range(&user_id, Some(range)).await?;
    let summary = state.reducer.build_summary(&transactions, Some(range), today)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn list_uncategorized(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Query(params): Query<PageParams>,
) -> Result<Json<CatchAllPage>, AppError> {
    let page = Page::new(params.limit, params.offset);
    let catch_all = state.reducer.catch_all_set();
    Ok(Json(state.store.list_catch_all(&user_id, catch_all, page).await?))
}

#[derive(Debug, Deserialize)]
pub struct CategoryUpdate {
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryUpdated {
    pub id: i64,
    pub category: String,
    pub auto_categorized: bool,
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(update): Json<CategoryUpdate>,
) -> Result<Json<CategoryUpdated>, AppError> {
    let category = update.category.trim();
    if !is_known_category(category) {
        return Err(AppError::bad_request(format!("Unknown category: '{category}'")));
    }
    if !state.store.set_category(&user_id, id, category).await? {
        return Err(AppError::not_found("Transaction not found"));
    }
    info!(user_id = %user_id, id, category, "Category overridden");
    Ok(Json(CategoryUpdated {
        id,
        category: category.to_string(),
        auto_categorized: false,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PriceParams {
    pub insee: Option<String>,
}

pub async fn get_prices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PriceParams>,
) -> Result<Json<PriceQueryResult>, AppError> {
    let code = params
        .insee
        .ok_or_else(|| AppError::bad_request("Missing insee parameter"))?;
    Ok(Json(state.prices.get_prices(&code).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommuneParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search_communes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CommuneParams>,
) -> Result<Json<Vec<Commune>>, AppError> {
    Ok(Json(state.communes.search(&params.q).await?))
}
