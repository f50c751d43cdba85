//! JSON API over the budget import, summary and property-price services.

use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use patrimo_core::{Clock, SummaryReducer, TransactionStore};
use patrimo_dvf::{CommuneDirectory, PriceAggregator, SaleSource};
use patrimo_import::Importer;
use patrimo_storage::{DbPool, SqliteSaleSource, SqliteTransactionStore};

pub mod config;
pub mod error;
mod routes;

pub use config::{Config, ConfigError};
pub use error::AppError;

/// Header naming the calling user. Authentication happens upstream.
pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub importer: Importer,
    pub reducer: SummaryReducer,
    pub prices: PriceAggregator,
    pub communes: CommuneDirectory,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the SQLite-backed store and sale source from `pool`.
    pub fn from_pool(config: &Config, pool: DbPool, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let store: Arc<dyn TransactionStore> = Arc::new(SqliteTransactionStore::new(pool.clone()));
        let sales: Arc<dyn SaleSource> = Arc::new(SqliteSaleSource::new(pool));
        Self::new(config, store, sales, clock)
    }

    pub fn new(
        config: &Config,
        store: Arc<dyn TransactionStore>,
        sales: Arc<dyn SaleSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store,
            importer: Importer::new(config.rule_engine()?),
            reducer: SummaryReducer::default(),
            prices: PriceAggregator::new(sales, Arc::clone(&clock), config.prices.clone()),
            communes: CommuneDirectory::new(&config.geo, Arc::clone(&clock)),
            clock,
        })
    }
}

pub fn create_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(USER_HEADER)]);

    let api_routes = Router::new()
        .route("/budget/import", post(routes::import_transactions))
        .route("/budget/summary", get(routes::get_summary))
        .route("/budget/uncategorized", get(routes::list_uncategorized))
        .route("/budget/tx/{id}", put(routes::update_category))
        .route("/prix", get(routes::get_prices))
        .route("/communes/search", get(routes::search_communes));

    Router::new()
        .route("/health", get(routes::health))
        .nest("/api", api_routes)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
