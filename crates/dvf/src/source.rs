use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use patrimo_core::DateRange;

/// `nature_mutation` value of a plain sale.
pub const SALE_NATURE: &str = "Vente";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    House,
}

impl PropertyType {
    pub const ALL: [PropertyType; 2] = [PropertyType::Apartment, PropertyType::House];

    /// `type_local` label in the DVF extract.
    pub fn dvf_label(self) -> &'static str {
        match self {
            PropertyType::Apartment => "Appartement",
            PropertyType::House => "Maison",
        }
    }

    pub fn from_dvf_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.dvf_label() == label)
    }
}

/// One sale that already passed the query filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub property_type: PropertyType,
    pub price: f64,
    pub surface: f64,
    pub date: NaiveDate,
}

impl SaleRecord {
    /// `None` when the ratio is not a finite number.
    pub fn price_per_sqm(&self) -> Option<f64> {
        let value = self.price / self.surface;
        value.is_finite().then_some(value)
    }
}

/// Sales of both property types for one municipality, inside a date window
/// and a surface band (bounds inclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct SaleQuery {
    pub municipality_code: String,
    pub window: DateRange,
    pub surface_min: f64,
    pub surface_max: f64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Sale source unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[async_trait]
pub trait SaleSource: Send + Sync {
    async fn fetch_sales(&self, query: &SaleQuery) -> Result<Vec<SaleRecord>, SourceError>;
}

/// A row of the raw DVF extract, as loaded into `dvf_raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvfRow {
    pub date_mutation: NaiveDate,
    pub nature_mutation: String,
    pub code_commune: String,
    pub type_local: String,
    pub surface_reelle_bati: Option<f64>,
    pub valeur_fonciere: Option<f64>,
}

impl DvfRow {
    /// A house or apartment sale dated `date` in `municipality_code`.
    pub fn sale(
        municipality_code: &str,
        property_type: PropertyType,
        date: NaiveDate,
        surface: f64,
        price: f64,
    ) -> Self {
        Self {
            date_mutation: date,
            nature_mutation: SALE_NATURE.to_string(),
            code_commune: municipality_code.to_string(),
            type_local: property_type.dvf_label().to_string(),
            surface_reelle_bati: Some(surface),
            valeur_fonciere: Some(price),
        }
    }

    /// Applies the query filter; `None` for rows it excludes.
    pub fn to_sale(&self, query: &SaleQuery) -> Option<SaleRecord> {
        if self.code_commune != query.municipality_code
            || self.nature_mutation != SALE_NATURE
            || !query.window.contains(self.date_mutation)
        {
            return None;
        }
        let property_type = PropertyType::from_dvf_label(&self.type_local)?;
        let surface = self.surface_reelle_bati?;
        if surface < query.surface_min || surface > query.surface_max {
            return None;
        }
        Some(SaleRecord {
            property_type,
            price: self.valeur_fonciere?,
            surface,
            date: self.date_mutation,
        })
    }
}

/// Sale source over rows held in memory. Counts calls so callers can check
/// what reached the source.
#[derive(Debug, Default)]
pub struct InMemorySaleSource {
    rows: Vec<DvfRow>,
    calls: AtomicUsize,
}

impl InMemorySaleSource {
    pub fn new(rows: Vec<DvfRow>) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SaleSource for InMemorySaleSource {
    async fn fetch_sales(&self, query: &SaleQuery) -> Result<Vec<SaleRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.iter().filter_map(|row| row.to_sale(query)).collect())
    }
}
