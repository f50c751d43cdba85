use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use patrimo_core::{Clock, DateRange, PeriodError, YearMonth};

use crate::cache::TtlCache;
use crate::source::{PropertyType, SaleQuery, SaleSource, SourceError};
use crate::stats::{trimmed_stats, TrimmedStats};

pub const DVF_SOURCE: &str = "DVF";

/// Tuning of the price statistics. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub months_default: u32,
    pub months_widened: u32,
    pub min_sample: usize,
    pub surface_min: f64,
    pub surface_max: f64,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub cache_ttl_days: i64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            months_default: 24,
            months_widened: 36,
            min_sample: 15,
            surface_min: 10.0,
            surface_max: 300.0,
            lower_percentile: 0.05,
            upper_percentile: 0.95,
            cache_ttl_days: 30 * 30,
        }
    }
}

impl PriceSettings {
    /// Human-readable summary, e.g. `Médiane, P5–P95, 10–300 m²`.
    pub fn methodology(&self) -> String {
        format!(
            "Médiane, P{}–P{}, {}–{} m²",
            (self.lower_percentile * 100.0).round() as i64,
            (self.upper_percentile * 100.0).round() as i64,
            self.surface_min,
            self.surface_max,
        )
    }
}

/// Months covered by a result, both ends inclusive.
/// Serialized as `2023-01 à 2024-12 (24 mois)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePeriod {
    pub start_month: YearMonth,
    pub end_month: YearMonth,
    pub months: u32,
}

impl ReferencePeriod {
    pub fn ending(today: NaiveDate, months: u32) -> Option<Self> {
        let end_month = YearMonth::of(today);
        Some(Self {
            start_month: end_month.minus_months(months.saturating_sub(1))?,
            end_month,
            months,
        })
    }
}

impl fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} à {} ({} mois)", self.start_month, self.end_month, self.months)
    }
}

impl Serialize for ReferencePeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQueryResult {
    pub municipality_code: String,
    pub price_per_sqm_apartment: Option<i64>,
    pub price_per_sqm_house: Option<i64>,
    pub reference_period: ReferencePeriod,
    pub sale_count_apartment: usize,
    pub sale_count_house: usize,
    pub source: String,
    pub methodology: String,
}

impl PriceQueryResult {
    pub fn total_sales(&self) -> usize {
        self.sale_count_apartment + self.sale_count_house
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceErrorKind {
    InvalidInput,
    InsufficientSample,
    UpstreamUnavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("Invalid municipality code: '{0}'")]
    InvalidMunicipalityCode(String),
    #[error("Insufficient sample for {municipality_code}: {sales} sales over {months} months")]
    InsufficientSample {
        municipality_code: String,
        sales: usize,
        months: u32,
    },
    #[error("Price data unavailable: {0}")]
    UpstreamUnavailable(#[from] SourceError),
    #[error("Cannot build sale window: {0}")]
    Window(#[from] PeriodError),
}

impl PriceError {
    pub fn kind(&self) -> PriceErrorKind {
        match self {
            PriceError::InvalidMunicipalityCode(_) => PriceErrorKind::InvalidInput,
            PriceError::InsufficientSample { .. } => PriceErrorKind::InsufficientSample,
            PriceError::UpstreamUnavailable(_) => PriceErrorKind::UpstreamUnavailable,
            PriceError::Window(_) => PriceErrorKind::Internal,
        }
    }
}

/// Uppercased code when it is exactly five ASCII alphanumerics
/// (`75056`, `2A004`).
pub fn validate_municipality_code(code: &str) -> Result<String, PriceError> {
    let code = code.trim();
    if code.len() == 5 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(PriceError::InvalidMunicipalityCode(code.to_string()))
    }
}

struct Attempt {
    months: u32,
    apartment: TrimmedStats,
    house: TrimmedStats,
}

impl Attempt {
    fn total(&self) -> usize {
        self.apartment.count + self.house.count
    }
}

/// Median price per m² per property type for a municipality, with
/// P5–P95 trimming and one widening of the sale window when the sample is
/// too small. Results are cached per code.
pub struct PriceAggregator {
    source: Arc<dyn SaleSource>,
    clock: Arc<dyn Clock>,
    settings: PriceSettings,
    cache: TtlCache<String, PriceQueryResult>,
}

impl PriceAggregator {
    pub fn new(source: Arc<dyn SaleSource>, clock: Arc<dyn Clock>, settings: PriceSettings) -> Self {
        let cache = TtlCache::new(Duration::days(settings.cache_ttl_days), Arc::clone(&clock));
        Self {
            source,
            clock,
            settings,
            cache,
        }
    }

    pub fn settings(&self) -> &PriceSettings {
        &self.settings
    }

    pub async fn get_prices(&self, municipality_code: &str) -> Result<PriceQueryResult, PriceError> {
        let code = validate_municipality_code(municipality_code)?;
        if let Some(hit) = self.cache.get(&code) {
            debug!(code = %code, "Price cache hit");
            return Ok((*hit).clone());
        }

        let today = self.clock.today();
        let mut attempt = self.attempt(&code, today, self.settings.months_default).await?;
        if attempt.total() < self.settings.min_sample {
            debug!(
                code = %code,
                sales = attempt.total(),
                months = attempt.months,
                "Sample too small, widening window"
            );
            attempt = self.attempt(&code, today, self.settings.months_widened).await?;
        }
        if attempt.total() < self.settings.min_sample {
            warn!(code = %code, sales = attempt.total(), months = attempt.months, "Insufficient sample");
            return Err(PriceError::InsufficientSample {
                municipality_code: code,
                sales: attempt.total(),
                months: attempt.months,
            });
        }

        let reference_period =
            ReferencePeriod::ending(today, attempt.months).ok_or(PeriodError::OutOfRange)?;
        let result = PriceQueryResult {
            municipality_code: code.clone(),
            price_per_sqm_apartment: attempt.apartment.median,
            price_per_sqm_house: attempt.house.median,
            reference_period,
            sale_count_apartment: attempt.apartment.count,
            sale_count_house: attempt.house.count,
            source: DVF_SOURCE.to_string(),
            methodology: self.settings.methodology(),
        };
        info!(code = %code, sales = result.total_sales(), period = %reference_period, "Computed prices");
        self.cache.insert(code, result.clone());
        Ok(result)
    }

    async fn attempt(&self, code: &str, today: NaiveDate, months: u32) -> Result<Attempt, PriceError> {
        let query = SaleQuery {
            municipality_code: code.to_string(),
            window: DateRange::trailing_months(today, months)?,
            surface_min: self.settings.surface_min,
            surface_max: self.settings.surface_max,
        };
        let sales = self.source.fetch_sales(&query).await.map_err(|e| {
            warn!(code, error = %e, "Sale source failed");
            e
        })?;

        let [apartment, house] = PropertyType::ALL.map(|property_type| {
            let values: Vec<f64> = sales
                .iter()
                .filter(|s| s.property_type == property_type)
                .filter_map(|s| s.price_per_sqm())
                .collect();
            trimmed_stats(&values, self.settings.lower_percentile, self.settings.upper_percentile)
        });
        debug!(code, months, fetched = sales.len(), "Price attempt");
        Ok(Attempt { months, apartment, house })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DvfRow, InMemorySaleSource, SaleRecord};
    use async_trait::async_trait;
    use patrimo_core::FixedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 12, 31)
    }

    fn apartments(code: &str, on: NaiveDate, n: usize, price: f64) -> Vec<DvfRow> {
        (0..n)
            .map(|_| DvfRow::sale(code, PropertyType::Apartment, on, 50.0, price))
            .collect()
    }

    fn aggregator(rows: Vec<DvfRow>, settings: PriceSettings) -> (PriceAggregator, Arc<InMemorySaleSource>, Arc<FixedClock>) {
        let source = Arc::new(InMemorySaleSource::new(rows));
        let clock = Arc::new(FixedClock::at_date(today()));
        let agg = PriceAggregator::new(source.clone(), clock.clone(), settings);
        (agg, source, clock)
    }

    #[tokio::test]
    async fn median_per_type_within_default_window() {
        let mut rows = apartments("75056", date(2024, 6, 1), 20, 500_000.0);
        rows.extend((0..10).map(|_| DvfRow::sale("75056", PropertyType::House, date(2024, 3, 1), 100.0, 400_000.0)));
        let (agg, source, _) = aggregator(rows, PriceSettings::default());

        let result = agg.get_prices("75056").await.unwrap();

        assert_eq!(result.price_per_sqm_apartment, Some(10_000));
        assert_eq!(result.price_per_sqm_house, Some(4_000));
        assert_eq!(result.sale_count_apartment, 20);
        assert_eq!(result.sale_count_house, 10);
        assert_eq!(result.reference_period.to_string(), "2023-01 à 2024-12 (24 mois)");
        assert_eq!(result.source, "DVF");
        assert_eq!(result.methodology, "Médiane, P5–P95, 10–300 m²");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn outlier_does_not_move_the_median() {
        let mut rows = apartments("00001", date(2024, 1, 1), 4, 50_000.0);
        rows.extend(apartments("00001", date(2024, 1, 1), 1, 5_000_000.0));
        let settings = PriceSettings { min_sample: 1, ..PriceSettings::default() };
        let (agg, _, _) = aggregator(rows, settings);

        let result = agg.get_prices("00001").await.unwrap();

        assert_eq!(result.price_per_sqm_apartment, Some(1_000));
        assert_eq!(result.sale_count_apartment, 4);
        assert_eq!(result.price_per_sqm_house, None);
        assert_eq!(result.sale_count_house, 0);
    }

    #[tokio::test]
    async fn small_sample_widens_to_36_months() {
        let mut rows = apartments("69123", date(2024, 6, 1), 1, 250_000.0);
        // 30 months before today: outside 24, inside 36.
        rows.extend(apartments("69123", date(2022, 7, 1), 20, 250_000.0));
        let (agg, source, _) = aggregator(rows, PriceSettings::default());

        let result = agg.get_prices("69123").await.unwrap();

        assert_eq!(result.reference_period.months, 36);
        assert_eq!(result.reference_period.to_string(), "2022-01 à 2024-12 (36 mois)");
        assert_eq!(source.calls(), 2);
        assert_eq!(result.price_per_sqm_apartment, Some(5_000));
    }

    #[tokio::test]
    async fn still_too_small_after_widening() {
        let rows = apartments("00002", date(2024, 1, 1), 1, 500_000.0);
        let (agg, source, _) = aggregator(rows, PriceSettings::default());

        let err = agg.get_prices("00002").await.unwrap_err();

        assert_eq!(err.kind(), PriceErrorKind::InsufficientSample);
        assert!(matches!(
            err,
            PriceError::InsufficientSample { ref municipality_code, sales: 1, months: 36 } if municipality_code == "00002"
        ));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn cached_until_ttl_expires() {
        let rows = apartments("75056", date(2024, 6, 1), 20, 500_000.0);
        let (agg, source, clock) = aggregator(rows, PriceSettings::default());

        agg.get_prices("75056").await.unwrap();
        clock.advance(Duration::days(899));
        agg.get_prices("75056").await.unwrap();
        assert_eq!(source.calls(), 1);

        // Expired: the source is queried again (both windows, as the old
        // sales have aged out of them by now).
        clock.advance(Duration::days(1));
        let _ = agg.get_prices("75056").await;
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (agg, source, _) = aggregator(Vec::new(), PriceSettings::default());
        assert!(agg.get_prices("00003").await.is_err());
        assert!(agg.get_prices("00003").await.is_err());
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn invalid_codes_never_reach_the_source() {
        let (agg, source, _) = aggregator(Vec::new(), PriceSettings::default());
        for code in ["7505", "750561", "75 56", "", "75-56"] {
            let err = agg.get_prices(code).await.unwrap_err();
            assert_eq!(err.kind(), PriceErrorKind::InvalidInput, "{code:?}");
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn corsican_codes_are_accepted() {
        let rows = apartments("2A004", date(2024, 6, 1), 15, 300_000.0);
        let (agg, _, _) = aggregator(rows, PriceSettings::default());
        let result = agg.get_prices("2a004").await.unwrap();
        assert_eq!(result.municipality_code, "2A004");
    }

    struct FailingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SaleSource for FailingSource {
        async fn fetch_sales(&self, _query: &SaleQuery) -> Result<Vec<SaleRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn source_failure_is_distinct_from_small_sample() {
        let source = Arc::new(FailingSource { calls: AtomicUsize::new(0) });
        let clock = Arc::new(FixedClock::at_date(today()));
        let agg = PriceAggregator::new(source.clone(), clock, PriceSettings::default());

        let err = agg.get_prices("75056").await.unwrap_err();

        assert_eq!(err.kind(), PriceErrorKind::UpstreamUnavailable);
        assert!(matches!(err, PriceError::UpstreamUnavailable(SourceError::Unavailable(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reference_period_serializes_as_text() {
        let period = ReferencePeriod::ending(date(2024, 3, 15), 24).unwrap();
        assert_eq!(
            serde_json::to_value(period).unwrap(),
            serde_json::json!("2022-04 à 2024-03 (24 mois)")
        );
    }
}
