pub mod aggregator;
pub mod cache;
pub mod geo;
pub mod source;
pub mod stats;

pub use aggregator::{PriceAggregator, PriceError, PriceErrorKind, PriceQueryResult, PriceSettings, ReferencePeriod};
pub use cache::TtlCache;
pub use geo::{Commune, CommuneDirectory, GeoError, GeoSettings};
pub use source::{DvfRow, InMemorySaleSource, PropertyType, SaleQuery, SaleRecord, SaleSource, SourceError};
