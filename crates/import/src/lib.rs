pub mod csv;
pub mod hash;
pub mod pipeline;
pub mod rules;
pub(crate) mod util;

pub use csv::{normalize_csv, CsvColumnMapping, CsvError, NormalizeConfig, NormalizedCsv};
pub use hash::compute_hash;
pub use pipeline::{ImportError, ImportReport, Importer};
pub use rules::{categorize, default_rules, CategoryRule, CategoryRuleEngine, MatchType, RuleError};
