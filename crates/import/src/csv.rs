use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

use patrimo_core::RawTransactionRow;

use crate::util::normalize_header;

/// Delimiters considered by auto-detection, in tie-break order.
pub const DELIMITER_PREFERENCE: [char; 3] = [';', ',', '\t'];

pub const DATE_ALIASES: &[&str] = &["date_operation", "date_op", "date", "posted_date", "booking_date"];
pub const LABEL_ALIASES: &[&str] = &["libelle", "intitule", "label", "description", "narration"];
pub const ACCOUNT_ALIASES: &[&str] = &["compte", "account", "iban", "numero_compte"];
pub const AMOUNT_ALIASES: &[&str] = &["montant", "amount", "valeur"];
pub const DEBIT_ALIASES: &[&str] = &["debit", "débit"];
pub const CREDIT_ALIASES: &[&str] = &["credit", "crédit"];

/// Column positions of the fields a transaction is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvColumnMapping {
    pub date_column: Option<usize>,
    pub label_column: Option<usize>,
    pub amount_column: Option<usize>,
    pub debit_column: Option<usize>,
    pub credit_column: Option<usize>,
    pub account_column: Option<usize>,
}

impl CsvColumnMapping {
    /// Resolves each field from the first alias present among `keys`.
    pub fn from_header(keys: &[String]) -> Self {
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| keys.iter().position(|k| k == alias))
        };
        Self {
            date_column: find(DATE_ALIASES),
            label_column: find(LABEL_ALIASES),
            amount_column: find(AMOUNT_ALIASES),
            debit_column: find(DEBIT_ALIASES),
            credit_column: find(CREDIT_ALIASES),
            account_column: find(ACCOUNT_ALIASES),
        }
    }

    /// `date;label;amount`, the layout assumed for header-less exports.
    pub fn positional() -> Self {
        Self {
            date_column: Some(0),
            label_column: Some(1),
            amount_column: Some(2),
            ..Self::default()
        }
    }

    fn amount(&self, record: &csv::StringRecord) -> Option<Decimal> {
        if let Some(col) = self.amount_column {
            return record.get(col).and_then(parse_amount);
        }
        let cell = |col: Option<usize>| col.and_then(|c| record.get(c)).and_then(parse_amount);
        match (cell(self.debit_column), cell(self.credit_column)) {
            (Some(d), Some(c)) => Some(c.abs() - d.abs()),
            (Some(d), None) => Some(-d.abs()),
            (None, Some(c)) => Some(c.abs()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Explicit delimiter; detected from the first non-empty line when absent.
    pub delimiter: Option<char>,
    pub has_header: bool,
    /// Lowercase, strip diacritics and snake_case header cells before alias lookup.
    pub normalize_headers: bool,
    /// Explicit column positions, bypassing alias resolution.
    pub mapping: Option<CsvColumnMapping>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_header: true,
            normalize_headers: true,
            mapping: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCsv {
    pub rows: Vec<RawTransactionRow>,
    /// Data rows dropped because date, label or amount could not be resolved.
    pub skipped: usize,
    pub delimiter: char,
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unterminated quoted field on line {line}")]
    UnterminatedQuote { line: usize },
    #[error("Unsupported delimiter: {0:?}")]
    UnsupportedDelimiter(char),
    #[error("No data rows")]
    Empty,
}

/// Picks the delimiter with the most occurrences on the first non-empty
/// line; ties (including no occurrences at all) go to `;`, then `,`, then tab.
pub fn detect_delimiter(text: &str) -> char {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let counts = DELIMITER_PREFERENCE.map(|d| first.matches(d).count());
    let best = counts.iter().copied().max().unwrap_or(0);
    DELIMITER_PREFERENCE
        .iter()
        .zip(counts)
        .find(|(_, count)| *count == best)
        .map(|(d, _)| *d)
        .unwrap_or(';')
}

/// Quoted fields never span lines, so a line with an odd number of quote
/// characters (a doubled `""` counts twice) ends inside an open quote.
fn check_quotes(text: &str) -> Result<(), CsvError> {
    match text.lines().position(|line| line.matches('"').count() % 2 == 1) {
        Some(idx) => Err(CsvError::UnterminatedQuote { line: idx + 1 }),
        None => Ok(()),
    }
}

struct DatePatterns {
    iso: regex::Regex,
    day_first: regex::Regex,
    day_first_short: regex::Regex,
}

fn date_patterns() -> &'static DatePatterns {
    static PATTERNS: OnceLock<DatePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DatePatterns {
        iso: regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static pattern"),
        day_first: regex::Regex::new(r"^(\d{2})/(\d{2})/(\d{4})").expect("static pattern"),
        day_first_short: regex::Regex::new(r"^(\d{2})/(\d{2})/(\d{2})$").expect("static pattern"),
    })
}

/// `DD/MM/YYYY[ time]` and `DD/MM/YY` become `YYYY-MM-DD` (two-digit years
/// below 50 are 20YY, the rest 19YY). ISO dates and anything unrecognized
/// come back trimmed but otherwise unchanged.
pub fn normalize_date(raw: &str) -> String {
    let s = raw.trim();
    let patterns = date_patterns();
    if patterns.iso.is_match(s) {
        return s.to_string();
    }
    if let Some(c) = patterns.day_first.captures(s) {
        return format!("{}-{}-{}", &c[3], &c[2], &c[1]);
    }
    if let Some(c) = patterns.day_first_short.captures(s) {
        let century = if c[3].parse::<u32>().unwrap_or(0) < 50 { "20" } else { "19" };
        return format!("{}{}-{}-{}", century, &c[3], &c[2], &c[1]);
    }
    s.to_string()
}

/// Parses a bank-export amount. Whitespace (non-breaking included) and `€`
/// are ignored, `(12,50)` is negative. With a single kind of separator, one
/// occurrence is the decimal point and repeats are digit grouping; with both
/// `,` and `.`, the right-most one is the decimal point.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '€')
        .collect();
    let (negative, body) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };
    let body = body.strip_prefix('+').unwrap_or(body);
    if body.is_empty() {
        return None;
    }

    let canonical = match (body.rfind(','), body.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => body.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => body.replace(',', ""),
        (Some(_), None) if body.matches(',').count() == 1 => body.replace(',', "."),
        (Some(_), None) => body.replace(',', ""),
        (None, Some(_)) if body.matches('.').count() > 1 => body.replace('.', ""),
        _ => body.to_string(),
    };

    let value = Decimal::from_str(&canonical).ok()?;
    Some(if negative { -value } else { value })
}

/// Turns delimited bank-export text into transaction rows. Rows without a
/// resolvable date, label or amount are counted in `skipped`; an unterminated
/// quote anywhere rejects the whole input.
pub fn normalize_csv(text: &str, config: &NormalizeConfig) -> Result<NormalizedCsv, CsvError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let delimiter = config.delimiter.unwrap_or_else(|| detect_delimiter(text));
    let delimiter_byte = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or(CsvError::UnsupportedDelimiter(delimiter))?;

    check_quotes(text)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter_byte)
        .from_reader(text.as_bytes());
    let mut records = reader
        .records()
        .filter(|r| r.as_ref().map_or(true, |rec| rec.iter().any(|f| !f.trim().is_empty())));

    let mapping = if config.has_header {
        let header = records.next().ok_or(CsvError::Empty)??;
        let keys: Vec<String> = header
            .iter()
            .map(|h| {
                if config.normalize_headers {
                    normalize_header(h)
                } else {
                    h.trim().to_string()
                }
            })
            .collect();
        debug!(?keys, "CSV header");
        config
            .mapping
            .clone()
            .unwrap_or_else(|| CsvColumnMapping::from_header(&keys))
    } else {
        config.mapping.clone().unwrap_or_else(CsvColumnMapping::positional)
    };

    let field = |record: &csv::StringRecord, col: Option<usize>| {
        col.and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::new();
    let mut skipped = 0;
    let mut seen = 0;
    for result in records {
        let record = result?;
        seen += 1;

        let date = field(&record, mapping.date_column).map(|d| normalize_date(&d));
        let label = field(&record, mapping.label_column);
        let amount = mapping.amount(&record);

        match (date, label, amount) {
            (Some(date), Some(label), Some(amount)) => rows.push(RawTransactionRow {
                date,
                label,
                amount,
                account: field(&record, mapping.account_column),
            }),
            _ => skipped += 1,
        }
    }

    if seen == 0 {
        return Err(CsvError::Empty);
    }
    if skipped > 0 {
        debug!(skipped, kept = rows.len(), "Skipped CSV rows without date, label or amount");
    }

    Ok(NormalizedCsv {
        rows,
        skipped,
        delimiter,
    })
}
