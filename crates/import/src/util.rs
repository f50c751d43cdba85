use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Decomposes to NFD and drops combining marks: `"Impôts"` → `"Impots"`.
pub fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercase, diacritic-free, single-spaced form used for rule matching.
pub fn normalize_label(s: &str) -> String {
    strip_diacritics(&s.to_lowercase())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable field key for a header cell: `"Date d'opération "` → `"date_doperation"`.
pub fn normalize_header(s: &str) -> String {
    normalize_label(s.trim())
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == ' ')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
