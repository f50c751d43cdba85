use serde::{Deserialize, Serialize};

/// Category given to anything the rules could not classify.
pub const DEFAULT_CATEGORY: &str = "Non catégorisé";

/// The fixed set of categories a transaction may carry, besides the default.
pub const CATEGORIES: &[&str] = &[
    "Salaire",
    "Loyer reçu",
    "Courses",
    "Énergie",
    "Transport",
    "Télécom",
    "Voyage",
    "Shopping",
    "Impôts & taxes",
    "Livraison",
    "Recettes (autres)",
    "Dépenses (autres)",
];

/// Buckets that still need a human decision.
pub const CATCH_ALL_CATEGORIES: &[&str] = &[DEFAULT_CATEGORY, "Dépenses (autres)", "Recettes (autres)"];

pub fn is_known_category(category: &str) -> bool {
    category == DEFAULT_CATEGORY || CATEGORIES.contains(&category)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchAllSet(Vec<String>);

impl CatchAllSet {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CatchAllSet(categories.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, category: &str) -> bool {
        self.0.iter().any(|c| c == category)
    }

    pub fn categories(&self) -> &[String] {
        &self.0
    }
}

impl Default for CatchAllSet {
    fn default() -> Self {
        CatchAllSet::new(CATCH_ALL_CATEGORIES.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catch_all_includes_default_category() {
        let set = CatchAllSet::default();
        assert!(set.contains(DEFAULT_CATEGORY));
        assert!(set.contains("Dépenses (autres)"));
        assert!(set.contains("Recettes (autres)"));
        assert!(!set.contains("Courses"));
    }

    #[test]
    fn known_categories() {
        assert!(is_known_category("Salaire"));
        assert!(is_known_category(DEFAULT_CATEGORY));
        assert!(!is_known_category("salaire"));
        assert!(!is_known_category(""));
    }
}
