use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

use patrimo_core::{category, Money, DEFAULT_CATEGORY};

use crate::util::normalize_label;

/// Category returned by the payroll fallback when no rule matched a credit.
pub const SALARY_CATEGORY: &str = "Salaire";

/// Keywords that mark an unmatched credit as salary.
const SALARY_HINTS: &[&str] = &["virement", "payroll", "salaire"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRule {
    pub category: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Any pattern appears as a substring of the normalized label.
    #[default]
    Contains,
    /// Any pattern, as a case-insensitive regex, matches the normalized label.
    Regex,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to parse rules TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Rule for '{category}' has an invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Rule for '{0}' has no patterns")]
    NoPatterns(String),
    #[error("Unknown category: '{0}'")]
    UnknownCategory(String),
}

fn rule(category: &str, patterns: &[&str]) -> CategoryRule {
    CategoryRule {
        category: category.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        match_type: MatchType::Contains,
    }
}

/// The built-in rule list. Order is the tie-break: when a label matches
/// several rules the earliest one wins, so a bare `uber` is filed under
/// Livraison even though Transport lists it too.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        rule("Salaire", &["salaire", "payroll", "paye", "paycheck", "paychck"]),
        rule("Loyer reçu", &["loyer", "rent"]),
        rule("Shopping", &["amazon", "fnac", "aliexpress", "shein"]),
        rule("Énergie", &["edf", "engie", "total", "energie", "gaz", "elec"]),
        rule("Courses", &["carrefour", "leclerc", "intermarch", "auchan", "monoprix", "casino"]),
        rule("Livraison", &["uber", "uber eats", "deliveroo", "just eat", "ubereats"]),
        rule("Transport", &["sncf", "ratp", "transilien", "blablacar", "bolt", "uber"]),
        rule("Télécom", &["free", "orange", "sfr", "bouygues", "fibre", "internet", "mobile"]),
        rule("Voyage", &["airbnb", "hotel", "booking", "expedia"]),
        rule("Impôts & taxes", &["impots", "fisc", "urssaf"]),
    ]
}

enum Matcher {
    Keywords(Vec<String>),
    Patterns(Vec<regex::Regex>),
}

/// A rule paired with its normalized keywords or compiled regexes.
struct CompiledRule {
    rule: CategoryRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn compile(rule: CategoryRule) -> Result<Self, RuleError> {
        if rule.patterns.is_empty() {
            return Err(RuleError::NoPatterns(rule.category));
        }
        let matcher = match rule.match_type {
            MatchType::Contains => {
                Matcher::Keywords(rule.patterns.iter().map(|p| normalize_label(p)).collect())
            }
            MatchType::Regex => Matcher::Patterns(
                rule.patterns
                    .iter()
                    .map(|p| {
                        regex::RegexBuilder::new(p)
                            .case_insensitive(true)
                            .build()
                            .map_err(|source| RuleError::InvalidPattern {
                                category: rule.category.clone(),
                                pattern: p.clone(),
                                source,
                            })
                    })
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(Self { rule, matcher })
    }

    fn matches(&self, normalized: &str) -> bool {
        match &self.matcher {
            Matcher::Keywords(keywords) => keywords.iter().any(|k| normalized.contains(k.as_str())),
            Matcher::Patterns(patterns) => patterns.iter().any(|re| re.is_match(normalized)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<CategoryRule>,
}

/// Ordered, immutable rule set. Built once at startup.
pub struct CategoryRuleEngine {
    rules: Vec<CompiledRule>,
}

impl CategoryRuleEngine {
    /// Keeps `rules` in the given order; every category must belong to the
    /// fixed catalogue.
    pub fn new(rules: Vec<CategoryRule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                if !category::is_known_category(&rule.category) {
                    return Err(RuleError::UnknownCategory(rule.category));
                }
                CompiledRule::compile(rule)
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Parses a `[[rules]]` array of tables.
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Self::new(file.rules)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &CategoryRule> {
        self.rules.iter().map(|cr| &cr.rule)
    }

    pub fn find_matching_rule(&self, label: &str) -> Option<&CategoryRule> {
        let normalized = normalize_label(label);
        self.rules
            .iter()
            .find(|cr| cr.matches(&normalized))
            .map(|cr| &cr.rule)
    }

    /// First matching rule's category; otherwise `Salaire` for a credit whose
    /// label looks like payroll, otherwise the default category.
    pub fn categorize(&self, label: &str, amount: Money) -> &str {
        if let Some(rule) = self.find_matching_rule(label) {
            return &rule.category;
        }
        let normalized = normalize_label(label);
        if amount.is_positive() && SALARY_HINTS.iter().any(|h| normalized.contains(h)) {
            return SALARY_CATEGORY;
        }
        DEFAULT_CATEGORY
    }
}

impl Default for CategoryRuleEngine {
    fn default() -> Self {
        // Built-in rules are plain keywords in known categories.
        Self {
            rules: default_rules()
                .into_iter()
                .filter_map(|r| CompiledRule::compile(r).ok())
                .collect(),
        }
    }
}

/// Categorizes with the built-in rules.
pub fn categorize(label: &str, amount: Money) -> String {
    static ENGINE: OnceLock<CategoryRuleEngine> = OnceLock::new();
    ENGINE
        .get_or_init(CategoryRuleEngine::default)
        .categorize(label, amount)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(cents: i64) -> Money {
        Money::from_cents(cents)
    }

    #[test]
    fn salary_label() {
        assert_eq!(categorize("SALAIRE AVRIL", eur(200_000)), "Salaire");
    }

    #[test]
    fn supermarket_label() {
        assert_eq!(categorize("CARREFOUR MARKET", eur(-5_430)), "Courses");
    }

    #[test]
    fn same_input_same_output() {
        let engine = CategoryRuleEngine::default();
        let first = engine.categorize("PRLV SEPA EDF CLIENTS", eur(-8_000)).to_string();
        for _ in 0..10 {
            assert_eq!(engine.categorize("PRLV SEPA EDF CLIENTS", eur(-8_000)), first);
        }
        assert_eq!(first, "Énergie");
    }

    #[test]
    fn earlier_rule_wins_on_overlap() {
        // "amazon" (Shopping) and "carrefour" (Courses): Shopping is listed first.
        assert_eq!(categorize("AMAZON CARREFOUR", eur(-1_000)), "Shopping");
        // "uber" appears under both Livraison and Transport.
        assert_eq!(categorize("UBER TRIP PARIS", eur(-1_500)), "Livraison");
        // Specificity is irrelevant: "loyer" beats the longer "carrefour".
        assert_eq!(categorize("LOYER PARKING CARREFOUR", eur(-9_000)), "Loyer reçu");
    }

    #[test]
    fn label_normalization() {
        assert_eq!(categorize("  Impôts   sur le revenu ", eur(-30_000)), "Impôts & taxes");
        assert_eq!(categorize("IMPOTS.GOUV", eur(-30_000)), "Impôts & taxes");
        assert_eq!(categorize("Électricité ÉNERGIE verte", eur(-30_000)), "Énergie");
    }

    #[test]
    fn payroll_heuristic_only_for_credits() {
        assert_eq!(categorize("VIREMENT DE ACME SAS", eur(250_000)), "Salaire");
        assert_eq!(categorize("VIREMENT A JEAN", eur(-5_000)), DEFAULT_CATEGORY);
        assert_eq!(categorize("VIREMENT NUL", eur(0)), DEFAULT_CATEGORY);
    }

    #[test]
    fn no_match_falls_back_to_default() {
        assert_eq!(categorize("BOULANGERIE DU COIN", eur(-320)), DEFAULT_CATEGORY);
    }

    #[test]
    fn default_rule_order_is_exposed() {
        let engine = CategoryRuleEngine::default();
        let order: Vec<&str> = engine.rules().map(|r| r.category.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "Salaire",
                "Loyer reçu",
                "Shopping",
                "Énergie",
                "Courses",
                "Livraison",
                "Transport",
                "Télécom",
                "Voyage",
                "Impôts & taxes",
            ]
        );
    }

    #[test]
    fn custom_rules_keep_given_order() {
        let engine = CategoryRuleEngine::new(vec![
            rule("Transport", &["station"]),
            rule("Énergie", &["total"]),
        ])
        .unwrap();
        assert_eq!(engine.categorize("TOTAL STATION A6", eur(-6_000)), "Transport");
    }

    #[test]
    fn regex_rules_from_toml() {
        let toml = r#"
            [[rules]]
            category = "Transport"
            patterns = ['^peage\b', 'autoroute']
            match_type = "regex"

            [[rules]]
            category = "Courses"
            patterns = ["lidl"]
        "#;
        let engine = CategoryRuleEngine::from_toml(toml).unwrap();
        assert_eq!(engine.categorize("PÉAGE APRR", eur(-1_200)), "Transport");
        assert_eq!(engine.categorize("LIDL 123", eur(-1_200)), "Courses");
        assert_eq!(engine.categorize("DIVERS", eur(-1_200)), DEFAULT_CATEGORY);
    }

    #[test]
    fn invalid_regex_is_a_load_error() {
        let err = CategoryRuleEngine::new(vec![CategoryRule {
            category: "Courses".into(),
            patterns: vec!["(unclosed".into()],
            match_type: MatchType::Regex,
        }])
        .err()
        .unwrap();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = CategoryRuleEngine::new(vec![rule("Jardinage", &["truffaut"])])
            .err()
            .unwrap();
        assert!(matches!(err, RuleError::UnknownCategory(c) if c == "Jardinage"));
    }

    #[test]
    fn empty_pattern_list_is_rejected() {
        let err = CategoryRuleEngine::new(vec![rule("Courses", &[])]).err().unwrap();
        assert!(matches!(err, RuleError::NoPatterns(_)));
    }
}
