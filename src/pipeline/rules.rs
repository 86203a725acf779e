//! Keyword rules for urgency classification.
//!
//! Rules are evaluated in priority order on the lower-cased text; the first
//! rule with a keyword occurring as a substring decides the colour. Urgent
//! keywords always win. Text no rule recognises is `ATTENTION`.

use tracing::debug;

use crate::conversations::model::ColorCode;

/// A keyword list mapped to one colour.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub color: ColorCode,
    /// Lower-case keywords, matched as substrings.
    pub keywords: Vec<String>,
    /// Lower values are evaluated first.
    pub priority: u8,
}

impl KeywordRule {
    pub fn new(color: ColorCode, priority: u8, keywords: &[&str]) -> Self {
        Self {
            color,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            priority,
        }
    }

    fn first_match<'a>(&'a self, lowered: &str) -> Option<&'a str> {
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }
}

/// A successful rule match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub color: ColorCode,
    pub keyword: String,
}

/// Deterministic keyword classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
    fallback: ColorCode,
}

const URGENT_KEYWORDS: &[&str] = &[
    "dolor", "emergencia", "sangrado", "sangra", "trauma", "infección", "infeccion",
    "hinchazón", "hinchazon", "hinchado", "urgente", "pain", "emergency", "bleeding",
    "infection", "swelling", "urgent",
];

const RESOLVED_KEYWORDS: &[&str] = &[
    "gracias", "entendido", "perfecto", "ok", "bien", "thanks", "thank you", "understood",
    "perfect", "fine",
];

const ATTENTION_KEYWORDS: &[&str] = &[
    "cita", "consulta", "tratamiento", "precio", "horario", "información", "informacion",
    "appointment", "consultation", "treatment", "price", "schedule", "information",
];

impl KeywordClassifier {
    /// The clinic's keyword lists: urgent, then resolved, then attention.
    pub fn default_rules() -> Self {
        Self {
            rules: vec![
                KeywordRule::new(ColorCode::Urgent, 0, URGENT_KEYWORDS),
                KeywordRule::new(ColorCode::Resolved, 10, RESOLVED_KEYWORDS),
                KeywordRule::new(ColorCode::Attention, 20, ATTENTION_KEYWORDS),
            ],
            fallback: ColorCode::Attention,
        }
    }

    /// A classifier with no rules (for testing).
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fallback: ColorCode::Attention,
        }
    }

    /// Add a rule, keeping the list sorted by priority.
    pub fn add_rule(&mut self, rule: KeywordRule) {
        self.rules.push(rule);
        self.rules.sort_by_key(|r| r.priority);
    }

    /// The rule that matched, if any. `None` means the text fell through to the default.
    pub fn evaluate(&self, text: &str) -> Option<RuleMatch> {
        let lowered = text.to_lowercase();
        for rule in &self.rules {
            if let Some(keyword) = rule.first_match(&lowered) {
                debug!(color = %rule.color, keyword, "Keyword rule matched");
                return Some(RuleMatch {
                    color: rule.color,
                    keyword: keyword.to_string(),
                });
            }
        }
        None
    }

    /// Classify text. Total: unrecognised text is `ATTENTION`.
    pub fn classify(&self, text: &str) -> ColorCode {
        self.evaluate(text).map(|m| m.color).unwrap_or(self.fallback)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}
