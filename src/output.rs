//! Output data model: the normalized result the caller consumes.
//!
//! The wire schema is what the excluded web layer depends on:
//!
//! ```json
//! {
//!   "english":    [ { "name", "purpose", "dosage", "visual_timing", "timing",
//!                     "frequency", "duration", "warnings", "precautions",
//!                     "generic_alternative" } ],
//!   "translated": [ /* same shape, localized */ ],
//!   "dangerous_combinations": [ { "medicines", "risk", "risk_translated", "severity" } ]
//! }
//! ```
//!
//! Deserialisation is deliberately lenient: models wrap values in the wrong
//! scalar type, join medicine pairs with `" + "` instead of an array, or use
//! the older `reason` key. Repairing those shapes here means the normalizer
//! and every downstream consumer only ever see one canonical form.

use serde::{Deserialize, Deserializer, Serialize};

/// One medicine, fully populated after normalization.
///
/// Every field is guaranteed non-null (placeholder defaults are injected by
/// the normalizer), so callers never need null-checks. `visual_timing` is a
/// glyph sequence derived from the Morning-Afternoon-Night dosage triplet
/// when the model does not supply one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicineRecord {
    #[serde(deserialize_with = "de_stringish")]
    pub name: String,
    #[serde(deserialize_with = "de_stringish")]
    pub purpose: String,
    /// Morning-Afternoon-Night triplet shorthand, e.g. "1-0-1".
    #[serde(deserialize_with = "de_stringish")]
    pub dosage: String,
    /// Glyph sequence, e.g. "☀️ 🌙".
    #[serde(deserialize_with = "de_stringish")]
    pub visual_timing: String,
    #[serde(deserialize_with = "de_stringish")]
    pub timing: String,
    #[serde(deserialize_with = "de_stringish")]
    pub frequency: String,
    #[serde(deserialize_with = "de_stringish")]
    pub duration: String,
    #[serde(deserialize_with = "de_stringish")]
    pub warnings: String,
    #[serde(deserialize_with = "de_stringish")]
    pub precautions: String,
    #[serde(deserialize_with = "de_stringish")]
    pub generic_alternative: String,
}

/// A known risky interaction between two prescribed medicines.
///
/// Absence of warnings means "no known interaction found", not "not
/// checked" — the prompt instructs the model to check every pair and return
/// an empty collection when none are found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionWarning {
    /// The pair of medicine names involved, in prescription order.
    #[serde(deserialize_with = "de_medicines")]
    pub medicines: Vec<String>,
    /// Risk explanation in the canonical language.
    #[serde(alias = "reason", deserialize_with = "de_stringish")]
    pub risk: String,
    /// Risk explanation in the target language.
    #[serde(deserialize_with = "de_stringish")]
    pub risk_translated: String,
    pub severity: Severity,
}

/// Interaction severity. Unknown wire values degrade to `Medium` rather
/// than failing the whole response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    High,
    #[default]
    Medium,
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("high") {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// The sole object returned to the caller: either a fully populated result
/// or (via [`PipelineResult::failure`]) the error-report shape with the
/// `error` key set and both collections empty.
///
/// Invariant: `english` and `translated` always have equal cardinality and
/// ordering — position `i` in both refers to the same physical medicine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineResult {
    pub english: Vec<MedicineRecord>,
    pub translated: Vec<MedicineRecord>,
    pub dangerous_combinations: Vec<InteractionWarning>,
    /// Present only in the total-failure report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    /// The error-report shape: human-readable message plus empty
    /// collections, so templating callers can render it without branching.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            english: Vec::new(),
            translated: Vec::new(),
            dangerous_combinations: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// True when the model found no medicines in either collection.
    pub fn is_empty(&self) -> bool {
        self.english.is_empty() && self.translated.is_empty()
    }
}

// ── Lenient deserialisers ────────────────────────────────────────────────

/// Accept a string, number, bool, or null where a string is expected.
/// Models occasionally emit `"dosage": 500` or `"warnings": null`.
fn de_stringish<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected a string-like value, got {other}"
        ))),
    }
}

/// Accept either `["Med A", "Med B"]` or the joined form `"Med A + Med B"`.
fn de_medicines<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<String>),
        Joined(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::List(v) => Ok(v),
        Wire::Joined(s) => Ok(s
            .split('+')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()),
    }
}
